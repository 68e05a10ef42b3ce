use nalgebra::{DMatrix, DVector};

use crate::coordsys::{LocalCoordinateSystem, FLOW_COLUMN};
use crate::error::{ensure_dimension, CapError, Result};
use crate::traits::{Map, Scalar};

/// `local -> origin + directions * local`.
#[derive(Debug, Clone)]
pub struct AffineMap<S: Scalar> {
    frame: LocalCoordinateSystem<S>,
}

impl<S: Scalar> AffineMap<S> {
    pub fn new(frame: LocalCoordinateSystem<S>) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &LocalCoordinateSystem<S> {
        &self.frame
    }
}

impl<S: Scalar> Map<S> for AffineMap<S> {
    fn dimension(&self) -> usize {
        self.frame.dimension()
    }

    fn image_dimension(&self) -> usize {
        self.frame.dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        self.frame.to_global(x)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        Ok((self.frame.to_global(x)?, self.frame.directions().clone()))
    }
}

/// `global -> directions^{-1} (global - origin)`.
#[derive(Debug, Clone)]
pub struct InverseAffineMap<S: Scalar> {
    frame: LocalCoordinateSystem<S>,
}

impl<S: Scalar> InverseAffineMap<S> {
    pub fn new(frame: LocalCoordinateSystem<S>) -> Self {
        Self { frame }
    }
}

impl<S: Scalar> Map<S> for InverseAffineMap<S> {
    fn dimension(&self) -> usize {
        self.frame.dimension()
    }

    fn image_dimension(&self) -> usize {
        self.frame.dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        self.frame.to_local(x)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        Ok((
            self.frame.to_local(x)?,
            self.frame.inverse_directions().clone(),
        ))
    }
}

/// Hyperplane `{x : <x - origin, normal> = 0}` anchored at a frame origin.
///
/// As a map it returns the signed value `<x - origin, normal>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineSection<S: Scalar> {
    origin: DVector<S>,
    normal: DVector<S>,
}

impl<S: Scalar> AffineSection<S> {
    pub fn new(origin: DVector<S>, normal: DVector<S>) -> Result<Self> {
        ensure_dimension("AffineSection", origin.len(), normal.len())?;
        if normal.iter().all(|v| v.mag() == 0.0) {
            return Err(CapError::DegenerateFrame(
                "Section normal is the zero vector.".to_string(),
            ));
        }
        Ok(Self { origin, normal })
    }

    /// Section through the frame origin, normal to its flow-tangent column.
    pub fn from_frame(frame: &LocalCoordinateSystem<S>) -> Result<Self> {
        Self::new(frame.origin().clone(), frame.column(FLOW_COLUMN)?)
    }

    pub fn origin(&self) -> &DVector<S> {
        &self.origin
    }

    pub fn normal(&self) -> &DVector<S> {
        &self.normal
    }

    pub fn value(&self, x: &DVector<S>) -> Result<S> {
        ensure_dimension("AffineSection", self.origin.len(), x.len())?;
        Ok((x - &self.origin).dot(&self.normal))
    }
}

impl<S: Scalar> Map<S> for AffineSection<S> {
    fn dimension(&self) -> usize {
        self.origin.len()
    }

    fn image_dimension(&self) -> usize {
        1
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(DVector::from_element(1, self.value(x)?))
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let value = self.eval(x)?;
        let der = DMatrix::from_row_slice(1, self.normal.len(), self.normal.as_slice());
        Ok((value, der))
    }
}

/// Keeps the listed components, in order.
#[derive(Debug, Clone)]
pub struct Projection {
    dimension: usize,
    indices: Vec<usize>,
}

impl Projection {
    pub fn new(dimension: usize, indices: Vec<usize>) -> Result<Self> {
        if let Some(bad) = indices.iter().find(|&&i| i >= dimension) {
            return Err(CapError::InvalidInput(format!(
                "Projection index {} out of range for dimension {}.",
                bad, dimension
            )));
        }
        Ok(Self { dimension, indices })
    }

    /// Projection onto the first `count` components.
    pub fn leading(dimension: usize, count: usize) -> Result<Self> {
        Self::new(dimension, (0..count).collect())
    }
}

impl<S: Scalar> Map<S> for Projection {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn image_dimension(&self) -> usize {
        self.indices.len()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("Projection", self.dimension, x.len())?;
        Ok(DVector::from_iterator(
            self.indices.len(),
            self.indices.iter().map(|&i| x[i]),
        ))
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let value = self.eval(x)?;
        let mut der = DMatrix::zeros(self.indices.len(), self.dimension);
        for (row, &i) in self.indices.iter().enumerate() {
            der[(row, i)] = S::one();
        }
        Ok((value, der))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> LocalCoordinateSystem<f64> {
        LocalCoordinateSystem::new(
            DVector::from_vec(vec![1.0, 2.0, 3.0]),
            DMatrix::from_row_slice(3, 3, &[0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0]),
        )
        .expect("nonsingular")
    }

    #[test]
    fn affine_and_inverse_compose_to_identity() {
        let mut forward = AffineMap::new(frame());
        let mut backward = InverseAffineMap::new(frame());
        let v = DVector::from_vec(vec![0.5, -0.25, 4.0]);
        let (x, dx) = forward.eval_with_derivative(&v).expect("forward");
        let (w, dw) = backward.eval_with_derivative(&x).expect("backward");
        assert!((w - v).amax() < 1e-15);
        assert!((dw * dx - DMatrix::identity(3, 3)).amax() < 1e-15);
    }

    #[test]
    fn section_uses_flow_column_as_normal() {
        let section = AffineSection::from_frame(&frame()).expect("section");
        assert_eq!(section.normal(), &DVector::from_vec(vec![0.0, 0.0, 2.0]));
        let x = DVector::from_vec(vec![7.0, -1.0, 4.0]);
        assert_eq!(section.value(&x).expect("value"), 2.0);
        assert!(AffineSection::new(DVector::zeros(2), DVector::<f64>::zeros(2)).is_err());
    }

    #[test]
    fn projection_selects_components() {
        let mut p = Projection::new(4, vec![2, 0]).expect("valid");
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let (y, d) = Map::<f64>::eval_with_derivative(&mut p, &x).expect("eval");
        assert_eq!(y, DVector::from_vec(vec![3.0, 1.0]));
        assert_eq!(d[(0, 2)], 1.0);
        assert_eq!(d[(1, 0)], 1.0);
        assert_eq!(d.sum(), 2.0);
        assert!(Projection::new(2, vec![2]).is_err());
        let err = Map::<f64>::eval(&mut p, &DVector::zeros(3)).expect_err("short input");
        assert!(matches!(err, CapError::DimensionMismatch { .. }));
    }
}
