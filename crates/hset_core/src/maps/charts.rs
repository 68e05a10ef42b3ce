//! Planar charts placed around a verified map: rectangle charts onto the
//! canonical box, the shear alignment around a fixed point, and the swap `J`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_dimension, CapError, Result};
use crate::traits::{Map, Scalar};

/// Affine charts between the canonical box `[-1,1]^2` and the rectangle
/// `[0,d] x [a,b]` (or its transpose).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoxChart {
    /// `(xi, eta) -> (d (xi+1)/2, ((a+b) + eta (b-a))/2)`
    Rectangle { d: f64, a: f64, b: f64 },
    /// `Rectangle` followed by swapping the two outputs.
    RectangleTransposed { d: f64, a: f64, b: f64 },
    RectangleInverse { d: f64, a: f64, b: f64 },
    /// Swap the two inputs, then `RectangleInverse`.
    RectangleTransposedInverse { d: f64, a: f64, b: f64 },
}

impl BoxChart {
    fn parameters(&self) -> (f64, f64, f64) {
        match *self {
            BoxChart::Rectangle { d, a, b }
            | BoxChart::RectangleTransposed { d, a, b }
            | BoxChart::RectangleInverse { d, a, b }
            | BoxChart::RectangleTransposedInverse { d, a, b } => (d, a, b),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (d, a, b) = self.parameters();
        if !(d.is_finite() && a.is_finite() && b.is_finite()) {
            return Err(CapError::InvalidInput(format!(
                "Chart parameters must be finite: {:?}",
                self
            )));
        }
        if d == 0.0 || a == b {
            return Err(CapError::DegenerateFrame(format!(
                "Chart collapses the rectangle: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// The chart undoing this one.
    pub fn inverse(&self) -> Self {
        let (d, a, b) = self.parameters();
        match self {
            BoxChart::Rectangle { .. } => BoxChart::RectangleInverse { d, a, b },
            BoxChart::RectangleTransposed { .. } => BoxChart::RectangleTransposedInverse { d, a, b },
            BoxChart::RectangleInverse { .. } => BoxChart::Rectangle { d, a, b },
            BoxChart::RectangleTransposedInverse { .. } => BoxChart::RectangleTransposed { d, a, b },
        }
    }

    /// Linear part `m` and offset `c` of the chart `x -> m x + c`.
    fn affine_parts<S: Scalar>(&self) -> (DMatrix<S>, DVector<S>) {
        let (d, a, b) = self.parameters();
        let half = S::from_f64(0.5);
        let two = S::from_f64(2.0);
        let (d, a, b) = (S::from_f64(d), S::from_f64(a), S::from_f64(b));
        let zero = S::zero();
        let one = S::one();
        match self {
            BoxChart::Rectangle { .. } => (
                DMatrix::from_row_slice(2, 2, &[d * half, zero, zero, (b - a) * half]),
                DVector::from_vec(vec![d * half, (a + b) * half]),
            ),
            BoxChart::RectangleTransposed { .. } => (
                DMatrix::from_row_slice(2, 2, &[zero, (b - a) * half, d * half, zero]),
                DVector::from_vec(vec![(a + b) * half, d * half]),
            ),
            BoxChart::RectangleInverse { .. } => (
                DMatrix::from_row_slice(2, 2, &[two / d, zero, zero, two / (b - a)]),
                DVector::from_vec(vec![-one, -(a + b) / (b - a)]),
            ),
            BoxChart::RectangleTransposedInverse { .. } => (
                DMatrix::from_row_slice(2, 2, &[zero, two / d, two / (b - a), zero]),
                DVector::from_vec(vec![-one, -(a + b) / (b - a)]),
            ),
        }
    }
}

impl<S: Scalar> Map<S> for BoxChart {
    fn dimension(&self) -> usize {
        2
    }

    fn image_dimension(&self) -> usize {
        2
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(self.eval_with_derivative(x)?.0)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        ensure_dimension("BoxChart", 2, x.len())?;
        self.validate()?;
        let (m, c) = self.affine_parts::<S>();
        Ok((&m * x + c, m))
    }
}

/// Shear alignment `eta(L)(x, y) = ((x - L y)/(1+L), (y - L x)/(1+L))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shear {
    pub l: f64,
}

impl Shear {
    pub fn new(l: f64) -> Result<Self> {
        if !l.is_finite() || l == -1.0 || l == 1.0 {
            return Err(CapError::DegenerateFrame(format!(
                "Shear parameter {} is singular.",
                l
            )));
        }
        Ok(Self { l })
    }

    fn matrix<S: Scalar>(&self) -> DMatrix<S> {
        let l = S::from_f64(self.l);
        let scale = S::one() / (S::one() + l);
        DMatrix::from_row_slice(2, 2, &[scale, -l * scale, -l * scale, scale])
    }
}

impl<S: Scalar> Map<S> for Shear {
    fn dimension(&self) -> usize {
        2
    }

    fn image_dimension(&self) -> usize {
        2
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(self.eval_with_derivative(x)?.0)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        ensure_dimension("Shear", 2, x.len())?;
        let m = self.matrix::<S>();
        Ok((&m * x, m))
    }
}

/// `J(x, y) = (y, x)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Swap;

impl<S: Scalar> Map<S> for Swap {
    fn dimension(&self) -> usize {
        2
    }

    fn image_dimension(&self) -> usize {
        2
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("Swap", 2, x.len())?;
        Ok(DVector::from_vec(vec![x[1], x[0]]))
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let y = self.eval(x)?;
        let m = DMatrix::from_row_slice(2, 2, &[S::zero(), S::one(), S::one(), S::zero()]);
        Ok((y, m))
    }
}
