use nalgebra::{DMatrix, DVector};

use crate::error::{ensure_dimension, Result};
use crate::traits::{Map, Scalar};

/// Uniform rescaling `x -> k x` with derivative `k I`.
#[derive(Debug, Clone, Copy)]
pub struct GainMap<S: Scalar> {
    gain: S,
    dimension: usize,
}

impl<S: Scalar> GainMap<S> {
    pub fn new(gain: S, dimension: usize) -> Self {
        Self { gain, dimension }
    }

    pub fn gain(&self) -> S {
        self.gain
    }

    /// The map with gain `1/k`.
    pub fn reciprocal(&self) -> Self {
        Self {
            gain: S::one() / self.gain,
            dimension: self.dimension,
        }
    }
}

impl<S: Scalar> Map<S> for GainMap<S> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn image_dimension(&self) -> usize {
        self.dimension
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("GainMap", self.dimension, x.len())?;
        let k = self.gain;
        Ok(x.map(|v| v * k))
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let value = self.eval(x)?;
        let k = self.gain;
        let der = DMatrix::<S>::identity(self.dimension, self.dimension).map(|v| v * k);
        Ok((value, der))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use proptest::prelude::*;

    #[test]
    fn scales_value_and_derivative() {
        let mut g = GainMap::new(3.0, 2);
        let (y, d) = g
            .eval_with_derivative(&DVector::from_vec(vec![1.0, -2.0]))
            .expect("eval");
        assert_eq!(y, DVector::from_vec(vec![3.0, -6.0]));
        assert_eq!(d, DMatrix::from_row_slice(2, 2, &[3.0, 0.0, 0.0, 3.0]));
        assert!(g.eval(&DVector::zeros(3)).is_err());
    }

    #[test]
    fn reciprocal_gain_is_exact_for_dyadic_enclosures() {
        let mut up = GainMap::new(Interval::point(0.125), 2);
        let mut down = up.reciprocal();
        let x = DVector::from_vec(vec![
            Interval::new(-1.0, 1.0).expect("valid"),
            Interval::point(0.75),
        ]);
        let (y, dy) = up.eval_with_derivative(&x).expect("up");
        let (z, dz) = down.eval_with_derivative(&y).expect("down");
        assert_eq!(z, x);
        assert_eq!(&dz * &dy, DMatrix::<Interval>::identity(2, 2));
    }

    proptest! {
        #[test]
        fn gain_roundtrip_restores_vector(
            k in 1e-12f64..1e3,
            x in prop::collection::vec(-1e3f64..1e3, 3),
        ) {
            let mut up = GainMap::new(k, 3);
            let mut down = up.reciprocal();
            let x = DVector::from_vec(x);
            let back = down.eval(&up.eval(&x).expect("up")).expect("down");
            for i in 0..3 {
                prop_assert!((back[i] - x[i]).abs() <= 4.0 * f64::EPSILON * x[i].abs());
            }
        }

        #[test]
        fn interval_gain_roundtrip_encloses_vector(
            k in 1e-12f64..1e3,
            x in prop::collection::vec(-1e3f64..1e3, 2),
        ) {
            let mut up = GainMap::new(Interval::point(k), 2);
            let mut down = up.reciprocal();
            let x: DVector<Interval> = DVector::from_vec(x).map(Interval::point);
            let back = down.eval(&up.eval(&x).expect("up")).expect("down");
            for i in 0..2 {
                prop_assert!(x[i].is_subset_of(&back[i]));
            }
        }
    }
}
