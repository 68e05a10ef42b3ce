//! Map stages composed into verifiable pipelines.
//!
//! Every stage implements [`Map`]; a [`CompositeMap`] chains boxed stages and
//! applies the chain rule.

mod affine;
mod charts;
mod composite;
mod constraint;
mod gain;

pub use affine::{AffineMap, AffineSection, InverseAffineMap, Projection};
pub use charts::{BoxChart, Shear, Swap};
pub use composite::CompositeMap;
pub use constraint::{ConstraintExtension, ExtensionSettings};
pub use gain::GainMap;

#[cfg(test)]
pub(crate) mod testing {
    use nalgebra::{DMatrix, DVector};

    use crate::error::{ensure_dimension, Result};
    use crate::traits::{Map, Scalar};

    /// `x -> matrix * x + offset`, used as a synthetic stage in tests.
    pub struct LinearMap<S: Scalar> {
        pub matrix: DMatrix<S>,
        pub offset: DVector<S>,
    }

    impl LinearMap<f64> {
        pub fn from_rows(rows: usize, cols: usize, entries: &[f64]) -> Self {
            Self {
                matrix: DMatrix::from_row_slice(rows, cols, entries),
                offset: DVector::zeros(rows),
            }
        }
    }

    impl<S: Scalar> Map<S> for LinearMap<S> {
        fn dimension(&self) -> usize {
            self.matrix.ncols()
        }

        fn image_dimension(&self) -> usize {
            self.matrix.nrows()
        }

        fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
            ensure_dimension("LinearMap", self.dimension(), x.len())?;
            Ok(&self.matrix * x + &self.offset)
        }

        fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
            Ok((self.eval(x)?, self.matrix.clone()))
        }
    }
}
