use nalgebra::{DMatrix, DVector};

use crate::error::{ensure_dimension, CapError, Result};
use crate::traits::{Map, Scalar};

/// Ordered pipeline of stages, applied first to last.
pub struct CompositeMap<'a, S: Scalar> {
    stages: Vec<Box<dyn Map<S> + 'a>>,
}

impl<'a, S: Scalar> CompositeMap<'a, S> {
    /// Checks that every stage's image feeds the next stage's domain.
    pub fn new(stages: Vec<Box<dyn Map<S> + 'a>>) -> Result<Self> {
        if stages.is_empty() {
            return Err(CapError::InvalidInput(
                "A composite map needs at least one stage.".to_string(),
            ));
        }
        for pair in stages.windows(2) {
            ensure_dimension(
                "CompositeMap",
                pair[0].image_dimension(),
                pair[1].dimension(),
            )?;
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Appends a stage after the current last one.
    pub fn then(mut self, stage: Box<dyn Map<S> + 'a>) -> Result<Self> {
        if let Some(last) = self.stages.last() {
            ensure_dimension("CompositeMap", last.image_dimension(), stage.dimension())?;
        }
        self.stages.push(stage);
        Ok(self)
    }
}

impl<'a, S: Scalar> Map<S> for CompositeMap<'a, S> {
    fn dimension(&self) -> usize {
        self.stages.first().map_or(0, |s| s.dimension())
    }

    fn image_dimension(&self) -> usize {
        self.stages.last().map_or(0, |s| s.image_dimension())
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        let mut value = x.clone();
        for stage in self.stages.iter_mut() {
            value = stage.eval(&value)?;
        }
        Ok(value)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let n = x.len();
        let mut value = x.clone();
        let mut der = DMatrix::<S>::identity(n, n);
        for stage in self.stages.iter_mut() {
            let (next, d) = stage.eval_with_derivative(&value)?;
            der = d * der;
            value = next;
        }
        Ok((value, der))
    }
}
