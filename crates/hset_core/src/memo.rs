use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::traits::{Map, Scalar};

/// Caches evaluations of a map keyed by the exact bit patterns of the input.
/// Two enclosures of the same real number are different keys.
pub struct MemoizedMap<S: Scalar, M> {
    inner: M,
    values: HashMap<Vec<u64>, DVector<S>>,
    derivatives: HashMap<Vec<u64>, (DVector<S>, DMatrix<S>)>,
    hits: usize,
}

fn key<S: Scalar>(x: &DVector<S>) -> Vec<u64> {
    let mut bits = Vec::with_capacity(2 * x.len());
    for v in x.iter() {
        v.push_key_bits(&mut bits);
    }
    bits
}

impl<S: Scalar, M: Map<S>> MemoizedMap<S, M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            values: HashMap::new(),
            derivatives: HashMap::new(),
            hits: 0,
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.derivatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.derivatives.clear();
    }
}

impl<S: Scalar, M: Map<S>> Map<S> for MemoizedMap<S, M> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn image_dimension(&self) -> usize {
        self.inner.image_dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        let k = key(x);
        if let Some(v) = self.values.get(&k) {
            self.hits += 1;
            return Ok(v.clone());
        }
        if let Some((v, _)) = self.derivatives.get(&k) {
            self.hits += 1;
            return Ok(v.clone());
        }
        let v = self.inner.eval(x)?;
        self.values.insert(k, v.clone());
        Ok(v)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let k = key(x);
        if let Some(hit) = self.derivatives.get(&k) {
            self.hits += 1;
            return Ok(hit.clone());
        }
        let result = self.inner.eval_with_derivative(x)?;
        self.derivatives.insert(k, result.clone());
        Ok(result)
    }
}
