//! Unstable/stable direction estimates from chains of return-map derivatives.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ensure_dimension, CapError, Result};
use crate::linalg;

/// Normalized dominant eigendirection of `matrix` and its eigenvalue
/// estimate. Each iterate is oriented to agree with the previous one, so a
/// negative dominant eigenvalue shows up as a negative estimate rather than
/// as a flipping direction.
pub fn power_iteration(
    matrix: &DMatrix<f64>,
    seed: &DVector<f64>,
    iterations: usize,
) -> Result<(DVector<f64>, f64)> {
    ensure_dimension("power_iteration", matrix.ncols(), seed.len())?;
    ensure_dimension("power_iteration", matrix.nrows(), matrix.ncols())?;
    let norm = seed.norm();
    if !(norm > 0.0) || !norm.is_finite() {
        return Err(CapError::InvalidInput(
            "Power iteration needs a nonzero finite seed.".to_string(),
        ));
    }

    let mut v = seed / norm;
    let mut eigenvalue = 0.0;
    for _ in 0..iterations {
        let mut w = matrix * &v;
        let growth = w.norm();
        if !(growth > 0.0) || !growth.is_finite() {
            return Err(CapError::DegenerateFrame(format!(
                "Power iteration collapsed (growth {}).",
                growth
            )));
        }
        let sign = if w.dot(&v) < 0.0 { -1.0 } else { 1.0 };
        w *= sign / growth;
        eigenvalue = sign * growth;
        v = w;
    }
    Ok((v, eigenvalue))
}

/// Propagates a direction along a derivative chain, dividing every step by the
/// geometric mean `total^(1/n)` of the chain's expansion so the propagated
/// vectors keep comparable magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionShifting {
    factor: f64,
}

impl DirectionShifting {
    pub fn new(derivatives: &[DMatrix<f64>], seed: &DVector<f64>) -> Result<Self> {
        if derivatives.is_empty() {
            return Err(CapError::InvalidInput(
                "Direction shifting needs at least one derivative.".to_string(),
            ));
        }
        let mut v = seed.clone();
        for d in derivatives {
            ensure_dimension("DirectionShifting", d.ncols(), v.len())?;
            v = d * v;
        }
        let total = v.norm() / seed.norm();
        if !(total > 0.0) || !total.is_finite() {
            return Err(CapError::DegenerateFrame(format!(
                "Total expansion {} along the chain is not usable.",
                total
            )));
        }
        let factor = total.powf(1.0 / derivatives.len() as f64);
        debug!(total, factor, steps = derivatives.len(), "Direction shifting factor");
        Ok(Self { factor })
    }

    pub fn with_factor(factor: f64) -> Result<Self> {
        if !(factor > 0.0) || !factor.is_finite() {
            return Err(CapError::InvalidInput(format!(
                "Shifting factor must be positive, got {}.",
                factor
            )));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// `seed` followed by one direction per derivative.
    pub fn propagate(
        &self,
        derivatives: &[DMatrix<f64>],
        seed: &DVector<f64>,
    ) -> Result<Vec<DVector<f64>>> {
        let mut out = Vec::with_capacity(derivatives.len() + 1);
        out.push(seed.clone());
        for d in derivatives {
            let last = &out[out.len() - 1];
            ensure_dimension("DirectionShifting", d.ncols(), last.len())?;
            let next = (d * last) / self.factor;
            out.push(next);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantDirections {
    pub unstable: DVector<f64>,
    pub stable: DVector<f64>,
    /// Dominant eigenvalue estimates of the combined chains.
    pub unstable_factor: f64,
    pub stable_factor: f64,
}

/// Unstable direction of `backward^{-1} forward` and stable direction of
/// `forward^{-1} backward`, for total derivatives of a forward and a backward
/// chain based at the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstableDirectionsGenerator {
    pub iterations: usize,
}

impl Default for UnstableDirectionsGenerator {
    fn default() -> Self {
        Self { iterations: 50 }
    }
}

impl UnstableDirectionsGenerator {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }

    pub fn generate(
        &self,
        forward: &DMatrix<f64>,
        backward: &DMatrix<f64>,
    ) -> Result<InvariantDirections> {
        let dim = forward.nrows();
        ensure_dimension("UnstableDirectionsGenerator", dim, backward.nrows())?;
        if dim < 2 {
            return Err(CapError::UnsupportedConfiguration(format!(
                "Need at least two local directions, got {}.",
                dim
            )));
        }
        let expanding = linalg::inverse(backward)? * forward;
        let contracting = linalg::inverse(forward)? * backward;

        let mut e1 = DVector::zeros(dim);
        let mut e2 = DVector::zeros(dim);
        e1[0] = 1.0;
        e2[1] = 1.0;

        let (unstable, unstable_factor) = power_iteration(&expanding, &e1, self.iterations)?;
        let (stable, stable_factor) = power_iteration(&contracting, &e2, self.iterations)?;
        debug!(
            unstable = ?unstable.as_slice(),
            stable = ?stable.as_slice(),
            unstable_factor,
            stable_factor,
            "Invariant directions"
        );
        Ok(InvariantDirections {
            unstable,
            stable,
            unstable_factor,
            stable_factor,
        })
    }
}
