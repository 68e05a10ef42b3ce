//! Chains of aligned frames along approximate orbits.
//!
//! Both generators follow the same plan: an initial frame per orbit point
//! from [`initial_frame`], local return-map derivatives between consecutive
//! frames (forward in time and, with the flow reversed, backward), invariant
//! directions from the derivative chains, and re-aligned frames.

mod homoclinic;
mod periodic;

pub use homoclinic::HomoclinicCoordsysGenerator;
pub use periodic::{PeriodicCoordsysGenerator, PeriodicFrames};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alignment::initial_frame;
use crate::coordsys::{LocalCoordinateSystem, FLOW_COLUMN};
use crate::error::{CapError, Result};
use crate::linalg;
use crate::maps::ExtensionSettings;
use crate::oracle::PoincareOracle;
use crate::poincare::LocalPoincareMap;
use crate::traits::{ConstraintFunction, Map, Scalar, VectorField};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Integration order handed to the oracle.
    pub order: usize,
    pub power_iterations: usize,
    /// Largest accepted distance between a mapped frame origin and the next
    /// origin before a warning is logged.
    pub origin_tolerance: f64,
    /// Largest accepted condition number of a generated frame basis.
    pub condition_limit: f64,
    pub extension: ExtensionSettings,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            order: 60,
            power_iterations: 50,
            origin_tolerance: 1e-8,
            condition_limit: 1e8,
            extension: ExtensionSettings::default(),
        }
    }
}

impl GeneratorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.power_iterations == 0 {
            return Err(CapError::InvalidInput(
                "power_iterations must be greater than zero.".to_string(),
            ));
        }
        if !(self.origin_tolerance > 0.0) || !(self.condition_limit > 1.0) {
            return Err(CapError::InvalidInput(format!(
                "Origin tolerance must be positive and the condition limit above one, got {} and {}.",
                self.origin_tolerance, self.condition_limit
            )));
        }
        Ok(())
    }
}

/// The time-reversed vector field `-f`.
pub struct Reversed<'a, S: Scalar> {
    field: &'a dyn VectorField<S>,
}

impl<'a, S: Scalar> Reversed<'a, S> {
    pub fn new(field: &'a dyn VectorField<S>) -> Self {
        Self { field }
    }
}

impl<S: Scalar> VectorField<S> for Reversed<'_, S> {
    fn dimension(&self) -> usize {
        self.field.dimension()
    }

    fn eval(&self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(-self.field.eval(x)?)
    }

    fn eval_with_derivative(&self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let (f, df) = self.field.eval_with_derivative(x)?;
        Ok((-f, -df))
    }
}

/// `frame` with its flow column negated, the target frame of a backward map.
pub(crate) fn reversed_flow<S: Scalar>(
    frame: &LocalCoordinateSystem<S>,
) -> Result<LocalCoordinateSystem<S>> {
    let mut directions = frame.directions().clone();
    directions.column_mut(FLOW_COLUMN).neg_mut();
    frame.with_directions(directions)
}

pub(crate) fn frame_at<C>(
    field: &dyn VectorField<f64>,
    constraint: &C,
    point: &DVector<f64>,
) -> Result<LocalCoordinateSystem<f64>>
where
    C: ConstraintFunction<f64> + ?Sized,
{
    initial_frame(point, &field.eval(point)?, &constraint.gradient(point)?)
}

/// Derivative at the origin of the local return map from `src` to `dst`.
pub(crate) fn local_derivative<C>(
    field: &dyn VectorField<f64>,
    constraint: &C,
    oracle: &mut dyn PoincareOracle<f64>,
    src: &LocalCoordinateSystem<f64>,
    dst: &LocalCoordinateSystem<f64>,
    settings: &GeneratorSettings,
) -> Result<DMatrix<f64>>
where
    C: ConstraintFunction<f64> + ?Sized,
{
    let mut map = LocalPoincareMap::new(
        field,
        constraint,
        settings.order,
        src.clone(),
        dst.clone(),
        oracle,
        settings.extension,
    )?;
    let (image, derivative) = map.eval_with_derivative(&DVector::zeros(2))?;
    let residual = image.amax();
    if residual > settings.origin_tolerance {
        warn!(
            residual,
            tolerance = settings.origin_tolerance,
            "Frame origin does not map onto the next origin"
        );
    }
    debug!(
        residual,
        return_time = ?map.last_return_time(),
        "Local return map derivative"
    );
    Ok(derivative)
}

/// Rejects bases whose condition number exceeds `limit`.
pub(crate) fn check_conditioning(frames: &[LocalCoordinateSystem<f64>], limit: f64) -> Result<()> {
    for (i, frame) in frames.iter().enumerate() {
        let rcond = linalg::inverse_condition(frame.directions());
        if !(rcond * limit >= 1.0) {
            return Err(CapError::DegenerateFrame(format!(
                "Frame {} is ill-conditioned (condition number {:e}).",
                i,
                1.0 / rcond
            )));
        }
        if rcond * limit < 100.0 {
            warn!(frame = i, condition = 1.0 / rcond, "Weakly conditioned frame");
        }
    }
    Ok(())
}

/// Product `chain[k-1] * ... * chain[0]`.
pub(crate) fn compose(chain: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
    let first = chain
        .first()
        .ok_or_else(|| CapError::InvalidInput("Empty derivative chain.".to_string()))?;
    Ok(chain[1..].iter().fold(first.clone(), |acc, d| d * acc))
}
