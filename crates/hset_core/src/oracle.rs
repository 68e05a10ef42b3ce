//! Poincare return oracles.
//!
//! A [`PoincareOracle`] integrates a vector field from a state until the
//! trajectory crosses an affine section and reports the crossing point, its
//! derivative with respect to the initial state, and the return time. The
//! covering checks need an oracle with validated enclosures, which is supplied
//! by the caller; [`FlowPoincareOracle`] is the approximate `f64` oracle used to
//! generate frames.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::condition_check::SampledTrajectory;
use crate::error::{ensure_dimension, CapError, Result};
use crate::maps::AffineSection;
use crate::solvers::Stepper;
use crate::traits::{DynamicalSystem, Scalar, Steppable, VectorField};

#[derive(Debug, Clone, PartialEq)]
pub struct PoincareReturn<S: Scalar> {
    pub state: DVector<S>,
    /// Derivative of the crossing point with respect to the initial state,
    /// present when it was requested.
    pub derivative: Option<DMatrix<S>>,
    pub return_time: S,
}

pub trait PoincareOracle<S: Scalar> {
    /// First crossing of `section` (from its negative to its positive side)
    /// by the trajectory of `field` through `state`. `order` is the
    /// truncation order requested from the integrator.
    fn cross_section(
        &mut self,
        field: &dyn VectorField<S>,
        order: usize,
        state: &DVector<S>,
        section: &AffineSection<S>,
        with_derivative: bool,
    ) -> Result<PoincareReturn<S>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowOracleSettings {
    pub stepper: Stepper,
    pub step: f64,
    pub max_steps: usize,
    /// Crossings earlier than this are ignored, so a start on the section
    /// itself does not count as a return.
    pub min_return_time: f64,
    pub crossing_tolerance: f64,
    pub refinement_steps: usize,
}

impl Default for FlowOracleSettings {
    fn default() -> Self {
        Self {
            stepper: Stepper::Tsit5,
            step: 1e-3,
            max_steps: 2_000_000,
            min_return_time: 1e-6,
            crossing_tolerance: 1e-14,
            refinement_steps: 12,
        }
    }
}

impl FlowOracleSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.step > 0.0) || !self.step.is_finite() {
            return Err(CapError::InvalidInput(format!(
                "Integration step must be positive, got {}.",
                self.step
            )));
        }
        if self.max_steps == 0 {
            return Err(CapError::InvalidInput(
                "max_steps must be greater than zero.".to_string(),
            ));
        }
        if self.min_return_time < 0.0 || self.crossing_tolerance <= 0.0 {
            return Err(CapError::InvalidInput(
                "Return time and crossing tolerance must be non-negative.".to_string(),
            ));
        }
        Ok(())
    }
}

/// State plus row-major fundamental matrix `Phi' = Df(x) Phi`.
struct VariationalSystem<'a> {
    field: &'a dyn VectorField<f64>,
    dim: usize,
    with_derivative: bool,
}

impl DynamicalSystem for VariationalSystem<'_> {
    fn dimension(&self) -> usize {
        if self.with_derivative {
            self.dim + self.dim * self.dim
        } else {
            self.dim
        }
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.dim;
        let state = DVector::from_column_slice(&x[..n]);
        if !self.with_derivative {
            match self.field.eval(&state) {
                Ok(f) => out[..n].copy_from_slice(f.as_slice()),
                Err(_) => out.fill(f64::NAN),
            }
            return;
        }
        let (f, jac) = match self.field.eval_with_derivative(&state) {
            Ok(v) => v,
            Err(_) => {
                out.fill(f64::NAN);
                return;
            }
        };
        out[..n].copy_from_slice(f.as_slice());
        let phi = DMatrix::from_row_slice(n, n, &x[n..]);
        let dphi = jac * phi;
        for r in 0..n {
            for c in 0..n {
                out[n + r * n + c] = dphi[(r, c)];
            }
        }
    }
}

/// Fixed-step Runge-Kutta return map with Newton refinement of the crossing.
///
/// Not validated: results are approximations suitable for building frames.
pub struct FlowPoincareOracle {
    settings: FlowOracleSettings,
    record_trajectory: bool,
    trajectory: Vec<(f64, DVector<f64>)>,
}

impl FlowPoincareOracle {
    pub fn new(settings: FlowOracleSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            record_trajectory: false,
            trajectory: Vec::new(),
        })
    }

    /// Keep the integration samples of every call for later inspection.
    pub fn recording(mut self) -> Self {
        self.record_trajectory = true;
        self
    }

    pub fn settings(&self) -> &FlowOracleSettings {
        &self.settings
    }

    /// Samples of the last `cross_section` call, when recording.
    pub fn last_trajectory(&self) -> Result<SampledTrajectory> {
        SampledTrajectory::new(self.trajectory.clone())
    }

    /// Integrates `field` for `duration` and returns the sampled trajectory.
    pub fn trajectory(
        &self,
        field: &dyn VectorField<f64>,
        state: &DVector<f64>,
        duration: f64,
    ) -> Result<SampledTrajectory> {
        let n = field.dimension();
        ensure_dimension("FlowPoincareOracle", n, state.len())?;
        let system = VariationalSystem {
            field,
            dim: n,
            with_derivative: false,
        };
        let mut solver = self.settings.stepper.build(n);
        let steps = (duration.abs() / self.settings.step).ceil().max(1.0) as usize;
        let dt = duration / steps as f64;
        let mut t = 0.0;
        let mut y: Vec<f64> = state.iter().copied().collect();
        let mut samples = vec![(0.0, state.clone())];
        for _ in 0..steps {
            solver.step(&system, &mut t, &mut y, dt);
            check_finite(&y, t)?;
            samples.push((t, DVector::from_column_slice(&y)));
        }
        SampledTrajectory::new(samples)
    }
}

fn check_finite(y: &[f64], t: f64) -> Result<()> {
    if y.iter().any(|v| !v.is_finite()) {
        return Err(CapError::OracleNonConvergence(format!(
            "Trajectory left the domain of the vector field at t = {}.",
            t
        )));
    }
    Ok(())
}

impl PoincareOracle<f64> for FlowPoincareOracle {
    fn cross_section(
        &mut self,
        field: &dyn VectorField<f64>,
        order: usize,
        state: &DVector<f64>,
        section: &AffineSection<f64>,
        with_derivative: bool,
    ) -> Result<PoincareReturn<f64>> {
        let n = field.dimension();
        ensure_dimension("FlowPoincareOracle", n, state.len())?;
        ensure_dimension("FlowPoincareOracle section", n, section.origin().len())?;
        trace!(order, with_derivative, "crossing section");

        let system = VariationalSystem {
            field,
            dim: n,
            with_derivative,
        };
        let mut solver = self.settings.stepper.build(system.dimension());
        let mut y: Vec<f64> = state.iter().copied().collect();
        if with_derivative {
            let id = DMatrix::<f64>::identity(n, n);
            for r in 0..n {
                for c in 0..n {
                    y.push(id[(r, c)]);
                }
            }
        }

        self.trajectory.clear();
        let sigma = |y: &[f64]| section.value(&DVector::from_column_slice(&y[..n]));
        let mut t = 0.0;
        let mut previous = sigma(&y)?;
        let mut crossed = false;
        for _ in 0..self.settings.max_steps {
            solver.step(&system, &mut t, &mut y, self.settings.step);
            check_finite(&y, t)?;
            if self.record_trajectory {
                self.trajectory
                    .push((t, DVector::from_column_slice(&y[..n])));
            }
            let current = sigma(&y)?;
            if t >= self.settings.min_return_time && previous < 0.0 && current >= 0.0 {
                crossed = true;
                break;
            }
            previous = current;
        }
        if !crossed {
            return Err(CapError::OracleNonConvergence(format!(
                "No section crossing within {} steps.",
                self.settings.max_steps
            )));
        }

        // Newton in time: t <- t - sigma / (normal . f).
        for _ in 0..self.settings.refinement_steps {
            let s = sigma(&y)?;
            let f = field.eval(&DVector::from_column_slice(&y[..n]))?;
            let rate = f.dot(section.normal());
            if rate == 0.0 {
                return Err(CapError::OracleNonConvergence(
                    "Trajectory is tangent to the section.".to_string(),
                ));
            }
            if s.abs() <= self.settings.crossing_tolerance * (1.0 + section.normal().amax()) {
                break;
            }
            solver.step(&system, &mut t, &mut y, -s / rate);
            check_finite(&y, t)?;
        }

        let x = DVector::from_column_slice(&y[..n]);
        let derivative = if with_derivative {
            let phi = DMatrix::from_row_slice(n, n, &y[n..]);
            let f = field.eval(&x)?;
            let normal = section.normal();
            let rate = f.dot(normal);
            let projector = DMatrix::<f64>::identity(n, n) - (&f * normal.transpose()) / rate;
            Some(projector * phi)
        } else {
            None
        };
        debug!(return_time = t, "section crossing found");
        Ok(PoincareReturn {
            state: x,
            derivative,
            return_time: t,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Rigid rotation `x' = -y, y' = x` with unit angular speed.
    pub(crate) struct Rotation;

    impl VectorField<f64> for Rotation {
        fn dimension(&self) -> usize {
            2
        }

        fn eval(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
            ensure_dimension("Rotation", 2, x.len())?;
            Ok(DVector::from_vec(vec![-x[1], x[0]]))
        }

        fn eval_with_derivative(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
            Ok((
                self.eval(x)?,
                DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]),
            ))
        }
    }

    fn quarter_section() -> AffineSection<f64> {
        AffineSection::new(
            DVector::from_vec(vec![0.0, 1.0]),
            DVector::from_vec(vec![-1.0, 0.0]),
        )
        .expect("section")
    }

    #[test]
    fn quarter_turn_of_a_rotation() {
        let mut oracle = FlowPoincareOracle::new(FlowOracleSettings::default()).expect("settings");
        let ret = oracle
            .cross_section(
                &Rotation,
                20,
                &DVector::from_vec(vec![1.0, 0.0]),
                &quarter_section(),
                true,
            )
            .expect("crossing");
        assert!((ret.return_time - std::f64::consts::FRAC_PI_2).abs() < 1e-8);
        assert!(ret.state[0].abs() < 1e-12);
        assert!((ret.state[1] - 1.0).abs() < 1e-8);

        let expected = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 0.0]);
        let der = ret.derivative.expect("derivative requested");
        assert!((der - expected).amax() < 1e-7);
    }

    #[test]
    fn start_on_the_section_returns_after_a_full_turn() {
        let mut oracle = FlowPoincareOracle::new(FlowOracleSettings::default()).expect("settings");
        let ret = oracle
            .cross_section(
                &Rotation,
                20,
                &DVector::from_vec(vec![0.0, 1.0]),
                &quarter_section(),
                false,
            )
            .expect("crossing");
        assert!((ret.return_time - 2.0 * std::f64::consts::PI).abs() < 1e-7);
        assert!(ret.derivative.is_none());
    }

    #[test]
    fn missing_crossing_is_reported() {
        let settings = FlowOracleSettings {
            max_steps: 100,
            ..FlowOracleSettings::default()
        };
        let mut oracle = FlowPoincareOracle::new(settings).expect("settings");
        let err = oracle
            .cross_section(
                &Rotation,
                20,
                &DVector::from_vec(vec![1.0, 0.0]),
                &quarter_section(),
                false,
            )
            .expect_err("too few steps");
        assert!(matches!(err, CapError::OracleNonConvergence(_)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = FlowOracleSettings {
            step: 0.0,
            ..FlowOracleSettings::default()
        };
        assert!(FlowPoincareOracle::new(settings).is_err());
    }

    #[test]
    fn recorded_samples_follow_the_circle() {
        let mut oracle = FlowPoincareOracle::new(FlowOracleSettings::default())
            .expect("settings")
            .recording();
        oracle
            .cross_section(
                &Rotation,
                20,
                &DVector::from_vec(vec![1.0, 0.0]),
                &quarter_section(),
                false,
            )
            .expect("crossing");
        let samples = oracle.last_trajectory().expect("samples");
        assert!(samples.len() > 1000);
        let free = oracle
            .trajectory(&Rotation, &DVector::from_vec(vec![1.0, 0.0]), 1.0)
            .expect("trajectory");
        let (_, end) = free.samples().last().expect("non-empty");
        assert!((end[0] - 1.0f64.cos()).abs() < 1e-8);
    }
}
