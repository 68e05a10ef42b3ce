//! Proof routines: chains of covering relations between validated frames and
//! the parallelogram derivative check around a periodic orbit.
//!
//! Every step fails fast. The first inconclusive relation aborts the run with
//! context naming the frame pair; the underlying [`CapError`] stays
//! reachable through `downcast_ref`.

use std::fmt;

use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordsys::LocalCoordinateSystem;
use crate::covering::{CoveringRelationCheck, Orientation};
use crate::error::CapError;
use crate::hset::{HsetKind, HsetParameters};
use crate::interval::Interval;
use crate::maps::{CompositeMap, ConstraintExtension, Shear, Swap};
use crate::oracle::PoincareOracle;
use crate::orbits::{reversed_flow, Reversed};
use crate::parallelogram::{hull_of_derivatives, ParallelogramCheck, ParallelogramCoveringChecker};
use crate::poincare::{LocalPoincareMap, ScaledLocalPoincareMap};
use crate::settings::ProofSettings;
use crate::traits::{ConstraintFunction, Map, VectorField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoveringDirection {
    /// `N_src => N_dst` under the forward return map.
    Forward,
    /// `N_src <= N_dst`: the backward return map from `dst` to `src`,
    /// checked on `J o f o J` so the stable direction plays the expanding role.
    Backward,
}

/// One relation to verify. `src` precedes `dst` in forward time either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveringStep {
    pub src: usize,
    pub dst: usize,
    pub direction: CoveringDirection,
}

impl CoveringStep {
    pub fn forward(src: usize, dst: usize) -> Self {
        Self {
            src,
            dst,
            direction: CoveringDirection::Forward,
        }
    }

    pub fn backward(src: usize, dst: usize) -> Self {
        Self {
            src,
            dst,
            direction: CoveringDirection::Backward,
        }
    }

    /// Forward relations `0 => 1 => ... => n-1`.
    pub fn chain(n: usize) -> Vec<Self> {
        (1..n).map(|i| Self::forward(i - 1, i)).collect()
    }

    /// [`CoveringStep::chain`] closed by `n-1 => 0`.
    pub fn closed_loop(n: usize) -> Vec<Self> {
        (0..n).map(|i| Self::forward(i, (i + 1) % n)).collect()
    }
}

impl fmt::Display for CoveringStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            CoveringDirection::Forward => write!(f, "Forward covering {} => {}", self.src, self.dst),
            CoveringDirection::Backward => {
                write!(f, "Backward covering {} <= {}", self.src, self.dst)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoveringRecord {
    pub step: CoveringStep,
    pub orientation: Orientation,
    /// Return time of the last evaluation of the underlying map.
    pub return_time: Option<Interval>,
    /// Argument box and images in physical units. Backward records are given
    /// in the swapped chart.
    pub hsets: Vec<HsetParameters>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelogramReport {
    /// Hull of the aligned derivatives over every loop step.
    pub derivative: DMatrix<Interval>,
    pub check: ParallelogramCheck,
}

/// Drives covering checks over a list of validated frames. The oracle is
/// supplied per call and must return validated enclosures.
pub struct CoveringChain<'a, C: ?Sized> {
    field: &'a dyn VectorField<Interval>,
    constraint: &'a C,
    settings: ProofSettings,
}

fn origin_of(frame: &LocalCoordinateSystem<Interval>) -> Result<[f64; 4]> {
    let origin = frame.origin();
    if origin.len() != 4 {
        bail!("h-set records need four-dimensional frames, got {}", origin.len());
    }
    Ok([
        origin[0].midpoint(),
        origin[1].midpoint(),
        origin[2].midpoint(),
        origin[3].midpoint(),
    ])
}

fn frame_at<'f>(
    frames: &'f [LocalCoordinateSystem<Interval>],
    index: usize,
) -> Result<&'f LocalCoordinateSystem<Interval>> {
    frames
        .get(index)
        .with_context(|| format!("Frame {} does not exist ({} frames)", index, frames.len()))
}

impl<'a, C> CoveringChain<'a, C>
where
    C: ConstraintFunction<Interval> + ConstraintFunction<f64> + ?Sized,
{
    pub fn new(
        field: &'a dyn VectorField<Interval>,
        constraint: &'a C,
        settings: ProofSettings,
    ) -> Result<Self> {
        settings.validate().context("Invalid proof settings")?;
        Ok(Self {
            field,
            constraint,
            settings,
        })
    }

    pub fn settings(&self) -> &ProofSettings {
        &self.settings
    }

    fn gain(&self) -> Interval {
        Interval::point(self.settings.gain)
    }

    /// The scaled return map between two frames, for `field`.
    fn scaled_map<'m>(
        &self,
        field: &'m dyn VectorField<Interval>,
        oracle: &'m mut dyn PoincareOracle<Interval>,
        src: &LocalCoordinateSystem<Interval>,
        dst: &LocalCoordinateSystem<Interval>,
    ) -> Result<ScaledLocalPoincareMap<'m, Interval, C>>
    where
        'a: 'm,
    {
        let inner = LocalPoincareMap::new(
            field,
            self.constraint,
            self.settings.order,
            src.clone(),
            dst.clone(),
            oracle,
            self.settings.extension,
        )?;
        Ok(ScaledLocalPoincareMap::new(inner, self.gain())?)
    }

    /// Lifts the image box to the constraint level inside `frame`.
    fn check_image_placement(
        &self,
        frame: &LocalCoordinateSystem<Interval>,
        x: Interval,
        y: Interval,
    ) -> Result<()> {
        let mut extension =
            ConstraintExtension::on_section(self.constraint, frame.clone(), self.settings.extension)?;
        let k = self.gain();
        extension
            .eval(&DVector::from_vec(vec![x * k, y * k]))
            .context("Image does not lie on the energy level of the target frame")?;
        Ok(())
    }

    /// Verifies one relation and returns its record.
    pub fn check(
        &self,
        oracle: &mut dyn PoincareOracle<Interval>,
        frames: &[LocalCoordinateSystem<Interval>],
        step: CoveringStep,
    ) -> Result<CoveringRecord> {
        let src = frame_at(frames, step.src)?;
        let dst = frame_at(frames, step.dst)?;
        let (src_origin, dst_origin) = (origin_of(src)?, origin_of(dst)?);

        let (check, return_time, image_frame, argument_origin, image_origin) = match step.direction {
            CoveringDirection::Forward => {
                let mut map = self.scaled_map(self.field, oracle, src, dst)?;
                let check = CoveringRelationCheck::new(&mut map)?;
                (check, map.last_return_time(), dst.clone(), src_origin, dst_origin)
            }
            CoveringDirection::Backward => {
                let reversed = Reversed::new(self.field);
                let target = reversed_flow(src)?;
                let mut map = self.scaled_map(&reversed, oracle, dst, &target)?;
                let check = {
                    let mut jfj = CompositeMap::new(vec![
                        Box::new(Swap) as Box<dyn Map<Interval> + '_>,
                        Box::new(&mut map),
                        Box::new(Swap),
                    ])?;
                    CoveringRelationCheck::new(&mut jfj)?
                };
                (check, map.last_return_time(), target, dst_origin, src_origin)
            }
        };

        let orientation = check.certify()?;
        let image = check.image();
        let (x, y) = match step.direction {
            CoveringDirection::Forward => (image[0], image[1]),
            CoveringDirection::Backward => (image[1], image[0]),
        };
        self.check_image_placement(&image_frame, x, y)?;

        let mut hsets = check.hset_parameters(image_origin, self.settings.gain);
        for record in hsets.iter_mut() {
            if record.kind == HsetKind::Argument {
                record.coordsys_origin = argument_origin;
            }
        }
        info!(%step, ?orientation, "Covering step verified");
        Ok(CoveringRecord {
            step,
            orientation,
            return_time,
            hsets,
        })
    }

    /// Verifies every step in order, stopping at the first failure.
    pub fn run(
        &self,
        oracle: &mut dyn PoincareOracle<Interval>,
        frames: &[LocalCoordinateSystem<Interval>],
        steps: &[CoveringStep],
    ) -> Result<Vec<CoveringRecord>> {
        let mut records = Vec::with_capacity(steps.len());
        for &step in steps {
            let record = self
                .check(oracle, frames, step)
                .with_context(|| step.to_string())?;
            records.push(record);
        }
        info!(relations = records.len(), "Covering chain verified");
        Ok(records)
    }

    /// Aligned derivatives `Shear(-l) o f o Shear(l)` of every step of the
    /// closed loop through `frames`, merged and tested against the
    /// parallelogram conditions.
    pub fn parallelogram_derivative_check(
        &self,
        oracle: &mut dyn PoincareOracle<Interval>,
        frames: &[LocalCoordinateSystem<Interval>],
        shear: f64,
    ) -> Result<ParallelogramReport> {
        if frames.len() < 2 {
            bail!("A closed loop needs at least two frames, got {}", frames.len());
        }
        let eta = Shear::new(shear)?;
        let eta_inverse = Shear::new(-shear)?;
        let checker = ParallelogramCoveringChecker::new(self.settings.parallelogram)?;
        let unit = Interval::new(-1.0, 1.0)?;
        let n = DVector::from_element(2, unit);

        let mut derivatives = Vec::with_capacity(frames.len());
        for step in CoveringStep::closed_loop(frames.len()) {
            let mut map = self.scaled_map(
                self.field,
                &mut *oracle,
                &frames[step.src],
                &frames[step.dst],
            )?;
            let mut aligned = CompositeMap::new(vec![
                Box::new(eta) as Box<dyn Map<Interval> + '_>,
                Box::new(&mut map),
                Box::new(eta_inverse),
            ])?;
            let (_, der) = aligned
                .eval_with_derivative(&n)
                .with_context(|| format!("Aligned derivative of {}", step))?;
            derivatives.push(der);
        }
        let derivative = hull_of_derivatives(&derivatives)?;
        let check = checker.check(&derivative)?;
        let failures = check.failures();
        if !failures.is_empty() {
            return Err(CapError::InconclusiveCovering(format!(
                "parallelogram conditions failed: {}",
                failures.join(", ")
            )))
            .context("Parallelogram derivative check");
        }
        info!(frames = frames.len(), "Parallelogram derivative check passed");
        Ok(ParallelogramReport { derivative, check })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::AffineSection;
    use crate::oracle::PoincareReturn;
    use crate::poincare::tests::{Constant, Plane};
    use num_traits::One;

    const LEVEL: f64 = 0.5;

    /// Maps a state near one of `origins` to the section origin, through
    /// `forward` or, when the section normal points against the third axis,
    /// through `backward`.
    struct TranslatingOracle {
        origins: Vec<DVector<f64>>,
        forward: DMatrix<Interval>,
        backward: DMatrix<Interval>,
    }

    impl TranslatingOracle {
        fn new(forward: [[f64; 2]; 2], backward: [[f64; 2]; 2], origins: Vec<DVector<f64>>) -> Self {
            let embed = |m: [[f64; 2]; 2]| {
                let mut full = DMatrix::<Interval>::identity(4, 4);
                for i in 0..2 {
                    for j in 0..2 {
                        full[(i, j)] = Interval::point(m[i][j]);
                    }
                }
                full
            };
            Self {
                origins,
                forward: embed(forward),
                backward: embed(backward),
            }
        }
    }

    impl PoincareOracle<Interval> for TranslatingOracle {
        fn cross_section(
            &mut self,
            _field: &dyn VectorField<Interval>,
            _order: usize,
            state: &DVector<Interval>,
            section: &AffineSection<Interval>,
            with_derivative: bool,
        ) -> crate::error::Result<PoincareReturn<Interval>> {
            let mid = state.map(|v| v.midpoint());
            let source = self
                .origins
                .iter()
                .min_by(|a, b| (*a - &mid).amax().total_cmp(&(*b - &mid).amax()))
                .expect("origins")
                .map(Interval::point);
            let matrix = if section.normal()[2].certainly_lt(0.0) {
                &self.backward
            } else {
                &self.forward
            };
            Ok(PoincareReturn {
                state: section.origin() + matrix * (state - source),
                derivative: with_derivative.then(|| matrix.clone()),
                return_time: Interval::one(),
            })
        }
    }

    fn origins(count: usize) -> Vec<DVector<f64>> {
        (0..count)
            .map(|i| DVector::from_vec(vec![i as f64, 0.0, 0.0, LEVEL]))
            .collect()
    }

    fn frames(count: usize) -> Vec<LocalCoordinateSystem<Interval>> {
        origins(count)
            .into_iter()
            .map(|o| {
                LocalCoordinateSystem::identity_at(o)
                    .and_then(|f| f.convert::<Interval>())
                    .expect("frame")
            })
            .collect()
    }

    fn settings() -> ProofSettings {
        ProofSettings {
            gain: 1e-3,
            ..ProofSettings::default()
        }
    }

    const PLANE: Plane = Plane { level: LEVEL };

    #[test]
    fn forward_chain_records_every_relation() {
        let chain = CoveringChain::new(&Constant, &PLANE, settings()).expect("chain");
        let mut oracle =
            TranslatingOracle::new([[3.0, 0.0], [0.0, 0.2]], [[1.0, 0.0], [0.0, 1.0]], origins(3));
        let records = chain
            .run(&mut oracle, &frames(3), &CoveringStep::chain(3))
            .expect("coverings");

        assert_eq!(records.len(), 2);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.step, CoveringStep::forward(i, i + 1));
            assert_eq!(record.orientation, Orientation::Preserving);
            assert_eq!(record.return_time, Some(Interval::one()));
            assert_eq!(record.hsets.len(), 4);
            assert_eq!(record.hsets[0].kind, HsetKind::Argument);
            assert_eq!(record.hsets[0].coordsys_origin, [i as f64, 0.0, 0.0, LEVEL]);
            assert_eq!(record.hsets[1].coordsys_origin, [(i + 1) as f64, 0.0, 0.0, LEVEL]);
            let y = record.hsets[1].y().expect("box");
            assert!(y.hi() <= 0.2 * 1e-3 * (1.0 + 1e-9));
        }
    }

    #[test]
    fn backward_step_is_checked_on_the_swapped_map() {
        let chain = CoveringChain::new(&Constant, &PLANE, settings()).expect("chain");
        // Backward in time the stable direction expands by 5.
        let mut oracle =
            TranslatingOracle::new([[1.0, 0.0], [0.0, 1.0]], [[0.25, 0.0], [0.0, 5.0]], origins(2));
        let record = chain
            .check(&mut oracle, &frames(2), CoveringStep::backward(0, 1))
            .expect("backward covering");
        assert_eq!(record.orientation, Orientation::Preserving);
        let left = record.hsets[2].x().expect("box");
        assert!(left.certainly_lt(-4.9e-3));
        assert_eq!(record.hsets[0].coordsys_origin, [1.0, 0.0, 0.0, LEVEL]);
    }

    #[test]
    fn failure_names_the_frame_pair() {
        let chain = CoveringChain::new(&Constant, &PLANE, settings()).expect("chain");
        let mut oracle = TranslatingOracle::new(
            [[3.0, 0.0], [0.0, 0.2]],
            [[1.0, 0.0], [0.0, 1.0]],
            origins(3),
        );
        // The backward map is the identity, so the last relation cannot expand.
        let mut steps = CoveringStep::chain(3);
        steps.push(CoveringStep::backward(1, 2));
        let err = chain
            .run(&mut oracle, &frames(3), &steps)
            .expect_err("no expansion backward");
        assert!(format!("{:#}", err).contains("Backward covering 1 <= 2"));
        assert!(matches!(
            err.downcast_ref::<CapError>(),
            Some(CapError::InconclusiveCovering(_))
        ));
    }

    #[test]
    fn missing_frames_are_reported() {
        let chain = CoveringChain::new(&Constant, &PLANE, settings()).expect("chain");
        let mut oracle =
            TranslatingOracle::new([[3.0, 0.0], [0.0, 0.2]], [[1.0, 0.0], [0.0, 1.0]], origins(2));
        let err = chain
            .check(&mut oracle, &frames(2), CoveringStep::forward(1, 5))
            .expect_err("no frame 5");
        assert!(err.to_string().contains("Frame 5"));
    }

    #[test]
    fn parallelogram_check_over_a_loop() {
        let chain = CoveringChain::new(&Constant, &PLANE, settings()).expect("chain");
        let mut oracle = TranslatingOracle::new(
            [[6.0, -0.01], [0.01, 0.196]],
            [[1.0, 0.0], [0.0, 1.0]],
            origins(2),
        );
        let report = chain
            .parallelogram_derivative_check(&mut oracle, &frames(2), 0.0)
            .expect("parallelogram");
        assert!(report.check.holds());
        assert!(report.derivative[(0, 0)].contains(6.0));

        let mut diagonal =
            TranslatingOracle::new([[6.0, 0.0], [0.0, 0.196]], [[1.0, 0.0], [0.0, 1.0]], origins(2));
        let err = chain
            .parallelogram_derivative_check(&mut diagonal, &frames(2), 0.0)
            .expect_err("D12 is not negative");
        assert!(format!("{:#}", err).contains("D12 < 0"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = ProofSettings {
            gain: 0.0,
            ..ProofSettings::default()
        };
        assert!(CoveringChain::new(&Constant, &PLANE, bad).is_err());
    }
}
