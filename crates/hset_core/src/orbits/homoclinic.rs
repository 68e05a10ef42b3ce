use nalgebra::{DMatrix, DVector};
use tracing::info;

use super::{
    check_conditioning, frame_at, local_derivative, reversed_flow, GeneratorSettings, Reversed,
};
use crate::alignment::{align, align_with_symmetry, ReversingSymmetry};
use crate::coordsys::LocalCoordinateSystem;
use crate::directions::DirectionShifting;
use crate::error::{ensure_dimension, CapError, Result};
use crate::oracle::PoincareOracle;
use crate::traits::{ConstraintFunction, VectorField};

/// Frames along a homoclinic excursion that leaves the periodic orbit at the
/// frame of the periodic chain passed to [`HomoclinicCoordsysGenerator::generate`].
///
/// The terminal stable direction comes from the symmetry when one is
/// configured, otherwise from an explicit seed in the local (u, s) plane of
/// the last initial frame.
pub struct HomoclinicCoordsysGenerator<'a, C: ?Sized> {
    field: &'a dyn VectorField<f64>,
    constraint: &'a C,
    settings: GeneratorSettings,
    symmetry: Option<ReversingSymmetry>,
    stable_seed: Option<DVector<f64>>,
}

impl<'a, C> HomoclinicCoordsysGenerator<'a, C>
where
    C: ConstraintFunction<f64> + ?Sized,
{
    pub fn new(
        field: &'a dyn VectorField<f64>,
        constraint: &'a C,
        settings: GeneratorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            field,
            constraint,
            settings,
            symmetry: None,
            stable_seed: None,
        })
    }

    pub fn with_symmetry(mut self, symmetry: ReversingSymmetry) -> Self {
        self.symmetry = Some(symmetry);
        self
    }

    pub fn with_stable_seed(mut self, seed: DVector<f64>) -> Result<Self> {
        ensure_dimension("HomoclinicCoordsysGenerator seed", 2, seed.len())?;
        self.stable_seed = Some(seed);
        Ok(self)
    }

    pub fn generate(
        &self,
        oracle: &mut dyn PoincareOracle<f64>,
        periodic_frame: &LocalCoordinateSystem<f64>,
        origins: &[DVector<f64>],
    ) -> Result<Vec<LocalCoordinateSystem<f64>>> {
        if origins.len() < 2 {
            return Err(CapError::InvalidInput(format!(
                "A homoclinic excursion needs at least two origins, got {}.",
                origins.len()
            )));
        }
        let last = origins.len() - 1;

        let mut initial = Vec::with_capacity(origins.len());
        initial.push(periodic_frame.with_origin(origins[0].clone())?);
        for origin in &origins[1..] {
            initial.push(frame_at(self.field, self.constraint, origin)?);
        }

        let mut forward = Vec::with_capacity(last);
        for j in 0..last {
            forward.push(local_derivative(
                self.field,
                self.constraint,
                oracle,
                &initial[j],
                &initial[j + 1],
                &self.settings,
            )?);
        }
        let e1 = DVector::from_vec(vec![1.0, 0.0]);
        let unstable = DirectionShifting::new(&forward, &e1)?.propagate(&forward, &e1)?;

        let terminal = match (&self.symmetry, &self.stable_seed) {
            (Some(symmetry), _) => {
                align_with_symmetry(&initial[last], &unstable[last], symmetry)?
            }
            (None, Some(seed)) => align(&initial[last], &unstable[last], seed)?,
            (None, None) => {
                return Err(CapError::UnsupportedConfiguration(
                    "The terminal stable direction needs a symmetry or an explicit seed."
                        .to_string(),
                ))
            }
        };

        // Backward chain last -> last-1 -> ... -> 0, starting on the aligned
        // terminal frame.
        let reversed = Reversed::new(self.field);
        let mut backward_chain: Vec<DMatrix<f64>> = Vec::with_capacity(last);
        for j in (0..last).rev() {
            let src = if j + 1 == last {
                &terminal
            } else {
                &initial[j + 1]
            };
            backward_chain.push(local_derivative(
                &reversed,
                self.constraint,
                oracle,
                src,
                &reversed_flow(&initial[j])?,
                &self.settings,
            )?);
        }
        let e2 = DVector::from_vec(vec![0.0, 1.0]);
        let stable =
            DirectionShifting::new(&backward_chain, &e2)?.propagate(&backward_chain, &e2)?;

        let mut frames = Vec::with_capacity(origins.len());
        frames.push(initial[0].clone());
        for j in 1..last {
            frames.push(align(&initial[j], &unstable[j], &stable[last - j])?);
        }
        frames.push(terminal);
        check_conditioning(&frames, self.settings.condition_limit)?;
        info!(frames = frames.len(), "Homoclinic frames generated");
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordsys::{STABLE_COLUMN, UNSTABLE_COLUMN};
    use crate::orbits::tests::{
        circle_points, misalignment, oracle, saddle_symmetry, SaddleEnergy, SaddleRotation,
    };
    use crate::orbits::PeriodicCoordsysGenerator;

    const FIELD: SaddleRotation = SaddleRotation {
        lambda: 0.5,
        omega: 1.0,
    };

    fn periodic_frame() -> LocalCoordinateSystem<f64> {
        PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
            .expect("valid settings")
            .generate(&mut oracle(), &circle_points(4))
            .expect("frames")
            .frames
            .remove(0)
    }

    fn half_turn() -> Vec<DVector<f64>> {
        circle_points(4).into_iter().take(3).collect()
    }

    #[test]
    fn symmetric_terminal_frame_fixes_the_stable_directions() {
        let generator =
            HomoclinicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings")
                .with_symmetry(saddle_symmetry());
        let frames = generator
            .generate(&mut oracle(), &periodic_frame(), &half_turn())
            .expect("frames");
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(misalignment(frame, UNSTABLE_COLUMN, &[1.0, 1.0, 0.0, 0.0]) < 1e-6);
            assert!(misalignment(frame, STABLE_COLUMN, &[1.0, -1.0, 0.0, 0.0]) < 1e-6);
        }
        let terminal = &frames[2];
        assert_eq!(
            saddle_symmetry()
                .apply(&terminal.column(UNSTABLE_COLUMN).expect("column"))
                .expect("apply"),
            terminal.column(STABLE_COLUMN).expect("column")
        );
    }

    #[test]
    fn explicit_seed_sets_the_terminal_stable_direction() {
        let points = half_turn();
        // The stable direction (1, -1, 0, 0) in the last initial frame's own
        // local (u, s) coordinates.
        let last = frame_at(&FIELD, &SaddleEnergy, &points[2]).expect("frame");
        let global = DVector::from_vec(vec![1.0, -1.0, 0.0, 0.0]);
        let local = last.to_local(&(last.origin() + global)).expect("local");
        let seed = DVector::from_vec(vec![local[0], local[1]]);
        let generator =
            HomoclinicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings")
                .with_stable_seed(seed)
                .expect("planar seed");
        let frames = generator
            .generate(&mut oracle(), &periodic_frame(), &points)
            .expect("frames");
        for frame in &frames[1..] {
            assert!(misalignment(frame, STABLE_COLUMN, &[1.0, -1.0, 0.0, 0.0]) < 1e-6);
        }
        assert_eq!(frames[2].origin(), &points[2]);
    }

    #[test]
    fn missing_terminal_direction_is_unsupported() {
        let generator =
            HomoclinicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings");
        let err = generator
            .generate(&mut oracle(), &periodic_frame(), &half_turn())
            .expect_err("no terminal stable direction");
        assert!(matches!(err, CapError::UnsupportedConfiguration(_)));
    }
}
