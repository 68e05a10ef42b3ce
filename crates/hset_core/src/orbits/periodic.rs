use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use super::{
    check_conditioning, compose, frame_at, local_derivative, reversed_flow, GeneratorSettings,
    Reversed,
};
use crate::alignment::{align, align_with_symmetry, mirror_frame, ReversingSymmetry};
use crate::coordsys::LocalCoordinateSystem;
use crate::directions::{DirectionShifting, InvariantDirections, UnstableDirectionsGenerator};
use crate::error::{CapError, Result};
use crate::oracle::PoincareOracle;
use crate::traits::{ConstraintFunction, VectorField};

#[derive(Debug, Clone)]
pub struct PeriodicFrames {
    /// One aligned frame per orbit point, in orbit order.
    pub frames: Vec<LocalCoordinateSystem<f64>>,
    /// Directions at frame 0, in the local (u, s) plane of its initial frame.
    pub directions: InvariantDirections,
    /// Forward local derivatives `i -> i + 1 (mod n)` between initial frames.
    pub forward: Vec<DMatrix<f64>>,
}

/// Frames along a closed orbit given by `n >= 2` points.
pub struct PeriodicCoordsysGenerator<'a, C: ?Sized> {
    field: &'a dyn VectorField<f64>,
    constraint: &'a C,
    settings: GeneratorSettings,
    symmetry: Option<ReversingSymmetry>,
    symmetric_indices: Vec<usize>,
    mirrored: Vec<(usize, usize)>,
}

impl<'a, C> PeriodicCoordsysGenerator<'a, C>
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
            symmetric_indices: Vec::new(),
            mirrored: Vec::new(),
        })
    }

    /// Frames at `indices` are built symmetric with respect to `symmetry`.
    pub fn with_symmetry(mut self, symmetry: ReversingSymmetry, indices: Vec<usize>) -> Self {
        self.symmetry = Some(symmetry);
        self.symmetric_indices = indices;
        self
    }

    /// For each `(source, target)` the target frame is replaced by the
    /// mirror image of the aligned source frame. Needs a symmetry.
    pub fn with_mirrored(mut self, pairs: Vec<(usize, usize)>) -> Self {
        self.mirrored = pairs;
        self
    }

    fn check_mirrored(&self, n: usize) -> Result<()> {
        if !self.mirrored.is_empty() && self.symmetry.is_none() {
            return Err(CapError::UnsupportedConfiguration(
                "Mirrored frames need a reversing symmetry.".to_string(),
            ));
        }
        for &(source, target) in &self.mirrored {
            if source >= n || target >= n || source == target {
                return Err(CapError::InvalidInput(format!(
                    "Mirrored pair ({}, {}) is invalid for {} points.",
                    source, target, n
                )));
            }
            let chained = self.mirrored.iter().any(|&(_, t)| t == source);
            if chained || self.symmetric_indices.contains(&target) {
                return Err(CapError::InvalidInput(format!(
                    "Frame {} is both mirrored and aligned independently.",
                    if chained { source } else { target }
                )));
            }
        }
        Ok(())
    }

    pub fn generate(
        &self,
        oracle: &mut dyn PoincareOracle<f64>,
        points: &[DVector<f64>],
    ) -> Result<PeriodicFrames> {
        let n = points.len();
        if n < 2 {
            return Err(CapError::InvalidInput(format!(
                "A periodic orbit needs at least two points, got {}.",
                n
            )));
        }
        if let Some(&bad) = self.symmetric_indices.iter().find(|&&i| i >= n) {
            return Err(CapError::InvalidInput(format!(
                "Symmetric frame index {} is out of range for {} points.",
                bad, n
            )));
        }
        self.check_mirrored(n)?;

        let initial = points
            .iter()
            .map(|p| frame_at(self.field, self.constraint, p))
            .collect::<Result<Vec<_>>>()?;

        let reversed = Reversed::new(self.field);
        let mut forward = Vec::with_capacity(n);
        let mut backward = Vec::with_capacity(n);
        for i in 0..n {
            let next = (i + 1) % n;
            forward.push(local_derivative(
                self.field,
                self.constraint,
                oracle,
                &initial[i],
                &initial[next],
                &self.settings,
            )?);
            backward.push(local_derivative(
                &reversed,
                self.constraint,
                oracle,
                &initial[next],
                &reversed_flow(&initial[i])?,
                &self.settings,
            )?);
        }

        // Backward chain from frame 0: 0 -> n-1 -> ... -> 1 -> 0.
        let backward_chain: Vec<DMatrix<f64>> = backward.iter().rev().cloned().collect();
        let total_forward = compose(&forward)?;
        let total_backward = compose(&backward_chain)?;
        let directions = UnstableDirectionsGenerator::new(self.settings.power_iterations)
            .generate(&total_forward, &total_backward)?;

        let unstable = DirectionShifting::new(&forward, &directions.unstable)?
            .propagate(&forward, &directions.unstable)?;
        let stable = DirectionShifting::new(&backward_chain, &directions.stable)?
            .propagate(&backward_chain, &directions.stable)?;

        let mut frames = Vec::with_capacity(n);
        for (i, frame) in initial.iter().enumerate() {
            let u = &unstable[i];
            let s = &stable[(n - i) % n];
            let aligned = match &self.symmetry {
                Some(symmetry) if self.symmetric_indices.contains(&i) => {
                    debug!(frame = i, "Symmetric alignment");
                    align_with_symmetry(frame, u, symmetry)?
                }
                _ => align(frame, u, s)?,
            };
            frames.push(aligned);
        }
        if let Some(symmetry) = &self.symmetry {
            for &(source, target) in &self.mirrored {
                let mirrored = mirror_frame(&frames[source], symmetry)?;
                let residual = (mirrored.origin() - initial[target].origin()).amax();
                if residual > self.settings.origin_tolerance {
                    warn!(source, target, residual, "Mirrored origin is off the orbit point");
                }
                debug!(source, target, "Mirrored frame");
                frames[target] = mirrored;
            }
        }
        check_conditioning(&frames, self.settings.condition_limit)?;
        info!(
            frames = n,
            unstable_factor = directions.unstable_factor,
            stable_factor = directions.stable_factor,
            "Periodic orbit frames generated"
        );
        Ok(PeriodicFrames {
            frames,
            directions,
            forward,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordsys::{ENERGY_COLUMN, FLOW_COLUMN, STABLE_COLUMN, UNSTABLE_COLUMN};
    use crate::orbits::tests::{
        circle_points, misalignment, oracle, saddle_symmetry, SaddleEnergy, SaddleRotation,
    };

    const FIELD: SaddleRotation = SaddleRotation {
        lambda: 0.5,
        omega: 1.0,
    };

    #[test]
    fn frames_follow_the_saddle_directions() {
        let generator =
            PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings");
        let result = generator
            .generate(&mut oracle(), &circle_points(4))
            .expect("frames");

        assert_eq!(result.frames.len(), 4);
        for frame in &result.frames {
            assert!(misalignment(frame, UNSTABLE_COLUMN, &[1.0, 1.0, 0.0, 0.0]) < 1e-6);
            assert!(misalignment(frame, STABLE_COLUMN, &[1.0, -1.0, 0.0, 0.0]) < 1e-6);
        }
        // Over a full turn the saddle expands by e^{2 pi lambda} = e^pi; the
        // combined chain squares that.
        let expected = std::f64::consts::PI.exp().powi(2);
        assert!((result.directions.unstable_factor.abs() / expected - 1.0).abs() < 1e-6);
        assert_eq!(result.forward.len(), 4);
    }

    #[test]
    fn symmetric_frame_sits_on_the_fixed_set() {
        let symmetry = saddle_symmetry();
        let generator =
            PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings")
                .with_symmetry(symmetry.clone(), vec![0, 2]);
        let result = generator
            .generate(&mut oracle(), &circle_points(4))
            .expect("frames");

        for i in [0, 2] {
            let frame = &result.frames[i];
            let u = frame.column(UNSTABLE_COLUMN).expect("column");
            let s = frame.column(STABLE_COLUMN).expect("column");
            assert_eq!(symmetry.apply(&u).expect("apply"), s);
            let flow = frame.column(FLOW_COLUMN).expect("column");
            assert_eq!(symmetry.apply(&flow).expect("apply"), -&flow);
            let energy = frame.column(ENERGY_COLUMN).expect("column");
            assert_eq!(symmetry.apply(&energy).expect("apply"), energy);
            assert_eq!(
                symmetry.apply(frame.origin()).expect("apply"),
                frame.origin().clone()
            );
            assert!(misalignment(frame, STABLE_COLUMN, &[1.0, -1.0, 0.0, 0.0]) < 1e-6);
        }
    }

    #[test]
    fn mirrored_frame_is_the_reflection_of_its_partner() {
        let symmetry = saddle_symmetry();
        let generator =
            PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings")
                .with_symmetry(symmetry.clone(), vec![0, 2])
                .with_mirrored(vec![(1, 3)]);
        let result = generator
            .generate(&mut oracle(), &circle_points(4))
            .expect("frames");

        let (source, target) = (&result.frames[1], &result.frames[3]);
        let reflect = |frame: &LocalCoordinateSystem<f64>, column: usize| {
            symmetry
                .apply(&frame.column(column).expect("column"))
                .expect("apply")
        };
        assert_eq!(target.column(UNSTABLE_COLUMN).expect("column"), reflect(source, STABLE_COLUMN));
        assert_eq!(target.column(STABLE_COLUMN).expect("column"), reflect(source, UNSTABLE_COLUMN));
        assert_eq!(target.column(FLOW_COLUMN).expect("column"), -reflect(source, FLOW_COLUMN));
        assert_eq!(target.column(ENERGY_COLUMN).expect("column"), reflect(source, ENERGY_COLUMN));
        assert_eq!(
            target.origin().clone(),
            symmetry.apply(source.origin()).expect("apply")
        );
        assert!((target.origin() - &circle_points(4)[3]).amax() < 1e-12);
        assert!(misalignment(target, UNSTABLE_COLUMN, &[1.0, 1.0, 0.0, 0.0]) < 1e-6);
        assert!(misalignment(target, STABLE_COLUMN, &[1.0, -1.0, 0.0, 0.0]) < 1e-6);
    }

    #[test]
    fn mirrored_pairs_are_validated() {
        let plain =
            PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings")
                .with_mirrored(vec![(1, 3)]);
        let err = plain
            .generate(&mut oracle(), &circle_points(4))
            .expect_err("no symmetry");
        assert!(matches!(err, CapError::UnsupportedConfiguration(_)));

        for pairs in [vec![(1, 1)], vec![(1, 9)], vec![(1, 2)], vec![(1, 3), (3, 1)]] {
            let generator =
                PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                    .expect("valid settings")
                    .with_symmetry(saddle_symmetry(), vec![0, 2])
                    .with_mirrored(pairs.clone());
            let err = generator
                .generate(&mut oracle(), &circle_points(4))
                .expect_err("bad pairs");
            assert!(matches!(err, CapError::InvalidInput(_)), "{:?}", pairs);
        }
    }

    #[test]
    fn too_few_points_or_bad_indices_are_rejected() {
        let generator =
            PeriodicCoordsysGenerator::new(&FIELD, &SaddleEnergy, GeneratorSettings::default())
                .expect("valid settings");
        let err = generator
            .generate(&mut oracle(), &circle_points(1))
            .expect_err("one point");
        assert!(matches!(err, CapError::InvalidInput(_)));

        let generator = generator.with_symmetry(saddle_symmetry(), vec![7]);
        assert!(generator.generate(&mut oracle(), &circle_points(4)).is_err());
    }
}
