//! Checks that a condition never vanishes along a trajectory piece, e.g.
//! that an orbit segment stays away from a collision.

use nalgebra::DVector;

use crate::error::{ensure_dimension, CapError, Result};
use crate::interval::Interval;
use crate::traits::Map;

/// Encloses a trajectory over sub-intervals of its time domain.
pub trait TrajectoryEnclosure {
    fn dimension(&self) -> usize;
    fn time_domain(&self) -> Interval;
    /// Enclosure of every state reached for times in `time`.
    fn enclose(&self, time: Interval) -> Result<DVector<Interval>>;
}

/// Piecewise hull of time-ordered samples. Only as good as the sampling, so
/// it serves diagnostics, not proofs.
#[derive(Debug, Clone)]
pub struct SampledTrajectory {
    samples: Vec<(f64, DVector<f64>)>,
}

impl SampledTrajectory {
    pub fn new(samples: Vec<(f64, DVector<f64>)>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| CapError::InvalidInput("Trajectory has no samples.".to_string()))?;
        let dim = first.1.len();
        for pair in samples.windows(2) {
            ensure_dimension("SampledTrajectory", dim, pair[1].1.len())?;
            if !(pair[1].0 >= pair[0].0) {
                return Err(CapError::InvalidInput(
                    "Trajectory samples must be ordered in time.".to_string(),
                ));
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[(f64, DVector<f64>)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl TrajectoryEnclosure for SampledTrajectory {
    fn dimension(&self) -> usize {
        self.samples[0].1.len()
    }

    fn time_domain(&self) -> Interval {
        let start = self.samples[0].0;
        let end = self.samples[self.samples.len() - 1].0;
        Interval::new(start, end).unwrap_or_else(|_| Interval::point(start))
    }

    fn enclose(&self, time: Interval) -> Result<DVector<Interval>> {
        if !time.is_subset_of(&self.time_domain()) {
            return Err(CapError::InvalidInput(format!(
                "Time {} is outside the sampled domain {}.",
                time,
                self.time_domain()
            )));
        }
        let first = self
            .samples
            .iter()
            .rposition(|(t, _)| *t <= time.lo())
            .unwrap_or(0);
        let last = self
            .samples
            .iter()
            .position(|(t, _)| *t >= time.hi())
            .unwrap_or(self.samples.len() - 1);

        let mut hull: DVector<Interval> = self.samples[first].1.map(Interval::point);
        for (_, x) in &self.samples[first..=last] {
            for i in 0..hull.len() {
                hull[i] = hull[i].hull(&Interval::point(x[i]));
            }
        }
        Ok(hull)
    }
}

/// Worklist bisection of the trajectory's time domain.
///
/// A piece is accepted once the condition's image excludes the zero vector.
/// Pieces narrower than `min_width` that still cannot be excluded make the
/// whole check fail.
pub fn is_condition_never_satisfied<T, M>(
    curve: &T,
    condition: &mut M,
    min_width: f64,
) -> Result<bool>
where
    T: TrajectoryEnclosure + ?Sized,
    M: Map<Interval> + ?Sized,
{
    ensure_dimension("condition check", condition.dimension(), curve.dimension())?;
    if !(min_width > 0.0) {
        return Err(CapError::InvalidInput(format!(
            "Bisection width must be positive, got {}.",
            min_width
        )));
    }

    let mut worklist = vec![curve.time_domain()];
    while let Some(piece) = worklist.pop() {
        let image = condition.eval(&curve.enclose(piece)?)?;
        if image.iter().any(|c| !c.contains_zero()) {
            continue;
        }
        if piece.width() < min_width {
            return Ok(false);
        }
        let mid = piece.midpoint();
        worklist.push(Interval::new(piece.lo(), mid)?);
        worklist.push(Interval::new(mid, piece.hi())?);
    }
    Ok(true)
}
