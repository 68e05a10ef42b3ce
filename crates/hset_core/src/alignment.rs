//! Building and re-aligning frames along an orbit.
//!
//! Frames carry their columns in the order (unstable, stable, flow tangent,
//! energy gradient). [`initial_frame`] fixes the last two from the vector
//! field and the constraint gradient; the alignment functions then rewrite the
//! first two once unstable/stable directions are known.

use nalgebra::linalg::QR;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::coordsys::{
    LocalCoordinateSystem, ENERGY_COLUMN, FLOW_COLUMN, STABLE_COLUMN, UNSTABLE_COLUMN,
};
use crate::error::{ensure_dimension, CapError, Result};
use crate::traits::Scalar;

/// A reversing symmetry `S = diag(signs)` with every sign `+1` or `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversingSymmetry {
    signs: Vec<f64>,
}

impl ReversingSymmetry {
    pub fn new(signs: Vec<f64>) -> Result<Self> {
        if signs.iter().any(|&s| s != 1.0 && s != -1.0) {
            return Err(CapError::InvalidInput(format!(
                "Symmetry signs must be +1 or -1, got {:?}.",
                signs
            )));
        }
        Ok(Self { signs })
    }

    /// `(x, y, px, py) -> (x, -y, -px, py)`.
    pub fn pcr3bp() -> Self {
        Self {
            signs: vec![1.0, -1.0, -1.0, 1.0],
        }
    }

    pub fn dimension(&self) -> usize {
        self.signs.len()
    }

    pub fn signs(&self) -> &[f64] {
        &self.signs
    }

    pub fn apply<S: Scalar>(&self, v: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("ReversingSymmetry", self.signs.len(), v.len())?;
        Ok(DVector::from_iterator(
            v.len(),
            v.iter()
                .zip(self.signs.iter())
                .map(|(x, &s)| if s < 0.0 { -*x } else { *x }),
        ))
    }

    /// Zeroes the components the symmetry reverses, landing on its fixed set.
    pub fn project_to_fixed_set(&self, v: &DVector<f64>) -> Result<DVector<f64>> {
        self.keep(v, 1.0)
    }

    /// Zeroes the components the symmetry keeps, so that `S(v) = -v`.
    pub fn project_to_reversed_set(&self, v: &DVector<f64>) -> Result<DVector<f64>> {
        self.keep(v, -1.0)
    }

    fn keep(&self, v: &DVector<f64>, sign: f64) -> Result<DVector<f64>> {
        ensure_dimension("ReversingSymmetry", self.signs.len(), v.len())?;
        Ok(DVector::from_iterator(
            v.len(),
            v.iter()
                .zip(self.signs.iter())
                .map(|(&x, &s)| if s == sign { x } else { 0.0 }),
        ))
    }
}

/// Orthonormal frame at `origin` whose flow column follows `field` and whose
/// energy column completes `gradient` against it. The unstable and stable
/// columns are arbitrary orthonormal complements.
pub fn initial_frame(
    origin: &DVector<f64>,
    field: &DVector<f64>,
    gradient: &DVector<f64>,
) -> Result<LocalCoordinateSystem<f64>> {
    let dim = origin.len();
    ensure_dimension("initial_frame field", dim, field.len())?;
    ensure_dimension("initial_frame gradient", dim, gradient.len())?;
    if dim != 4 {
        return Err(CapError::UnsupportedConfiguration(format!(
            "Frames along orbits are four dimensional, got {}.",
            dim
        )));
    }

    let mut seed = DMatrix::zeros(dim, dim + 2);
    seed.set_column(0, field);
    seed.set_column(1, gradient);
    for i in 0..dim {
        seed[(i, i + 2)] = 1.0;
    }
    let qr = QR::new(seed);
    let r = qr.r();
    let q = qr.q();

    let scale = field.norm().max(gradient.norm());
    if !(r[(0, 0)].abs() > 1e-14 * scale) {
        return Err(CapError::DegenerateFrame(
            "Vector field vanishes at the frame origin.".to_string(),
        ));
    }
    if !(r[(1, 1)].abs() > 1e-10 * gradient.norm()) {
        return Err(CapError::DegenerateFrame(
            "Vector field is parallel to the constraint gradient.".to_string(),
        ));
    }

    let mut directions = DMatrix::zeros(dim, dim);
    let order = [
        (UNSTABLE_COLUMN, 2),
        (STABLE_COLUMN, 3),
        (FLOW_COLUMN, 0),
        (ENERGY_COLUMN, 1),
    ];
    for (target, source) in order {
        directions.set_column(target, &q.column(source));
    }
    if directions.column(FLOW_COLUMN).dot(field) < 0.0 {
        directions.column_mut(FLOW_COLUMN).neg_mut();
    }
    if directions.column(ENERGY_COLUMN).dot(gradient) < 0.0 {
        directions.column_mut(ENERGY_COLUMN).neg_mut();
    }
    LocalCoordinateSystem::new(origin.clone(), directions)
}

/// Replaces the unstable/stable columns by `unstable` and `stable`, given in
/// the frame's own local (u, s) plane.
pub fn align(
    frame: &LocalCoordinateSystem<f64>,
    unstable: &DVector<f64>,
    stable: &DVector<f64>,
) -> Result<LocalCoordinateSystem<f64>> {
    ensure_dimension("align unstable", 2, unstable.len())?;
    ensure_dimension("align stable", 2, stable.len())?;
    let lift = |local: &DVector<f64>| {
        let mut full = DVector::zeros(frame.dimension());
        full[UNSTABLE_COLUMN] = local[0];
        full[STABLE_COLUMN] = local[1];
        frame.directions() * full
    };
    replace_unstable_dirs(frame, &lift(unstable), &lift(stable))
}

/// Replaces the unstable/stable columns by global vectors.
pub fn replace_unstable_dirs(
    frame: &LocalCoordinateSystem<f64>,
    unstable: &DVector<f64>,
    stable: &DVector<f64>,
) -> Result<LocalCoordinateSystem<f64>> {
    ensure_dimension("replace_unstable_dirs unstable", frame.dimension(), unstable.len())?;
    ensure_dimension("replace_unstable_dirs stable", frame.dimension(), stable.len())?;
    let mut directions = frame.directions().clone();
    directions.set_column(UNSTABLE_COLUMN, unstable);
    directions.set_column(STABLE_COLUMN, stable);
    frame.with_directions(directions)
}

/// Symmetric frame: the origin moves onto the fixed set of `symmetry`, the
/// stable column is the mirror image of the unstable one, the flow column is
/// reversed by the symmetry and the energy column is kept by it.
pub fn align_with_symmetry(
    frame: &LocalCoordinateSystem<f64>,
    unstable: &DVector<f64>,
    symmetry: &ReversingSymmetry,
) -> Result<LocalCoordinateSystem<f64>> {
    ensure_dimension("align_with_symmetry", 2, unstable.len())?;
    ensure_dimension("align_with_symmetry", symmetry.dimension(), frame.dimension())?;
    let mut local = DVector::zeros(frame.dimension());
    local[UNSTABLE_COLUMN] = unstable[0];
    local[STABLE_COLUMN] = unstable[1];
    let u = frame.directions() * local;
    let s = symmetry.apply(&u)?;
    let flow = symmetry.project_to_reversed_set(&frame.column(FLOW_COLUMN)?)?;
    let energy = symmetry.project_to_fixed_set(&frame.column(ENERGY_COLUMN)?)?;

    let mut directions = frame.directions().clone();
    directions.set_column(UNSTABLE_COLUMN, &u);
    directions.set_column(STABLE_COLUMN, &s);
    directions.set_column(FLOW_COLUMN, &flow);
    directions.set_column(ENERGY_COLUMN, &energy);
    LocalCoordinateSystem::new(symmetry.project_to_fixed_set(frame.origin())?, directions)
}

/// The frame at `S(origin)` with unstable and stable exchanged and the flow
/// reversed, so it fits the time-reversed orbit.
pub fn mirror_frame(
    frame: &LocalCoordinateSystem<f64>,
    symmetry: &ReversingSymmetry,
) -> Result<LocalCoordinateSystem<f64>> {
    let u = symmetry.apply(&frame.column(UNSTABLE_COLUMN)?)?;
    let s = symmetry.apply(&frame.column(STABLE_COLUMN)?)?;
    let flow = -symmetry.apply(&frame.column(FLOW_COLUMN)?)?;
    let energy = symmetry.apply(&frame.column(ENERGY_COLUMN)?)?;

    let mut directions = frame.directions().clone();
    directions.set_column(UNSTABLE_COLUMN, &s);
    directions.set_column(STABLE_COLUMN, &u);
    directions.set_column(FLOW_COLUMN, &flow);
    directions.set_column(ENERGY_COLUMN, &energy);
    LocalCoordinateSystem::new(symmetry.apply(frame.origin())?, directions)
}
