use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_dimension, CapError, Result};
use crate::linalg;
use crate::traits::Scalar;

/// Column index of the unstable direction in an aligned frame.
pub const UNSTABLE_COLUMN: usize = 0;
/// Column index of the stable direction in an aligned frame.
pub const STABLE_COLUMN: usize = 1;
/// Column index of the flow tangent, also the normal of the frame's section.
pub const FLOW_COLUMN: usize = 2;
/// Column index of the constraint (energy) gradient.
pub const ENERGY_COLUMN: usize = 3;

/// Affine frame `x = origin + directions * local` in full phase space.
///
/// The basis is checked to be invertible on construction and its inverse is
/// kept alongside, so a frame is never mutated after it is built.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCoordinateSystem<S: Scalar> {
    origin: DVector<S>,
    directions: DMatrix<S>,
    inverse: DMatrix<S>,
}

impl<S: Scalar> LocalCoordinateSystem<S> {
    pub fn new(origin: DVector<S>, directions: DMatrix<S>) -> Result<Self> {
        let dim = origin.len();
        if dim == 0 {
            return Err(CapError::InvalidInput(
                "Coordinate system has zero dimension.".to_string(),
            ));
        }
        ensure_dimension("LocalCoordinateSystem rows", dim, directions.nrows())?;
        ensure_dimension("LocalCoordinateSystem columns", dim, directions.ncols())?;
        let inverse = linalg::inverse(&directions)
            .map_err(|_| CapError::DegenerateFrame("Frame directions are singular.".to_string()))?;
        Ok(Self {
            origin,
            directions,
            inverse,
        })
    }

    pub fn identity_at(origin: DVector<S>) -> Result<Self> {
        let n = origin.len();
        Self::new(origin, DMatrix::identity(n, n))
    }

    pub fn dimension(&self) -> usize {
        self.origin.len()
    }

    pub fn origin(&self) -> &DVector<S> {
        &self.origin
    }

    pub fn directions(&self) -> &DMatrix<S> {
        &self.directions
    }

    pub fn inverse_directions(&self) -> &DMatrix<S> {
        &self.inverse
    }

    pub fn column(&self, index: usize) -> Result<DVector<S>> {
        if index >= self.dimension() {
            return Err(CapError::InvalidInput(format!(
                "Column {} out of range for a {}-dimensional frame.",
                index,
                self.dimension()
            )));
        }
        Ok(self.directions.column(index).into_owned())
    }

    pub fn flow_direction(&self) -> Result<DVector<S>> {
        self.column(FLOW_COLUMN)
    }

    pub fn to_global(&self, local: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("to_global", self.dimension(), local.len())?;
        Ok(&self.origin + &self.directions * local)
    }

    pub fn to_local(&self, global: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("to_local", self.dimension(), global.len())?;
        Ok(&self.inverse * (global - &self.origin))
    }

    /// Re-expresses a vector given in `src` local coordinates in `self`.
    pub fn change_from(&self, src: &Self, local: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("change_from", self.dimension(), src.dimension())?;
        self.to_local(&src.to_global(local)?)
    }

    /// Same frame with a different origin.
    pub fn with_origin(&self, origin: DVector<S>) -> Result<Self> {
        ensure_dimension("with_origin", self.dimension(), origin.len())?;
        Ok(Self {
            origin,
            directions: self.directions.clone(),
            inverse: self.inverse.clone(),
        })
    }

    pub fn with_directions(&self, directions: DMatrix<S>) -> Result<Self> {
        Self::new(self.origin.clone(), directions)
    }

    /// Representative point frame.
    pub fn to_f64(&self) -> Result<LocalCoordinateSystem<f64>> {
        LocalCoordinateSystem::new(
            linalg::to_f64_vector(&self.origin),
            linalg::to_f64_matrix(&self.directions),
        )
    }
}

impl LocalCoordinateSystem<f64> {
    /// Lifts a point frame into another scalar type (e.g. intervals).
    pub fn convert<T: Scalar>(&self) -> Result<LocalCoordinateSystem<T>> {
        LocalCoordinateSystem::new(
            linalg::from_f64_vector(&self.origin),
            linalg::from_f64_matrix(&self.directions),
        )
    }

    pub fn to_record(&self) -> FrameRecord {
        let n = self.dimension();
        FrameRecord {
            origin: self.origin.iter().copied().collect(),
            directions: (0..n)
                .map(|r| (0..n).map(|c| self.directions[(r, c)]).collect())
                .collect(),
        }
    }

    pub fn from_record(record: &FrameRecord) -> Result<Self> {
        let n = record.origin.len();
        if record.directions.len() != n || record.directions.iter().any(|row| row.len() != n) {
            return Err(CapError::InvalidInput(format!(
                "Frame record rows must be {} entries long.",
                n
            )));
        }
        let flat: Vec<f64> = record.directions.iter().flatten().copied().collect();
        Self::new(
            DVector::from_vec(record.origin.clone()),
            DMatrix::from_row_slice(n, n, &flat),
        )
    }
}

/// Plain serializable form of a frame, row-major directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub origin: Vec<f64>,
    pub directions: Vec<Vec<f64>>,
}

/// Saves an orbit frame sequence as JSON.
pub fn frames_to_json(frames: &[LocalCoordinateSystem<f64>]) -> Result<String> {
    let records: Vec<FrameRecord> = frames.iter().map(|f| f.to_record()).collect();
    serde_json::to_string_pretty(&records)
        .map_err(|e| CapError::InvalidInput(format!("Cannot serialize frames: {}", e)))
}

pub fn frames_from_json(text: &str) -> Result<Vec<LocalCoordinateSystem<f64>>> {
    let records: Vec<FrameRecord> = serde_json::from_str(text).map_err(|e| CapError::Parse {
        line: e.line(),
        message: e.to_string(),
    })?;
    records.iter().map(LocalCoordinateSystem::from_record).collect()
}
