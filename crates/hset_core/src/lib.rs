//! The `hset_core` crate provides the covering-relation engine behind
//! computer-assisted proofs of symbolic dynamics in the planar circular
//! restricted three-body problem. Maps are generic over `Scalar`, so the same
//! pipeline runs on `f64` (frame generation) and on `Interval` (validated
//! covering checks).
//!
//! Key components:
//! - **Traits**: `Scalar`, `Map` (pipeline stage), `VectorField`, `ConstraintFunction`, `DynamicalSystem` and `Steppable`.
//! - **Maps**: affine frame changes, sections, gains, 2D charts, composites and the constraint extension.
//! - **Poincare maps**: local return maps between frames, built on a pluggable `PoincareOracle`.
//! - **Generators**: aligned frames along periodic and homoclinic orbits.
//! - **Checks**: covering relations, parallelogram coverings and collision avoidance.
//! - **Proof**: chains of covering relations with h-set records.
pub mod alignment;
pub mod condition_check;
pub mod coordsys;
pub mod covering;
pub mod directions;
pub mod error;
pub mod hset;
pub mod interval;
pub mod linalg;
pub mod maps;
pub mod memo;
pub mod oracle;
pub mod orbits;
pub mod parallelogram;
pub mod pcr3bp;
pub mod poincare;
pub mod proof;
pub mod settings;
pub mod solvers;
pub mod traits;

pub use coordsys::LocalCoordinateSystem;
pub use covering::{CoveringRelationCheck, Orientation};
pub use error::{CapError, Result};
pub use hset::{HsetKind, HsetParameters};
pub use interval::Interval;
pub use oracle::{FlowPoincareOracle, PoincareOracle};
pub use orbits::{HomoclinicCoordsysGenerator, PeriodicCoordsysGenerator};
pub use poincare::{LocalPoincareMap, ScaledLocalPoincareMap};
pub use proof::{CoveringChain, CoveringStep};
pub use settings::ProofSettings;
pub use traits::{ConstraintFunction, Map, Scalar, VectorField};
