//! Covering relation check on the canonical box `N = [-1, 1]^2`.
//!
//! The image of `N` must stay vertically inside `[-1, 1]` (contraction) while
//! the images of the vertical edges `{-1} x [-1, 1]` and `{+1} x [-1, 1]` land
//! strictly outside `[-1, 1]` horizontally, on opposite sides (expansion).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ensure_dimension, CapError, Result};
use crate::hset::{HsetKind, HsetParameters};
use crate::interval::Interval;
use crate::linalg;
use crate::traits::Map;

/// Which ordering of the edge images witnessed expansion. Both are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Left edge maps left of `-1`, right edge right of `+1`.
    Preserving,
    /// Left edge maps right of `+1`, right edge left of `-1`.
    Reversing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoveringRelationCheck {
    image: DVector<Interval>,
    derivative: DMatrix<Interval>,
    image_left: DVector<Interval>,
    image_right: DVector<Interval>,
}

fn unit() -> Interval {
    Interval::new(-1.0, 1.0).unwrap_or_else(|_| Interval::symmetric(1.0))
}

/// Direct enclosure of `map(x)` intersected with the mean value form
/// `map(m) + Dmap(x) (x - m)`.
fn enclose<M>(map: &mut M, x: &DVector<Interval>) -> Result<(DVector<Interval>, DMatrix<Interval>)>
where
    M: Map<Interval> + ?Sized,
{
    let (direct, derivative) = map.eval_with_derivative(x)?;
    let center: DVector<Interval> = x.map(|v| Interval::point(v.midpoint()));
    let at_center = map.eval(&center)?;
    let mean_value = at_center + &derivative * (x - &center);
    Ok((linalg::intersect_vectors(&direct, &mean_value)?, derivative))
}

impl CoveringRelationCheck {
    pub fn new<M>(map: &mut M) -> Result<Self>
    where
        M: Map<Interval> + ?Sized,
    {
        ensure_dimension("CoveringRelationCheck", 2, map.dimension())?;
        ensure_dimension("CoveringRelationCheck image", 2, map.image_dimension())?;

        let n = DVector::from_element(2, unit());
        let (image, derivative) = enclose(map, &n)?;
        let left = DVector::from_vec(vec![Interval::point(-1.0), unit()]);
        let right = DVector::from_vec(vec![Interval::point(1.0), unit()]);
        let (image_left, _) = enclose(map, &left)?;
        let (image_right, _) = enclose(map, &right)?;
        Ok(Self {
            image,
            derivative,
            image_left,
            image_right,
        })
    }

    pub fn image(&self) -> &DVector<Interval> {
        &self.image
    }

    pub fn derivative(&self) -> &DMatrix<Interval> {
        &self.derivative
    }

    pub fn image_left(&self) -> &DVector<Interval> {
        &self.image_left
    }

    pub fn image_right(&self) -> &DVector<Interval> {
        &self.image_right
    }

    pub fn contraction_condition(&self) -> bool {
        self.image[1].is_subset_of(&unit())
    }

    pub fn orientation(&self) -> Option<Orientation> {
        let left = self.image_left[0];
        let right = self.image_right[0];
        if left.certainly_lt(-1.0) && right.certainly_gt(1.0) {
            Some(Orientation::Preserving)
        } else if left.certainly_gt(1.0) && right.certainly_lt(-1.0) {
            Some(Orientation::Reversing)
        } else {
            None
        }
    }

    pub fn expansion_condition(&self) -> bool {
        self.orientation().is_some()
    }

    /// Both predicates, or an `InconclusiveCovering` error naming the one
    /// that failed.
    pub fn certify(&self) -> Result<Orientation> {
        if !self.contraction_condition() {
            return Err(CapError::InconclusiveCovering(format!(
                "contraction failed, vertical image {} leaves [-1, 1]",
                self.image[1]
            )));
        }
        let orientation = self.orientation().ok_or_else(|| {
            CapError::InconclusiveCovering(format!(
                "expansion failed, edge images {} and {}",
                self.image_left[0], self.image_right[0]
            ))
        })?;
        info!(?orientation, "Covering relation certified");
        Ok(orientation)
    }

    /// The argument box and the three images in physical units, for a check
    /// made on the canonical box of a map scaled by `gain`.
    pub fn hset_parameters(&self, coordsys_origin: [f64; 4], gain: f64) -> Vec<HsetParameters> {
        let k = Interval::point(gain);
        let scaled = |v: &DVector<Interval>| (v[0] * k, v[1] * k);
        let argument = unit() * k;
        let (x, y) = scaled(&self.image);
        let (lx, ly) = scaled(&self.image_left);
        let (rx, ry) = scaled(&self.image_right);
        vec![
            HsetParameters::from_box(HsetKind::Argument, coordsys_origin, argument, argument),
            HsetParameters::from_box(HsetKind::Image, coordsys_origin, x, y),
            HsetParameters::from_box(HsetKind::LeftImage, coordsys_origin, lx, ly),
            HsetParameters::from_box(HsetKind::RightImage, coordsys_origin, rx, ry),
        ]
    }
}
