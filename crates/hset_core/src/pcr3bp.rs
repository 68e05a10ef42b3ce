//! Planar circular restricted three-body problem in standard rotating
//! coordinates `(x, y, px, py)`.
//!
//! The heavy primary of mass `1 - mu` sits at `(-mu, 0)` and the light one of
//! mass `mu` at `(1 - mu, 0)`. The Hamiltonian is
//!
//! ```text
//! H = (px^2 + py^2)/2 + y px - x py - (1 - mu)/r1 - mu/r2
//! ```
//!
//! and the field is its symplectic gradient. Parameters enter as
//! `S::from_f64`, so validated evaluations are rigorous for the double value
//! of `mu`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_dimension, CapError, Result};
use crate::traits::{ConstraintFunction, Map, Scalar, VectorField};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pcr3bpSetup {
    pub mu: f64,
}

impl Default for Pcr3bpSetup {
    fn default() -> Self {
        Self { mu: 1.0 / 82.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primary {
    /// Mass `1 - mu` at `x = -mu`.
    Heavy,
    /// Mass `mu` at `x = 1 - mu`.
    Light,
}

impl Pcr3bpSetup {
    pub fn new(mu: f64) -> Result<Self> {
        let setup = Self { mu };
        setup.validate()?;
        Ok(setup)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.mu > 0.0 && self.mu <= 0.5) {
            return Err(CapError::InvalidInput(format!(
                "Mass parameter must lie in (0, 0.5], got {}.",
                self.mu
            )));
        }
        Ok(())
    }

    pub fn mass<S: Scalar>(&self, primary: Primary) -> S {
        let mu = S::from_f64(self.mu);
        match primary {
            Primary::Heavy => S::one() - mu,
            Primary::Light => mu,
        }
    }

    pub fn position<S: Scalar>(&self, primary: Primary) -> S {
        let mu = S::from_f64(self.mu);
        match primary {
            Primary::Heavy => -mu,
            Primary::Light => S::one() - mu,
        }
    }
}

/// Terms of one primary at a point: `dx = x - xi`, `m / r^3` and `m / r^5`.
struct Attraction<S> {
    dx: S,
    inv_r3: S,
    inv_r5: S,
    inv_r: S,
}

fn attraction<S: Scalar>(setup: &Pcr3bpSetup, primary: Primary, x: S, y: S) -> Result<Attraction<S>> {
    let dx = x - setup.position::<S>(primary);
    let r2 = dx * dx + y * y;
    if r2.contains_zero() {
        return Err(CapError::InvalidInput(format!(
            "State reaches the {:?} primary.",
            primary
        )));
    }
    let r = r2.sqrt();
    let m = setup.mass::<S>(primary);
    let inv_r = m / r;
    let inv_r3 = inv_r / r2;
    Ok(Attraction {
        dx,
        inv_r3,
        inv_r5: inv_r3 / r2,
        inv_r,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pcr3bpVectorField {
    pub setup: Pcr3bpSetup,
    pub direction: TimeDirection,
}

impl Pcr3bpVectorField {
    pub fn new(setup: Pcr3bpSetup) -> Self {
        Self {
            setup,
            direction: TimeDirection::Forward,
        }
    }

    pub fn backward(setup: Pcr3bpSetup) -> Self {
        Self {
            setup,
            direction: TimeDirection::Backward,
        }
    }

    fn sign<S: Scalar>(&self) -> S {
        match self.direction {
            TimeDirection::Forward => S::one(),
            TimeDirection::Backward => -S::one(),
        }
    }
}

impl<S: Scalar> VectorField<S> for Pcr3bpVectorField {
    fn dimension(&self) -> usize {
        4
    }

    fn eval(&self, x: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("Pcr3bpVectorField", 4, x.len())?;
        let (px, py) = (x[2], x[3]);
        let a = attraction(&self.setup, Primary::Heavy, x[0], x[1])?;
        let b = attraction(&self.setup, Primary::Light, x[0], x[1])?;
        let dir = self.sign::<S>();
        Ok(DVector::from_vec(vec![
            dir * (px + x[1]),
            dir * (py - x[0]),
            dir * (py - a.dx * a.inv_r3 - b.dx * b.inv_r3),
            dir * (-px - x[1] * (a.inv_r3 + b.inv_r3)),
        ]))
    }

    fn eval_with_derivative(&self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let value = self.eval(x)?;
        let y = x[1];
        let a = attraction(&self.setup, Primary::Heavy, x[0], y)?;
        let b = attraction(&self.setup, Primary::Light, x[0], y)?;
        let three = S::from_f64(3.0);
        let (zero, one) = (S::zero(), S::one());

        let sum_r3 = a.inv_r3 + b.inv_r3;
        let xx = three * (a.dx * a.dx * a.inv_r5 + b.dx * b.dx * b.inv_r5) - sum_r3;
        let xy = three * y * (a.dx * a.inv_r5 + b.dx * b.inv_r5);
        let yy = three * y * y * (a.inv_r5 + b.inv_r5) - sum_r3;

        let dir = self.sign::<S>();
        let jac = DMatrix::from_row_slice(
            4,
            4,
            &[
                zero, one, one, zero, //
                -one, zero, zero, one, //
                xx, xy, zero, one, //
                xy, yy, -one, zero,
            ],
        ) * dir;
        Ok((value, jac))
    }
}

/// `H - h0`, whose zero set is the energy level of the orbits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pcr3bpHamiltonian {
    pub setup: Pcr3bpSetup,
    pub h0: f64,
}

impl Pcr3bpHamiltonian {
    pub fn new(setup: Pcr3bpSetup, h0: f64) -> Self {
        Self { setup, h0 }
    }
}

impl<S: Scalar> ConstraintFunction<S> for Pcr3bpHamiltonian {
    fn dimension(&self) -> usize {
        4
    }

    fn value(&self, x: &DVector<S>) -> Result<S> {
        ensure_dimension("Pcr3bpHamiltonian", 4, x.len())?;
        let (px, py) = (x[2], x[3]);
        let a = attraction(&self.setup, Primary::Heavy, x[0], x[1])?;
        let b = attraction(&self.setup, Primary::Light, x[0], x[1])?;
        let kinetic = (px * px + py * py) / S::from_f64(2.0);
        Ok(kinetic + x[1] * px - x[0] * py - a.inv_r - b.inv_r - S::from_f64(self.h0))
    }

    fn gradient(&self, x: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("Pcr3bpHamiltonian", 4, x.len())?;
        let y = x[1];
        let (px, py) = (x[2], x[3]);
        let a = attraction(&self.setup, Primary::Heavy, x[0], y)?;
        let b = attraction(&self.setup, Primary::Light, x[0], y)?;
        Ok(DVector::from_vec(vec![
            -py + a.dx * a.inv_r3 + b.dx * b.inv_r3,
            px + y * (a.inv_r3 + b.inv_r3),
            px + y,
            py - x[0],
        ]))
    }
}

/// Squared distance to a primary, `R^4 -> R^1`. Zero exactly at collision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionCondition {
    pub setup: Pcr3bpSetup,
    pub primary: Primary,
}

impl CollisionCondition {
    pub fn new(setup: Pcr3bpSetup, primary: Primary) -> Self {
        Self { setup, primary }
    }
}

impl<S: Scalar> Map<S> for CollisionCondition {
    fn dimension(&self) -> usize {
        4
    }

    fn image_dimension(&self) -> usize {
        1
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(self.eval_with_derivative(x)?.0)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        ensure_dimension("CollisionCondition", 4, x.len())?;
        let dx = x[0] - self.setup.position::<S>(self.primary);
        let y = x[1];
        let two = S::from_f64(2.0);
        let value = DVector::from_element(1, dx * dx + y * y);
        let der = DMatrix::from_row_slice(1, 4, &[two * dx, two * y, S::zero(), S::zero()]);
        Ok((value, der))
    }
}
