use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::error::Result;
use crate::interval::Interval;

/// Numeric type every map in the pipeline is generic over.
/// `f64` is used for approximate work (frame generation), `Interval` for
/// validated enclosures (covering checks).
pub trait Scalar:
    nalgebra::Scalar
    + Copy
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Debug
    + 'static
{
    /// True when values are rigorous enclosures rather than approximations.
    const VALIDATED: bool;

    fn from_f64(value: f64) -> Self;
    /// Representative point value.
    fn mid(&self) -> f64;
    fn sqrt(self) -> Self;
    /// Upper bound of the absolute value.
    fn mag(&self) -> f64;
    /// Lower bound of the absolute value.
    fn mig(&self) -> f64;
    /// Radius of the enclosure, zero for point values.
    fn rad(&self) -> f64;
    fn contains_zero(&self) -> bool;

    /// Smallest enclosure of both values. For point values this is the midpoint.
    fn hull(&self, other: &Self) -> Self;
    fn intersect(&self, other: &Self) -> Option<Self>;
    /// Subset of the interior of `other`. Point values only satisfy this
    /// for themselves.
    fn is_interior_of(&self, other: &Self) -> bool;
    fn inflate(&self, radius: f64) -> Self;

    /// Appends the exact bit pattern of the value (for memoization keys).
    fn push_key_bits(&self, out: &mut Vec<u64>);
}

impl Scalar for f64 {
    const VALIDATED: bool = false;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn mid(&self) -> f64 {
        *self
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn mag(&self) -> f64 {
        self.abs()
    }

    fn mig(&self) -> f64 {
        self.abs()
    }

    fn rad(&self) -> f64 {
        0.0
    }

    fn contains_zero(&self) -> bool {
        *self == 0.0
    }

    fn hull(&self, other: &Self) -> Self {
        0.5 * (*self + *other)
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        if self == other {
            Some(*self)
        } else {
            None
        }
    }

    fn is_interior_of(&self, other: &Self) -> bool {
        self == other
    }

    fn inflate(&self, _radius: f64) -> Self {
        *self
    }

    fn push_key_bits(&self, out: &mut Vec<u64>) {
        out.push(self.to_bits());
    }
}

impl Scalar for Interval {
    const VALIDATED: bool = true;

    fn from_f64(value: f64) -> Self {
        Interval::point(value)
    }

    fn mid(&self) -> f64 {
        self.midpoint()
    }

    fn sqrt(self) -> Self {
        Interval::sqrt(&self)
    }

    fn mag(&self) -> f64 {
        Interval::mag(self)
    }

    fn mig(&self) -> f64 {
        Interval::mig(self)
    }

    fn rad(&self) -> f64 {
        self.radius()
    }

    fn contains_zero(&self) -> bool {
        Interval::contains_zero(self)
    }

    fn hull(&self, other: &Self) -> Self {
        Interval::hull(self, other)
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        Interval::intersect(self, other)
    }

    fn is_interior_of(&self, other: &Self) -> bool {
        Interval::is_interior_of(self, other)
    }

    fn inflate(&self, radius: f64) -> Self {
        Interval::inflate(self, radius)
    }

    fn push_key_bits(&self, out: &mut Vec<u64>) {
        out.push(self.lo().to_bits());
        out.push(self.hi().to_bits());
    }
}

/// One stage of a map pipeline: `R^dimension -> R^image_dimension`.
///
/// Implementations check the input length before doing any arithmetic.
/// Evaluation takes `&mut self` because some stages record side data
/// (e.g. the last return time of a Poincare map).
pub trait Map<S: Scalar> {
    fn dimension(&self) -> usize;
    fn image_dimension(&self) -> usize;
    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>>;
    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)>;
}

impl<S: Scalar, M: Map<S> + ?Sized> Map<S> for &mut M {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn image_dimension(&self) -> usize {
        (**self).image_dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        (**self).eval(x)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        (**self).eval_with_derivative(x)
    }
}

impl<S: Scalar, M: Map<S> + ?Sized> Map<S> for Box<M> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn image_dimension(&self) -> usize {
        (**self).image_dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        (**self).eval(x)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        (**self).eval_with_derivative(x)
    }
}

/// Autonomous vector field `x' = f(x)`.
pub trait VectorField<S: Scalar> {
    fn dimension(&self) -> usize;
    fn eval(&self, x: &DVector<S>) -> Result<DVector<S>>;
    /// Value together with the Jacobian `Df(x)`.
    fn eval_with_derivative(&self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)>;
}

/// Conserved quantity whose zero level is the reachable manifold.
pub trait ConstraintFunction<S: Scalar> {
    fn dimension(&self) -> usize;
    fn value(&self, x: &DVector<S>) -> Result<S>;
    fn gradient(&self, x: &DVector<S>) -> Result<DVector<S>>;
}

/// Right-hand side stepped by the explicit integrators in `solvers`.
pub trait DynamicalSystem {
    fn dimension(&self) -> usize;

    /// Writes `dx/dt` at `(t, x)` into `out`.
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// A solver that can advance a system by one step.
pub trait Steppable {
    /// Advances `state` from `t` to `t + dt` and updates `t`.
    fn step(&mut self, system: &dyn DynamicalSystem, t: &mut f64, state: &mut [f64], dt: f64);
}
