//! Outward-rounded closed intervals.
//!
//! Directed rounding is emulated with error-free transformations: every
//! endpoint is computed in round-to-nearest and then moved by one ulp only
//! when the exact error term says the rounded value lies on the wrong side.
//! Exactly representable results therefore stay exact.

use num_traits::{One, Zero};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::error::{CapError, Result};

#[derive(Clone, Copy, PartialEq)]
pub struct Interval {
    lo: f64,
    hi: f64,
}

pub(crate) fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

pub(crate) fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

// Knuth's TwoSum: returns the exact rounding error of `a + b`.
fn sum_error(a: f64, b: f64, s: f64) -> f64 {
    let bb = s - a;
    (a - (s - bb)) + (b - bb)
}

// Finite operands whose rounded result overflowed still have a finite exact
// result, so the bound on the finite side is the largest double.
fn overflow_down(r: f64, a: f64, b: f64) -> Option<f64> {
    if r.is_nan() {
        Some(f64::NEG_INFINITY)
    } else if r == f64::INFINITY && a.is_finite() && b.is_finite() {
        Some(f64::MAX)
    } else if r.is_infinite() {
        Some(r)
    } else {
        None
    }
}

fn overflow_up(r: f64, a: f64, b: f64) -> Option<f64> {
    if r.is_nan() {
        Some(f64::INFINITY)
    } else if r == f64::NEG_INFINITY && a.is_finite() && b.is_finite() {
        Some(-f64::MAX)
    } else if r.is_infinite() {
        Some(r)
    } else {
        None
    }
}

fn add_down(a: f64, b: f64) -> f64 {
    let s = a + b;
    if let Some(bound) = overflow_down(s, a, b) {
        return bound;
    }
    if sum_error(a, b, s) < 0.0 {
        next_down(s)
    } else {
        s
    }
}

fn add_up(a: f64, b: f64) -> f64 {
    let s = a + b;
    if let Some(bound) = overflow_up(s, a, b) {
        return bound;
    }
    if sum_error(a, b, s) > 0.0 {
        next_up(s)
    } else {
        s
    }
}

// A zero factor is exact even against an unbounded endpoint. Below the
// normal range the FMA residual may round to zero, so those results always
// step outward.
fn mul_down(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        return 0.0;
    }
    let p = a * b;
    if let Some(bound) = overflow_down(p, a, b) {
        return bound;
    }
    if p.abs() < f64::MIN_POSITIVE || a.mul_add(b, -p) < 0.0 {
        next_down(p)
    } else {
        p
    }
}

fn mul_up(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        return 0.0;
    }
    let p = a * b;
    if let Some(bound) = overflow_up(p, a, b) {
        return bound;
    }
    if p.abs() < f64::MIN_POSITIVE || a.mul_add(b, -p) > 0.0 {
        next_up(p)
    } else {
        p
    }
}

// Sign of the exact quotient error `a/b - q` is the sign of `(a - q*b) / b`.
fn div_error_sign(a: f64, b: f64, q: f64) -> f64 {
    let r = -q.mul_add(b, -a);
    if r == 0.0 {
        0.0
    } else if (r > 0.0) == (b > 0.0) {
        1.0
    } else {
        -1.0
    }
}

// Callers guarantee `b != 0`.
fn div_down(a: f64, b: f64) -> f64 {
    if a == 0.0 {
        return 0.0;
    }
    let q = a / b;
    if let Some(bound) = overflow_down(q, a, b) {
        return bound;
    }
    if b.is_infinite() {
        return q;
    }
    if q.abs() < f64::MIN_POSITIVE || div_error_sign(a, b, q) < 0.0 {
        next_down(q)
    } else {
        q
    }
}

fn div_up(a: f64, b: f64) -> f64 {
    if a == 0.0 {
        return 0.0;
    }
    let q = a / b;
    if let Some(bound) = overflow_up(q, a, b) {
        return bound;
    }
    if b.is_infinite() {
        return q;
    }
    if q.abs() < f64::MIN_POSITIVE || div_error_sign(a, b, q) > 0.0 {
        next_up(q)
    } else {
        q
    }
}

fn sqrt_down(x: f64) -> f64 {
    let s = x.sqrt();
    if !s.is_finite() || s == 0.0 {
        return s;
    }
    if s.mul_add(s, -x) > 0.0 {
        next_down(s)
    } else {
        s
    }
}

fn sqrt_up(x: f64) -> f64 {
    let s = x.sqrt();
    if !s.is_finite() {
        return s;
    }
    if s.mul_add(s, -x) < 0.0 {
        next_up(s)
    } else {
        s
    }
}

impl Interval {
    pub fn new(lo: f64, hi: f64) -> Result<Self> {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(CapError::InvalidInput(format!(
                "Interval bounds out of order: [{}, {}].",
                lo, hi
            )));
        }
        Ok(Self { lo, hi })
    }

    pub const fn point(x: f64) -> Self {
        Self { lo: x, hi: x }
    }

    pub const fn entire() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    /// The interval `[-r, r]`.
    pub fn symmetric(r: f64) -> Self {
        let r = r.abs();
        Self { lo: -r, hi: r }
    }

    /// Builds an interval from two IEEE-754 bit patterns written in hex,
    /// e.g. `Interval::from_hex_bounds("3ff0000000000000", "3ff0000000000001")`.
    pub fn from_hex_bounds(lo: &str, hi: &str) -> Result<Self> {
        Self::new(f64_from_hex(lo)?, f64_from_hex(hi)?)
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    pub fn midpoint(&self) -> f64 {
        if self.lo == self.hi {
            return self.lo;
        }
        if self.lo.is_infinite() || self.hi.is_infinite() {
            return if self.lo.is_infinite() && self.hi.is_infinite() {
                0.0
            } else if self.lo.is_infinite() {
                self.hi
            } else {
                self.lo
            };
        }
        0.5 * self.lo + 0.5 * self.hi
    }

    pub fn width(&self) -> f64 {
        add_up(self.hi, -self.lo)
    }

    pub fn radius(&self) -> f64 {
        let m = self.midpoint();
        add_up(self.hi, -m).max(add_up(m, -self.lo))
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lo <= x && x <= self.hi
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0.0)
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        other.lo <= self.lo && self.hi <= other.hi
    }

    /// Subset of the interior of `other`.
    pub fn is_interior_of(&self, other: &Self) -> bool {
        other.lo < self.lo && self.hi < other.hi
    }

    pub fn hull(&self, other: &Self) -> Self {
        Self {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        if lo > hi {
            None
        } else {
            Some(Self { lo, hi })
        }
    }

    pub fn certainly_lt(&self, x: f64) -> bool {
        self.hi < x
    }

    pub fn certainly_gt(&self, x: f64) -> bool {
        self.lo > x
    }

    pub fn abs(&self) -> Self {
        if self.lo >= 0.0 {
            *self
        } else if self.hi <= 0.0 {
            -*self
        } else {
            Self {
                lo: 0.0,
                hi: (-self.lo).max(self.hi),
            }
        }
    }

    /// Upper bound of `|x|` over the interval.
    pub fn mag(&self) -> f64 {
        self.lo.abs().max(self.hi.abs())
    }

    /// Lower bound of `|x|` over the interval.
    pub fn mig(&self) -> f64 {
        if self.contains_zero() {
            0.0
        } else {
            self.lo.abs().min(self.hi.abs())
        }
    }

    pub fn sqrt(&self) -> Self {
        let lo = self.lo.max(0.0);
        let hi = self.hi.max(0.0);
        Self {
            lo: sqrt_down(lo),
            hi: sqrt_up(hi),
        }
    }

    pub fn sqr(&self) -> Self {
        let a = self.abs();
        Self {
            lo: mul_down(a.lo, a.lo),
            hi: mul_up(a.hi, a.hi),
        }
    }

    pub fn powi(&self, n: i32) -> Self {
        if n == 0 {
            return Self::point(1.0);
        }
        if n < 0 {
            return Self::point(1.0) / self.powi(-n);
        }
        if n % 2 == 0 {
            return self.sqr().powi(n / 2);
        }
        // Odd powers are monotone, so only the endpoints matter.
        let lo = Self::point(self.lo);
        let hi = Self::point(self.hi);
        Self {
            lo: (lo * lo.powi(n - 1)).lo,
            hi: (hi * hi.powi(n - 1)).hi,
        }
    }

    /// Widens the interval by `r` on both sides.
    pub fn inflate(&self, r: f64) -> Self {
        let r = r.abs();
        Self {
            lo: add_down(self.lo, -r),
            hi: add_up(self.hi, r),
        }
    }
}

pub(crate) fn f64_from_hex(s: &str) -> Result<f64> {
    let trimmed = s.trim().trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map(f64::from_bits)
        .map_err(|e| CapError::InvalidInput(format!("Bad hex float '{}': {}", s, e)))
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:e}, {:e}]", self.lo, self.hi)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

impl From<f64> for Interval {
    fn from(x: f64) -> Self {
        Self::point(x)
    }
}

impl Add for Interval {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            lo: add_down(self.lo, rhs.lo),
            hi: add_up(self.hi, rhs.hi),
        }
    }
}

impl Sub for Interval {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            lo: add_down(self.lo, -rhs.hi),
            hi: add_up(self.hi, -rhs.lo),
        }
    }
}

impl Mul for Interval {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let pairs = [
            (self.lo, rhs.lo),
            (self.lo, rhs.hi),
            (self.hi, rhs.lo),
            (self.hi, rhs.hi),
        ];
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (a, b) in pairs {
            lo = lo.min(mul_down(a, b));
            hi = hi.max(mul_up(a, b));
        }
        Self { lo, hi }
    }
}

impl Div for Interval {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        if rhs.contains_zero() {
            return Self::entire();
        }
        let pairs = [
            (self.lo, rhs.lo),
            (self.lo, rhs.hi),
            (self.hi, rhs.lo),
            (self.hi, rhs.hi),
        ];
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (a, b) in pairs {
            lo = lo.min(div_down(a, b));
            hi = hi.max(div_up(a, b));
        }
        Self { lo, hi }
    }
}

impl Neg for Interval {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            lo: -self.hi,
            hi: -self.lo,
        }
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Interval {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl DivAssign for Interval {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl Zero for Interval {
    fn zero() -> Self {
        Self::point(0.0)
    }

    fn is_zero(&self) -> bool {
        self.lo == 0.0 && self.hi == 0.0
    }
}

impl One for Interval {
    fn one() -> Self {
        Self::point(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representable_results_stay_exact() {
        let a = Interval::point(0.5);
        let b = Interval::point(2.0);
        assert_eq!(a * b, Interval::point(1.0));
        assert_eq!(a + a, Interval::point(1.0));
        assert_eq!(b / a, Interval::point(4.0));
        assert_eq!(Interval::point(9.0).sqrt(), Interval::point(3.0));
    }

    #[test]
    fn inexact_results_enclose_the_true_value() {
        let third = Interval::point(1.0) / Interval::point(3.0);
        assert!(third.lo() < third.hi());
        assert!(third.lo() <= 1.0 / 3.0 && 1.0 / 3.0 <= third.hi());

        let tenth_sum = Interval::point(0.1) + Interval::point(0.2);
        assert!(tenth_sum.contains(0.1 + 0.2));
        assert!(tenth_sum.width() > 0.0);

        let root = Interval::point(2.0).sqrt();
        assert!(root.sqr().contains(2.0));
    }

    #[test]
    fn multiplication_covers_sign_changes() {
        let x = Interval::new(-1.0, 2.0).expect("valid");
        let y = Interval::new(-3.0, 0.5).expect("valid");
        let p = x * y;
        assert_eq!(p.lo(), -6.0);
        assert_eq!(p.hi(), 3.0);
        assert_eq!(x.sqr().lo(), 0.0);
        assert_eq!(x.sqr().hi(), 4.0);
    }

    #[test]
    fn division_by_zero_containing_interval_is_entire() {
        let x = Interval::point(1.0) / Interval::new(-1.0, 1.0).expect("valid");
        assert_eq!(x, Interval::entire());
    }

    #[test]
    fn zero_times_unbounded_is_zero() {
        let zero = Interval::point(0.0);
        assert_eq!(zero * Interval::entire(), zero);

        let unbounded = Interval::point(1.0) / Interval::new(-1.0, 1.0).expect("valid");
        let z = zero * unbounded;
        assert!(z.lo() <= z.hi());
        assert!(z.contains_zero());
        assert!(!z.certainly_lt(-5.0));
        assert!(!z.certainly_gt(5.0));

        let half_line = Interval::new(0.0, f64::INFINITY).expect("valid");
        let p = half_line * Interval::new(-2.0, 3.0).expect("valid");
        assert_eq!(p, Interval::entire());
    }

    #[test]
    fn overflow_keeps_finite_results_inside() {
        let z = Interval::point(1e300) * Interval::point(1e10);
        assert!(z.lo() <= z.hi());
        assert_eq!(z.lo(), f64::MAX);
        assert_eq!(z.hi(), f64::INFINITY);

        let n = Interval::point(-1e300) * Interval::point(1e10);
        assert_eq!(n.lo(), f64::NEG_INFINITY);
        assert_eq!(n.hi(), -f64::MAX);

        let s = Interval::point(f64::MAX) + Interval::point(f64::MAX);
        assert_eq!(s.lo(), f64::MAX);
        assert_eq!(s.hi(), f64::INFINITY);

        let q = Interval::point(1e300) / Interval::point(1e-10);
        assert_eq!(q.lo(), f64::MAX);
        assert!(!q.certainly_gt(f64::MAX));
    }

    #[test]
    fn underflow_steps_outward() {
        let tiny = Interval::point(1e-200) * Interval::point(1e-200);
        assert!(tiny.lo() < 0.0 && tiny.hi() > 0.0);
        assert!(tiny.lo() <= tiny.hi());
    }

    #[test]
    fn set_operations() {
        let a = Interval::new(0.0, 2.0).expect("valid");
        let b = Interval::new(1.0, 3.0).expect("valid");
        assert_eq!(a.hull(&b), Interval::new(0.0, 3.0).expect("valid"));
        assert_eq!(a.intersect(&b), Some(Interval::new(1.0, 2.0).expect("valid")));
        assert!(Interval::point(5.0).intersect(&a).is_none());
        assert!(Interval::new(0.5, 1.5).expect("valid").is_interior_of(&a));
        assert!(!a.is_interior_of(&a));
        assert!(a.is_subset_of(&a));
        assert_eq!(Interval::new(-3.0, 1.0).expect("valid").mig(), 0.0);
        assert_eq!(Interval::new(-3.0, -1.0).expect("valid").mig(), 1.0);
        assert_eq!(Interval::new(-3.0, 1.0).expect("valid").mag(), 3.0);
    }

    #[test]
    fn rejects_reversed_bounds() {
        assert!(Interval::new(1.0, 0.0).is_err());
        assert!(Interval::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn hex_bounds_are_bit_exact() {
        let one = Interval::from_hex_bounds("3ff0000000000000", "0x3ff0000000000001")
            .expect("valid hex");
        assert_eq!(one.lo(), 1.0);
        assert_eq!(one.hi(), next_up(1.0));
        assert!(Interval::from_hex_bounds("zz", "3ff0000000000000").is_err());
    }

    #[test]
    fn next_up_and_down_step_one_ulp() {
        assert!(next_up(1.0) > 1.0);
        assert!(next_down(1.0) < 1.0);
        assert!(next_up(-1.0) > -1.0);
        assert_eq!(next_down(next_up(1.0)), 1.0);
        assert!(next_up(0.0) > 0.0);
    }

    #[test]
    fn powers() {
        let x = Interval::new(-2.0, 1.0).expect("valid");
        assert_eq!(x.powi(2), Interval::new(0.0, 4.0).expect("valid"));
        assert_eq!(x.powi(3), Interval::new(-8.0, 1.0).expect("valid"));
        assert_eq!(Interval::point(2.0).powi(-2), Interval::point(0.25));
    }
}
