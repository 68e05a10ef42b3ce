//! Cone-type covering test near a fixed point.
//!
//! For an aligned derivative `D` with `D11 > alpha`, `-c < D12 < 0`,
//! `0 < D21 < c` and `beta < D22 < rho` the straightened return map covers a
//! parallelogram onto itself. The constants must satisfy `0 < beta < rho`,
//! `alpha > 2c + rho` and `c + rho < 1`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ensure_dimension, CapError, Result};
use crate::interval::Interval;
use crate::linalg;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelogramConstants {
    pub alpha: f64,
    pub beta: f64,
    pub rho: f64,
    pub c: f64,
}

impl Default for ParallelogramConstants {
    fn default() -> Self {
        Self {
            alpha: 5.09,
            beta: 0.195,
            rho: 0.197,
            c: 0.021,
        }
    }
}

impl ParallelogramConstants {
    pub fn validate(&self) -> Result<()> {
        let Self { alpha, beta, rho, c } = *self;
        if !(0.0 < beta && beta < rho) {
            return Err(CapError::InvalidInput(format!(
                "Need 0 < beta < rho, got beta = {}, rho = {}.",
                beta, rho
            )));
        }
        if !(alpha > 2.0 * c + rho) {
            return Err(CapError::InvalidInput(format!(
                "Need alpha > 2c + rho, got alpha = {}, c = {}, rho = {}.",
                alpha, c, rho
            )));
        }
        if !(c + rho < 1.0) {
            return Err(CapError::InvalidInput(format!(
                "Need c + rho < 1, got c = {}, rho = {}.",
                c, rho
            )));
        }
        Ok(())
    }
}

/// Outcome of every entry inequality, each checked with certainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelogramCheck {
    pub d11_above_alpha: bool,
    pub d12_above_minus_c: bool,
    pub d12_negative: bool,
    pub d21_positive: bool,
    pub d21_below_c: bool,
    pub d22_above_beta: bool,
    pub d22_below_rho: bool,
}

impl ParallelogramCheck {
    pub fn holds(&self) -> bool {
        self.failures().is_empty()
    }

    pub fn failures(&self) -> Vec<&'static str> {
        [
            (self.d11_above_alpha, "D11 > alpha"),
            (self.d12_above_minus_c, "D12 > -c"),
            (self.d12_negative, "D12 < 0"),
            (self.d21_positive, "D21 > 0"),
            (self.d21_below_c, "D21 < c"),
            (self.d22_above_beta, "D22 > beta"),
            (self.d22_below_rho, "D22 < rho"),
        ]
        .into_iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, name)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallelogramCoveringChecker {
    constants: ParallelogramConstants,
}

impl ParallelogramCoveringChecker {
    pub fn new(constants: ParallelogramConstants) -> Result<Self> {
        constants.validate()?;
        Ok(Self { constants })
    }

    pub fn constants(&self) -> &ParallelogramConstants {
        &self.constants
    }

    pub fn check(&self, der: &DMatrix<Interval>) -> Result<ParallelogramCheck> {
        ensure_dimension("ParallelogramCoveringChecker rows", 2, der.nrows())?;
        ensure_dimension("ParallelogramCoveringChecker columns", 2, der.ncols())?;
        let k = &self.constants;
        Ok(ParallelogramCheck {
            d11_above_alpha: der[(0, 0)].certainly_gt(k.alpha),
            d12_above_minus_c: der[(0, 1)].certainly_gt(-k.c),
            d12_negative: der[(0, 1)].certainly_lt(0.0),
            d21_positive: der[(1, 0)].certainly_gt(0.0),
            d21_below_c: der[(1, 0)].certainly_lt(k.c),
            d22_above_beta: der[(1, 1)].certainly_gt(k.beta),
            d22_below_rho: der[(1, 1)].certainly_lt(k.rho),
        })
    }

    pub fn certify(&self, der: &DMatrix<Interval>) -> Result<()> {
        let check = self.check(der)?;
        let failures = check.failures();
        if !failures.is_empty() {
            return Err(CapError::InconclusiveCovering(format!(
                "parallelogram conditions failed: {}",
                failures.join(", ")
            )));
        }
        info!("Parallelogram covering certified");
        Ok(())
    }
}

/// Entry-wise hull of derivative enclosures over several boxes.
pub fn hull_of_derivatives(derivatives: &[DMatrix<Interval>]) -> Result<DMatrix<Interval>> {
    linalg::hull_matrices(derivatives)
}

/// Constants of the parallelogram construction derived from an aligned
/// derivative enclosure. Bounds are reported as the side that matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelogramCoveringConditions {
    pub phi: f64,
    pub theta: f64,
    pub c: f64,
    pub beta: f64,
    pub p: f64,
    pub phi_prime: f64,
    pub theta_prime: f64,
    pub delta: f64,
    pub c_prime: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub alpha: f64,
    pub b_hat: f64,
}

fn require(holds: bool, what: &str) -> Result<()> {
    if holds {
        Ok(())
    } else {
        Err(CapError::InconclusiveCovering(format!(
            "parallelogram constant check failed: {}",
            what
        )))
    }
}

/// `a > b` for every value in the enclosures.
fn above(a: Interval, b: Interval) -> bool {
    (a - b).certainly_gt(0.0)
}

impl ParallelogramCoveringConditions {
    pub fn derive(der: &DMatrix<Interval>) -> Result<Self> {
        ensure_dimension("ParallelogramCoveringConditions rows", 2, der.nrows())?;
        ensure_dimension("ParallelogramCoveringConditions columns", 2, der.ncols())?;
        let one = Interval::point(1.0);
        let two = Interval::point(2.0);
        let zero = Interval::point(0.0);

        let phi = Interval::point(der[(0, 0)].midpoint());
        let theta = Interval::point(der[(1, 1)].midpoint());
        let c = Interval::point(
            [
                (der[(0, 0)] - phi).mag(),
                der[(0, 1)].mag(),
                der[(1, 0)].mag(),
                (der[(1, 1)] - theta).mag(),
            ]
            .into_iter()
            .fold(0.0, f64::max),
        );

        require(above(phi, one), "phi > 1")?;
        require(above(theta, zero), "theta > 0")?;
        require(above(one, theta), "theta < 1")?;
        require(above(theta, c), "c < theta")?;
        require(above(c, zero), "c > 0")?;

        let beta = (phi - theta) / c;
        let discriminant = beta.sqr() - Interval::point(4.0);
        require(above(discriminant, zero), "beta^2 > 4")?;
        let p = (beta - discriminant.sqrt()) / two + Interval::point(1e-6);

        require(above(theta, p * phi), "theta > p phi")?;
        require(
            above(p * (phi - theta), c * (one + p).sqr()),
            "p (phi - theta) > c (1 + p)^2",
        )?;

        let p2 = p.sqr();
        let scale = one - p2;
        let phi_prime = (phi - p2 * theta) / scale;
        let theta_prime = (theta - p2 * phi) / scale;
        let delta = p * (phi - theta) / scale;
        let c_prime = c * (one + p).sqr() / scale;

        require(
            above(one, delta + theta_prime + two * c_prime),
            "delta + theta' + 2c' < 1",
        )?;
        require(
            above(phi_prime, theta_prime + Interval::point(4.0) * c_prime),
            "theta' + 4c' < phi'",
        )?;

        let alpha_min =
            (theta_prime + delta + two * c_prime) / (phi_prime - delta - two * c_prime);
        let alpha_max = (one - theta_prime - c_prime) / (delta + c_prime);
        let alpha = Interval::point(alpha_min.hi() + 1e-6);

        require(above(alpha, zero), "alpha > 0")?;
        require(above(one, alpha), "alpha < 1")?;
        require(above(alpha_max, alpha), "alpha < alpha_max")?;

        let b_hat = alpha * (phi_prime - c_prime) - (delta + c_prime);
        let report = Self {
            phi: phi.midpoint(),
            theta: theta.midpoint(),
            c: c.midpoint(),
            beta: beta.midpoint(),
            p: p.midpoint(),
            phi_prime: phi_prime.midpoint(),
            theta_prime: theta_prime.midpoint(),
            delta: delta.midpoint(),
            c_prime: c_prime.midpoint(),
            alpha_min: alpha_min.hi(),
            alpha_max: alpha_max.lo(),
            alpha: alpha.midpoint(),
            b_hat: b_hat.lo(),
        };
        debug!(?report, "Parallelogram constants derived");
        Ok(report)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CapError::InvalidInput(format!("Failed to serialize constants: {}", e)))
    }
}
