use serde::{Deserialize, Serialize};

use crate::traits::{DynamicalSystem, Steppable};

/// Coefficients of an explicit Runge-Kutta method. `a` is strictly lower
/// triangular and stored row by row without the zero diagonal.
pub struct ButcherTableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

/// Classic Runge-Kutta 4th order.
pub const RK4: ButcherTableau = ButcherTableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Tsitouras 5/4, fifth order weights (fixed step).
pub const TSIT5: ButcherTableau = ButcherTableau {
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    a: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ],
    b: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stepper {
    Rk4,
    Tsit5,
}

impl Stepper {
    pub fn build(self, dim: usize) -> ExplicitRungeKutta {
        match self {
            Stepper::Rk4 => ExplicitRungeKutta::new(&RK4, dim),
            Stepper::Tsit5 => ExplicitRungeKutta::new(&TSIT5, dim),
        }
    }
}

/// Fixed-step explicit Runge-Kutta driver over a tableau.
pub struct ExplicitRungeKutta {
    tableau: &'static ButcherTableau,
    stages: Vec<Vec<f64>>,
    tmp: Vec<f64>,
}

impl ExplicitRungeKutta {
    pub fn new(tableau: &'static ButcherTableau, dim: usize) -> Self {
        Self {
            tableau,
            stages: vec![vec![0.0; dim]; tableau.b.len()],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for ExplicitRungeKutta {
    fn step(&mut self, system: &dyn DynamicalSystem, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;
        let n = state.len();
        let tableau = self.tableau;

        for (s, row) in tableau.a.iter().enumerate() {
            for i in 0..n {
                let mut acc = 0.0;
                for (j, a) in row.iter().enumerate() {
                    acc += a * self.stages[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + tableau.c[s] * dt, &self.tmp, &mut self.stages[s]);
        }

        for i in 0..n {
            let mut acc = 0.0;
            for (s, b) in tableau.b.iter().enumerate() {
                acc += b * self.stages[s][i];
            }
            state[i] += dt * acc;
        }
        *t = t0 + dt;
    }
}
