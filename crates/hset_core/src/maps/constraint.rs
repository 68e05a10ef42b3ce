use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::coordsys::{LocalCoordinateSystem, ENERGY_COLUMN, FLOW_COLUMN};
use crate::error::{ensure_dimension, CapError, Result};
use crate::linalg;
use crate::traits::{ConstraintFunction, Map, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSettings {
    pub max_steps: usize,
    pub tolerance: f64,
    /// Absolute padding added to the first enclosure candidate.
    pub inflation: f64,
    pub verification_attempts: usize,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            tolerance: 1e-14,
            inflation: 1e-10,
            verification_attempts: 6,
        }
    }
}

/// Lifts free local coordinates of a frame to the full local vector by
/// solving for the dependent coordinates on the constraint level set.
///
/// With [`ConstraintExtension::energy_only`] the energy-gradient coordinate is
/// dependent. With [`ConstraintExtension::on_section`] the flow-tangent
/// coordinate is dependent too, fixed by the frame's own section
/// `<directions * local, flow_column> = 0`.
pub struct ConstraintExtension<'a, S: Scalar, C: ?Sized> {
    constraint: &'a C,
    frame: LocalCoordinateSystem<S>,
    point_frame: LocalCoordinateSystem<f64>,
    free: Vec<usize>,
    dependent: Vec<usize>,
    with_section: bool,
    settings: ExtensionSettings,
}

impl<'a, S, C> ConstraintExtension<'a, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    pub fn energy_only(
        constraint: &'a C,
        frame: LocalCoordinateSystem<S>,
        settings: ExtensionSettings,
    ) -> Result<Self> {
        Self::build(constraint, frame, vec![ENERGY_COLUMN], false, settings)
    }

    pub fn on_section(
        constraint: &'a C,
        frame: LocalCoordinateSystem<S>,
        settings: ExtensionSettings,
    ) -> Result<Self> {
        Self::build(
            constraint,
            frame,
            vec![FLOW_COLUMN, ENERGY_COLUMN],
            true,
            settings,
        )
    }

    fn build(
        constraint: &'a C,
        frame: LocalCoordinateSystem<S>,
        dependent: Vec<usize>,
        with_section: bool,
        settings: ExtensionSettings,
    ) -> Result<Self> {
        let dim = frame.dimension();
        ensure_dimension(
            "ConstraintExtension",
            dim,
            ConstraintFunction::<f64>::dimension(constraint),
        )?;
        if dependent.iter().any(|&i| i >= dim) {
            return Err(CapError::UnsupportedConfiguration(format!(
                "A {}-dimensional frame has no column {:?} to solve for.",
                dim, dependent
            )));
        }
        let free = (0..dim).filter(|i| !dependent.contains(i)).collect();
        let point_frame = frame.to_f64()?;
        Ok(Self {
            constraint,
            frame,
            point_frame,
            free,
            dependent,
            with_section,
            settings,
        })
    }

    pub fn frame(&self) -> &LocalCoordinateSystem<S> {
        &self.frame
    }

    /// Frame columns that stay free, in input order.
    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    fn assemble<T: Scalar>(&self, free: &DVector<T>, dependent: &DVector<T>) -> DVector<T> {
        let mut local = DVector::zeros(self.frame.dimension());
        for (k, &i) in self.free.iter().enumerate() {
            local[i] = free[k];
        }
        for (k, &i) in self.dependent.iter().enumerate() {
            local[i] = dependent[k];
        }
        local
    }

    fn split_columns<T: Scalar>(&self, jac: &DMatrix<T>) -> (DMatrix<T>, DMatrix<T>) {
        (jac.select_columns(&self.dependent), jac.select_columns(&self.free))
    }

    /// Approximate dependent coordinates for point-valued free coordinates.
    fn newton(&self, free: &DVector<f64>) -> Result<DVector<f64>> {
        let mut dep = DVector::zeros(self.dependent.len());
        for _ in 0..self.settings.max_steps {
            let local = self.assemble(free, &dep);
            let (g, jac) = residual(self.constraint, &self.point_frame, &local, self.with_section)?;
            let (j_dep, _) = self.split_columns(&jac);
            let delta = linalg::solve_vector(&j_dep, &g).map_err(|_| {
                CapError::DegenerateFrame(
                    "Constraint gradient is singular in the dependent directions.".to_string(),
                )
            })?;
            dep -= &delta;
            if delta.amax() <= self.settings.tolerance * (1.0 + dep.amax()) {
                return Ok(dep);
            }
        }
        Err(CapError::ConstraintNotVerified(format!(
            "Newton iteration did not converge in {} steps.",
            self.settings.max_steps
        )))
    }

    /// Encloses the dependent coordinates for every free value in `free`
    /// with a parametric interval Newton step `N(X) = m - J(F,X)^{-1} G(F,m)`.
    fn verify(&self, free: &DVector<S>, guess: &DVector<f64>, slope: &DMatrix<f64>) -> Result<DVector<S>> {
        let m: DVector<S> = linalg::from_f64_vector(guess);
        let spread: DVector<f64> = slope.abs() * free.map(|f| f.rad());
        let mut x: DVector<S> = DVector::from_iterator(
            m.len(),
            m.iter()
                .zip(spread.iter())
                .map(|(c, r)| c.inflate(2.0 * r + self.settings.inflation)),
        );

        for _ in 0..self.settings.verification_attempts {
            let (_, jac_x) = residual(self.constraint, &self.frame, &self.assemble(free, &x), self.with_section)?;
            let (g_m, _) = residual(self.constraint, &self.frame, &self.assemble(free, &m), self.with_section)?;
            let (j_dep, _) = self.split_columns(&jac_x);
            let step = linalg::solve_vector(&j_dep, &g_m)?;
            let n = &m - step;

            if n.iter().zip(x.iter()).all(|(a, b)| a.is_interior_of(b)) {
                return Ok(n);
            }
            x = DVector::from_iterator(
                x.len(),
                x.iter()
                    .zip(n.iter())
                    .map(|(a, b)| a.hull(b).inflate(self.settings.inflation)),
            );
        }
        Err(CapError::ConstraintNotVerified(format!(
            "Interval Newton failed to contract after {} attempts.",
            self.settings.verification_attempts
        )))
    }
}

/// Constraint residual `G(local)` and its Jacobian in local coordinates.
fn residual<T, F>(
    constraint: &F,
    frame: &LocalCoordinateSystem<T>,
    local: &DVector<T>,
    with_section: bool,
) -> Result<(DVector<T>, DMatrix<T>)>
where
    T: Scalar,
    F: ConstraintFunction<T> + ?Sized,
{
    let dim = frame.dimension();
    let rows = if with_section { 2 } else { 1 };
    let directions = frame.directions();
    let x = frame.to_global(local)?;
    let mut g = DVector::zeros(rows);
    let mut jac = DMatrix::zeros(rows, dim);

    let mut row = 0;
    if with_section {
        let normal = directions.column(FLOW_COLUMN).into_owned();
        let offset = directions * local;
        g[0] = offset.dot(&normal);
        let grad = directions.transpose() * &normal;
        for j in 0..dim {
            jac[(0, j)] = grad[j];
        }
        row = 1;
    }

    g[row] = constraint.value(&x)?;
    let grad = directions.transpose() * constraint.gradient(&x)?;
    for j in 0..dim {
        jac[(row, j)] = grad[j];
    }
    Ok((g, jac))
}

impl<'a, S, C> Map<S> for ConstraintExtension<'a, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    fn dimension(&self) -> usize {
        self.free.len()
    }

    fn image_dimension(&self) -> usize {
        self.frame.dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        Ok(self.eval_with_derivative(x)?.0)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        ensure_dimension("ConstraintExtension", self.free.len(), x.len())?;
        let free_point = linalg::to_f64_vector(x);
        let dep_point = self.newton(&free_point)?;

        let (_, jac_point) = residual(
            self.constraint,
            &self.point_frame,
            &self.assemble(&free_point, &dep_point),
            self.with_section,
        )?;
        let (j_dep, j_free) = self.split_columns(&jac_point);
        let slope = -linalg::solve(&j_dep, &j_free)?;

        let dep: DVector<S> = if S::VALIDATED {
            self.verify(x, &dep_point, &slope)?
        } else {
            linalg::from_f64_vector(&dep_point)
        };
        let local = self.assemble(x, &dep);

        let dep_der: DMatrix<S> = if S::VALIDATED {
            let (_, jac) = residual(self.constraint, &self.frame, &local, self.with_section)?;
            let (j_dep, j_free) = self.split_columns(&jac);
            -linalg::solve(&j_dep, &j_free)?
        } else {
            linalg::from_f64_matrix(&slope)
        };

        let mut der = DMatrix::zeros(self.frame.dimension(), self.free.len());
        for (k, &i) in self.free.iter().enumerate() {
            der[(i, k)] = S::one();
        }
        for (k, &i) in self.dependent.iter().enumerate() {
            for j in 0..self.free.len() {
                der[(i, j)] = dep_der[(k, j)];
            }
        }
        Ok((local, der))
    }
}
