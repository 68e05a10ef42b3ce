//! Small dense linear algebra generic over [`Scalar`].
//!
//! nalgebra's decompositions require a real field, which interval
//! enclosures are not, so elimination is done by hand here.

use nalgebra::{DMatrix, DVector};

use crate::error::{ensure_dimension, CapError, Result};
use crate::interval::Interval;
use crate::traits::Scalar;

/// Solves `a * x = b` by Gaussian elimination with partial pivoting.
///
/// The pivot with the largest lower bound on its magnitude is chosen; a pivot
/// whose enclosure contains zero makes the system degenerate.
pub fn solve<S: Scalar>(a: &DMatrix<S>, b: &DMatrix<S>) -> Result<DMatrix<S>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(CapError::DimensionMismatch {
            stage: "solve",
            expected: n,
            got: a.ncols(),
        });
    }
    if b.nrows() != n {
        return Err(CapError::DimensionMismatch {
            stage: "solve",
            expected: n,
            got: b.nrows(),
        });
    }

    let mut m = a.clone();
    let mut rhs = b.clone();
    let scale = a.iter().map(|x| x.mag()).fold(0.0_f64, f64::max);
    let tiny = scale * 1e-14;

    for col in 0..n {
        let mut pivot_row = col;
        let mut best = m[(col, col)].mig();
        for row in col + 1..n {
            let candidate = m[(row, col)].mig();
            if candidate > best {
                best = candidate;
                pivot_row = row;
            }
        }
        if m[(pivot_row, col)].contains_zero() || best <= tiny {
            return Err(CapError::DegenerateFrame(format!(
                "Matrix is singular (pivot {} of {}).",
                col + 1,
                n
            )));
        }
        if pivot_row != col {
            m.swap_rows(pivot_row, col);
            rhs.swap_rows(pivot_row, col);
        }

        let pivot = m[(col, col)];
        for row in col + 1..n {
            let factor = m[(row, col)] / pivot;
            m[(row, col)] = S::zero();
            for k in col + 1..n {
                let v = m[(col, k)];
                m[(row, k)] -= factor * v;
            }
            for k in 0..rhs.ncols() {
                let v = rhs[(col, k)];
                rhs[(row, k)] -= factor * v;
            }
        }
    }

    let mut x = DMatrix::<S>::zeros(n, rhs.ncols());
    for k in 0..rhs.ncols() {
        for row in (0..n).rev() {
            let mut acc = rhs[(row, k)];
            for j in row + 1..n {
                acc -= m[(row, j)] * x[(j, k)];
            }
            x[(row, k)] = acc / m[(row, row)];
        }
    }
    Ok(x)
}

pub fn solve_vector<S: Scalar>(a: &DMatrix<S>, b: &DVector<S>) -> Result<DVector<S>> {
    let rhs = DMatrix::from_column_slice(b.len(), 1, b.as_slice());
    let x = solve(a, &rhs)?;
    Ok(x.column(0).into_owned())
}

pub fn inverse<S: Scalar>(a: &DMatrix<S>) -> Result<DMatrix<S>> {
    solve(a, &DMatrix::<S>::identity(a.nrows(), a.nrows()))
}

/// Max norm of the representative values.
pub fn max_norm<S: Scalar>(v: &DVector<S>) -> f64 {
    v.iter().map(|x| x.mag()).fold(0.0, f64::max)
}

pub fn to_f64_vector<S: Scalar>(v: &DVector<S>) -> DVector<f64> {
    v.map(|x| x.mid())
}

pub fn to_f64_matrix<S: Scalar>(m: &DMatrix<S>) -> DMatrix<f64> {
    m.map(|x| x.mid())
}

pub fn from_f64_vector<S: Scalar>(v: &DVector<f64>) -> DVector<S> {
    v.map(S::from_f64)
}

pub fn from_f64_matrix<S: Scalar>(m: &DMatrix<f64>) -> DMatrix<S> {
    m.map(S::from_f64)
}

/// Entry-wise interval hull of equally sized matrices.
pub fn hull_matrices(items: &[DMatrix<Interval>]) -> Result<DMatrix<Interval>> {
    let first = items
        .first()
        .ok_or_else(|| CapError::InvalidInput("No matrices to hull.".to_string()))?;
    let mut out = first.clone();
    for m in &items[1..] {
        if m.shape() != out.shape() {
            return Err(CapError::DimensionMismatch {
                stage: "hull_matrices",
                expected: out.len(),
                got: m.len(),
            });
        }
        out.zip_apply(m, |a, b| *a = a.hull(&b));
    }
    Ok(out)
}

/// Entry-wise intersection of two enclosures of the same value. Disjoint
/// entries mean one of the enclosures is wrong.
pub fn intersect_vectors<S: Scalar>(a: &DVector<S>, b: &DVector<S>) -> Result<DVector<S>> {
    ensure_dimension("intersect_vectors", a.len(), b.len())?;
    a.iter()
        .zip(b.iter())
        .enumerate()
        .map(|(i, (x, y))| {
            x.intersect(y).ok_or_else(|| {
                CapError::InvalidInput(format!(
                    "Enclosures of component {} are disjoint: {:?} and {:?}.",
                    i, x, y
                ))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(DVector::from_vec)
}

/// Reciprocal condition estimate `sigma_min / sigma_max` of an f64 matrix.
pub fn inverse_condition(m: &DMatrix<f64>) -> f64 {
    let svd = nalgebra::linalg::SVD::new(m.clone(), false, false);
    let max = svd.singular_values.max();
    let min = svd.singular_values.min();
    if max == 0.0 {
        0.0
    } else {
        min / max
    }
}
