//! Dense kernels used by factor elimination, plus the bridge from factor
//! triplets to the sparse matrix format consumed by downstream solvers.
//!
//! The QR kernel here is staircase-aware: per-column row bounds let it skip
//! rows known to be structurally zero, which is where block elimination gets
//! its asymptotic win over a dense factorization.

use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DMatrix;

use crate::error::{TerraceError, TerraceResult};

/// Pivots with squared magnitude at or below this threshold are treated as
/// numerically dead.
pub(crate) const PIVOT_TOLERANCE: f64 = 1e-9;

/// In-place column-wise Householder QR that honors a staircase pattern.
///
/// `first_zero_rows[c]` is the first row that is structurally zero in column
/// `c`; only rows `[pivot, first_zero_rows[c])` participate in forming and
/// applying the reflector for column `c`. The reflector is applied to every
/// remaining column, including the rightmost (rhs) column, for which no
/// reflector is formed.
///
/// Columns whose active part has negligible norm are skipped without
/// consuming a pivot row. Returns the number of pivot rows produced; rows at
/// or below that count hold reflector residue and are the caller's to ignore
/// or clear.
pub fn staircase_householder(ab: &mut DMatrix<f64>, first_zero_rows: &[usize]) -> usize {
    let m = ab.nrows();
    let ncols = ab.ncols();
    debug_assert_eq!(first_zero_rows.len(), ncols);

    let mut v = vec![0.0; m];
    let mut pivot_row = 0;
    for col in 0..ncols.saturating_sub(1) {
        if pivot_row >= m {
            break;
        }
        let stair = first_zero_rows[col].min(m);
        if stair <= pivot_row {
            // Structurally empty at and below the pivot.
            continue;
        }

        let len = stair - pivot_row;
        let mut norm_sq = 0.0;
        for i in 0..len {
            let x = ab[(pivot_row + i, col)];
            v[i] = x;
            norm_sq += x * x;
        }
        if norm_sq.sqrt() <= PIVOT_TOLERANCE {
            // Dead pivot column; leave the pivot row for a later column.
            continue;
        }

        // Reflector v = x ∓ ‖x‖·e₁, sign chosen away from cancellation.
        let beta = if v[0] >= 0.0 {
            -norm_sq.sqrt()
        } else {
            norm_sq.sqrt()
        };
        v[0] -= beta;
        let mut vtv = 0.0;
        for x in &v[..len] {
            vtv += x * x;
        }

        for c2 in (col + 1)..ncols {
            let mut w = 0.0;
            for i in 0..len {
                w += v[i] * ab[(pivot_row + i, c2)];
            }
            let s = 2.0 * w / vtv;
            if s != 0.0 {
                for i in 0..len {
                    ab[(pivot_row + i, c2)] -= s * v[i];
                }
            }
        }
        ab[(pivot_row, col)] = beta;
        for i in 1..len {
            ab[(pivot_row + i, col)] = 0.0;
        }
        pivot_row += 1;
    }
    pivot_row
}

/// Weighted pseudoinverse of a column vector: fills `pseudo` with
/// `inv(aᵀ·W·a)·aᵀ·W` and returns the precision `aᵀ·W·a`.
///
/// Infinite weights mark hard constraints: if any such row has a nonzero
/// entry, that row alone defines the solution and the returned precision is
/// infinite. A near-zero precision means the column carries no information;
/// `pseudo` is zeroed in that case.
pub fn weighted_pseudoinverse(a: &[f64], weights: &[f64], pseudo: &mut [f64]) -> f64 {
    debug_assert_eq!(a.len(), weights.len());
    debug_assert_eq!(a.len(), pseudo.len());
    let m = a.len();

    // A hard-constraint row with a nonzero coefficient takes the pivot
    // outright: ax + AS = b becomes x + (A/a)S = b/a.
    for i in 0..m {
        if weights[i].is_infinite() && a[i].abs() > PIVOT_TOLERANCE {
            pseudo.fill(0.0);
            pseudo[i] = 1.0 / a[i];
            return f64::INFINITY;
        }
    }

    let mut precision = 0.0;
    for i in 0..m {
        if weights[i].is_finite() && a[i].abs() > PIVOT_TOLERANCE {
            precision += weights[i] * a[i] * a[i];
        }
    }

    if precision < PIVOT_TOLERANCE {
        pseudo.fill(0.0);
    } else {
        let variance = 1.0 / precision;
        for i in 0..m {
            pseudo[i] = if weights[i].is_finite() && a[i].abs() > PIVOT_TOLERANCE {
                variance * weights[i] * a[i]
            } else {
                0.0
            };
        }
    }
    precision
}

/// In-place Cholesky factorization of a symmetric positive semidefinite
/// matrix that tolerates rank deficiency.
///
/// Overwrites the upper triangle with rows of `R` such that `RᵀR`
/// reproduces the input on the span of the successful pivots; rows with
/// non-positive pivots are zeroed and skipped. Returns `(max_rank, success)`
/// where `max_rank` is one past the last successful pivot row and `success`
/// is false when a significantly negative pivot was encountered.
pub fn cholesky_careful(matrix: &mut DMatrix<f64>) -> (usize, bool) {
    let n = matrix.nrows();
    debug_assert_eq!(n, matrix.ncols());

    let mut max_rank = 0;
    let mut success = true;
    for k in 0..n {
        let pivot_sq = matrix[(k, k)];
        if pivot_sq > PIVOT_TOLERANCE {
            let pivot = pivot_sq.sqrt();
            matrix[(k, k)] = pivot;
            for j in (k + 1)..n {
                matrix[(k, j)] /= pivot;
            }
            for i in (k + 1)..n {
                let rki = matrix[(k, i)];
                if rki != 0.0 {
                    for j in i..n {
                        matrix[(i, j)] -= rki * matrix[(k, j)];
                    }
                }
            }
            max_rank = k + 1;
        } else {
            if pivot_sq < -PIVOT_TOLERANCE {
                success = false;
            }
            for j in k..n {
                matrix[(k, j)] = 0.0;
            }
        }
    }
    (max_rank, success)
}

/// Assemble 0-based `(row, col, value)` entries into a compressed sparse
/// column matrix, the input format of the sparse solver backends.
pub fn assemble_sparse(
    nrows: usize,
    ncols: usize,
    entries: &[(usize, usize, f64)],
) -> TerraceResult<SparseColMat<usize, f64>> {
    let triplets: Vec<Triplet<usize, usize, f64>> = entries
        .iter()
        .map(|&(i, j, v)| Triplet::new(i, j, v))
        .collect();
    SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
        .map_err(|e| TerraceError::LinearAlgebra(format!("sparse assembly failed: {e:?}")))
}
