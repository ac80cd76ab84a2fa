//! Per-row whitening operators for Gaussian factors.
//!
//! A noise model turns a raw residual `A·x − b` into an isotropic
//! unit-variance one by scaling each row with `1/σ`. Three variants cover
//! what the factor engine consumes: a general diagonal model, a constrained
//! model whose zero sigmas denote hard equalities, and a unit model that is
//! a no-op. The model also owns the QR dispatch for elimination, because the
//! correct kernel depends on whether hard constraints are present.

use std::fmt;

use nalgebra::storage::StorageMut;
use nalgebra::{DMatrix, DVector, Dyn, Matrix};

use crate::error::{TerraceError, TerraceResult};
use crate::linalg;

/// Diagonal whitening operator attached to every Jacobian factor.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    /// Independent Gaussian noise with per-row standard deviations.
    Diagonal { sigmas: DVector<f64> },
    /// As `Diagonal`, but rows with `σ == 0` are hard constraints.
    Constrained { sigmas: DVector<f64> },
    /// Unit-variance noise; whitening is the identity.
    Unit { dim: usize },
}

impl NoiseModel {
    /// Build a model from standard deviations, selecting `Constrained` when
    /// any entry is exactly zero.
    pub fn from_sigmas(sigmas: DVector<f64>) -> TerraceResult<Self> {
        if sigmas.iter().any(|&s| s < 0.0 || s.is_nan()) {
            return Err(TerraceError::InvalidInput(
                "sigmas must be non-negative".to_string(),
            ));
        }
        if sigmas.iter().any(|&s| s == 0.0) {
            Ok(NoiseModel::Constrained { sigmas })
        } else {
            Ok(NoiseModel::Diagonal { sigmas })
        }
    }

    /// Diagonal model; every sigma must be strictly positive.
    pub fn diagonal(sigmas: DVector<f64>) -> TerraceResult<Self> {
        if sigmas.iter().any(|&s| s <= 0.0 || s.is_nan()) {
            return Err(TerraceError::InvalidInput(
                "diagonal sigmas must be strictly positive".to_string(),
            ));
        }
        Ok(NoiseModel::Diagonal { sigmas })
    }

    /// Mixed-sigma constrained model; zero entries are hard constraints.
    pub fn constrained(sigmas: DVector<f64>) -> TerraceResult<Self> {
        if sigmas.iter().any(|&s| s < 0.0 || s.is_nan()) {
            return Err(TerraceError::InvalidInput(
                "constrained sigmas must be non-negative".to_string(),
            ));
        }
        Ok(NoiseModel::Constrained { sigmas })
    }

    /// Unit model of the given dimension.
    pub fn unit(dim: usize) -> Self {
        NoiseModel::Unit { dim }
    }

    /// Diagonal model with one sigma repeated over `dim` rows.
    pub fn isotropic(dim: usize, sigma: f64) -> TerraceResult<Self> {
        Self::diagonal(DVector::repeat(dim, sigma))
    }

    /// Number of rows this model whitens.
    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.len(),
            NoiseModel::Unit { dim } => *dim,
        }
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, NoiseModel::Constrained { .. })
    }

    /// Standard deviation of row `i`.
    pub fn sigma(&self, i: usize) -> f64 {
        match self {
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas[i],
            NoiseModel::Unit { .. } => 1.0,
        }
    }

    /// All standard deviations as a vector.
    pub fn sigmas(&self) -> DVector<f64> {
        match self {
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.clone(),
            NoiseModel::Unit { dim } => DVector::repeat(*dim, 1.0),
        }
    }

    /// Whiten a residual vector: divide each entry by its sigma. Hard
    /// constraint rows (σ = 0) pass through unscaled.
    pub fn whiten(&self, v: &DVector<f64>) -> DVector<f64> {
        match self {
            NoiseModel::Unit { .. } => v.clone(),
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => {
                DVector::from_fn(v.len(), |i, _| {
                    let s = sigmas[i];
                    if s == 0.0 {
                        v[i]
                    } else {
                        v[i] / s
                    }
                })
            }
        }
    }

    /// Whiten every row of a matrix in place.
    pub fn whiten_in_place<S>(&self, m: &mut Matrix<f64, Dyn, Dyn, S>)
    where
        S: StorageMut<f64, Dyn, Dyn>,
    {
        match self {
            NoiseModel::Unit { .. } => {}
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => {
                debug_assert_eq!(m.nrows(), sigmas.len());
                for i in 0..m.nrows() {
                    let s = sigmas[i];
                    if s != 0.0 {
                        let inv = 1.0 / s;
                        for j in 0..m.ncols() {
                            m[(i, j)] *= inv;
                        }
                    }
                }
            }
        }
    }

    /// Whiten a system `(A, b)` in place.
    pub fn whiten_system(&self, a: &mut DMatrix<f64>, b: &mut DVector<f64>) {
        self.whiten_in_place(a);
        if let NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } = self {
            debug_assert_eq!(b.len(), sigmas.len());
            for i in 0..b.len() {
                let s = sigmas[i];
                if s != 0.0 {
                    b[i] /= s;
                }
            }
        }
    }

    /// In-place column-wise QR of an augmented matrix `[A | b]`, honoring a
    /// staircase: for column `c`, only rows `[c, first_zero_rows[c])` take
    /// part in the reflector.
    ///
    /// Returns the noise model of the surviving rows: `Unit` of the
    /// discovered rank for unconstrained models, and a constrained or
    /// diagonal model from the recovered precisions when hard constraints
    /// are present. Rows at or below the returned model's dimension are
    /// left-over kernel residue the caller must ignore.
    pub fn qr_column_wise(
        &self,
        ab: &mut DMatrix<f64>,
        first_zero_rows: &[usize],
    ) -> NoiseModel {
        match self {
            NoiseModel::Unit { .. } => {
                let rank = linalg::staircase_householder(ab, first_zero_rows);
                NoiseModel::unit(rank)
            }
            NoiseModel::Diagonal { .. } => {
                self.whiten_in_place(ab);
                let rank = linalg::staircase_householder(ab, first_zero_rows);
                NoiseModel::unit(rank)
            }
            NoiseModel::Constrained { sigmas } => {
                constrained_elimination(sigmas, ab, first_zero_rows)
            }
        }
    }
}

impl fmt::Display for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseModel::Diagonal { sigmas } => write!(f, "diagonal sigmas {}", sigmas.transpose()),
            NoiseModel::Constrained { sigmas } => {
                write!(f, "constrained sigmas {}", sigmas.transpose())
            }
            NoiseModel::Unit { dim } => write!(f, "unit dim {dim}"),
        }
    }
}

/// Column-wise elimination in the presence of hard constraints.
///
/// Whitening cannot divide by zero sigmas, so instead of Householder
/// reflections each column is eliminated with its weighted pseudoinverse:
/// the scalar variable of column `j` is expressed as `d − r·S` and
/// substituted back, zeroing the column. Constraint rows with a nonzero
/// coefficient take the pivot with infinite precision.
fn constrained_elimination(
    sigmas: &DVector<f64>,
    ab: &mut DMatrix<f64>,
    first_zero_rows: &[usize],
) -> NoiseModel {
    let m = ab.nrows();
    let n = ab.ncols() - 1;
    let max_rank = m.min(n);

    let weights: Vec<f64> = sigmas
        .iter()
        .map(|&s| if s == 0.0 { f64::INFINITY } else { 1.0 / (s * s) })
        .collect();

    // Solved rows: (pivot column, row of [R d], precision).
    let mut solved: Vec<(usize, Vec<f64>, f64)> = Vec::new();
    let mut pseudo = vec![0.0; m];
    let mut a = vec![0.0; m];

    for j in 0..n {
        if solved.len() >= max_rank {
            break;
        }
        // Rows at and below the stair are structural zeros in this column,
        // and substitution never disturbs that.
        let active = first_zero_rows[j].min(m);
        for (i, entry) in a.iter_mut().enumerate() {
            *entry = if i < active { ab[(i, j)] } else { 0.0 };
        }
        let precision = linalg::weighted_pseudoinverse(&a, &weights, &mut pseudo);
        if precision < linalg::PIVOT_TOLERANCE {
            // No information on this column.
            continue;
        }

        // Solution row: unit pivot, dot products against the remaining columns.
        let mut rd = vec![0.0; n + 1];
        rd[j] = 1.0;
        for (j2, entry) in rd.iter_mut().enumerate().skip(j + 1) {
            let mut dot = 0.0;
            for i in 0..active {
                dot += pseudo[i] * ab[(i, j2)];
            }
            *entry = dot;
        }

        // Substitute back; column j becomes zero in every remaining row.
        for i in 0..active {
            let ai = a[i];
            if ai != 0.0 {
                for (j2, &rdj) in rd.iter().enumerate().skip(j) {
                    ab[(i, j2)] -= ai * rdj;
                }
            }
        }
        solved.push((j, rd, precision));
    }

    // Write [R d] back into the cleared matrix, one solved row per pivot.
    ab.fill(0.0);
    let mut out_sigmas = DVector::zeros(solved.len());
    let mut mixed = false;
    for (i, (j, rd, precision)) in solved.iter().enumerate() {
        for (j2, &rdj) in rd.iter().enumerate().skip(*j) {
            ab[(i, j2)] = rdj;
        }
        if precision.is_infinite() {
            mixed = true;
            out_sigmas[i] = 0.0;
        } else {
            out_sigmas[i] = 1.0 / precision.sqrt();
        }
    }
    if mixed {
        NoiseModel::Constrained { sigmas: out_sigmas }
    } else {
        NoiseModel::Diagonal { sigmas: out_sigmas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    fn assert_approx_eq(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() < eps, "{a} != {b} (eps {eps})");
    }

    #[test]
    fn test_smart_constructor_detects_constraints() {
        let d = NoiseModel::from_sigmas(dvector![1.0, 2.0]).unwrap();
        assert!(!d.is_constrained());
        let c = NoiseModel::from_sigmas(dvector![1.0, 0.0]).unwrap();
        assert!(c.is_constrained());
        assert!(NoiseModel::from_sigmas(dvector![-1.0]).is_err());
    }

    #[test]
    fn test_whiten_diagonal() {
        let model = NoiseModel::diagonal(dvector![2.0, 4.0]).unwrap();
        let w = model.whiten(&dvector![2.0, 8.0]);
        assert_eq!(w, dvector![1.0, 2.0]);
        assert_approx_eq(model.sigma(1), 4.0, 1e-15);
    }

    #[test]
    fn test_whiten_constrained_passthrough() {
        let model = NoiseModel::constrained(dvector![0.0, 2.0]).unwrap();
        let w = model.whiten(&dvector![3.0, 8.0]);
        assert_eq!(w, dvector![3.0, 4.0]);
    }

    #[test]
    fn test_whiten_unit_identity() {
        let model = NoiseModel::unit(3);
        let v = dvector![1.0, 2.0, 3.0];
        assert_eq!(model.whiten(&v), v);
        assert_eq!(model.sigmas(), dvector![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_whiten_system() {
        let model = NoiseModel::diagonal(dvector![2.0, 1.0]).unwrap();
        let mut a = dmatrix![2.0, 4.0; 1.0, 1.0];
        let mut b = dvector![6.0, 5.0];
        model.whiten_system(&mut a, &mut b);
        assert_eq!(a, dmatrix![1.0, 2.0; 1.0, 1.0]);
        assert_eq!(b, dvector![3.0, 5.0]);
    }

    #[test]
    fn test_qr_diagonal_returns_unit_of_rank() {
        let model = NoiseModel::diagonal(dvector![1.0, 1.0]).unwrap();
        let mut ab = dmatrix![
            1.0, 0.0, 1.0;
            1.0, -1.0, 0.0
        ];
        let result = model.qr_column_wise(&mut ab, &[2, 2, 2]);
        assert_eq!(result, NoiseModel::unit(2));
        assert_approx_eq(ab[(1, 0)], 0.0, 1e-12);
    }

    #[test]
    fn test_qr_constrained_pivot() {
        // Row 0 is a hard constraint x0 = 2; row 1 measures x0 with sigma 1.
        let model = NoiseModel::constrained(dvector![0.0, 1.0]).unwrap();
        let mut ab = dmatrix![
            1.0, 2.0;
            1.0, 1.0
        ];
        let result = model.qr_column_wise(&mut ab, &[2, 2]);
        assert!(result.is_constrained());
        assert_eq!(result.dim(), 1);
        assert_approx_eq(result.sigma(0), 0.0, 1e-15);
        // The surviving row is the constraint itself.
        assert_approx_eq(ab[(0, 0)], 1.0, 1e-12);
        assert_approx_eq(ab[(0, 1)], 2.0, 1e-12);
    }

    #[test]
    fn test_qr_constrained_mixed_rows() {
        // Constraint on x0, plain measurement on x1.
        let model = NoiseModel::constrained(dvector![0.0, 2.0]).unwrap();
        let mut ab = dmatrix![
            1.0, 0.0, 3.0;
            0.0, 1.0, 4.0
        ];
        let result = model.qr_column_wise(&mut ab, &[2, 2, 2]);
        assert!(result.is_constrained());
        assert_eq!(result.dim(), 2);
        assert_approx_eq(result.sigma(0), 0.0, 1e-15);
        assert_approx_eq(result.sigma(1), 2.0, 1e-12);
        assert_approx_eq(ab[(0, 2)], 3.0, 1e-12);
        assert_approx_eq(ab[(1, 2)], 4.0, 1e-12);
    }
}
