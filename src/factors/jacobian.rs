//! Linear factor in Jacobian form: a weighted residual `‖(A·x − b)/σ‖²/2`
//! over a small ordered set of vector-valued variables.
//!
//! The factor owns one augmented block matrix `[A₁ A₂ … | b]` with a column
//! group per variable, a diagonal noise model, and per-row staircase
//! metadata (`first_nonzero_blocks`) recording the first variable each row
//! involves. Elimination runs an in-place QR that honors the staircase,
//! peels off one Gaussian conditional per frontal variable, and shrinks the
//! factor to the residual on the remaining variables by advancing the block
//! matrix's row window and first-block cursor.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView};
use tracing::debug;

use crate::core::block_matrix::BlockMatrix;
use crate::core::noise_model::NoiseModel;
use crate::core::permutation::Permutation;
use crate::core::vector_values::VectorValues;
use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};
use crate::factors::conditional::{GaussianBayesNet, GaussianConditional};
use crate::factors::hessian::HessianFactor;
use crate::linalg;

/// Triplet lists `(rows, cols, values)` in 1-based row indexing.
pub type SparseTriplets = (Vec<usize>, Vec<usize>, Vec<f64>);

#[derive(Debug, Clone)]
pub struct JacobianFactor {
    /// Involved variables, strictly increasing.
    pub(crate) keys: Vec<Index>,
    pub(crate) model: NoiseModel,
    /// Per row, the block position of the first variable the row involves;
    /// `keys.len()` means the row is zero except possibly in `b`.
    pub(crate) first_nonzero_blocks: Vec<usize>,
    /// The augmented system `[A | b]`.
    pub(crate) ab: BlockMatrix,
}

impl JacobianFactor {
    /// A factor with no rows and no variables; the identity of combination.
    pub fn empty() -> Self {
        JacobianFactor {
            keys: Vec::new(),
            model: NoiseModel::unit(0),
            first_nonzero_blocks: Vec::new(),
            ab: BlockMatrix::zeros(&[1], 0),
        }
    }

    /// A factor over no variables, carrying only a right-hand side.
    pub fn from_b(b: DVector<f64>) -> TerraceResult<Self> {
        let m = b.len();
        let mut ab = BlockMatrix::zeros(&[1], m);
        ab.column_mut(0, 0).copy_from(&b);
        let factor = JacobianFactor {
            keys: Vec::new(),
            model: NoiseModel::unit(m),
            first_nonzero_blocks: vec![0; m],
            ab,
        };
        factor.validate()?;
        Ok(factor)
    }

    /// Unary factor `‖(A₁·x_{i1} − b)/σ‖²/2`.
    pub fn unary(
        i1: Index,
        a1: DMatrix<f64>,
        b: DVector<f64>,
        model: NoiseModel,
    ) -> TerraceResult<Self> {
        Self::from_terms(vec![(i1, a1)], b, model)
    }

    /// Binary factor over two variables.
    pub fn binary(
        i1: Index,
        a1: DMatrix<f64>,
        i2: Index,
        a2: DMatrix<f64>,
        b: DVector<f64>,
        model: NoiseModel,
    ) -> TerraceResult<Self> {
        Self::from_terms(vec![(i1, a1), (i2, a2)], b, model)
    }

    /// Ternary factor over three variables.
    pub fn ternary(
        i1: Index,
        a1: DMatrix<f64>,
        i2: Index,
        a2: DMatrix<f64>,
        i3: Index,
        a3: DMatrix<f64>,
        b: DVector<f64>,
        model: NoiseModel,
    ) -> TerraceResult<Self> {
        Self::from_terms(vec![(i1, a1), (i2, a2), (i3, a3)], b, model)
    }

    /// N-ary factor from an ordered `(variable, A)` list.
    pub fn from_terms(
        terms: Vec<(Index, DMatrix<f64>)>,
        b: DVector<f64>,
        model: NoiseModel,
    ) -> TerraceResult<Self> {
        let m = b.len();
        if terms.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(TerraceError::InvalidInput(
                "variable indices must be strictly increasing".to_string(),
            ));
        }
        for (key, a) in &terms {
            if a.nrows() != m {
                return Err(TerraceError::InvalidInput(format!(
                    "A[{}] has {} rows but b has length {}",
                    key,
                    a.nrows(),
                    m
                )));
            }
        }
        if model.dim() != m {
            return Err(TerraceError::InvalidInput(format!(
                "noise model has dimension {} but the factor has {} rows",
                model.dim(),
                m
            )));
        }

        let mut dims: Vec<usize> = terms.iter().map(|(_, a)| a.ncols()).collect();
        dims.push(1);
        let mut ab = BlockMatrix::zeros(&dims, m);
        for (pos, (_, a)) in terms.iter().enumerate() {
            ab.block_mut(pos).copy_from(a);
        }
        ab.column_mut(terms.len(), 0).copy_from(&b);

        let factor = JacobianFactor {
            keys: terms.into_iter().map(|(key, _)| key).collect(),
            model,
            first_nonzero_blocks: vec![0; m],
            ab,
        };
        factor.validate()?;
        Ok(factor)
    }

    /// Turn a conditional `R·x_f + S·x_s = d` back into a factor over the
    /// same variables.
    pub fn from_conditional(conditional: &GaussianConditional) -> TerraceResult<Self> {
        let ab = BlockMatrix::from_window(conditional.rsd());
        let m = ab.rows();
        let factor = JacobianFactor {
            keys: conditional.keys().to_vec(),
            model: NoiseModel::from_sigmas(conditional.sigmas().clone())?,
            // Kept dense rather than triangular; rows are re-sorted at the
            // next combine anyway.
            first_nonzero_blocks: vec![0; m],
            ab,
        };
        factor.validate()?;
        Ok(factor)
    }

    /// Convert an information-form factor via a careful Cholesky of its
    /// augmented information matrix. The result has as many rows as the
    /// discovered rank and a unit noise model; keys are re-sorted into
    /// ascending order through an inverse permutation.
    pub fn from_hessian(hessian: &HessianFactor) -> TerraceResult<Self> {
        let mut matrix = hessian.info().clone();
        let (rank, _) = linalg::cholesky_careful(&mut matrix);
        // Keep the square-root factor only.
        let side = matrix.nrows();
        for j in 0..side {
            for i in (j + 1)..side {
                matrix[(i, j)] = 0.0;
            }
        }

        let mut dims = hessian.dims().to_vec();
        dims.push(1);
        let mut ab = BlockMatrix::from_matrix(matrix, &dims);
        ab.set_row_end(rank);

        let mut factor = JacobianFactor {
            keys: hessian.keys().to_vec(),
            model: NoiseModel::unit(rank),
            first_nonzero_blocks: vec![0; rank],
            ab,
        };

        // Relabel each variable to its rank among the sorted keys; the
        // permute reorders the blocks into ascending key order, after which
        // the real indices are restored.
        if !factor.keys.is_empty() {
            let mut sorted = factor.keys.clone();
            sorted.sort_unstable();
            let max_key = *sorted.last().unwrap_or(&0);
            let mut perm = Permutation::identity(max_key + 1);
            for (position, &var) in sorted.iter().enumerate() {
                perm.set(var, position);
            }
            factor.permute_with_inverse(&perm)?;
            factor.keys = sorted;
        }

        factor.validate()?;
        Ok(factor)
    }

    /// Reject NaN storage entries.
    fn validate(&self) -> TerraceResult<()> {
        if self.ab.matrix().iter().any(|v| v.is_nan()) {
            return Err(TerraceError::InvalidInput(
                "factor contains NaN matrix entries".to_string(),
            ));
        }
        debug_assert_eq!(self.first_nonzero_blocks.len(), self.ab.rows());
        debug_assert!(self
            .first_nonzero_blocks
            .iter()
            .all(|&s| s <= self.keys.len() + 1));
        Ok(())
    }

    pub fn keys(&self) -> &[Index] {
        &self.keys
    }

    pub fn model(&self) -> &NoiseModel {
        &self.model
    }

    pub fn first_nonzero_blocks(&self) -> &[usize] {
        &self.first_nonzero_blocks
    }

    /// Number of rows in the corresponding linear system.
    pub fn rows(&self) -> usize {
        self.ab.rows()
    }

    /// Number of columns, including the rhs column.
    pub fn cols(&self) -> usize {
        self.ab.cols()
    }

    /// Whether the factor contains no rows. An empty factor may still list
    /// variables; it contributes nothing to combination.
    pub fn is_empty(&self) -> bool {
        self.ab.rows() == 0
    }

    /// Column dimension of the variable at block position `pos`.
    pub fn dim_of(&self, pos: usize) -> usize {
        self.ab.block_dim(pos)
    }

    /// View of the Jacobian block of the variable at position `pos`.
    pub fn a(&self, pos: usize) -> DMatrixView<'_, f64> {
        self.ab.block(pos)
    }

    /// View of the right-hand side.
    pub fn b(&self) -> DVectorView<'_, f64> {
        self.ab.column(self.keys.len(), 0)
    }

    /// Raw residual `Σⱼ Aⱼ·x[keyⱼ] − b`.
    pub fn unweighted_error(&self, x: &VectorValues) -> DVector<f64> {
        let mut e = -self.b().clone_owned();
        if self.is_empty() {
            return e;
        }
        for (pos, &key) in self.keys.iter().enumerate() {
            e.gemv(1.0, &self.a(pos), &x[key], 1.0);
        }
        e
    }

    /// Whitened residual `(Σⱼ Aⱼ·x[keyⱼ] − b)/σ`.
    pub fn error_vector(&self, x: &VectorValues) -> DVector<f64> {
        self.model.whiten(&self.unweighted_error(x))
    }

    /// Half the squared whitened residual; zero for empty factors.
    pub fn error(&self, x: &VectorValues) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.error_vector(x);
        0.5 * e.norm_squared()
    }

    /// Whitened matrix-vector product `(A·x)/σ`.
    pub fn multiply(&self, x: &VectorValues) -> DVector<f64> {
        let mut ax = DVector::zeros(self.rows());
        if self.is_empty() {
            return ax;
        }
        for (pos, &key) in self.keys.iter().enumerate() {
            ax.gemv(1.0, &self.a(pos), &x[key], 1.0);
        }
        self.model.whiten(&ax)
    }

    /// `x[keyⱼ] += α · Aⱼᵀ · (e/σ)` for every involved variable.
    pub fn transpose_multiply_add(
        &self,
        alpha: f64,
        e: &DVector<f64>,
        x: &mut VectorValues,
    ) -> TerraceResult<()> {
        let weighted = self.model.whiten(e) * alpha;
        for (pos, &key) in self.keys.iter().enumerate() {
            let a = self.a(pos);
            let target = x.get_mut(key).ok_or_else(|| {
                TerraceError::InvalidInput(format!("missing variable {key} in destination values"))
            })?;
            target.gemv_tr(1.0, &a, &weighted, 1.0);
        }
        Ok(())
    }

    /// The dense system `(A, b)`, whitened when `weight` is set.
    pub fn matrix(&self, weight: bool) -> (DMatrix<f64>, DVector<f64>) {
        let mut a = self.ab.range(0, self.keys.len()).clone_owned();
        let mut b = self.b().clone_owned();
        if weight {
            self.model.whiten_system(&mut a, &mut b);
        }
        (a, b)
    }

    /// The dense augmented matrix `[A | b]`, whitened when `weight` is set.
    pub fn matrix_augmented(&self, weight: bool) -> DMatrix<f64> {
        let mut ab = self.ab.range(0, self.ab.nblocks()).clone_owned();
        if weight {
            self.model.whiten_in_place(&mut ab);
        }
        ab
    }

    /// Triplets `(i, j, s)` of the whitened augmented system in 1-based row
    /// indexing, suitable for sparse assembly. `column_indices` gives the
    /// first column of each involved variable; `b` lands in `b_column`.
    pub fn sparse(
        &self,
        column_indices: &BTreeMap<Index, usize>,
        b_column: usize,
    ) -> TerraceResult<SparseTriplets> {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (pos, &key) in self.keys.iter().enumerate() {
            let a = self.a(pos);
            let column_start = *column_indices.get(&key).ok_or_else(|| {
                TerraceError::InvalidInput(format!("no column index for variable {key}"))
            })?;
            for i in 0..a.nrows() {
                let sigma = self.model.sigma(i);
                for j in 0..a.ncols() {
                    let value = a[(i, j)];
                    if value != 0.0 {
                        rows.push(i + 1);
                        cols.push(column_start + j);
                        values.push(if sigma == 0.0 { value } else { value / sigma });
                    }
                }
            }
        }
        let b = self.b();
        for i in 0..b.len() {
            let value = b[i];
            if value != 0.0 {
                let sigma = self.model.sigma(i);
                rows.push(i + 1);
                cols.push(b_column);
                values.push(if sigma == 0.0 { value } else { value / sigma });
            }
        }
        Ok((rows, cols, values))
    }

    /// A copy with the weights baked into the matrix and a unit noise model.
    pub fn whiten(&self) -> JacobianFactor {
        let mut result = self.clone();
        let nblocks = result.ab.nblocks();
        let mut window = result.ab.range_mut(0, nblocks);
        self.model.whiten_in_place(&mut window);
        result.model = NoiseModel::unit(self.model.dim());
        result
    }

    /// Equality up to a per-row sign flip of the augmented matrix; the row
    /// sign is not determined by QR. Noise models are not compared.
    pub fn equals(&self, other: &JacobianFactor, tol: f64) -> bool {
        if self.is_empty() || other.is_empty() {
            return self.is_empty() && other.is_empty();
        }
        if self.keys != other.keys || self.rows() != other.rows() || self.cols() != other.cols() {
            return false;
        }
        let a = self.ab.range(0, self.ab.nblocks());
        let b = other.ab.range(0, other.ab.nblocks());
        for row in 0..a.nrows() {
            let mut same = true;
            let mut flipped = true;
            for col in 0..a.ncols() {
                if (a[(row, col)] - b[(row, col)]).abs() > tol {
                    same = false;
                }
                if (a[(row, col)] + b[(row, col)]).abs() > tol {
                    flipped = false;
                }
            }
            if !same && !flipped {
                return false;
            }
        }
        true
    }

    /// Relabel every variable through an inverse permutation and reorder the
    /// column blocks so the new keys are ascending. The staircase is
    /// invalidated and reset to dense rows.
    pub fn permute_with_inverse(
        &mut self,
        inverse_permutation: &Permutation,
    ) -> TerraceResult<()> {
        // New key -> old block position.
        let mut source_slots: BTreeMap<Index, usize> = BTreeMap::new();
        for (position, &key) in self.keys.iter().enumerate() {
            let new_key = inverse_permutation.get(key).ok_or_else(|| {
                TerraceError::InvalidInput(format!(
                    "permutation does not cover variable {key}"
                ))
            })?;
            if source_slots.insert(new_key, position).is_some() {
                return Err(TerraceError::InvalidInput(
                    "permutation maps two variables to the same index".to_string(),
                ));
            }
        }

        let mut dims: Vec<usize> = source_slots
            .values()
            .map(|&position| self.ab.block_dim(position))
            .collect();
        dims.push(1);
        let nr_keys = self.keys.len();
        let rows = self.ab.rows();

        // Take the old storage whole, then copy block by block into the new
        // layout; the old buffer is read-only from here on.
        let old = std::mem::replace(&mut self.ab, BlockMatrix::zeros(&dims, rows));
        self.keys.clear();
        for (position, (&new_key, &source)) in source_slots.iter().enumerate() {
            self.keys.push(new_key);
            self.ab.block_mut(position).copy_from(&old.block(source));
        }
        self.ab.block_mut(nr_keys).copy_from(&old.block(nr_keys));

        // Entire rows must be copied the next time this factor is combined.
        for entry in &mut self.first_nonzero_blocks {
            *entry = 0;
        }
        Ok(())
    }

    /// Eliminate the first `nr_frontals` variables.
    ///
    /// Runs an in-place staircase-aware QR of the augmented system, extracts
    /// one conditional per frontal variable, and rewrites this factor into
    /// the residual on the remaining variables by advancing the row window
    /// and first-block cursor. On rank deficiency over the frontal columns
    /// the factor is left partially mutated and must be discarded.
    pub fn eliminate(&mut self, nr_frontals: usize) -> TerraceResult<GaussianBayesNet> {
        if !self.ab.is_full_window() {
            return Err(TerraceError::PreconditionViolation(
                "eliminate requires the full row window".to_string(),
            ));
        }
        if nr_frontals == 0 || nr_frontals > self.keys.len() {
            return Err(TerraceError::PreconditionViolation(format!(
                "cannot eliminate {} frontal variables from a factor over {}",
                nr_frontals,
                self.keys.len()
            )));
        }
        debug!(
            nr_frontals,
            rows = self.rows(),
            cols = self.cols(),
            "eliminating frontal variables"
        );

        // Translate the per-row staircase into per-column first-zero rows.
        let m = self.rows();
        let total_cols = self.cols();
        let mut first_zero_rows = vec![0usize; total_cols];
        {
            let mut last_nonzero_row = 0;
            let mut col = 0;
            for var in 0..self.keys.len() {
                while last_nonzero_row < m && self.first_nonzero_blocks[last_nonzero_row] <= var {
                    last_nonzero_row += 1;
                }
                for _ in 0..self.ab.block_dim(var) {
                    first_zero_rows[col] = last_nonzero_row;
                    col += 1;
                }
            }
            debug_assert_eq!(col + 1, total_cols);
            first_zero_rows[col] = m;
        }
        debug_assert!(first_zero_rows.windows(2).all(|w| w[0] <= w[1]));

        let frontal_dim = self.ab.offset(nr_frontals);

        // In-place QR appropriate to the noise model.
        let qr_model = self
            .model
            .qr_column_wise(self.ab.matrix_mut(), &first_zero_rows);
        let rank = qr_model.dim();
        debug!(rank, frontal_dim, "staircase QR complete");

        // The kernel leaves reflector residue below the diagonal of the
        // surviving rows; clear it.
        let matrix = self.ab.matrix_mut();
        for j in 0..total_cols {
            for i in (j + 1)..rank {
                matrix[(i, j)] = 0.0;
            }
        }

        if rank < frontal_dim {
            return Err(TerraceError::SingularFactor { key: self.keys[0] });
        }

        // Extract one conditional per frontal variable, shrinking the window
        // over the conditional rows as we go.
        let sigmas = qr_model.sigmas();
        let mut conditionals = GaussianBayesNet::new();
        for j in 0..nr_frontals {
            let var_dim = self.ab.block_dim(0);
            let row_start = self.ab.row_start();
            self.ab.set_row_end(row_start + var_dim);
            let conditional_sigmas = sigmas.rows(row_start, var_dim).clone_owned();
            conditionals.push(GaussianConditional::from_window(
                &self.keys[j..],
                1,
                &self.ab,
                conditional_sigmas,
            )?);
            self.ab.set_row_start(row_start + var_dim);
            self.ab.advance_first_block();
        }

        // The rows below the conditionals form the residual factor.
        self.ab.set_row_end(rank);
        self.keys.drain(..nr_frontals);
        let residual_sigmas = sigmas.rows(frontal_dim, rank - frontal_dim).clone_owned();
        self.model = if qr_model.is_constrained() {
            NoiseModel::constrained(residual_sigmas)?
        } else {
            NoiseModel::diagonal(residual_sigmas)?
        };

        // Rebuild the staircase: the residual of a QR is upper triangular,
        // so row r first involves the block containing column r.
        let residual_rows = self.ab.rows();
        self.first_nonzero_blocks.clear();
        self.first_nonzero_blocks.resize(residual_rows, 0);
        let mut varpos = 0;
        for row in 0..residual_rows {
            while varpos < self.keys.len() && self.ab.offset(varpos + 1) <= row {
                varpos += 1;
            }
            self.first_nonzero_blocks[row] = varpos;
        }
        debug_assert!(self
            .first_nonzero_blocks
            .windows(2)
            .all(|w| w[0] <= w[1]));

        Ok(conditionals)
    }

    /// Eliminate exactly the first variable, returning its conditional.
    pub fn eliminate_first(&mut self) -> TerraceResult<GaussianConditional> {
        let bn = self.eliminate(1)?;
        bn.into_iter().next().ok_or_else(|| {
            TerraceError::LinearAlgebra("elimination produced no conditional".to_string())
        })
    }
}

impl fmt::Display for JacobianFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "empty factor, keys: {:?}", self.keys);
        }
        for (pos, &key) in self.keys.iter().enumerate() {
            writeln!(f, "A[{}] ={}", key, self.a(pos))?;
        }
        writeln!(f, "b ={}", self.b())?;
        write!(f, "model: {}", self.model)
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
    fn test_unary_identity_error() {
        let factor = JacobianFactor::unary(
            0,
            dmatrix![1.0, 0.0; 0.0, 1.0],
            dvector![0.0, 0.0],
            NoiseModel::isotropic(2, 1.0).unwrap(),
        )
        .unwrap();
        let x: VectorValues = [(0, dvector![3.0, 4.0])].into_iter().collect();
        assert_approx_eq(factor.error(&x), 12.5, 1e-12);
        assert_eq!(factor.multiply(&x), dvector![3.0, 4.0]);
    }

    #[test]
    fn test_error_matches_definition() {
        let factor = JacobianFactor::binary(
            1,
            dmatrix![2.0; 0.0],
            4,
            dmatrix![1.0; -1.0],
            dvector![1.0, 2.0],
            NoiseModel::diagonal(dvector![0.5, 2.0]).unwrap(),
        )
        .unwrap();
        let x: VectorValues = [(1, dvector![1.0]), (4, dvector![3.0])].into_iter().collect();
        // residual = [2·1 + 3 − 1, −3 − 2] = [4, −5]; whitened = [8, −2.5]
        let e = factor.error_vector(&x);
        assert_approx_eq(e[0], 8.0, 1e-12);
        assert_approx_eq(e[1], -2.5, 1e-12);
        assert_approx_eq(factor.error(&x), 0.5 * (64.0 + 6.25), 1e-12);
        assert!(factor.error(&x) >= 0.0);
    }

    #[test]
    fn test_constructor_rejects_nan() {
        let result = JacobianFactor::unary(
            0,
            dmatrix![f64::NAN],
            dvector![0.0],
            NoiseModel::unit(1),
        );
        assert!(matches!(result, Err(TerraceError::InvalidInput(_))));
    }

    #[test]
    fn test_constructor_rejects_row_mismatch() {
        let result = JacobianFactor::unary(
            0,
            dmatrix![1.0; 2.0],
            dvector![0.0],
            NoiseModel::unit(1),
        );
        assert!(matches!(result, Err(TerraceError::InvalidInput(_))));
    }

    #[test]
    fn test_constructor_rejects_unordered_keys() {
        let result = JacobianFactor::binary(
            3,
            dmatrix![1.0],
            1,
            dmatrix![1.0],
            dvector![0.0],
            NoiseModel::unit(1),
        );
        assert!(matches!(result, Err(TerraceError::InvalidInput(_))));
    }

    #[test]
    fn test_whiten_preserves_error() {
        let factor = JacobianFactor::unary(
            2,
            dmatrix![3.0; 1.0],
            dvector![1.0, -1.0],
            NoiseModel::diagonal(dvector![2.0, 5.0]).unwrap(),
        )
        .unwrap();
        let whitened = factor.whiten();
        assert!(!whitened.model().is_constrained());
        assert_eq!(whitened.model().dim(), 2);
        let x: VectorValues = [(2, dvector![0.7])].into_iter().collect();
        assert_approx_eq(whitened.error(&x), factor.error(&x), 1e-12);
    }

    #[test]
    fn test_transpose_multiply_add() {
        let factor = JacobianFactor::unary(
            0,
            dmatrix![1.0, 2.0; 3.0, 4.0],
            dvector![0.0, 0.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        let mut x: VectorValues = [(0, dvector![0.0, 0.0])].into_iter().collect();
        factor
            .transpose_multiply_add(2.0, &dvector![1.0, 1.0], &mut x)
            .unwrap();
        // 2·Aᵀ·[1,1] = 2·[4, 6]
        assert_eq!(x[0], dvector![8.0, 12.0]);
    }

    #[test]
    fn test_matrix_accessors() {
        let factor = JacobianFactor::unary(
            0,
            dmatrix![2.0; 4.0],
            dvector![6.0, 8.0],
            NoiseModel::diagonal(dvector![2.0, 4.0]).unwrap(),
        )
        .unwrap();
        let (a, b) = factor.matrix(true);
        assert_eq!(a, dmatrix![1.0; 1.0]);
        assert_eq!(b, dvector![3.0, 2.0]);
        let ab = factor.matrix_augmented(false);
        assert_eq!(ab, dmatrix![2.0, 6.0; 4.0, 8.0]);
    }

    #[test]
    fn test_sparse_round_trip() {
        let factor = JacobianFactor::binary(
            1,
            dmatrix![1.0, 2.0; 0.0, 3.0],
            3,
            dmatrix![5.0; 6.0],
            dvector![7.0, 8.0],
            NoiseModel::diagonal(dvector![2.0, 4.0]).unwrap(),
        )
        .unwrap();
        let column_indices: BTreeMap<Index, usize> = [(1, 1), (3, 3)].into_iter().collect();
        let (rows, cols, values) = factor.sparse(&column_indices, 4).unwrap();
        let mut dense = DMatrix::zeros(2, 4);
        for ((&i, &j), &s) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            assert!(i >= 1 && j >= 1, "triplets are 1-based");
            dense[(i - 1, j - 1)] = s;
        }
        assert_eq!(dense, factor.matrix_augmented(true));
    }

    #[test]
    fn test_equals_up_to_row_sign() {
        let factor = JacobianFactor::unary(
            0,
            dmatrix![1.0; 2.0],
            dvector![3.0, 4.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        let flipped = JacobianFactor::unary(
            0,
            dmatrix![-1.0; 2.0],
            dvector![-3.0, 4.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        assert!(factor.equals(&flipped, 1e-9));
        let different = JacobianFactor::unary(
            0,
            dmatrix![-1.0; 2.0],
            dvector![3.0, 4.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        assert!(!factor.equals(&different, 1e-9));
    }

    #[test]
    fn test_permute_relabels_and_sorts() {
        let factor = JacobianFactor::binary(
            2,
            dmatrix![1.0],
            5,
            dmatrix![2.0],
            dvector![3.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        let mut permuted = factor.clone();
        let mut inverse = Permutation::identity(6);
        inverse.set(2, 0);
        inverse.set(5, 1);
        permuted.permute_with_inverse(&inverse).unwrap();
        assert_eq!(permuted.keys(), &[0, 1]);

        let x: VectorValues = [(2, dvector![0.5]), (5, dvector![-1.0])]
            .into_iter()
            .collect();
        let relabeled: VectorValues = [(0, dvector![0.5]), (1, dvector![-1.0])]
            .into_iter()
            .collect();
        assert_approx_eq(permuted.error(&relabeled), factor.error(&x), 1e-12);
    }

    #[test]
    fn test_permute_reorders_blocks() {
        // Swapping the two variables must swap the A blocks.
        let factor = JacobianFactor::binary(
            0,
            dmatrix![1.0],
            1,
            dmatrix![2.0],
            dvector![3.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        let mut permuted = factor.clone();
        let inverse = Permutation::from_vec(vec![1, 0]);
        permuted.permute_with_inverse(&inverse).unwrap();
        assert_eq!(permuted.keys(), &[0, 1]);
        assert_eq!(permuted.a(0)[(0, 0)], 2.0);
        assert_eq!(permuted.a(1)[(0, 0)], 1.0);
        assert_eq!(permuted.first_nonzero_blocks(), &[0]);
    }

    #[test]
    fn test_eliminate_singular_factor() {
        let mut factor = JacobianFactor::unary(
            0,
            dmatrix![0.0],
            dvector![1.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        let result = factor.eliminate(1);
        assert_eq!(result.unwrap_err(), TerraceError::SingularFactor { key: 0 });
    }

    #[test]
    fn test_eliminate_too_many_frontals() {
        let mut factor = JacobianFactor::unary(
            0,
            dmatrix![1.0],
            dvector![1.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        assert!(matches!(
            factor.eliminate(2),
            Err(TerraceError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn test_eliminate_residual_window() {
        // Overdetermined unary system: two measurements of one variable.
        let mut factor = JacobianFactor::unary(
            0,
            dmatrix![1.0; 1.0],
            dvector![1.0, 3.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        let bn = factor.eliminate(1).unwrap();
        assert_eq!(bn.len(), 1);
        let conditional = bn.front().unwrap();
        // x0 = mean of the measurements.
        let solved = conditional.solve(&VectorValues::new()).unwrap();
        assert_approx_eq(solved[0], 2.0, 1e-12);
        // Only one pivot exists, so the leftover constant row is dropped and
        // the residual factor is empty.
        assert_eq!(factor.keys(), &[] as &[Index]);
        assert!(factor.is_empty());
    }

    #[test]
    fn test_eliminate_requires_full_window() {
        let mut factor = JacobianFactor::unary(
            0,
            dmatrix![1.0; 1.0],
            dvector![1.0, 3.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        factor.eliminate(1).unwrap();
        // The residual's window is narrowed; a second elimination must refuse.
        assert!(matches!(
            factor.eliminate(1),
            Err(TerraceError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn test_conditional_round_trip() {
        let mut source = JacobianFactor::binary(
            0,
            dmatrix![2.0],
            1,
            dmatrix![1.0],
            dvector![4.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        let conditional = source.eliminate_first().unwrap();
        let mut factor = JacobianFactor::from_conditional(&conditional).unwrap();
        assert_eq!(factor.keys(), &[0, 1]);
        let recovered = factor.eliminate_first().unwrap();
        assert!(recovered.equals(&conditional, 1e-9));
    }

    #[test]
    fn test_from_hessian_matches_source_error() {
        let source = JacobianFactor::unary(
            0,
            dmatrix![1.0; 2.0],
            dvector![3.0, 4.0],
            NoiseModel::unit(2),
        )
        .unwrap();
        let hessian = HessianFactor::from_jacobian(&source);
        let converted = JacobianFactor::from_hessian(&hessian).unwrap();
        assert_eq!(converted.keys(), &[0]);
        for value in [-1.0, 0.0, 1.0, 2.5] {
            let x: VectorValues = [(0, dvector![value])].into_iter().collect();
            assert_approx_eq(converted.error(&x), source.error(&x), 1e-9);
        }
    }

    #[test]
    fn test_from_hessian_sorts_unordered_keys() {
        let source = JacobianFactor::binary(
            2,
            dmatrix![2.0],
            5,
            dmatrix![3.0],
            dvector![4.0],
            NoiseModel::unit(1),
        )
        .unwrap();
        // The same information matrix, laid out in the key order (5, 2).
        let wab = dmatrix![3.0, 2.0, 4.0];
        let hessian = HessianFactor::from_parts(vec![5, 2], vec![1, 1], wab.tr_mul(&wab)).unwrap();
        let converted = JacobianFactor::from_hessian(&hessian).unwrap();
        assert_eq!(converted.keys(), &[2, 5]);
        // The blocks follow the keys into ascending order.
        let x: VectorValues = [(2, dvector![0.5]), (5, dvector![-1.0])]
            .into_iter()
            .collect();
        assert_approx_eq(converted.error(&x), source.error(&x), 1e-9);
    }

    #[test]
    fn test_staircase_monotone_after_eliminate() {
        let mut factor = JacobianFactor::binary(
            0,
            dmatrix![1.0, 0.0; 0.0, 1.0; 1.0, 1.0],
            1,
            dmatrix![1.0; -1.0; 0.5],
            dvector![1.0, 2.0, 3.0],
            NoiseModel::unit(3),
        )
        .unwrap();
        factor.eliminate(1).unwrap();
        let stairs = factor.first_nonzero_blocks();
        assert!(stairs.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stairs.len(), factor.rows());
    }

    #[test]
    fn test_empty_factor_error_is_zero() {
        let factor = JacobianFactor::empty();
        assert!(factor.is_empty());
        assert_approx_eq(factor.error(&VectorValues::new()), 0.0, 1e-15);
    }
}
