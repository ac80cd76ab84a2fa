//! Quadratic (information form) factor.
//!
//! Stores the augmented information matrix `[AᵀA Aᵀb; bᵀA bᵀb]` of a
//! whitened linear system, with one row/column group per variable plus the
//! rhs group. The engine only consumes it through the Jacobian conversion,
//! which runs a careful Cholesky on the information matrix.

use nalgebra::DMatrix;

use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};
use crate::factors::jacobian::JacobianFactor;

/// A Gaussian factor in information form.
#[derive(Debug, Clone)]
pub struct HessianFactor {
    keys: Vec<Index>,
    /// Column dimension of each variable, in `keys` order.
    dims: Vec<usize>,
    /// Augmented information matrix, side `Σ dims + 1`.
    info: DMatrix<f64>,
}

impl HessianFactor {
    /// Build from raw parts. The information matrix must be square with side
    /// equal to the total variable dimension plus one. Keys may come in any
    /// order (the Jacobian conversion re-sorts them) but must be distinct;
    /// `dims` and the row/column groups of `info` follow the key order.
    pub fn from_parts(
        keys: Vec<Index>,
        dims: Vec<usize>,
        info: DMatrix<f64>,
    ) -> TerraceResult<Self> {
        if keys.len() != dims.len() {
            return Err(TerraceError::InvalidInput(format!(
                "{} keys but {} dimensions",
                keys.len(),
                dims.len()
            )));
        }
        let mut unique = keys.clone();
        unique.sort_unstable();
        if unique.windows(2).any(|w| w[0] == w[1]) {
            return Err(TerraceError::InvalidInput(
                "variable indices must be distinct".to_string(),
            ));
        }
        let side = dims.iter().sum::<usize>() + 1;
        if info.nrows() != side || info.ncols() != side {
            return Err(TerraceError::InvalidInput(format!(
                "information matrix is {}x{} but variables require side {}",
                info.nrows(),
                info.ncols(),
                side
            )));
        }
        if info.iter().any(|v| v.is_nan()) {
            return Err(TerraceError::InvalidInput(
                "information matrix contains NaN entries".to_string(),
            ));
        }
        Ok(HessianFactor { keys, dims, info })
    }

    /// The information form of a Jacobian factor: the Gram matrix of its
    /// whitened augmented system.
    pub fn from_jacobian(factor: &JacobianFactor) -> Self {
        let wab = factor.matrix_augmented(true);
        let info = wab.tr_mul(&wab);
        let dims = (0..factor.keys().len())
            .map(|pos| factor.dim_of(pos))
            .collect();
        HessianFactor {
            keys: factor.keys().to_vec(),
            dims,
            info,
        }
    }

    pub fn keys(&self) -> &[Index] {
        &self.keys
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total variable dimension (excluding the rhs group).
    pub fn dim(&self) -> usize {
        self.dims.iter().sum()
    }

    pub fn info(&self) -> &DMatrix<f64> {
        &self.info
    }
}
