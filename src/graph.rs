//! Container of shared Gaussian factors and whole-graph linear operations.
//!
//! Factors are held behind `Arc` handles: read-only operations fan out over
//! distinct factors freely, while elimination builds a fresh joint factor
//! and never mutates the inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use faer::sparse::SparseColMat;
use nalgebra::DVector;
use rayon::prelude::*;

use crate::core::vector_values::VectorValues;
use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};
use crate::factors::conditional::GaussianBayesNet;
use crate::factors::jacobian::JacobianFactor;
use crate::linalg;

/// Per-factor residual vectors, in graph order.
pub type Errors = Vec<DVector<f64>>;

/// An ordered collection of shared Jacobian factors.
#[derive(Debug, Clone, Default)]
pub struct GaussianFactorGraph {
    factors: Vec<Arc<JacobianFactor>>,
}

impl GaussianFactorGraph {
    pub fn new() -> Self {
        GaussianFactorGraph {
            factors: Vec::new(),
        }
    }

    /// Add a factor, taking ownership.
    pub fn push(&mut self, factor: JacobianFactor) {
        self.factors.push(Arc::new(factor));
    }

    /// Add an already-shared factor handle.
    pub fn push_shared(&mut self, factor: Arc<JacobianFactor>) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<JacobianFactor>> {
        self.factors.iter()
    }

    pub fn factors(&self) -> &[Arc<JacobianFactor>] {
        &self.factors
    }

    /// Total objective `Σ_F F.error(x)`, summed in parallel.
    pub fn error(&self, x: &VectorValues) -> f64 {
        self.factors.par_iter().map(|f| f.error(x)).sum()
    }

    /// Whitened per-factor residuals.
    pub fn errors(&self, x: &VectorValues) -> Errors {
        self.factors.iter().map(|f| f.error_vector(x)).collect()
    }

    /// Whitened products `(A_i·x)/σ` per factor.
    pub fn multiply(&self, x: &VectorValues) -> Errors {
        self.factors.iter().map(|f| f.multiply(x)).collect()
    }

    /// In-place variant of [`Self::multiply`], overwriting `e`.
    pub fn multiply_in_place(&self, x: &VectorValues, e: &mut Errors) {
        e.clear();
        e.extend(self.factors.iter().map(|f| f.multiply(x)));
    }

    /// Unwhitened products `A_i·x + b_i·0`, one per factor.
    pub fn unwhitened_multiply(&self, x: &VectorValues) -> Errors {
        self.factors
            .iter()
            .map(|f| {
                let mut ax = DVector::zeros(f.rows());
                for (pos, &key) in f.keys().iter().enumerate() {
                    ax.gemv(1.0, &f.a(pos), &x[key], 1.0);
                }
                ax
            })
            .collect()
    }

    /// Unwhitened residuals `b_i − A_i·x`, one per factor.
    pub fn residual(&self, x: &VectorValues) -> Errors {
        self.factors
            .iter()
            .zip(self.unwhitened_multiply(x))
            .map(|(f, ax)| f.b().clone_owned() - ax)
            .collect()
    }

    /// Unwhitened transpose product: accumulates `A_iᵀ·r_i` per variable.
    pub fn transpose_multiply(&self, r: &Errors) -> TerraceResult<VectorValues> {
        if r.len() != self.factors.len() {
            return Err(TerraceError::InvalidInput(format!(
                "{} residuals for {} factors",
                r.len(),
                self.factors.len()
            )));
        }
        let mut x = VectorValues::new();
        for f in &self.factors {
            for (pos, &key) in f.keys().iter().enumerate() {
                if !x.contains(key) {
                    x.insert(key, DVector::zeros(f.dim_of(pos)));
                }
            }
        }
        for (f, e) in self.factors.iter().zip(r) {
            for (pos, &key) in f.keys().iter().enumerate() {
                let target = x.get_mut(key).ok_or_else(|| {
                    TerraceError::InvalidInput(format!("missing variable {key}"))
                })?;
                target.gemv_tr(1.0, &f.a(pos), e, 1.0);
            }
        }
        Ok(x)
    }

    /// `x += α·A_iᵀ·(e_i/σ_i)` for every factor.
    pub fn transpose_multiply_add(
        &self,
        alpha: f64,
        e: &Errors,
        x: &mut VectorValues,
    ) -> TerraceResult<()> {
        if e.len() != self.factors.len() {
            return Err(TerraceError::InvalidInput(format!(
                "{} residuals for {} factors",
                e.len(),
                self.factors.len()
            )));
        }
        for (f, ei) in self.factors.iter().zip(e) {
            f.transpose_multiply_add(alpha, ei, x)?;
        }
        Ok(())
    }

    /// Gradient of the objective at `x`: `Σ A_iᵀ Σ⁻¹ (A_i·x − b_i)`,
    /// structured like `x`.
    pub fn gradient(&self, x: &VectorValues) -> TerraceResult<VectorValues> {
        let mut g = x.zero_like();
        let e = self.errors(x);
        self.transpose_multiply_add(1.0, &e, &mut g)?;
        Ok(g)
    }

    /// Combine every factor and eliminate the first `nr_frontals` variables
    /// of the joint. The graph itself is not modified.
    pub fn combine_and_eliminate(
        &self,
        nr_frontals: usize,
    ) -> TerraceResult<(GaussianBayesNet, JacobianFactor)> {
        JacobianFactor::combine_and_eliminate(&self.factors, nr_frontals)
    }

    /// Assemble the whitened joint system `[A | b]` as a compressed sparse
    /// column matrix over all variables in ascending order, factors stacked
    /// in graph order.
    pub fn to_sparse(&self) -> TerraceResult<SparseColMat<usize, f64>> {
        let variables: BTreeSet<Index> = self
            .factors
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .collect();

        // 1-based first column per variable, ascending.
        let mut column_indices: BTreeMap<Index, usize> = BTreeMap::new();
        let mut next_column = 1;
        for &key in &variables {
            let dim = self
                .factors
                .iter()
                .find_map(|f| {
                    f.keys()
                        .iter()
                        .position(|&k| k == key)
                        .map(|pos| f.dim_of(pos))
                })
                .ok_or_else(|| {
                    TerraceError::InvalidInput(format!("variable {key} appears in no factor"))
                })?;
            column_indices.insert(key, next_column);
            next_column += dim;
        }
        let b_column = next_column;

        let mut entries = Vec::new();
        let mut row_offset = 0;
        for f in &self.factors {
            let (rows, cols, values) = f.sparse(&column_indices, b_column)?;
            for ((i, j), v) in rows.into_iter().zip(cols).zip(values) {
                entries.push((row_offset + i - 1, j - 1, v));
            }
            row_offset += f.rows();
        }
        linalg::assemble_sparse(row_offset, b_column, &entries)
    }
}

impl FromIterator<JacobianFactor> for GaussianFactorGraph {
    fn from_iter<T: IntoIterator<Item = JacobianFactor>>(iter: T) -> Self {
        GaussianFactorGraph {
            factors: iter.into_iter().map(Arc::new).collect(),
        }
    }
}
