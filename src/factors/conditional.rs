//! Gaussian conditionals and the Bayes-net fragments elimination produces.
//!
//! A conditional is one slice of a back-substitution system: an
//! upper-triangular `R` over its frontal variable, parent blocks `S`, a
//! right-hand side `d`, and per-row sigmas. Sequential elimination yields an
//! ordered list of these, solvable back to front.

use std::fmt;

use nalgebra::{DMatrixView, DVector, DVectorView};

use crate::core::block_matrix::BlockMatrix;
use crate::core::vector_values::VectorValues;
use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};

/// A Gaussian conditional density `p(x_f | x_parents)` in square-root form:
/// `R·x_f + S·x_parents = d` with per-row standard deviations.
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    /// Frontal keys first, then parent keys.
    keys: Vec<Index>,
    nr_frontals: usize,
    /// Owned copy of `[R S d]`, one block per key plus the rhs block.
    rsd: BlockMatrix,
    sigmas: DVector<f64>,
}

impl GaussianConditional {
    /// Copy a conditional out of a block matrix window. The window's blocks
    /// must line up with `keys` plus one rhs block.
    pub fn from_window(
        keys: &[Index],
        nr_frontals: usize,
        window: &BlockMatrix,
        sigmas: DVector<f64>,
    ) -> TerraceResult<Self> {
        if nr_frontals == 0 || nr_frontals > keys.len() {
            return Err(TerraceError::InvalidInput(format!(
                "conditional must have between 1 and {} frontal variables, got {}",
                keys.len(),
                nr_frontals
            )));
        }
        if window.nblocks() != keys.len() + 1 {
            return Err(TerraceError::InvalidInput(format!(
                "window has {} blocks but {} keys require {}",
                window.nblocks(),
                keys.len(),
                keys.len() + 1
            )));
        }
        let rsd = BlockMatrix::from_window(window);
        if sigmas.len() != rsd.rows() {
            return Err(TerraceError::InvalidInput(format!(
                "sigmas have length {} but the conditional has {} rows",
                sigmas.len(),
                rsd.rows()
            )));
        }
        Ok(GaussianConditional {
            keys: keys.to_vec(),
            nr_frontals,
            rsd,
            sigmas,
        })
    }

    pub fn keys(&self) -> &[Index] {
        &self.keys
    }

    /// The first (and for single-frontal conditionals, only) frontal key.
    pub fn first_key(&self) -> Index {
        self.keys[0]
    }

    pub fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    /// Row dimension, equal to the total frontal dimension.
    pub fn dim(&self) -> usize {
        self.rsd.rows()
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// The square upper-triangular frontal block.
    pub fn r(&self) -> DMatrixView<'_, f64> {
        self.rsd.range(0, self.nr_frontals)
    }

    /// Parent block `j` (0-based among the parents).
    pub fn s(&self, j: usize) -> DMatrixView<'_, f64> {
        self.rsd.block(self.nr_frontals + j)
    }

    /// The right-hand side.
    pub fn d(&self) -> DVectorView<'_, f64> {
        self.rsd.column(self.keys.len(), 0)
    }

    pub(crate) fn rsd(&self) -> &BlockMatrix {
        &self.rsd
    }

    /// Whitened residual `(R·x_f + S·x_s − d) / σ` at a given assignment.
    /// Hard-constraint rows (σ = 0) pass through unscaled.
    pub fn error_vector(&self, x: &VectorValues) -> DVector<f64> {
        let mut e = -self.d().clone_owned();
        for (pos, &key) in self.keys.iter().enumerate() {
            e.gemv(1.0, &self.rsd.block(pos), &x[key], 1.0);
        }
        for i in 0..e.len() {
            let s = self.sigmas[i];
            if s != 0.0 {
                e[i] /= s;
            }
        }
        e
    }

    /// Half the squared whitened residual.
    pub fn error(&self, x: &VectorValues) -> f64 {
        let e = self.error_vector(x);
        0.5 * e.norm_squared()
    }

    /// Solve for the frontal value by back-substitution, given parent values:
    /// `x_f = R⁻¹ (d − S·x_parents)`.
    pub fn solve(&self, x: &VectorValues) -> TerraceResult<DVector<f64>> {
        let mut rhs = self.d().clone_owned();
        for (pos, &key) in self.keys.iter().enumerate().skip(self.nr_frontals) {
            rhs.gemv(-1.0, &self.rsd.block(pos), &x[key], 1.0);
        }
        self.r().solve_upper_triangular(&rhs).ok_or_else(|| {
            TerraceError::LinearAlgebra(format!(
                "conditional on variable {} has a singular R block",
                self.first_key()
            ))
        })
    }

    /// Equality up to a per-row sign flip, reflecting QR's non-uniqueness.
    pub fn equals(&self, other: &GaussianConditional, tol: f64) -> bool {
        if self.keys != other.keys
            || self.nr_frontals != other.nr_frontals
            || self.dim() != other.dim()
        {
            return false;
        }
        if self
            .sigmas
            .iter()
            .zip(other.sigmas.iter())
            .any(|(a, b)| (a - b).abs() > tol)
        {
            return false;
        }
        let a = self.rsd.range(0, self.rsd.nblocks());
        let b = other.rsd.range(0, other.rsd.nblocks());
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
}

impl fmt::Display for GaussianConditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "p(x{} | {:?})",
            self.first_key(),
            &self.keys[self.nr_frontals..]
        )?;
        writeln!(f, "R ={}", self.r())?;
        for (j, _) in self.keys[self.nr_frontals..].iter().enumerate() {
            writeln!(f, "S[{}] ={}", self.keys[self.nr_frontals + j], self.s(j))?;
        }
        write!(f, "d ={}", self.d())
    }
}

/// An ordered list of conditionals produced by sequential elimination.
#[derive(Debug, Clone, Default)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
}

impl GaussianBayesNet {
    pub fn new() -> Self {
        GaussianBayesNet {
            conditionals: Vec::new(),
        }
    }

    pub fn push(&mut self, conditional: GaussianConditional) {
        self.conditionals.push(conditional);
    }

    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&GaussianConditional> {
        self.conditionals.get(i)
    }

    pub fn front(&self) -> Option<&GaussianConditional> {
        self.conditionals.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GaussianConditional> {
        self.conditionals.iter()
    }

    /// Sum of the conditionals' errors at an assignment.
    pub fn error(&self, x: &VectorValues) -> f64 {
        self.conditionals.iter().map(|c| c.error(x)).sum()
    }

    /// Back-substitute to the assignment that zeroes every conditional
    /// residual. Parents of later conditionals must either be solved by the
    /// net itself or already be present in `x`.
    pub fn optimize(&self, mut x: VectorValues) -> TerraceResult<VectorValues> {
        for conditional in self.conditionals.iter().rev() {
            let value = conditional.solve(&x)?;
            x.insert(conditional.first_key(), value);
        }
        Ok(x)
    }
}

impl IntoIterator for GaussianBayesNet {
    type Item = GaussianConditional;
    type IntoIter = std::vec::IntoIter<GaussianConditional>;

    fn into_iter(self) -> Self::IntoIter {
        self.conditionals.into_iter()
    }
}

impl<'a> IntoIterator for &'a GaussianBayesNet {
    type Item = &'a GaussianConditional;
    type IntoIter = std::slice::Iter<'a, GaussianConditional>;

    fn into_iter(self) -> Self::IntoIter {
        self.conditionals.iter()
    }
}
