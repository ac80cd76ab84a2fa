//! Merging factors over shared variables into one joint factor.
//!
//! Combination stacks the rows of all input factors into a single augmented
//! block matrix over the union of their variables, sorted so rows whose
//! first involved variable comes earlier land on top. The sort rebuilds the
//! staircase that elimination exploits; structural zeros of the sources are
//! carried over instead of being copied.

use std::sync::Arc;

use tracing::debug;

use nalgebra::DVector;

use crate::core::block_matrix::BlockMatrix;
use crate::core::noise_model::NoiseModel;
use crate::core::variable_slots::{VariableSlots, ABSENT};
use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};
use crate::factors::conditional::GaussianBayesNet;
use crate::factors::jacobian::JacobianFactor;

/// Where a row of the combined factor comes from.
struct RowSource {
    /// The variable index (not slot) of the source row's first nonzero
    /// block; one past the factor's last variable for rhs-only rows.
    first_nonzero_var: Index,
    factor_index: usize,
    row: usize,
}

/// Per-variable dimensions and total row/column counts of the joint system.
fn count_dims(
    factors: &[Arc<JacobianFactor>],
    variable_slots: &VariableSlots,
) -> TerraceResult<(Vec<usize>, usize, usize)> {
    if variable_slots.nr_factors() != factors.len() {
        return Err(TerraceError::InvalidInput(format!(
            "variable slots were built over {} factors, got {}",
            variable_slots.nr_factors(),
            factors.len()
        )));
    }
    let mut var_dims = Vec::with_capacity(variable_slots.len());
    let mut n = 0;
    for (key, slots) in variable_slots.iter() {
        let mut dim: Option<usize> = None;
        for (factor_index, &slot) in slots.iter().enumerate() {
            if slot == ABSENT {
                continue;
            }
            let found = factors[factor_index].dim_of(slot);
            match dim {
                None => dim = Some(found),
                Some(previous) if previous != found => {
                    return Err(TerraceError::InvalidInput(format!(
                        "variable {key} has dimension {previous} in one factor and {found} in another"
                    )));
                }
                Some(_) => {}
            }
        }
        // Every variable in a well-formed slots map appears in at least one
        // factor.
        let dim = dim.ok_or_else(|| {
            TerraceError::InvalidInput(format!("variable {key} appears in no factor"))
        })?;
        var_dims.push(dim);
        n += dim;
    }
    let m = factors.iter().map(|f| f.rows()).sum();
    Ok((var_dims, m, n))
}

impl JacobianFactor {
    /// Merge `factors` into a single joint factor over the union of their
    /// variables, with rows sorted by first involved variable and the
    /// staircase rebuilt. Empty factors contribute nothing.
    pub fn combine(
        factors: &[Arc<JacobianFactor>],
        variable_slots: &VariableSlots,
    ) -> TerraceResult<JacobianFactor> {
        let (var_dims, m, n) = count_dims(factors, variable_slots)?;
        debug!(m, n, nr_factors = factors.len(), "combining factors");

        // Order rows by the variable their staircase starts at; the sort is
        // stable so ties keep factor order.
        let mut row_sources: Vec<RowSource> = Vec::with_capacity(m);
        let mut any_constrained = false;
        for (factor_index, factor) in factors.iter().enumerate() {
            for row in 0..factor.rows() {
                let block = factor.first_nonzero_blocks[row];
                let first_nonzero_var = if block < factor.keys.len() {
                    factor.keys[block]
                } else {
                    // Zero except in b: sort past this factor's last variable.
                    factor.keys.last().map_or(Index::MAX, |&last| last + 1)
                };
                row_sources.push(RowSource {
                    first_nonzero_var,
                    factor_index,
                    row,
                });
            }
            if factor.model.is_constrained() {
                any_constrained = true;
            }
        }
        debug_assert_eq!(row_sources.len(), m);
        row_sources.sort_by_key(|source| source.first_nonzero_var);

        // Allocate the joint system; absent segments stay zero.
        let keys: Vec<Index> = variable_slots.variables().collect();
        let mut dims = var_dims;
        dims.push(1);
        let mut ab = BlockMatrix::zeros(&dims, m);
        let mut first_nonzero_blocks = vec![0usize; m];
        let mut sigmas = DVector::zeros(m);

        // Copy rows block column by block column.
        for (combined_slot, (_, slots)) in variable_slots.iter().enumerate() {
            let mut block = ab.block_mut(combined_slot);
            for (row, source) in row_sources.iter().enumerate() {
                let source_slot = slots[source.factor_index];
                if source_slot == ABSENT {
                    continue;
                }
                let factor = &factors[source.factor_index];
                if factor.first_nonzero_blocks[source.row] <= source_slot {
                    block
                        .row_mut(row)
                        .copy_from(&factor.a(source_slot).row(source.row));
                }
            }
        }

        // Carry over b, sigma, and the staircase entry of every row. The
        // slot cursor only moves forward because the rows are sorted.
        let mut first_nonzero_slot = 0;
        {
            let mut b = ab.column_mut(keys.len(), 0);
            for (row, source) in row_sources.iter().enumerate() {
                let factor = &factors[source.factor_index];
                b[row] = factor.b()[source.row];
                sigmas[row] = factor.model.sigma(source.row);
                while first_nonzero_slot < keys.len()
                    && source.first_nonzero_var > keys[first_nonzero_slot]
                {
                    first_nonzero_slot += 1;
                }
                first_nonzero_blocks[row] = first_nonzero_slot;
            }
        }

        let model = if any_constrained {
            NoiseModel::constrained(sigmas)?
        } else {
            NoiseModel::diagonal(sigmas)?
        };

        Ok(JacobianFactor {
            keys,
            model,
            first_nonzero_blocks,
            ab,
        })
    }

    /// Combine `factors` and eliminate the first `nr_frontals` variables of
    /// the joint in one step. Returns the extracted conditionals and the
    /// residual factor on the remaining variables.
    pub fn combine_and_eliminate(
        factors: &[Arc<JacobianFactor>],
        nr_frontals: usize,
    ) -> TerraceResult<(GaussianBayesNet, JacobianFactor)> {
        let variable_slots = VariableSlots::new(factors);
        let mut joint = JacobianFactor::combine(factors, &variable_slots)?;
        let bayes_net = joint.eliminate(nr_frontals)?;
        Ok((bayes_net, joint))
    }
}
