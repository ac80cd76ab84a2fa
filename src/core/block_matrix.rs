//! Column-major dense storage sliced into contiguous column groups.
//!
//! A [`BlockMatrix`] owns a dense column-major matrix together with a list of
//! cumulative column offsets, so that block `i` spans the column range
//! `offsets[i]..offsets[i + 1]`. On top of the static layout it carries a
//! movable row window `[row_start, row_end)` and a `first_block` cursor.
//! Advancing the window and the cursor logically shrinks the matrix to its
//! trailing-variable remainder without copying, which is how a factor is
//! reduced to its residual during elimination.
//!
//! All block accessors return nalgebra matrix views; the borrow checker
//! enforces that at most one mutable view is live at a time.

use nalgebra::{Const, DMatrix, DMatrixView, DMatrixViewMut, DVectorView, DVectorViewMut, Dyn};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockMatrix {
    matrix: DMatrix<f64>,
    /// Cumulative column offsets; `offsets[0] == 0`, last entry is the total width.
    offsets: Vec<usize>,
    row_start: usize,
    row_end: usize,
    first_block: usize,
}

impl BlockMatrix {
    /// Create a zero-filled block matrix with the given per-block column
    /// widths and row count. The window starts out covering everything.
    pub fn zeros(block_dims: &[usize], rows: usize) -> Self {
        let mut offsets = Vec::with_capacity(block_dims.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for &dim in block_dims {
            total += dim;
            offsets.push(total);
        }
        BlockMatrix {
            matrix: DMatrix::zeros(rows, total),
            offsets,
            row_start: 0,
            row_end: rows,
            first_block: 0,
        }
    }

    /// Wrap an existing dense matrix in a block layout. The block widths must
    /// sum to the matrix width.
    pub fn from_matrix(matrix: DMatrix<f64>, block_dims: &[usize]) -> Self {
        assert_eq!(
            block_dims.iter().sum::<usize>(),
            matrix.ncols(),
            "block dimensions must cover the matrix width"
        );
        let mut offsets = Vec::with_capacity(block_dims.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for &dim in block_dims {
            total += dim;
            offsets.push(total);
        }
        let rows = matrix.nrows();
        BlockMatrix {
            matrix,
            offsets,
            row_start: 0,
            row_end: rows,
            first_block: 0,
        }
    }

    /// Deep copy of another block matrix's current window: same block widths,
    /// same data, full window.
    pub fn from_window(other: &BlockMatrix) -> Self {
        let mut result = BlockMatrix::zeros(&[], 0);
        result.assign_noalias(other);
        result
    }

    /// Number of rows visible through the window.
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    /// Number of rows of the underlying storage.
    pub fn storage_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Total column count visible from the current first block onward.
    pub fn cols(&self) -> usize {
        self.offsets[self.offsets.len() - 1] - self.offsets[self.first_block]
    }

    /// Number of blocks visible from the current first block onward.
    pub fn nblocks(&self) -> usize {
        self.offsets.len() - 1 - self.first_block
    }

    /// Column width of block `i` (relative to the first-block cursor).
    pub fn block_dim(&self, i: usize) -> usize {
        self.offsets[self.first_block + i + 1] - self.offsets[self.first_block + i]
    }

    /// Starting column of block `i`, relative to the cursor's first column.
    pub fn offset(&self, i: usize) -> usize {
        self.offsets[self.first_block + i] - self.offsets[self.first_block]
    }

    /// View of block `i` through the row window.
    pub fn block(&self, i: usize) -> DMatrixView<'_, f64> {
        let start = self.offsets[self.first_block + i];
        self.matrix
            .view((self.row_start, start), (self.rows(), self.block_dim(i)))
    }

    /// Mutable view of block `i` through the row window.
    pub fn block_mut(&mut self, i: usize) -> DMatrixViewMut<'_, f64> {
        let start = self.offsets[self.first_block + i];
        let rows = self.rows();
        let dim = self.block_dim(i);
        self.matrix.view_mut((self.row_start, start), (rows, dim))
    }

    /// View of the contiguous block range `[a, b)` through the row window.
    pub fn range(&self, a: usize, b: usize) -> DMatrixView<'_, f64> {
        let start = self.offsets[self.first_block + a];
        let width = self.offsets[self.first_block + b] - start;
        self.matrix
            .view((self.row_start, start), (self.rows(), width))
    }

    /// Mutable view of the contiguous block range `[a, b)`.
    pub fn range_mut(&mut self, a: usize, b: usize) -> DMatrixViewMut<'_, f64> {
        let start = self.offsets[self.first_block + a];
        let width = self.offsets[self.first_block + b] - start;
        let rows = self.rows();
        self.matrix.view_mut((self.row_start, start), (rows, width))
    }

    /// Single-column view: the first column of block `i`, starting `row0`
    /// rows below the window top.
    pub fn column(&self, i: usize, row0: usize) -> DVectorView<'_, f64> {
        let c = self.offsets[self.first_block + i];
        let start = self.row_start + row0;
        let len = self.row_end - start;
        self.matrix.generic_view((start, c), (Dyn(len), Const::<1>))
    }

    /// Mutable single-column view, as [`Self::column`].
    pub fn column_mut(&mut self, i: usize, row0: usize) -> DVectorViewMut<'_, f64> {
        let c = self.offsets[self.first_block + i];
        let start = self.row_start + row0;
        let len = self.row_end - start;
        self.matrix
            .generic_view_mut((start, c), (Dyn(len), Const::<1>))
    }

    /// Resize to match another block matrix's window shape (blocks and rows)
    /// without copying its data. The storage is zero-filled and the window
    /// reset to cover everything.
    pub fn copy_structure_from(&mut self, other: &BlockMatrix) {
        let base = other.offsets[other.first_block];
        self.offsets = other.offsets[other.first_block..]
            .iter()
            .map(|&o| o - base)
            .collect();
        self.matrix = DMatrix::zeros(other.rows(), other.cols());
        self.row_start = 0;
        self.row_end = other.rows();
        self.first_block = 0;
    }

    /// Copy another block matrix's window, structure and data both.
    pub fn assign_noalias(&mut self, other: &BlockMatrix) {
        self.copy_structure_from(other);
        if other.nblocks() > 0 {
            self.matrix.copy_from(&other.range(0, other.nblocks()));
        }
    }

    /// Exchange storage, layout, and window with another block matrix.
    /// Lets an algorithm read the old buffer while writing a new one.
    pub fn swap(&mut self, other: &mut BlockMatrix) {
        std::mem::swap(self, other);
    }

    pub fn row_start(&self) -> usize {
        self.row_start
    }

    pub fn row_end(&self) -> usize {
        self.row_end
    }

    pub fn first_block(&self) -> usize {
        self.first_block
    }

    /// Whether the window exposes the entire storage.
    pub fn is_full_window(&self) -> bool {
        self.row_start == 0 && self.row_end == self.matrix.nrows() && self.first_block == 0
    }

    pub(crate) fn set_row_start(&mut self, row_start: usize) {
        debug_assert!(row_start <= self.row_end);
        self.row_start = row_start;
    }

    pub(crate) fn set_row_end(&mut self, row_end: usize) {
        debug_assert!(self.row_start <= row_end && row_end <= self.matrix.nrows());
        self.row_end = row_end;
    }

    pub(crate) fn advance_first_block(&mut self) {
        debug_assert!(self.first_block + 1 < self.offsets.len());
        self.first_block += 1;
    }

    /// The raw storage, ignoring the window. Used by in-place kernels that
    /// operate on the whole matrix.
    pub(crate) fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub(crate) fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.matrix
    }
}
