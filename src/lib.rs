//! # Terrace Solver
//!
//! A Rust library for the linear inner loop of factor-graph optimization:
//! sparse-block Gaussian factors over integer-indexed vector variables,
//! merged and eliminated with a staircase-aware in-place QR.
//!
//! ## Features
//!
//! - **Block Jacobian factors**: one column-major augmented matrix
//!   `[A₁ A₂ … | b]` per factor, sliced by per-variable column groups
//! - **Staircase bookkeeping**: per-row first-nonzero-block metadata lets
//!   the QR kernel skip structural zeros
//! - **Combine and eliminate**: merge factors over partially overlapping
//!   variables and peel off Gaussian conditionals plus a residual factor
//! - **Noise models**: diagonal, constrained (hard equalities), and unit
//!   whitening with the matching QR kernels
//! - **Sparse bridge**: whitened triplet export assembled into the faer
//!   compressed sparse column format consumed by sparse solver backends
//!
//! ## Example
//!
//! ```
//! use nalgebra::{dmatrix, dvector};
//! use terrace_solver::{GaussianFactorGraph, JacobianFactor, NoiseModel, VectorValues};
//!
//! let mut graph = GaussianFactorGraph::new();
//! // A prior x0 = 1 and an odometry constraint x0 − x1 = 0.
//! graph.push(
//!     JacobianFactor::unary(
//!         0,
//!         dmatrix![1.0],
//!         dvector![1.0],
//!         NoiseModel::isotropic(1, 1.0).unwrap(),
//!     )
//!     .unwrap(),
//! );
//! graph.push(
//!     JacobianFactor::binary(
//!         0,
//!         dmatrix![1.0],
//!         1,
//!         dmatrix![-1.0],
//!         dvector![0.0],
//!         NoiseModel::isotropic(1, 1.0).unwrap(),
//!     )
//!     .unwrap(),
//! );
//!
//! // Eliminate x0; the Bayes net holds p(x0 | x1), the residual pins x1.
//! let (bayes_net, residual) = graph.combine_and_eliminate(1).unwrap();
//! assert_eq!(bayes_net.len(), 1);
//! assert_eq!(residual.keys(), &[1]);
//! ```

pub mod core;
pub mod error;
pub mod factors;
pub mod graph;
pub mod linalg;
pub mod logger;

pub use crate::core::block_matrix::BlockMatrix;
pub use crate::core::noise_model::NoiseModel;
pub use crate::core::permutation::Permutation;
pub use crate::core::variable_slots::{VariableSlots, ABSENT};
pub use crate::core::vector_values::VectorValues;
pub use crate::core::Index;
pub use crate::error::{TerraceError, TerraceResult};
pub use crate::factors::conditional::{GaussianBayesNet, GaussianConditional};
pub use crate::factors::hessian::HessianFactor;
pub use crate::factors::jacobian::JacobianFactor;
pub use crate::graph::{Errors, GaussianFactorGraph};
pub use crate::logger::{init_logger, init_logger_with_level};
