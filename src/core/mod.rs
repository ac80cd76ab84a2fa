//! Core data types of the linear factor engine: the block matrix storage,
//! noise models, variable bookkeeping, and the small collaborator types
//! (vector-valued assignments, permutations).

pub mod block_matrix;
pub mod noise_model;
pub mod permutation;
pub mod variable_slots;
pub mod vector_values;

/// A variable in the linear system, identified by a non-negative integer.
pub type Index = usize;

pub use block_matrix::BlockMatrix;
pub use noise_model::NoiseModel;
pub use permutation::Permutation;
pub use variable_slots::{VariableSlots, ABSENT};
pub use vector_values::VectorValues;
