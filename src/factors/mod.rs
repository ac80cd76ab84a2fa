//! Gaussian factor types and the combine/eliminate machinery.

pub mod combine;
pub mod conditional;
pub mod hessian;
pub mod jacobian;

pub use conditional::{GaussianBayesNet, GaussianConditional};
pub use hessian::HessianFactor;
pub use jacobian::JacobianFactor;
