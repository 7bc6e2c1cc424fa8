//! Linear solver backends.
//!
//! The solution core treats the linear solver as a black box: it hands over
//! the assembled tangent once, receives a factorization, and solves as many
//! right-hand sides against it as the integrator needs (path-following
//! integrators solve against the reference load as well as the unbalance).
//!
//! ```text
//! Assembler (COO triplets → CSR)
//!         │
//!         ▼
//! LinearSolver::factor ──► Factorization::solve (1..n times)
//!    ┌────┴──────────┐
//!    ▼               ▼
//! DenseLu      SparseCholesky
//! ```

pub mod native;
pub mod traits;

pub use native::{DenseLu, SparseCholesky};
pub use traits::*;

/// Returns the default backend (dense LU with pivot check).
pub fn default_backend() -> Box<dyn LinearSolver> {
    Box::new(DenseLu::default())
}
