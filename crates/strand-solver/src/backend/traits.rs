//! Backend trait definitions for the global linear solve.

use crate::error::Result;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// A factorized tangent, ready to solve any number of right-hand sides.
pub trait Factorization: Send + Sync {
    /// Solve A * x = b.
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>>;

    /// Number of equations.
    fn dim(&self) -> usize;
}

/// Trait for a linear solver backend.
///
/// Implementations report a numerically singular matrix as
/// [`AnalysisError::SingularSystem`](crate::AnalysisError::SingularSystem).
pub trait LinearSolver: Send + Sync {
    /// Human-readable name (e.g. "dense-lu").
    fn name(&self) -> &str;

    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<Box<dyn Factorization>>;

    /// Factor and solve in one call.
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.factor(matrix)?.solve(rhs)
    }
}
