//! Native backends using nalgebra and nalgebra-sparse.
//!
//! - [`DenseLu`]: LU with partial pivoting on a dense copy of the tangent.
//!   Handles unsymmetric and indefinite tangents (past limit points).
//! - [`SparseCholesky`]: sparse Cholesky for symmetric positive definite
//!   tangents.

use super::traits::*;
use crate::error::{AnalysisError, Result};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};

fn check_rhs(dim: usize, rhs: &DVector<f64>) -> Result<()> {
    if rhs.len() != dim {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "Right-hand side has {} entries, system has {} equations",
            rhs.len(),
            dim
        )));
    }
    Ok(())
}

/// Dense LU backend.
///
/// Suitable for small-to-medium problems. A pivot smaller than
/// `pivot_tolerance` times the largest pivot is treated as singular.
#[derive(Debug, Clone, Copy)]
pub struct DenseLu {
    pub pivot_tolerance: f64,
}

impl Default for DenseLu {
    fn default() -> Self {
        Self {
            pivot_tolerance: 1e-12,
        }
    }
}

struct DenseLuFactorization {
    lu: LU<f64, Dyn, Dyn>,
    dim: usize,
}

impl Factorization for DenseLuFactorization {
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        check_rhs(self.dim, rhs)?;
        if self.dim == 0 {
            return Ok(DVector::zeros(0));
        }
        self.lu
            .solve(rhs)
            .ok_or_else(|| AnalysisError::SingularSystem("LU solve failed".into()))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

impl LinearSolver for DenseLu {
    fn name(&self) -> &str {
        "dense-lu"
    }

    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<Box<dyn Factorization>> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Tangent is {}x{}, expected square",
                n,
                matrix.ncols()
            )));
        }

        // Reconstruct dense matrix from CSR
        let mut k = DMatrix::zeros(n, n);
        for (r, c, v) in matrix.triplet_iter() {
            k[(r, c)] += *v;
        }

        let lu = k.lu();
        if n > 0 {
            let u = lu.u();
            let pivots = u.diagonal().map(f64::abs);
            let max_pivot = pivots.max();
            let (row, min_pivot) = pivots.argmin();
            if max_pivot == 0.0 || !(min_pivot > self.pivot_tolerance * max_pivot) {
                return Err(AnalysisError::SingularSystem(format!(
                    "zero pivot at row {row} (|pivot| = {min_pivot:.3e}, max = {max_pivot:.3e})"
                )));
            }
        }

        Ok(Box::new(DenseLuFactorization { lu, dim: n }))
    }
}

/// Sparse Cholesky backend for symmetric positive definite tangents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseCholesky;

struct CholeskyFactorization {
    cholesky: Option<CscCholesky<f64>>,
    dim: usize,
}

impl Factorization for CholeskyFactorization {
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        check_rhs(self.dim, rhs)?;
        let Some(cholesky) = &self.cholesky else {
            return Ok(DVector::zeros(0));
        };
        let b = DMatrix::from_column_slice(self.dim, 1, rhs.as_slice());
        let x = cholesky.solve(&b);
        Ok(DVector::from_column_slice(x.as_slice()))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

impl LinearSolver for SparseCholesky {
    fn name(&self) -> &str {
        "sparse-cholesky"
    }

    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<Box<dyn Factorization>> {
        let n = matrix.nrows();
        if n == 0 {
            return Ok(Box::new(CholeskyFactorization {
                cholesky: None,
                dim: 0,
            }));
        }
        let csc = CscMatrix::from(matrix);
        let cholesky = CscCholesky::factor(&csc).map_err(|e| {
            AnalysisError::SingularSystem(format!("Cholesky factorization failed: {e:?}"))
        })?;
        Ok(Box::new(CholeskyFactorization {
            cholesky: Some(cholesky),
            dim: n,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;

    fn csr(n: usize, entries: &[(usize, usize, f64)]) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(n, n);
        for &(r, c, v) in entries {
            coo.push(r, c, v);
        }
        CsrMatrix::from(&coo)
    }

    fn spd_3x3() -> CsrMatrix<f64> {
        // K = [4 -1 0; -1 4 -1; 0 -1 4]
        csr(
            3,
            &[
                (0, 0, 4.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 4.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 4.0),
            ],
        )
    }

    #[test]
    fn dense_lu_solves_diagonal_system() {
        let k = csr(2, &[(0, 0, 2.0), (1, 1, 3.0)]);
        let x = DenseLu::default()
            .solve(&k, &DVector::from_vec(vec![4.0, 9.0]))
            .unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn dense_lu_reuses_factorization() {
        let f = DenseLu::default().factor(&spd_3x3()).unwrap();
        let b1 = DVector::from_vec(vec![1.0, 2.0, 1.0]);
        let b2 = DVector::from_vec(vec![0.0, 1.0, 0.0]);
        let k = DMatrix::from(&spd_3x3());
        assert_relative_eq!(&k * f.solve(&b1).unwrap(), b1, epsilon = 1e-12);
        assert_relative_eq!(&k * f.solve(&b2).unwrap(), b2, epsilon = 1e-12);
    }

    #[test]
    fn dense_lu_reports_singular_system() {
        let k = csr(2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]);
        match DenseLu::default().factor(&k) {
            Err(AnalysisError::SingularSystem(_)) => {}
            other => panic!("expected singular system, got {:?}", other.map(|f| f.dim())),
        }
    }

    #[test]
    fn dense_lu_handles_indefinite_tangent() {
        let k = csr(2, &[(0, 0, -5.0), (1, 1, 2.0)]);
        let x = DenseLu::default()
            .solve(&k, &DVector::from_vec(vec![10.0, 2.0]))
            .unwrap();
        assert_relative_eq!(x[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn sparse_cholesky_matches_lu() {
        let b = DVector::from_vec(vec![1.0, 2.0, 1.0]);
        let x_chol = SparseCholesky.solve(&spd_3x3(), &b).unwrap();
        let x_lu = DenseLu::default().solve(&spd_3x3(), &b).unwrap();
        assert_relative_eq!(x_chol, x_lu, epsilon = 1e-12);
    }

    #[test]
    fn sparse_cholesky_rejects_indefinite() {
        let k = csr(2, &[(0, 0, -1.0), (1, 1, 1.0)]);
        assert!(matches!(
            SparseCholesky.factor(&k),
            Err(AnalysisError::SingularSystem(_))
        ));
    }

    #[test]
    fn empty_system_solves_to_empty_vector() {
        let k = CsrMatrix::zeros(0, 0);
        let x = DenseLu::default().solve(&k, &DVector::zeros(0)).unwrap();
        assert_eq!(x.len(), 0);
    }
}
