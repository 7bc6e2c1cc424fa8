//! Global assembly of tangent, mass and residual.
//!
//! ## Assembly Process
//!
//! 1. Visit every active element (inactive ones are skipped)
//! 2. Request its local tangent / mass / resisting force
//! 3. Scale by the element's stress-reduction factor (staged deactivation)
//! 4. Scatter into the global system through the DOF mapper; constrained
//!    DOFs have no equation and are dropped
//!
//! Matrices are accumulated as COO triplets and converted to CSR, which sums
//! duplicate entries. With `parallel = true` the element contributions are
//! computed with rayon into per-element buffers; the scatter into the global
//! triplet list happens after the parallel section, in element order, so the
//! result is identical to the serial path.

use crate::error::{AnalysisError, Result};
use crate::model::{ElementEntry, Model};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

/// Linear combination c_k·K + c_m·M assembled into one matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixCoefficients {
    pub stiffness: f64,
    pub mass: f64,
}

impl MatrixCoefficients {
    pub const STIFFNESS: Self = Self {
        stiffness: 1.0,
        mass: 0.0,
    };

    pub const MASS: Self = Self {
        stiffness: 0.0,
        mass: 1.0,
    };
}

type Triplets = Vec<(usize, usize, f64)>;

/// Element-by-element assembler
#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler {
    /// Compute element contributions in parallel
    pub parallel: bool,
}

impl Assembler {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Assemble c_k·K_T + c_m·M (nodal lumped masses included).
    pub fn assemble_matrix(&self, model: &Model, coeffs: MatrixCoefficients) -> Result<CsrMatrix<f64>> {
        let n = model.num_equations();

        let local = |entry: &ElementEntry| -> Result<Triplets> {
            let factor = entry.activation.factor();
            let equations = model.mapper().map_local_to_global(entry.element.dofs())?;
            let mut triplets = Triplets::new();

            if coeffs.stiffness != 0.0 {
                let k_e = entry.element.tangent_stiffness();
                scatter_matrix(&mut triplets, &equations, |i, j| {
                    factor * coeffs.stiffness * k_e[(i, j)]
                });
            }
            if coeffs.mass != 0.0 {
                if let Some(m_e) = entry.element.mass_matrix() {
                    scatter_matrix(&mut triplets, &equations, |i, j| {
                        factor * coeffs.mass * m_e[(i, j)]
                    });
                }
            }
            Ok(triplets)
        };

        let contributions = self.map_active(model, local)?;

        let mut coo = CooMatrix::new(n, n);
        for (r, c, v) in contributions.into_iter().flatten() {
            coo.push(r, c, v);
        }

        if coeffs.mass != 0.0 {
            let nodal = model.nodal_mass()?;
            for (eq, m) in nodal.iter().enumerate() {
                if *m != 0.0 {
                    coo.push(eq, eq, coeffs.mass * m);
                }
            }
        }

        Ok(CsrMatrix::from(&coo))
    }

    /// Assemble the tangent stiffness K_T.
    pub fn assemble_tangent(&self, model: &Model) -> Result<CsrMatrix<f64>> {
        self.assemble_matrix(model, MatrixCoefficients::STIFFNESS)
    }

    /// Assemble the mass matrix M.
    pub fn assemble_mass(&self, model: &Model) -> Result<CsrMatrix<f64>> {
        self.assemble_matrix(model, MatrixCoefficients::MASS)
    }

    /// Assemble the internal resisting force F_int.
    pub fn assemble_resisting_force(&self, model: &Model) -> Result<DVector<f64>> {
        let local = |entry: &ElementEntry| -> Result<Vec<(usize, f64)>> {
            let factor = entry.activation.factor();
            let equations = model.mapper().map_local_to_global(entry.element.dofs())?;
            let f_e = entry.element.resisting_force();
            if f_e.len() != equations.len() {
                return Err(AnalysisError::Model(format!(
                    "Element {} returned {} forces for {} DOFs",
                    entry.element.id(),
                    f_e.len(),
                    equations.len()
                )));
            }
            Ok(equations
                .iter()
                .zip(f_e.iter())
                .filter_map(|(eq, f)| eq.map(|e| (e, factor * f)))
                .collect())
        };

        let mut force = DVector::zeros(model.num_equations());
        for (eq, f) in self.map_active(model, local)?.into_iter().flatten() {
            force[eq] += f;
        }
        Ok(force)
    }

    /// Unbalance R = P_ext - F_int.
    pub fn assemble_residual(&self, model: &Model, external: &DVector<f64>) -> Result<DVector<f64>> {
        let resisting = self.assemble_resisting_force(model)?;
        if external.len() != resisting.len() {
            return Err(AnalysisError::StateInconsistency(format!(
                "External load has {} entries, model has {} equations",
                external.len(),
                resisting.len()
            )));
        }
        Ok(external - resisting)
    }

    fn map_active<T, F>(&self, model: &Model, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&ElementEntry) -> Result<T> + Sync + Send,
    {
        let entries = model.entries();
        if self.parallel {
            entries
                .par_iter()
                .filter(|e| e.activation.is_active())
                .map(f)
                .collect()
        } else {
            entries
                .iter()
                .filter(|e| e.activation.is_active())
                .map(f)
                .collect()
        }
    }
}

/// Sparse matrix-vector product.
pub fn multiply(matrix: &CsrMatrix<f64>, vector: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(matrix.nrows());
    for (r, c, v) in matrix.triplet_iter() {
        out[r] += v * vector[c];
    }
    out
}

fn scatter_matrix(
    triplets: &mut Triplets,
    equations: &[Option<usize>],
    value: impl Fn(usize, usize) -> f64,
) {
    for (i, eq_i) in equations.iter().enumerate() {
        let Some(r) = eq_i else { continue };
        for (j, eq_j) in equations.iter().enumerate() {
            let Some(c) = eq_j else { continue };
            let v = value(i, j);
            if v != 0.0 {
                triplets.push((*r, *c, v));
            }
        }
    }
}
