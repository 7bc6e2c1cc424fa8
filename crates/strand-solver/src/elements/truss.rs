//! 2-node plane truss element with 2 translational DOFs per node.
//!
//! ## Element Formulation
//!
//! Axial strain from the projected elongation (small displacement) or from the
//! current length (corotational):
//!
//! ```text
//! small:        ε = b·u / L0,               b = [-c, -s, c, s]
//! corotational: ε = (L - L0) / L0,          b from the current direction
//! ```
//!
//! Tangent stiffness:
//!
//! ```text
//! K = (A*Et/L0) * b*bᵀ  +  (N/L) * [ G -G]     G = [ s²  -cs]
//!                                  [-G  G]         [-cs   c²]
//! ```
//!
//! The geometric term only appears in the corotational formulation.

use crate::dof::DofId;
use crate::elements::Element;
use crate::error::{AnalysisError, Result};
use crate::materials::UniaxialMaterial;
use crate::state::StateLifecycle;
use nalgebra::{DMatrix, DVector, Matrix2};

/// Kinematic formulation of the truss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrussGeometry {
    #[default]
    Linear,
    Corotational,
}

/// 2-node plane truss
#[derive(Debug)]
pub struct Truss {
    id: i32,
    dofs: [DofId; 4],
    /// Undeformed nodal coordinates [x1, y1, x2, y2]
    coords: [f64; 4],
    area: f64,
    density: f64,
    geometry: TrussGeometry,
    material: Box<dyn UniaxialMaterial>,
    /// Trial displacements [u1x, u1y, u2x, u2y]
    trial: [f64; 4],
    committed: [f64; 4],
    length: f64,
}

impl Truss {
    pub fn new(
        id: i32,
        nodes: [(i32, f64, f64); 2],
        area: f64,
        material: Box<dyn UniaxialMaterial>,
        geometry: TrussGeometry,
    ) -> Result<Self> {
        let [(n1, x1, y1), (n2, x2, y2)] = nodes;
        let length = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();

        if length < 1e-10 {
            return Err(AnalysisError::Model(format!(
                "Truss element {id} has zero or near-zero length: {length}"
            )));
        }
        if !(area > 0.0) {
            return Err(AnalysisError::Model(format!(
                "Truss element {id} has non-positive area: {area}"
            )));
        }

        Ok(Self {
            id,
            dofs: [
                DofId::new(n1, 0),
                DofId::new(n1, 1),
                DofId::new(n2, 0),
                DofId::new(n2, 1),
            ],
            coords: [x1, y1, x2, y2],
            area,
            density: 0.0,
            geometry,
            material,
            trial: [0.0; 4],
            committed: [0.0; 4],
            length,
        })
    }

    /// Mass density per unit volume, lumped to the nodes.
    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub fn axial_force(&self) -> f64 {
        self.area * self.material.stress()
    }

    pub fn material(&self) -> &dyn UniaxialMaterial {
        self.material.as_ref()
    }

    /// Direction cosines and length of the configuration used for equilibrium.
    fn direction(&self) -> (f64, f64, f64) {
        let [x1, y1, x2, y2] = self.coords;
        let (dx, dy) = match self.geometry {
            TrussGeometry::Linear => (x2 - x1, y2 - y1),
            TrussGeometry::Corotational => {
                let u = &self.trial;
                (x2 + u[2] - x1 - u[0], y2 + u[3] - y1 - u[1])
            }
        };
        let l = (dx * dx + dy * dy).sqrt();
        (dx / l, dy / l, l)
    }

    fn b_vector(c: f64, s: f64) -> DVector<f64> {
        DVector::from_vec(vec![-c, -s, c, s])
    }
}

impl Element for Truss {
    fn id(&self) -> i32 {
        self.id
    }

    fn dofs(&self) -> &[DofId] {
        &self.dofs
    }

    fn update(&mut self, trial_displacement: &[f64]) -> Result<()> {
        if trial_displacement.len() != 4 {
            return Err(AnalysisError::Model(format!(
                "Truss {} expects 4 displacements, got {}",
                self.id,
                trial_displacement.len()
            )));
        }
        self.trial.copy_from_slice(trial_displacement);

        let (c, s, l) = self.direction();
        if l < 1e-12 {
            return Err(AnalysisError::Model(format!(
                "Truss element {} collapsed to zero length",
                self.id
            )));
        }
        let strain = match self.geometry {
            TrussGeometry::Linear => {
                let u = &self.trial;
                (c * (u[2] - u[0]) + s * (u[3] - u[1])) / self.length
            }
            TrussGeometry::Corotational => (l - self.length) / self.length,
        };
        self.material.set_trial_strain(strain)
    }

    fn tangent_stiffness(&self) -> DMatrix<f64> {
        let (c, s, l) = self.direction();
        let b = Self::b_vector(c, s);
        let mut k = &b * b.transpose() * (self.area * self.material.tangent() / self.length);

        if self.geometry == TrussGeometry::Corotational {
            let n = self.axial_force();
            let g = Matrix2::new(s * s, -c * s, -c * s, c * c) * (n / l);
            for (bi, bj, sign) in [(0, 0, 1.0), (0, 2, -1.0), (2, 0, -1.0), (2, 2, 1.0)] {
                for i in 0..2 {
                    for j in 0..2 {
                        k[(bi + i, bj + j)] += sign * g[(i, j)];
                    }
                }
            }
        }
        k
    }

    fn resisting_force(&self) -> DVector<f64> {
        let (c, s, _) = self.direction();
        Self::b_vector(c, s) * self.axial_force()
    }

    fn mass_matrix(&self) -> Option<DMatrix<f64>> {
        if self.density <= 0.0 {
            return None;
        }
        let m = 0.5 * self.density * self.area * self.length;
        Some(DMatrix::from_diagonal_element(4, 4, m))
    }

    fn trial_converged(&self) -> bool {
        self.material.trial_converged()
    }
}

impl StateLifecycle for Truss {
    fn commit_state(&mut self) {
        self.material.commit_state();
        self.committed = self.trial;
    }

    fn revert_to_last_commit(&mut self) {
        self.material.revert_to_last_commit();
        self.trial = self.committed;
    }

    fn revert_to_start(&mut self) {
        self.material.revert_to_start();
        self.trial = [0.0; 4];
        self.committed = [0.0; 4];
    }
}
