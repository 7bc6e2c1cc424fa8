//! Zero-length spring between two DOFs, or between one DOF and ground.
//!
//! The material is driven with the spring deformation as "strain" and its
//! "stress" is the spring force:
//!
//! ```text
//! δ = u_j - u_i          f = N(δ) * [-1, 1]
//! k = N'(δ) * [ 1 -1]
//!             [-1  1]
//! ```

use crate::dof::DofId;
use crate::elements::Element;
use crate::error::{AnalysisError, Result};
use crate::materials::UniaxialMaterial;
use crate::state::StateLifecycle;
use nalgebra::{DMatrix, DVector};

static GROUNDED: [f64; 1] = [1.0];
static BETWEEN: [f64; 2] = [-1.0, 1.0];

/// Uniaxial spring element
#[derive(Debug)]
pub struct Spring {
    id: i32,
    dofs: Vec<DofId>,
    material: Box<dyn UniaxialMaterial>,
}

impl Spring {
    /// Spring from `dof` to ground.
    pub fn grounded(id: i32, dof: DofId, material: Box<dyn UniaxialMaterial>) -> Self {
        Self {
            id,
            dofs: vec![dof],
            material,
        }
    }

    /// Spring between two DOFs, positive when `to` moves away from `from`.
    pub fn between(id: i32, from: DofId, to: DofId, material: Box<dyn UniaxialMaterial>) -> Self {
        Self {
            id,
            dofs: vec![from, to],
            material,
        }
    }

    pub fn material(&self) -> &dyn UniaxialMaterial {
        self.material.as_ref()
    }

    fn signs(&self) -> &'static [f64] {
        if self.dofs.len() == 1 {
            &GROUNDED[..]
        } else {
            &BETWEEN[..]
        }
    }
}

impl Element for Spring {
    fn id(&self) -> i32 {
        self.id
    }

    fn dofs(&self) -> &[DofId] {
        &self.dofs
    }

    fn update(&mut self, trial_displacement: &[f64]) -> Result<()> {
        if trial_displacement.len() != self.dofs.len() {
            return Err(AnalysisError::Model(format!(
                "Spring {} expects {} displacements, got {}",
                self.id,
                self.dofs.len(),
                trial_displacement.len()
            )));
        }
        let deformation: f64 = self
            .signs()
            .iter()
            .zip(trial_displacement)
            .map(|(s, u)| s * u)
            .sum();
        self.material.set_trial_strain(deformation)
    }

    fn tangent_stiffness(&self) -> DMatrix<f64> {
        let k = self.material.tangent();
        let b = DVector::from_column_slice(self.signs());
        &b * b.transpose() * k
    }

    fn resisting_force(&self) -> DVector<f64> {
        DVector::from_column_slice(self.signs()) * self.material.stress()
    }

    fn trial_converged(&self) -> bool {
        self.material.trial_converged()
    }
}

impl StateLifecycle for Spring {
    fn commit_state(&mut self) {
        self.material.commit_state();
    }

    fn revert_to_last_commit(&mut self) {
        self.material.revert_to_last_commit();
    }

    fn revert_to_start(&mut self) {
        self.material.revert_to_start();
    }
}
