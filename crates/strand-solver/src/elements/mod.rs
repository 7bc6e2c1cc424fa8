//! Element capability contract and reference elements.
//!
//! The solution core never looks inside an element: it hands the element
//! its trial displacements, reads back tangent and resisting force, and
//! drives the commit/revert lifecycle.

use crate::dof::DofId;
use crate::error::Result;
use crate::state::StateLifecycle;
use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;

pub mod spring;
pub mod truss;

pub use spring::Spring;
pub use truss::{Truss, TrussGeometry};

/// Element interface consumed by the assembler and the step controller
pub trait Element: StateLifecycle + Debug + Send + Sync {
    /// Element ID
    fn id(&self) -> i32;

    /// Nodal DOFs this element connects, in local order
    fn dofs(&self) -> &[DofId];

    /// Set the trial displacements (local order, constrained DOFs as 0.0)
    /// and update the trial state of the element and its materials.
    fn update(&mut self, trial_displacement: &[f64]) -> Result<()>;

    /// Tangent stiffness at the trial state (size: dofs × dofs)
    fn tangent_stiffness(&self) -> DMatrix<f64>;

    /// Internal resisting force at the trial state
    fn resisting_force(&self) -> DVector<f64>;

    /// Consistent or lumped mass matrix, if the element carries mass
    fn mass_matrix(&self) -> Option<DMatrix<f64>> {
        None
    }

    /// Whether the trial state is locally converged and may be committed
    fn trial_converged(&self) -> bool {
        true
    }
}

/// Activation state of an element within a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Active,
    /// Contribution scaled by `factor`, reduced by `decrement` at every
    /// committed step until it reaches zero.
    Deactivating { factor: f64, decrement: f64 },
    Inactive,
}

impl Activation {
    /// Stress-reduction factor applied to the element's contributions.
    pub fn factor(&self) -> f64 {
        match self {
            Activation::Active => 1.0,
            Activation::Deactivating { factor, .. } => *factor,
            Activation::Inactive => 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Activation::Inactive)
    }

    /// State after one more committed step of the deactivation ramp.
    pub fn advanced(self) -> Self {
        match self {
            Activation::Deactivating { factor, decrement } => {
                let next = factor - decrement;
                if next <= 1e-12 {
                    Activation::Inactive
                } else {
                    Activation::Deactivating {
                        factor: next,
                        decrement,
                    }
                }
            }
            other => other,
        }
    }
}
