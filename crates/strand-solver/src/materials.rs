//! Uniaxial constitutive laws.
//!
//! Materials are driven by strain: the owning element sets a trial strain,
//! reads back stress and tangent, and commits or reverts together with the
//! rest of the model.

use crate::error::{AnalysisError, Result};
use crate::state::{StateCell, StateLifecycle};
use std::fmt::Debug;

/// Strain-driven uniaxial material.
pub trait UniaxialMaterial: StateLifecycle + Debug + Send + Sync {
    /// Set the trial strain and update trial stress/tangent.
    fn set_trial_strain(&mut self, strain: f64) -> Result<()>;

    fn strain(&self) -> f64;

    fn stress(&self) -> f64;

    fn tangent(&self) -> f64;

    fn initial_tangent(&self) -> f64;

    /// Whether the trial state is a converged local state.
    fn trial_converged(&self) -> bool {
        true
    }
}

/// Linear elastic material
#[derive(Debug, Clone)]
pub struct Elastic {
    modulus: f64,
    strain: StateCell<f64>,
}

impl Elastic {
    pub fn new(modulus: f64) -> Result<Self> {
        if !(modulus > 0.0) {
            return Err(AnalysisError::Model(format!(
                "Elastic modulus must be positive, got {modulus}"
            )));
        }
        Ok(Self {
            modulus,
            strain: StateCell::new(0.0),
        })
    }
}

impl UniaxialMaterial for Elastic {
    fn set_trial_strain(&mut self, strain: f64) -> Result<()> {
        self.strain.set_trial(strain);
        Ok(())
    }

    fn strain(&self) -> f64 {
        *self.strain.trial()
    }

    fn stress(&self) -> f64 {
        self.modulus * self.strain.trial()
    }

    fn tangent(&self) -> f64 {
        self.modulus
    }

    fn initial_tangent(&self) -> f64 {
        self.modulus
    }
}

impl StateLifecycle for Elastic {
    fn commit_state(&mut self) {
        self.strain.commit_state();
    }

    fn revert_to_last_commit(&mut self) {
        self.strain.revert_to_last_commit();
    }

    fn revert_to_start(&mut self) {
        self.strain.revert_to_start();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct PlasticState {
    strain: f64,
    stress: f64,
    plastic_strain: f64,
    back_stress: f64,
    tangent: f64,
}

/// Elastoplastic material with linear kinematic hardening.
///
/// With `hardening = 0` the law is elastic-perfectly plastic.
#[derive(Debug, Clone)]
pub struct Bilinear {
    modulus: f64,
    yield_stress: f64,
    hardening: f64,
    state: StateCell<PlasticState>,
}

impl Bilinear {
    pub fn new(modulus: f64, yield_stress: f64, hardening: f64) -> Result<Self> {
        if !(modulus > 0.0) || !(yield_stress > 0.0) || hardening < 0.0 {
            return Err(AnalysisError::Model(format!(
                "Invalid bilinear parameters: E={modulus}, fy={yield_stress}, H={hardening}"
            )));
        }
        Ok(Self {
            modulus,
            yield_stress,
            hardening,
            state: StateCell::new(PlasticState {
                tangent: modulus,
                ..Default::default()
            }),
        })
    }

    pub fn plastic_strain(&self) -> f64 {
        self.state.trial().plastic_strain
    }
}

impl UniaxialMaterial for Bilinear {
    fn set_trial_strain(&mut self, strain: f64) -> Result<()> {
        let committed = *self.state.committed();
        let e = self.modulus;

        let trial_stress = e * (strain - committed.plastic_strain);
        let xi = trial_stress - committed.back_stress;
        let f = xi.abs() - self.yield_stress;

        let next = if f <= 0.0 {
            PlasticState {
                strain,
                stress: trial_stress,
                tangent: e,
                ..committed
            }
        } else {
            // Closed-form return mapping.
            let d_gamma = f / (e + self.hardening);
            let sign = xi.signum();
            PlasticState {
                strain,
                stress: trial_stress - e * d_gamma * sign,
                plastic_strain: committed.plastic_strain + d_gamma * sign,
                back_stress: committed.back_stress + self.hardening * d_gamma * sign,
                tangent: e * self.hardening / (e + self.hardening),
            }
        };
        self.state.set_trial(next);
        Ok(())
    }

    fn strain(&self) -> f64 {
        self.state.trial().strain
    }

    fn stress(&self) -> f64 {
        self.state.trial().stress
    }

    fn tangent(&self) -> f64 {
        self.state.trial().tangent
    }

    fn initial_tangent(&self) -> f64 {
        self.modulus
    }
}

impl StateLifecycle for Bilinear {
    fn commit_state(&mut self) {
        self.state.commit_state();
    }

    fn revert_to_last_commit(&mut self) {
        self.state.revert_to_last_commit();
    }

    fn revert_to_start(&mut self) {
        self.state.revert_to_start();
    }
}
