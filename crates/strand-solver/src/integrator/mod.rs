//! Integrators: how the load factor (or time) advances and how a solved
//! correction becomes a new trial state.
//!
//! | Integrator | Controls | Unbalance |
//! |---|---|---|
//! | [`LoadControl`] | Δλ per step | P(λ) − F_int |
//! | [`DisplacementControl`] | Δu of one DOF per step | λ·P_ref − F_int |
//! | [`ArcLength`] | Δl per step (ΔU·ΔU + α²Δλ² = Δl²) | λ·P_ref − F_int |
//! | [`Newmark`] | Δt per step | P(t) − F_int − M·A − C·V |
//!
//! Every integrator writes its trial load factor or time into the model
//! state (`Kinematics::time`) and pushes trial displacements to the elements
//! in [`Integrator::update`].

pub mod arc_length;
pub mod displacement_control;
pub mod load_control;
pub mod newmark;

pub use arc_length::ArcLength;
pub use displacement_control::DisplacementControl;
pub use load_control::LoadControl;
pub use newmark::{Newmark, NewmarkStability};

use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::error::Result;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Advances the load path and turns corrections into trial states.
pub trait Integrator: Debug + Send {
    fn name(&self) -> &str;

    /// Re-size internal vectors after the equation count changed and
    /// validate the configuration against the model.
    fn domain_changed(&mut self, ctx: &mut AnalysisContext) -> Result<()>;

    /// Apply the next increment (predictor).
    fn new_step(&mut self, ctx: &mut AnalysisContext) -> Result<()>;

    /// Assemble the (effective) tangent.
    fn form_tangent(&mut self, ctx: &AnalysisContext) -> Result<CsrMatrix<f64>>;

    /// Assemble the unbalance of the current trial state.
    fn form_unbalance(&mut self, ctx: &AnalysisContext) -> Result<DVector<f64>>;

    /// Apply the correction `delta` solved with `factorization` and return
    /// the displacement correction actually added to the trial state
    /// (Ū + dλ·Û for the path-following integrators).
    fn update(
        &mut self,
        ctx: &mut AnalysisContext,
        factorization: &dyn Factorization,
        delta: &DVector<f64>,
    ) -> Result<DVector<f64>>;

    /// Record the converged step. The model itself is committed by the
    /// step controller before this is called.
    fn commit(&mut self, ctx: &mut AnalysisContext) -> Result<()>;

    /// Discard the trial increment of the current step.
    fn revert_step(&mut self, ctx: &mut AnalysisContext);

    /// Multiply the step increment (used by the recovery policy).
    fn scale_increment(&mut self, factor: f64);

    fn load_path(&self) -> &LoadPath;
}

/// Load factor (or time) history of an analysis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadPath {
    /// Trial load factor or time
    pub value: f64,
    /// Last committed load factor or time
    pub committed: f64,
    /// Control increment: Δλ, Δu, Δl or Δt depending on the integrator
    pub increment: f64,
    /// Committed value after each step
    pub history: Vec<f64>,
    /// Committed change of the load factor (or time) in each step
    pub step_increments: Vec<f64>,
}

impl LoadPath {
    pub fn new(start: f64, increment: f64) -> Self {
        Self {
            value: start,
            committed: start,
            increment,
            history: Vec::new(),
            step_increments: Vec::new(),
        }
    }

    /// Change of the load factor within the current step.
    pub fn step_value(&self) -> f64 {
        self.value - self.committed
    }

    pub fn last_step_increment(&self) -> Option<f64> {
        self.step_increments.last().copied()
    }

    pub(crate) fn commit(&mut self) {
        self.step_increments.push(self.value - self.committed);
        self.committed = self.value;
        self.history.push(self.value);
    }

    pub(crate) fn revert(&mut self) {
        self.value = self.committed;
    }

    /// Restart from `start`, keeping the configured increment.
    pub(crate) fn restart(&mut self, start: f64) {
        *self = Self::new(start, self.increment);
    }
}

/// Increment adaptation Δ·(J_desired / J_last), clamped in magnitude to
/// [min, max]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveIncrement {
    pub desired_iterations: usize,
    pub min: f64,
    pub max: f64,
}

impl AdaptiveIncrement {
    pub fn adapt(&self, increment: f64, last_iterations: usize) -> f64 {
        if last_iterations == 0 || self.desired_iterations == 0 {
            return increment;
        }
        let ratio = self.desired_iterations as f64 / last_iterations as f64;
        let magnitude = (increment.abs() * ratio).clamp(self.min.abs(), self.max.abs());
        magnitude.copysign(increment)
    }
}

/// Counts corrections per step for increment adaptation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IterationCounter {
    current: usize,
    last_committed: usize,
}

impl IterationCounter {
    pub(crate) fn record_update(&mut self) {
        self.current += 1;
    }

    pub(crate) fn start_step(&mut self) {
        self.current = 0;
    }

    pub(crate) fn commit(&mut self) {
        self.last_committed = self.current;
        self.current = 0;
    }

    pub(crate) fn last(&self) -> usize {
        self.last_committed
    }
}

/// Set the trial load factor / time of the model.
pub(crate) fn set_pseudo_time(ctx: &mut AnalysisContext, value: f64) {
    ctx.model.state_mut().set_time(value);
}

/// Add `delta` to the trial displacements and update the elements.
pub(crate) fn apply_displacement(ctx: &mut AnalysisContext, delta: &DVector<f64>) -> Result<()> {
    ctx.model.state_mut().increment_displacement(delta);
    ctx.model.update_elements(ctx.assembler.parallel)
}

/// Unbalance λ·P_ref − F_int used by the path-following integrators.
pub(crate) fn proportional_unbalance(
    ctx: &AnalysisContext,
    reference: &DVector<f64>,
    lambda: f64,
) -> Result<DVector<f64>> {
    ctx.assembler.assemble_residual(&ctx.model, &(reference * lambda))
}
