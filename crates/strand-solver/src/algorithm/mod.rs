//! Solution algorithms: the equilibrium iteration loop of one step.
//!
//! Every algorithm performs, per iteration,
//!
//! 1. form the tangent and factor it (or reuse a factorization)
//! 2. solve K·ΔU = R
//! 3. hand ΔU to the integrator, which updates the trial state
//! 4. form the new unbalance and ask the convergence test
//!
//! Exhausting the iteration budget is reported as [`StepStatus::Failed`],
//! never as an error. Linear-solver and configuration errors are returned
//! as errors.

pub mod line_search;
pub mod modified_newton;
pub mod newton;

pub use line_search::{LineSearchMethod, NewtonLineSearch};
pub use modified_newton::ModifiedNewton;
pub use newton::NewtonRaphson;

use crate::analysis::AnalysisContext;
use crate::convergence::{ConvergenceRecord, ConvergenceTest, TestInput, TestOutcome};
use crate::error::Result;
use crate::integrator::Integrator;
use log::debug;
use nalgebra::DVector;
use std::fmt::Debug;

/// Outcome of the iterations of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Converged,
    /// Iteration budget exhausted
    Failed,
    /// Unbalance grew beyond the divergence factor
    Diverged,
}

/// Result of [`SolutionAlgorithm::solve_current_step`]
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmReport {
    pub status: StepStatus,
    pub iterations: usize,
    pub record: ConvergenceRecord,
}

impl AlgorithmReport {
    pub fn converged(&self) -> bool {
        self.status == StepStatus::Converged
    }
}

/// Drives the equilibrium iterations of the current step.
pub trait SolutionAlgorithm: Debug + Send {
    fn name(&self) -> &str;

    fn solve_current_step(
        &mut self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        test: &mut dyn ConvergenceTest,
    ) -> Result<AlgorithmReport>;
}

/// Evaluate one iteration and decide whether the loop stops.
///
/// Returns `Some(status)` when the step is finished.
pub(crate) fn check_iteration(
    test: &mut dyn ConvergenceTest,
    input: &TestInput<'_>,
    previous_norm: f64,
    divergence_factor: Option<f64>,
) -> Option<StepStatus> {
    let outcome = test.test(input);
    let norm = input.unbalance.norm();
    debug!(
        "  iteration {}: |R| = {:.6e}, |ΔU| = {:.6e}",
        input.iteration,
        norm,
        input.increment.norm()
    );
    match outcome {
        TestOutcome::Converged => Some(StepStatus::Converged),
        TestOutcome::Failed => Some(StepStatus::Failed),
        TestOutcome::Continue => match divergence_factor {
            Some(factor) if previous_norm > 0.0 && norm > factor * previous_norm => {
                debug!(
                    "  unbalance grew from {previous_norm:.3e} to {norm:.3e}, step diverged"
                );
                Some(StepStatus::Diverged)
            }
            _ if !norm.is_finite() => Some(StepStatus::Diverged),
            _ => None,
        },
    }
}

pub(crate) fn report(status: StepStatus, test: &dyn ConvergenceTest) -> AlgorithmReport {
    let record = test.record().clone();
    AlgorithmReport {
        status,
        iterations: record.iterations,
        record,
    }
}

/// Form the unbalance at the start of a step and reset the test.
pub(crate) fn start_step(
    ctx: &AnalysisContext,
    integrator: &mut dyn Integrator,
    test: &mut dyn ConvergenceTest,
) -> Result<DVector<f64>> {
    let unbalance = integrator.form_unbalance(ctx)?;
    test.start(&unbalance);
    Ok(unbalance)
}
