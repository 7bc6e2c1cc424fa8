//! Modified Newton: one tangent factorization per step, optionally
//! refreshed every N iterations.

use super::{AlgorithmReport, SolutionAlgorithm, check_iteration, report, start_step};
use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::convergence::{ConvergenceTest, TestInput};
use crate::error::{AnalysisError, Result};
use crate::integrator::Integrator;
use log::debug;
use std::fmt;

/// Modified Newton iteration
#[derive(Default)]
pub struct ModifiedNewton {
    /// Re-form the tangent every N iterations (never when `None`)
    pub refresh_every: Option<usize>,
    pub divergence_factor: Option<f64>,
    factorization: Option<Box<dyn Factorization>>,
    factorizations: usize,
}

impl ModifiedNewton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh(mut self, every: usize) -> Self {
        self.refresh_every = (every > 0).then_some(every);
        self
    }

    pub fn with_divergence_factor(mut self, factor: f64) -> Self {
        self.divergence_factor = Some(factor);
        self
    }

    /// Number of tangent factorizations performed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    fn is_stale(&self, iteration: usize) -> bool {
        match (&self.factorization, self.refresh_every) {
            (None, _) => true,
            (Some(_), Some(every)) => (iteration - 1) % every == 0,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Debug for ModifiedNewton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifiedNewton")
            .field("refresh_every", &self.refresh_every)
            .field("divergence_factor", &self.divergence_factor)
            .field("factored", &self.factorization.is_some())
            .field("factorizations", &self.factorizations)
            .finish()
    }
}

impl SolutionAlgorithm for ModifiedNewton {
    fn name(&self) -> &str {
        "modified-newton"
    }

    fn solve_current_step(
        &mut self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        test: &mut dyn ConvergenceTest,
    ) -> Result<AlgorithmReport> {
        // A factorization from a previous step describes another state.
        self.factorization = None;

        let mut unbalance = start_step(ctx, integrator, test)?;
        let mut iteration = 0;

        loop {
            iteration += 1;
            if self.is_stale(iteration) {
                let tangent = integrator.form_tangent(ctx)?;
                self.factorization = Some(ctx.solver.factor(&tangent)?);
                self.factorizations += 1;
                debug!("  tangent factored at iteration {iteration}");
            }
            let factorization = self.factorization.as_deref().ok_or_else(|| {
                AnalysisError::StateInconsistency("Modified Newton has no factorization".into())
            })?;
            let delta = factorization.solve(&unbalance)?;
            let applied = integrator.update(ctx, factorization, &delta)?;

            let next = integrator.form_unbalance(ctx)?;
            let input = TestInput {
                unbalance: &next,
                rhs: &unbalance,
                increment: &applied,
                iteration,
            };
            if let Some(status) =
                check_iteration(test, &input, unbalance.norm(), self.divergence_factor)
            {
                return Ok(report(status, test));
            }
            unbalance = next;
        }
    }
}
