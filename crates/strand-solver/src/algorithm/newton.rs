//! Full Newton-Raphson: the tangent is formed and factored every iteration.

use super::{AlgorithmReport, SolutionAlgorithm, check_iteration, report, start_step};
use crate::analysis::AnalysisContext;
use crate::convergence::{ConvergenceTest, TestInput};
use crate::error::Result;
use crate::integrator::Integrator;

/// Newton-Raphson iteration
#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonRaphson {
    /// Stop with `Diverged` when ‖R‖ grows by more than this factor in one
    /// iteration
    pub divergence_factor: Option<f64>,
}

impl NewtonRaphson {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_divergence_factor(mut self, factor: f64) -> Self {
        self.divergence_factor = Some(factor);
        self
    }
}

impl SolutionAlgorithm for NewtonRaphson {
    fn name(&self) -> &str {
        "newton"
    }

    fn solve_current_step(
        &mut self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        test: &mut dyn ConvergenceTest,
    ) -> Result<AlgorithmReport> {
        let mut unbalance = start_step(ctx, integrator, test)?;
        let mut iteration = 0;

        loop {
            iteration += 1;
            let tangent = integrator.form_tangent(ctx)?;
            let factorization = ctx.solver.factor(&tangent)?;
            let delta = factorization.solve(&unbalance)?;
            let applied = integrator.update(ctx, factorization.as_ref(), &delta)?;

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
