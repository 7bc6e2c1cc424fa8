//! Newton iteration with line search along the Newton direction.
//!
//! After solving K·ΔU = R the trial state is moved to U + η·ΔU, with η chosen
//! by one of:
//!
//! - **Bisection**: root of s(η) = δ·R(η) bracketed in [0, η_max]
//! - **GoldenSection**: minimum of ‖R(η)‖ over [η_min, η_max]
//!
//! δ is the correction the integrator applied for the full step (η = 1),
//! which differs from ΔU under displacement and arc-length control. The
//! search is skipped when |s(1)| ≤ tolerance·|s(0)| and is bounded by
//! `max_iterations` evaluations. Moving between two values of η hands
//! (η₂ − η₁)·ΔU to the integrator; the corrections it reports are summed and
//! passed to the convergence test.

use super::{AlgorithmReport, SolutionAlgorithm, check_iteration, report, start_step};
use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::convergence::{ConvergenceTest, TestInput};
use crate::error::{AnalysisError, Result};
use crate::integrator::Integrator;
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Line search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSearchMethod {
    #[default]
    Bisection,
    GoldenSection,
}

/// Newton-Raphson with line search
#[derive(Debug, Clone, Copy)]
pub struct NewtonLineSearch {
    pub method: LineSearchMethod,
    /// Maximum number of residual evaluations per search
    pub max_iterations: usize,
    /// Accept η when |s(η)| ≤ tolerance·|s(0)|
    pub tolerance: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    pub divergence_factor: Option<f64>,
}

impl Default for NewtonLineSearch {
    fn default() -> Self {
        Self {
            method: LineSearchMethod::Bisection,
            max_iterations: 10,
            tolerance: 0.8,
            eta_min: 0.1,
            eta_max: 1.0,
            divergence_factor: None,
        }
    }
}

/// Trial state positioned at η along the Newton direction
struct Search<'a> {
    factorization: &'a dyn Factorization,
    direction: &'a DVector<f64>,
    /// Correction applied by the full step, the measure of s(η)
    step: DVector<f64>,
    eta: f64,
    /// Correction applied in this iteration so far
    applied: DVector<f64>,
}

impl Search<'_> {
    fn move_to(
        &mut self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        eta: f64,
    ) -> Result<DVector<f64>> {
        if eta != self.eta {
            let delta = self.direction * (eta - self.eta);
            self.applied += integrator.update(ctx, self.factorization, &delta)?;
            self.eta = eta;
        }
        integrator.form_unbalance(ctx)
    }

    fn slope(&self, unbalance: &DVector<f64>) -> f64 {
        self.step.dot(unbalance)
    }

    fn finish(self, unbalance: DVector<f64>) -> Searched {
        Searched {
            eta: self.eta,
            unbalance,
            applied: self.applied,
        }
    }
}

/// Accepted point of a line search
struct Searched {
    eta: f64,
    unbalance: DVector<f64>,
    applied: DVector<f64>,
}

impl NewtonLineSearch {
    pub fn new(method: LineSearchMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.eta_min > 0.0) || !(self.eta_max >= self.eta_min) || !(self.tolerance > 0.0) {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Invalid line search bounds: η ∈ [{}, {}], tolerance {}",
                self.eta_min, self.eta_max, self.tolerance
            )));
        }
        Ok(())
    }

    /// Search from the full step (η = 1, already applied) for an η that
    /// reduces the unbalance.
    fn search(
        &self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        mut search: Search<'_>,
        rhs: &DVector<f64>,
        full_step: DVector<f64>,
    ) -> Result<Searched> {
        let s0 = search.slope(rhs);
        let s1 = search.slope(&full_step);
        if s0 == 0.0 || (s1 / s0).abs() <= self.tolerance {
            return Ok(search.finish(full_step));
        }

        let unbalance = match self.method {
            LineSearchMethod::Bisection => {
                self.bisection(ctx, integrator, &mut search, s0, s1, full_step)?
            }
            LineSearchMethod::GoldenSection => {
                self.golden_section(ctx, integrator, &mut search, full_step)?
            }
        };
        Ok(search.finish(unbalance))
    }

    fn bisection(
        &self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        search: &mut Search<'_>,
        s0: f64,
        s1: f64,
        full_step: DVector<f64>,
    ) -> Result<DVector<f64>> {
        let (mut lo, mut hi) = (0.0, 1.0);
        let mut s_hi = s1;
        let mut unbalance = full_step;

        // Extend the bracket when the full step does not change the sign.
        if s_hi * s0 > 0.0 {
            if self.eta_max <= 1.0 {
                return Ok(unbalance);
            }
            unbalance = search.move_to(ctx, integrator, self.eta_max)?;
            s_hi = search.slope(&unbalance);
            if s_hi * s0 > 0.0 {
                return Ok(unbalance);
            }
            lo = 1.0;
            hi = self.eta_max;
        }

        for _ in 0..self.max_iterations {
            let eta = 0.5 * (lo + hi);
            unbalance = search.move_to(ctx, integrator, eta)?;
            let s = search.slope(&unbalance);
            if (s / s0).abs() <= self.tolerance {
                break;
            }
            if s * s0 > 0.0 {
                lo = eta;
            } else {
                hi = eta;
            }
        }
        let eta = search.eta.max(self.eta_min);
        if eta != search.eta {
            unbalance = search.move_to(ctx, integrator, eta)?;
        }
        Ok(unbalance)
    }

    fn golden_section(
        &self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        search: &mut Search<'_>,
        full_step: DVector<f64>,
    ) -> Result<DVector<f64>> {
        let ratio = 0.5 * (5.0_f64.sqrt() - 1.0);
        let (mut a, mut b) = (self.eta_min, self.eta_max);
        let mut best = (1.0, full_step.norm());

        let mut x1 = b - ratio * (b - a);
        let mut x2 = a + ratio * (b - a);
        let mut f1 = search.move_to(ctx, integrator, x1)?.norm();
        let mut f2 = search.move_to(ctx, integrator, x2)?.norm();

        for _ in 0..self.max_iterations {
            for (eta, f) in [(x1, f1), (x2, f2)] {
                if f < best.1 {
                    best = (eta, f);
                }
            }
            if f1 < f2 {
                b = x2;
                x2 = x1;
                f2 = f1;
                x1 = b - ratio * (b - a);
                f1 = search.move_to(ctx, integrator, x1)?.norm();
            } else {
                a = x1;
                x1 = x2;
                f1 = f2;
                x2 = a + ratio * (b - a);
                f2 = search.move_to(ctx, integrator, x2)?.norm();
            }
        }
        for (eta, f) in [(x1, f1), (x2, f2)] {
            if f < best.1 {
                best = (eta, f);
            }
        }

        search.move_to(ctx, integrator, best.0)
    }
}

impl SolutionAlgorithm for NewtonLineSearch {
    fn name(&self) -> &str {
        "newton-line-search"
    }

    fn solve_current_step(
        &mut self,
        ctx: &mut AnalysisContext,
        integrator: &mut dyn Integrator,
        test: &mut dyn ConvergenceTest,
    ) -> Result<AlgorithmReport> {
        self.validate()?;
        let mut unbalance = start_step(ctx, integrator, test)?;
        let mut iteration = 0;

        loop {
            iteration += 1;
            let tangent = integrator.form_tangent(ctx)?;
            let factorization = ctx.solver.factor(&tangent)?;
            let delta = factorization.solve(&unbalance)?;
            let applied = integrator.update(ctx, factorization.as_ref(), &delta)?;
            let full_step = integrator.form_unbalance(ctx)?;

            let search = Search {
                factorization: factorization.as_ref(),
                direction: &delta,
                step: applied.clone(),
                eta: 1.0,
                applied,
            };
            let searched = self.search(ctx, integrator, search, &unbalance, full_step)?;
            if searched.eta != 1.0 {
                debug!("  line search: η = {:.4}", searched.eta);
            }

            let input = TestInput {
                unbalance: &searched.unbalance,
                rhs: &unbalance,
                increment: &searched.applied,
                iteration,
            };
            if let Some(status) =
                check_iteration(test, &input, unbalance.norm(), self.divergence_factor)
            {
                return Ok(report(status, test));
            }
            unbalance = searched.unbalance;
        }
    }
}
