//! Step controller: runs steps, commits converged states and recovers from
//! failed ones.
//!
//! # Step state machine
//!
//! ```text
//! Idle ──step()──► StepInProgress ──converged──► Converged
//!                        │
//!                        └──failed, retries exhausted──► Failed
//! ```
//!
//! `Converged` and `Failed` are idle states that remember the outcome of the
//! last step; the next `step()` starts from either of them.
//!
//! # Recovery
//!
//! When the algorithm reports a failed step (iteration budget exhausted or
//! divergence) or the linear solver reports a singular tangent, the model and
//! the integrator are reverted to the last commit and the next action of the
//! [`RecoveryPolicy`] is applied before the step is retried. Actions cycle
//! until the retry budget is spent. Changes made by recovery actions persist
//! after the step converges.

use crate::algorithm::{AlgorithmReport, NewtonRaphson, SolutionAlgorithm};
use crate::assembler::Assembler;
use crate::backend::{LinearSolver, default_backend};
use crate::convergence::{ConvergenceTest, CriterionTest};
use crate::error::{AnalysisError, Result};
use crate::integrator::Integrator;
use crate::model::Model;
use log::{debug, info, warn};
use std::fmt;

/// Model, assembler and linear solver shared by every component of an
/// analysis
pub struct AnalysisContext {
    pub model: Model,
    pub assembler: Assembler,
    pub solver: Box<dyn LinearSolver>,
}

impl AnalysisContext {
    /// Context with the default backend and serial assembly. The model is
    /// numbered if needed.
    pub fn new(mut model: Model) -> Self {
        if !model.is_numbered() {
            model.domain_changed();
        }
        Self {
            model,
            assembler: Assembler::default(),
            solver: default_backend(),
        }
    }

    pub fn with_solver(mut self, solver: Box<dyn LinearSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.assembler.parallel = parallel;
        self
    }
}

impl fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("equations", &self.model.num_equations())
            .field("elements", &self.model.num_elements())
            .field("assembler", &self.assembler)
            .field("solver", &self.solver.name())
            .finish()
    }
}

/// Step controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    StepInProgress,
    Converged,
    Failed,
}

/// Summary of a committed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Step number, starting at 1
    pub step: usize,
    /// Committed load factor (or time)
    pub load_factor: f64,
    /// Change of the load factor (or time) in this step
    pub increment: f64,
    pub iterations: usize,
    /// Recovery actions applied before the step converged
    pub retries: usize,
    /// Unbalance norm after the last iteration
    pub unbalance_norm: f64,
}

/// Action applied after a failed attempt
#[derive(Debug)]
pub enum RecoveryAction {
    /// Scale the step increment by the factor
    ReduceIncrement(f64),
    /// Swap in another algorithm; the replaced one takes its place in the
    /// policy
    SwitchAlgorithm(Box<dyn SolutionAlgorithm>),
}

/// Recovery actions and retry budget per step
#[derive(Debug, Default)]
pub struct RecoveryPolicy {
    actions: Vec<RecoveryAction>,
    max_retries: usize,
}

impl RecoveryPolicy {
    /// No recovery: the first failure ends the run.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_retries: usize) -> Self {
        Self {
            actions: Vec::new(),
            max_retries,
        }
    }

    /// Halve the increment up to `max_retries` times.
    pub fn halving(max_retries: usize) -> Self {
        Self::new(max_retries).then(RecoveryAction::ReduceIncrement(0.5))
    }

    pub fn then(mut self, action: RecoveryAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn actions(&self) -> &[RecoveryAction] {
        &self.actions
    }

    fn can_retry(&self, retries: usize) -> bool {
        !self.actions.is_empty() && retries < self.max_retries
    }
}

/// Called with every committed step
pub type StepObserver = Box<dyn FnMut(&StepReport, &Model) + Send>;

/// Analysis driver
pub struct Analysis {
    ctx: AnalysisContext,
    integrator: Option<Box<dyn Integrator>>,
    algorithm: Box<dyn SolutionAlgorithm>,
    test: Box<dyn ConvergenceTest>,
    recovery: RecoveryPolicy,
    observer: Option<StepObserver>,
    state: AnalysisState,
    history: Vec<StepReport>,
}

impl fmt::Debug for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analysis")
            .field("ctx", &self.ctx)
            .field("integrator", &self.integrator)
            .field("algorithm", &self.algorithm)
            .field("test", &self.test)
            .field("recovery", &self.recovery)
            .field("state", &self.state)
            .field("steps", &self.history.len())
            .finish()
    }
}

impl Analysis {
    /// Newton-Raphson with a relative unbalance test and no recovery; an
    /// integrator must be set before the first step.
    pub fn new(model: Model) -> Self {
        Self::with_context(AnalysisContext::new(model))
    }

    pub fn with_context(ctx: AnalysisContext) -> Self {
        Self {
            ctx,
            integrator: None,
            algorithm: Box::new(NewtonRaphson::new()),
            test: Box::new(CriterionTest::default()),
            recovery: RecoveryPolicy::none(),
            observer: None,
            state: AnalysisState::Idle,
            history: Vec::new(),
        }
    }

    /// Install an integrator and let it validate itself against the model.
    pub fn set_integrator(&mut self, mut integrator: Box<dyn Integrator>) -> Result<()> {
        self.ensure_idle()?;
        if !self.ctx.model.is_numbered() {
            self.ctx.model.domain_changed();
        }
        integrator.domain_changed(&mut self.ctx)?;
        debug!("Integrator set to {}", integrator.name());
        self.integrator = Some(integrator);
        Ok(())
    }

    pub fn set_algorithm(&mut self, algorithm: Box<dyn SolutionAlgorithm>) -> Result<()> {
        self.ensure_idle()?;
        self.algorithm = algorithm;
        Ok(())
    }

    pub fn set_convergence_test(&mut self, test: Box<dyn ConvergenceTest>) -> Result<()> {
        self.ensure_idle()?;
        self.test = test;
        Ok(())
    }

    pub fn set_recovery_policy(&mut self, policy: RecoveryPolicy) -> Result<()> {
        self.ensure_idle()?;
        self.recovery = policy;
        Ok(())
    }

    pub fn set_step_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&StepReport, &Model) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Reports of every committed step, including those of a run that
    /// ended with an error.
    pub fn history(&self) -> &[StepReport] {
        &self.history
    }

    pub fn model(&self) -> &Model {
        &self.ctx.model
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.ctx
    }

    pub fn integrator(&self) -> Option<&dyn Integrator> {
        self.integrator.as_deref()
    }

    pub fn algorithm(&self) -> &dyn SolutionAlgorithm {
        self.algorithm.as_ref()
    }

    pub fn into_model(self) -> Model {
        self.ctx.model
    }

    /// Run `num_steps` steps.
    pub fn analyze(&mut self, num_steps: usize) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(num_steps);
        for _ in 0..num_steps {
            reports.push(self.step()?);
        }
        Ok(reports)
    }

    /// Run one step, with recovery.
    pub fn step(&mut self) -> Result<StepReport> {
        let mut integrator = self.integrator.take().ok_or_else(|| {
            AnalysisError::InvalidConfiguration("No integrator set".into())
        })?;
        let result = self.run_step(integrator.as_mut());
        self.integrator = Some(integrator);
        result
    }

    /// Reset the model, every element and material, and the load path to
    /// their pristine state.
    pub fn revert_to_start(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.ctx.model.revert_to_start();
        if let Some(integrator) = self.integrator.as_mut() {
            integrator.domain_changed(&mut self.ctx)?;
        }
        self.history.clear();
        self.state = AnalysisState::Idle;
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state == AnalysisState::StepInProgress {
            return Err(AnalysisError::StateInconsistency(
                "Analysis reconfigured while a step is in progress".into(),
            ));
        }
        Ok(())
    }

    fn run_step(&mut self, integrator: &mut dyn Integrator) -> Result<StepReport> {
        let step = self.history.len() + 1;
        let mut retries = 0;

        loop {
            self.state = AnalysisState::StepInProgress;
            let attempt = match integrator.new_step(&mut self.ctx) {
                Ok(()) => self.algorithm.solve_current_step(
                    &mut self.ctx,
                    integrator,
                    self.test.as_mut(),
                ),
                Err(e) => Err(e),
            };

            let failure = match attempt {
                Ok(report) if report.converged() => {
                    return self.commit_step(step, integrator, &report, retries);
                }
                Ok(report) => {
                    warn!(
                        "Step {step}: {:?} after {} iterations (|R| = {:.3e})",
                        report.status,
                        report.iterations,
                        report.record.last_unbalance()
                    );
                    AnalysisError::ConvergenceFailure {
                        step,
                        iterations: report.iterations,
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Step {step}: {e}");
                    e
                }
                Err(e) => {
                    self.revert_step(integrator);
                    self.state = AnalysisState::Failed;
                    return Err(e);
                }
            };

            self.revert_step(integrator);
            if !self.recovery.can_retry(retries) {
                self.state = AnalysisState::Failed;
                return Err(failure);
            }
            self.apply_recovery(retries, integrator);
            retries += 1;
        }
    }

    fn apply_recovery(&mut self, retries: usize, integrator: &mut dyn Integrator) {
        let index = retries % self.recovery.actions.len();
        match &mut self.recovery.actions[index] {
            RecoveryAction::ReduceIncrement(factor) => {
                integrator.scale_increment(*factor);
                warn!(
                    "Retrying with increment scaled by {factor} (now {:.3e})",
                    integrator.load_path().increment
                );
            }
            RecoveryAction::SwitchAlgorithm(algorithm) => {
                std::mem::swap(&mut self.algorithm, algorithm);
                warn!(
                    "Retrying with algorithm {} instead of {}",
                    self.algorithm.name(),
                    algorithm.name()
                );
            }
        }
    }

    fn revert_step(&mut self, integrator: &mut dyn Integrator) {
        self.ctx.model.revert_to_last_commit();
        integrator.revert_step(&mut self.ctx);
    }

    fn commit_step(
        &mut self,
        step: usize,
        integrator: &mut dyn Integrator,
        outcome: &AlgorithmReport,
        retries: usize,
    ) -> Result<StepReport> {
        if let Err(e) = self.ctx.model.commit() {
            self.revert_step(integrator);
            self.state = AnalysisState::Failed;
            return Err(e);
        }
        if let Err(e) = integrator.commit(&mut self.ctx) {
            self.state = AnalysisState::Failed;
            return Err(e);
        }

        let path = integrator.load_path();
        let report = StepReport {
            step,
            load_factor: path.committed,
            increment: path.last_step_increment().unwrap_or(0.0),
            iterations: outcome.iterations,
            retries,
            unbalance_norm: outcome.record.last_unbalance(),
        };
        info!(
            "Step {}: {} = {:.6e}, {} iterations, |R| = {:.3e}",
            step,
            if integrator.name() == "newmark" { "t" } else { "λ" },
            report.load_factor,
            report.iterations,
            report.unbalance_norm
        );

        if let Some(observer) = self.observer.as_mut() {
            observer(&report, &self.ctx.model);
        }
        self.history.push(report.clone());
        self.state = AnalysisState::Converged;
        Ok(report)
    }
}
