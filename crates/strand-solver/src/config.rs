//! Serializable analysis configuration.
//!
//! Every section has a `Default` and a `build` method producing the boxed
//! component, so a configuration can be read from JSON with only the
//! interesting fields present:
//!
//! ```json
//! {
//!   "integrator": { "type": "displacement_control", "node": 2, "dof": 0, "increment": 0.01 },
//!   "algorithm": { "type": "newton_line_search", "method": "golden_section" },
//!   "test": { "criteria": [{ "measure": "norm_unbalance", "tolerance": 1e-8, "relative": true }] },
//!   "recovery": { "max_retries": 4, "actions": [{ "type": "reduce_increment", "factor": 0.5 }] }
//! }
//! ```

use crate::algorithm::{
    LineSearchMethod, ModifiedNewton, NewtonLineSearch, NewtonRaphson, SolutionAlgorithm,
};
use crate::analysis::{Analysis, AnalysisContext, RecoveryAction, RecoveryPolicy};
use crate::backend::{DenseLu, LinearSolver, SparseCholesky};
use crate::convergence::{CombineMode, Combined, ConvergenceTest, Criterion, CriterionTest};
use crate::dof::DofId;
use crate::error::{AnalysisError, Result};
use crate::integrator::{
    AdaptiveIncrement, ArcLength, DisplacementControl, Integrator, LoadControl, Newmark,
};
use crate::model::Model;
use serde::{Deserialize, Serialize};

/// Integrator selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegratorConfig {
    LoadControl {
        increment: f64,
        #[serde(default)]
        adaptive: Option<AdaptiveIncrement>,
    },
    DisplacementControl {
        node: i32,
        dof: usize,
        increment: f64,
        #[serde(default)]
        adaptive: Option<AdaptiveIncrement>,
    },
    ArcLength {
        arc_length: f64,
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    Newmark {
        #[serde(default = "default_gamma")]
        gamma: f64,
        #[serde(default = "default_beta")]
        beta: f64,
        dt: f64,
    },
}

fn default_alpha() -> f64 {
    1.0
}

fn default_gamma() -> f64 {
    0.5
}

fn default_beta() -> f64 {
    0.25
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig::LoadControl {
            increment: 0.1,
            adaptive: None,
        }
    }
}

impl IntegratorConfig {
    pub fn build(&self) -> Result<Box<dyn Integrator>> {
        Ok(match *self {
            IntegratorConfig::LoadControl {
                increment,
                adaptive,
            } => {
                let mut lc = LoadControl::new(increment)?;
                if let Some(adaptive) = adaptive {
                    lc = lc.with_adaptive(adaptive);
                }
                Box::new(lc)
            }
            IntegratorConfig::DisplacementControl {
                node,
                dof,
                increment,
                adaptive,
            } => {
                let mut dc = DisplacementControl::new(DofId::new(node, dof), increment)?;
                if let Some(adaptive) = adaptive {
                    dc = dc.with_adaptive(adaptive);
                }
                Box::new(dc)
            }
            IntegratorConfig::ArcLength { arc_length, alpha } => {
                Box::new(ArcLength::new(arc_length, alpha)?)
            }
            IntegratorConfig::Newmark { gamma, beta, dt } => {
                Box::new(Newmark::new(gamma, beta, dt)?)
            }
        })
    }
}

/// Solution algorithm selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Newton {
        #[serde(default)]
        divergence_factor: Option<f64>,
    },
    ModifiedNewton {
        #[serde(default)]
        refresh_every: Option<usize>,
        #[serde(default)]
        divergence_factor: Option<f64>,
    },
    NewtonLineSearch {
        #[serde(default)]
        method: LineSearchMethod,
        #[serde(default = "default_line_search_iterations")]
        max_iterations: usize,
        #[serde(default = "default_line_search_tolerance")]
        tolerance: f64,
        #[serde(default = "default_eta_min")]
        eta_min: f64,
        #[serde(default = "default_eta_max")]
        eta_max: f64,
        #[serde(default)]
        divergence_factor: Option<f64>,
    },
}

fn default_line_search_iterations() -> usize {
    NewtonLineSearch::default().max_iterations
}

fn default_line_search_tolerance() -> f64 {
    NewtonLineSearch::default().tolerance
}

fn default_eta_min() -> f64 {
    NewtonLineSearch::default().eta_min
}

fn default_eta_max() -> f64 {
    NewtonLineSearch::default().eta_max
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        AlgorithmConfig::Newton {
            divergence_factor: None,
        }
    }
}

impl AlgorithmConfig {
    pub fn build(&self) -> Box<dyn SolutionAlgorithm> {
        match *self {
            AlgorithmConfig::Newton { divergence_factor } => Box::new(NewtonRaphson {
                divergence_factor,
            }),
            AlgorithmConfig::ModifiedNewton {
                refresh_every,
                divergence_factor,
            } => {
                let mut mn = ModifiedNewton::new();
                mn.refresh_every = refresh_every.filter(|n| *n > 0);
                mn.divergence_factor = divergence_factor;
                Box::new(mn)
            }
            AlgorithmConfig::NewtonLineSearch {
                method,
                max_iterations,
                tolerance,
                eta_min,
                eta_max,
                divergence_factor,
            } => Box::new(NewtonLineSearch {
                method,
                max_iterations,
                tolerance,
                eta_min,
                eta_max,
                divergence_factor,
            }),
        }
    }
}

/// Convergence test: one criterion, or several combined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub mode: CombineMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    25
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            criteria: vec![Criterion::norm_unbalance(1e-8).relative()],
            mode: CombineMode::All,
            max_iterations: default_max_iterations(),
        }
    }
}

impl TestConfig {
    pub fn build(&self) -> Result<Box<dyn ConvergenceTest>> {
        if let Some(bad) = self.criteria.iter().find(|c| !(c.tolerance >= 0.0)) {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Convergence tolerance must be non-negative, got {}",
                bad.tolerance
            )));
        }
        match self.criteria.as_slice() {
            [] => Err(AnalysisError::InvalidConfiguration(
                "Convergence test needs at least one criterion".into(),
            )),
            [single] => Ok(Box::new(CriterionTest::new(*single, self.max_iterations))),
            many => Ok(Box::new(Combined::new(
                many.to_vec(),
                self.mode,
                self.max_iterations,
            ))),
        }
    }
}

/// One recovery action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryActionConfig {
    ReduceIncrement { factor: f64 },
    SwitchAlgorithm { algorithm: AlgorithmConfig },
}

/// Recovery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default)]
    pub actions: Vec<RecoveryActionConfig>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            actions: vec![RecoveryActionConfig::ReduceIncrement { factor: 0.5 }],
        }
    }
}

impl RecoveryConfig {
    pub fn build(&self) -> Result<RecoveryPolicy> {
        let mut policy = RecoveryPolicy::new(self.max_retries);
        for action in &self.actions {
            policy = policy.then(match action {
                RecoveryActionConfig::ReduceIncrement { factor } => {
                    if !(*factor > 0.0 && *factor < 1.0) {
                        return Err(AnalysisError::InvalidConfiguration(format!(
                            "Increment reduction factor must be in (0, 1), got {factor}"
                        )));
                    }
                    RecoveryAction::ReduceIncrement(*factor)
                }
                RecoveryActionConfig::SwitchAlgorithm { algorithm } => {
                    RecoveryAction::SwitchAlgorithm(algorithm.build())
                }
            });
        }
        Ok(policy)
    }
}

/// Linear solver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    DenseLu,
    SparseCholesky,
}

impl SolverKind {
    pub fn build(&self) -> Box<dyn LinearSolver> {
        match self {
            SolverKind::DenseLu => Box::new(DenseLu::default()),
            SolverKind::SparseCholesky => Box::new(SparseCholesky),
        }
    }
}

/// Complete analysis configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub integrator: IntegratorConfig,
    pub algorithm: AlgorithmConfig,
    pub test: TestConfig,
    pub recovery: RecoveryConfig,
    pub solver: SolverKind,
    /// Compute element contributions in parallel
    pub parallel: bool,
    /// Number of steps run by `analyze` when the caller gives none
    pub steps: Option<usize>,
}

impl AnalysisConfig {
    /// Build a ready-to-run analysis of `model`.
    pub fn build(&self, model: Model) -> Result<Analysis> {
        let ctx = AnalysisContext::new(model)
            .with_solver(self.solver.build())
            .with_parallel(self.parallel);
        let mut analysis = Analysis::with_context(ctx);
        analysis.set_algorithm(self.algorithm.build())?;
        analysis.set_convergence_test(self.test.build()?)?;
        analysis.set_recovery_policy(self.recovery.build()?)?;
        analysis.set_integrator(self.integrator.build()?)?;
        Ok(analysis)
    }
}
