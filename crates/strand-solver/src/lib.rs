//! Incremental-iterative solution core for nonlinear structural analysis.
//!
//! A [`Model`] owns nodes, elements and their trial/committed state. An
//! [`Analysis`] advances it step by step: the [`Integrator`] predicts the
//! increment and owns the load path, the [`SolutionAlgorithm`] iterates on
//! the equilibrium equations until the [`ConvergenceTest`] is satisfied, and
//! converged steps are committed. Failed steps are reverted and retried
//! according to a [`RecoveryPolicy`].

pub mod algorithm;
pub mod analysis;
pub mod assembler;
pub mod backend;
pub mod config;
pub mod convergence;
pub mod dof;
pub mod elements;
pub mod error;
pub mod integrator;
pub mod materials;
pub mod model;
pub mod problem;
pub mod state;

pub use algorithm::{
    AlgorithmReport, LineSearchMethod, ModifiedNewton, NewtonLineSearch, NewtonRaphson,
    SolutionAlgorithm, StepStatus,
};
pub use analysis::{
    Analysis, AnalysisContext, AnalysisState, RecoveryAction, RecoveryPolicy, StepReport,
};
pub use assembler::{Assembler, MatrixCoefficients};
pub use backend::{DenseLu, Factorization, LinearSolver, SparseCholesky, default_backend};
pub use config::AnalysisConfig;
pub use convergence::{
    CombineMode, Combined, ConvergenceRecord, ConvergenceTest, Criterion, CriterionTest, Measure,
    NormType,
};
pub use dof::{DofId, DofMapper};
pub use elements::{Element, Spring, Truss, TrussGeometry};
pub use error::{AnalysisError, Result};
pub use integrator::{
    AdaptiveIncrement, ArcLength, DisplacementControl, Integrator, LoadControl, LoadPath, Newmark,
    NewmarkStability,
};
pub use materials::{Bilinear, Elastic, UniaxialMaterial};
pub use model::{LoadPattern, Model, NodalLoad, Node, RayleighDamping, TimeSeries};
pub use problem::ProblemDefinition;
pub use state::{Kinematics, ModelState, StateCell, StateLifecycle};
