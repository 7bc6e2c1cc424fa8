//! Error types for strand-solver

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Iteration budget exhausted; the step controller may retry.
    #[error("Step {step} failed to converge after {iterations} iterations")]
    ConvergenceFailure { step: usize, iterations: usize },

    /// The linear solver could not factor the tangent.
    #[error("Singular system: {0}")]
    SingularSystem(String),

    /// Rejected configuration. Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal invariant violation, fatal for the run.
    #[error("State inconsistency: {0}")]
    StateInconsistency(String),

    #[error("Invalid model: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    /// Whether the step controller may attempt a recovery action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ConvergenceFailure { .. } | AnalysisError::SingularSystem(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_convergence_and_singular_are_recoverable() {
        assert!(AnalysisError::ConvergenceFailure { step: 1, iterations: 3 }.is_recoverable());
        assert!(AnalysisError::SingularSystem("zero pivot".into()).is_recoverable());
        assert!(!AnalysisError::InvalidConfiguration("beta".into()).is_recoverable());
        assert!(!AnalysisError::StateInconsistency("commit".into()).is_recoverable());
    }

    #[test]
    fn messages_carry_context() {
        let err = AnalysisError::ConvergenceFailure { step: 4, iterations: 25 };
        assert_eq!(
            err.to_string(),
            "Step 4 failed to converge after 25 iterations"
        );
    }
}
