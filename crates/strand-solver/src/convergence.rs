//! Convergence tests for the equilibrium iterations of one step.
//!
//! # Criteria
//!
//! - **NormUnbalance**: ‖R‖ ≤ tol, or ‖R‖ ≤ tol·‖R₀‖ when relative
//! - **NormDispIncr**: ‖ΔU‖ ≤ tol, or relative to the first increment
//! - **EnergyIncr**: ½|ΔU·R| ≤ tol, or relative to the first energy
//!
//! Relative criteria fall back to the absolute tolerance when their
//! reference value is zero (e.g. a step without any unbalance).
//!
//! # Iteration budget
//!
//! Iterations are counted from 1. An iteration past `max_iterations` fails
//! regardless of the norms, so a budget of 0 always fails. Reaching the
//! budget without satisfying the criteria fails as well.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Vector norm used by a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormType {
    #[default]
    Euclidean,
    Max,
}

impl NormType {
    pub fn apply(&self, v: &DVector<f64>) -> f64 {
        match self {
            NormType::Euclidean => v.norm(),
            NormType::Max => v.amax(),
        }
    }
}

/// Quantity a criterion measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    NormUnbalance,
    NormDispIncr,
    EnergyIncr,
}

/// How multiple criteria are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Every criterion must be satisfied
    #[default]
    All,
    /// One satisfied criterion is enough
    Any,
}

/// A single convergence criterion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub measure: Measure,
    pub tolerance: f64,
    #[serde(default)]
    pub relative: bool,
    #[serde(default)]
    pub norm: NormType,
}

impl Criterion {
    pub fn norm_unbalance(tolerance: f64) -> Self {
        Self {
            measure: Measure::NormUnbalance,
            tolerance,
            relative: false,
            norm: NormType::Euclidean,
        }
    }

    pub fn norm_disp_incr(tolerance: f64) -> Self {
        Self {
            measure: Measure::NormDispIncr,
            ..Self::norm_unbalance(tolerance)
        }
    }

    pub fn energy_incr(tolerance: f64) -> Self {
        Self {
            measure: Measure::EnergyIncr,
            ..Self::norm_unbalance(tolerance)
        }
    }

    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }

    pub fn with_norm(mut self, norm: NormType) -> Self {
        self.norm = norm;
        self
    }

    /// Value of the measured quantity for one iteration.
    pub fn evaluate(&self, input: &TestInput<'_>) -> f64 {
        match self.measure {
            Measure::NormUnbalance => self.norm.apply(input.unbalance),
            Measure::NormDispIncr => self.norm.apply(input.increment),
            Measure::EnergyIncr => 0.5 * input.increment.dot(input.rhs).abs(),
        }
    }

    fn initial_reference(&self, initial_unbalance: &DVector<f64>) -> Option<f64> {
        match self.measure {
            Measure::NormUnbalance => Some(self.norm.apply(initial_unbalance)),
            Measure::NormDispIncr | Measure::EnergyIncr => None,
        }
    }

    fn satisfied(&self, value: f64, reference: &mut Option<f64>) -> bool {
        if !value.is_finite() {
            return false;
        }
        if !self.relative {
            return value <= self.tolerance;
        }
        let reference = *reference.get_or_insert(value);
        if reference > 0.0 {
            value <= self.tolerance * reference
        } else {
            value <= self.tolerance
        }
    }
}

/// Quantities available to a test after one iteration
#[derive(Debug, Clone, Copy)]
pub struct TestInput<'a> {
    /// Unbalance after applying the correction
    pub unbalance: &'a DVector<f64>,
    /// Right-hand side the correction was solved against
    pub rhs: &'a DVector<f64>,
    /// Correction applied in this iteration
    pub increment: &'a DVector<f64>,
    /// Iteration number, starting at 1
    pub iteration: usize,
}

/// Outcome of testing one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Continue,
    Converged,
    Failed,
}

/// Per-step convergence history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceRecord {
    pub iterations: usize,
    /// Unbalance norm at the start of the step
    pub initial_unbalance: f64,
    /// Unbalance norm after each iteration
    pub unbalance_norms: Vec<f64>,
    /// Value of the (first) criterion after each iteration
    pub values: Vec<f64>,
}

impl ConvergenceRecord {
    pub fn last_unbalance(&self) -> f64 {
        self.unbalance_norms
            .last()
            .copied()
            .unwrap_or(self.initial_unbalance)
    }
}

/// Decides when the equilibrium iterations of a step have converged.
pub trait ConvergenceTest: Debug + Send {
    /// Reset for a new step.
    fn start(&mut self, initial_unbalance: &DVector<f64>);

    fn test(&mut self, input: &TestInput<'_>) -> TestOutcome;

    fn max_iterations(&self) -> usize;

    fn record(&self) -> &ConvergenceRecord;
}

fn budget_outcome(converged: bool, iteration: usize, max_iterations: usize) -> TestOutcome {
    if iteration > max_iterations {
        TestOutcome::Failed
    } else if converged {
        TestOutcome::Converged
    } else if iteration >= max_iterations {
        TestOutcome::Failed
    } else {
        TestOutcome::Continue
    }
}

/// Test with one criterion
#[derive(Debug, Clone)]
pub struct CriterionTest {
    criterion: Criterion,
    max_iterations: usize,
    reference: Option<f64>,
    record: ConvergenceRecord,
}

impl CriterionTest {
    pub fn new(criterion: Criterion, max_iterations: usize) -> Self {
        Self {
            criterion,
            max_iterations,
            reference: None,
            record: ConvergenceRecord::default(),
        }
    }

    pub fn criterion(&self) -> &Criterion {
        &self.criterion
    }
}

impl Default for CriterionTest {
    fn default() -> Self {
        Self::new(Criterion::norm_unbalance(1e-8).relative(), 25)
    }
}

impl ConvergenceTest for CriterionTest {
    fn start(&mut self, initial_unbalance: &DVector<f64>) {
        self.reference = self.criterion.initial_reference(initial_unbalance);
        self.record = ConvergenceRecord {
            initial_unbalance: initial_unbalance.norm(),
            ..Default::default()
        };
    }

    fn test(&mut self, input: &TestInput<'_>) -> TestOutcome {
        let value = self.criterion.evaluate(input);
        self.record.iterations = input.iteration;
        self.record.unbalance_norms.push(input.unbalance.norm());
        self.record.values.push(value);

        let converged = self.criterion.satisfied(value, &mut self.reference);
        budget_outcome(converged, input.iteration, self.max_iterations)
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn record(&self) -> &ConvergenceRecord {
        &self.record
    }
}

/// Several criteria combined with AND / OR semantics
#[derive(Debug, Clone)]
pub struct Combined {
    criteria: Vec<Criterion>,
    references: Vec<Option<f64>>,
    mode: CombineMode,
    max_iterations: usize,
    record: ConvergenceRecord,
}

impl Combined {
    pub fn new(criteria: Vec<Criterion>, mode: CombineMode, max_iterations: usize) -> Self {
        let references = vec![None; criteria.len()];
        Self {
            criteria,
            references,
            mode,
            max_iterations,
            record: ConvergenceRecord::default(),
        }
    }
}

impl ConvergenceTest for Combined {
    fn start(&mut self, initial_unbalance: &DVector<f64>) {
        self.references = self
            .criteria
            .iter()
            .map(|c| c.initial_reference(initial_unbalance))
            .collect();
        self.record = ConvergenceRecord {
            initial_unbalance: initial_unbalance.norm(),
            ..Default::default()
        };
    }

    fn test(&mut self, input: &TestInput<'_>) -> TestOutcome {
        let mut satisfied = Vec::with_capacity(self.criteria.len());
        for (criterion, reference) in self.criteria.iter().zip(self.references.iter_mut()) {
            let value = criterion.evaluate(input);
            satisfied.push(criterion.satisfied(value, reference));
        }
        self.record.iterations = input.iteration;
        self.record.unbalance_norms.push(input.unbalance.norm());
        if let Some(first) = self.criteria.first() {
            self.record.values.push(first.evaluate(input));
        }

        let converged = !satisfied.is_empty()
            && match self.mode {
                CombineMode::All => satisfied.iter().all(|s| *s),
                CombineMode::Any => satisfied.iter().any(|s| *s),
            };
        budget_outcome(converged, input.iteration, self.max_iterations)
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn record(&self) -> &ConvergenceRecord {
        &self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    fn input<'a>(
        unbalance: &'a DVector<f64>,
        rhs: &'a DVector<f64>,
        increment: &'a DVector<f64>,
        iteration: usize,
    ) -> TestInput<'a> {
        TestInput {
            unbalance,
            rhs,
            increment,
            iteration,
        }
    }

    #[test]
    fn relative_unbalance_uses_first_norm() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1e-3).relative(), 10);
        test.start(&v(&[100.0]));
        let rhs = v(&[100.0]);
        let dx = v(&[1.0]);

        let r = v(&[0.5]);
        assert_eq!(test.test(&input(&r, &rhs, &dx, 1)), TestOutcome::Continue);
        let r = v(&[0.05]);
        assert_eq!(test.test(&input(&r, &rhs, &dx, 2)), TestOutcome::Converged);
        assert_eq!(test.record().iterations, 2);
        assert_eq!(test.record().unbalance_norms, vec![0.5, 0.05]);
    }

    #[test]
    fn zero_budget_always_fails() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1.0), 0);
        let zero = v(&[0.0]);
        test.start(&zero);
        assert_eq!(test.test(&input(&zero, &zero, &zero, 1)), TestOutcome::Failed);
    }

    #[test]
    fn budget_exhaustion_fails() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1e-12), 2);
        let r = v(&[1.0]);
        test.start(&r);
        assert_eq!(test.test(&input(&r, &r, &r, 1)), TestOutcome::Continue);
        assert_eq!(test.test(&input(&r, &r, &r, 2)), TestOutcome::Failed);
    }

    #[test]
    fn converging_on_last_allowed_iteration_counts() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1e-6), 1);
        let r0 = v(&[1.0]);
        test.start(&r0);
        let r = v(&[0.0]);
        assert_eq!(test.test(&input(&r, &r0, &r0, 1)), TestOutcome::Converged);
    }

    #[test]
    fn displacement_increment_relative_to_first() {
        let mut test = CriterionTest::new(Criterion::norm_disp_incr(1e-2).relative(), 10);
        let r = v(&[1.0, 1.0]);
        test.start(&r);
        let first = v(&[3.0, 4.0]);
        assert_eq!(test.test(&input(&r, &r, &first, 1)), TestOutcome::Continue);
        let second = v(&[0.03, 0.04]);
        assert_eq!(test.test(&input(&r, &r, &second, 2)), TestOutcome::Converged);
    }

    #[test]
    fn energy_is_half_abs_work() {
        let c = Criterion::energy_incr(1.0);
        let r = v(&[0.0]);
        let rhs = v(&[2.0, -4.0]);
        let dx = v(&[1.0, 1.0]);
        assert_eq!(c.evaluate(&input(&r, &rhs, &dx, 1)), 1.0);
    }

    #[test]
    fn max_norm_is_largest_component() {
        let c = Criterion::norm_unbalance(1.0).with_norm(NormType::Max);
        let r = v(&[0.5, -3.0, 2.0]);
        assert_eq!(c.evaluate(&input(&r, &r, &r, 1)), 3.0);
    }

    #[test]
    fn relative_with_zero_reference_is_absolute() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1e-8).relative(), 5);
        let zero = v(&[0.0]);
        test.start(&zero);
        assert_eq!(test.test(&input(&zero, &zero, &zero, 1)), TestOutcome::Converged);
    }

    #[test]
    fn combined_all_and_any() {
        let criteria = vec![Criterion::norm_unbalance(1e-6), Criterion::norm_disp_incr(1e-6)];
        let r = v(&[0.0]);
        let dx = v(&[1.0]);

        let mut all = Combined::new(criteria.clone(), CombineMode::All, 5);
        all.start(&dx);
        assert_eq!(all.test(&input(&r, &r, &dx, 1)), TestOutcome::Continue);

        let mut any = Combined::new(criteria, CombineMode::Any, 5);
        any.start(&dx);
        assert_eq!(any.test(&input(&r, &r, &dx, 1)), TestOutcome::Converged);
    }

    #[test]
    fn non_finite_norm_never_converges() {
        let mut test = CriterionTest::new(Criterion::norm_unbalance(1.0), 3);
        let r = v(&[f64::NAN]);
        test.start(&v(&[1.0]));
        assert_eq!(test.test(&input(&r, &r, &r, 1)), TestOutcome::Continue);
    }
}
