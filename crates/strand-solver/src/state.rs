//! Trial/committed state containers.
//!
//! Every stateful object in a model (elements, the materials embedded in
//! them, and the global [`ModelState`]) follows the same lifecycle:
//!
//! ```text
//!            update()                 commit()
//! committed ─────────► trial ───────────────────► committed'
//!     ▲                  │
//!     └──────────────────┘
//!      revert_to_last_commit()
//! ```
//!
//! [`StateCell`] implements the lifecycle for any `Clone` record so element
//! and material implementations only describe *what* their state is.

use nalgebra::DVector;

/// Uniform commit/revert capability shared by elements, materials and the
/// model state.
pub trait StateLifecycle {
    /// Accept the trial state as the new committed state.
    fn commit_state(&mut self);

    /// Discard the trial state, restoring the last committed state.
    fn revert_to_last_commit(&mut self);

    /// Reset to the pristine state the object was created with.
    fn revert_to_start(&mut self);
}

/// Start, committed and trial copies of a state record.
#[derive(Debug, Clone, PartialEq)]
pub struct StateCell<T: Clone> {
    start: T,
    committed: T,
    trial: T,
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            start: initial.clone(),
            committed: initial.clone(),
            trial: initial,
        }
    }

    pub fn trial(&self) -> &T {
        &self.trial
    }

    pub fn trial_mut(&mut self) -> &mut T {
        &mut self.trial
    }

    pub fn committed(&self) -> &T {
        &self.committed
    }

    /// Replace the trial value.
    pub fn set_trial(&mut self, value: T) {
        self.trial = value;
    }
}

impl<T: Clone> StateLifecycle for StateCell<T> {
    fn commit_state(&mut self) {
        self.committed.clone_from(&self.trial);
    }

    fn revert_to_last_commit(&mut self) {
        self.trial.clone_from(&self.committed);
    }

    fn revert_to_start(&mut self) {
        self.committed.clone_from(&self.start);
        self.trial.clone_from(&self.start);
    }
}

/// Kinematic state of one configuration of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Kinematics {
    pub displacement: DVector<f64>,
    pub velocity: DVector<f64>,
    pub acceleration: DVector<f64>,
    /// Pseudo-time: load factor for static analyses, time for transient ones.
    pub time: f64,
}

impl Kinematics {
    pub fn zeros(num_equations: usize) -> Self {
        Self {
            displacement: DVector::zeros(num_equations),
            velocity: DVector::zeros(num_equations),
            acceleration: DVector::zeros(num_equations),
            time: 0.0,
        }
    }

    pub fn num_equations(&self) -> usize {
        self.displacement.len()
    }
}

/// Global model state, indexed by equation number.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    cell: StateCell<Kinematics>,
}

impl ModelState {
    pub fn new(num_equations: usize) -> Self {
        Self {
            cell: StateCell::new(Kinematics::zeros(num_equations)),
        }
    }

    pub fn num_equations(&self) -> usize {
        self.cell.trial().num_equations()
    }

    pub fn trial(&self) -> &Kinematics {
        self.cell.trial()
    }

    pub fn trial_mut(&mut self) -> &mut Kinematics {
        self.cell.trial_mut()
    }

    pub fn committed(&self) -> &Kinematics {
        self.cell.committed()
    }

    pub fn increment_displacement(&mut self, delta: &DVector<f64>) {
        self.cell.trial_mut().displacement += delta;
    }

    pub fn set_time(&mut self, time: f64) {
        self.cell.trial_mut().time = time;
    }
}

impl Default for ModelState {
    fn default() -> Self {
        ModelState::new(0)
    }
}

impl StateLifecycle for ModelState {
    fn commit_state(&mut self) {
        self.cell.commit_state();
    }

    fn revert_to_last_commit(&mut self) {
        self.cell.revert_to_last_commit();
    }

    fn revert_to_start(&mut self) {
        self.cell.revert_to_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_copies_trial_to_committed() {
        let mut cell = StateCell::new(0.0_f64);
        cell.set_trial(2.5);
        assert_eq!(*cell.committed(), 0.0);
        cell.commit_state();
        assert_eq!(*cell.committed(), 2.5);
        assert_eq!(*cell.trial(), 2.5);
    }

    #[test]
    fn revert_restores_bit_for_bit() {
        let mut cell = StateCell::new(vec![1.0, 2.0]);
        cell.set_trial(vec![0.1 + 0.2, 1.0 / 3.0]);
        cell.commit_state();
        let snapshot = cell.committed().clone();

        for k in 0..5 {
            cell.trial_mut()[0] += k as f64 * 1e-3;
            cell.trial_mut()[1] *= 1.7;
        }
        cell.revert_to_last_commit();

        assert_eq!(cell.trial()[0].to_bits(), snapshot[0].to_bits());
        assert_eq!(cell.trial()[1].to_bits(), snapshot[1].to_bits());
    }

    #[test]
    fn revert_to_start_discards_commits() {
        let mut cell = StateCell::new(1);
        cell.set_trial(5);
        cell.commit_state();
        cell.set_trial(9);
        cell.revert_to_start();
        assert_eq!(*cell.committed(), 1);
        assert_eq!(*cell.trial(), 1);
    }

    #[test]
    fn model_state_reverts_displacement_increments() {
        let mut state = ModelState::new(2);
        state.increment_displacement(&DVector::from_vec(vec![0.5, -1.0]));
        state.commit_state();
        state.increment_displacement(&DVector::from_vec(vec![0.25, 0.0]));
        assert_eq!(state.trial().displacement[0], 0.75);

        state.revert_to_last_commit();
        assert_eq!(state.trial().displacement, state.committed().displacement);
        assert_eq!(state.trial().displacement[1], -1.0);
    }
}
