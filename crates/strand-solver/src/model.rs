//! Model container: nodes, constraints, elements and load patterns.
//!
//! Elements live in an arena (`Vec`) and are addressed by index; nothing in
//! the model holds a reference back to its owner. The model is also the
//! single place where the commit/revert lifecycle is driven, so the step
//! controller can commit or revert everything at once.

use crate::dof::{DofId, DofMapper};
use crate::elements::{Activation, Element};
use crate::error::{AnalysisError, Result};
use crate::state::{ModelState, StateLifecycle};
use log::debug;
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A node of the model
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node ID
    pub id: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Number of DOFs carried by the node
    pub ndof: usize,
    /// Lumped nodal mass per DOF (empty when massless)
    pub mass: Vec<f64>,
}

impl Node {
    pub fn new(id: i32, x: f64, y: f64, z: f64, ndof: usize) -> Self {
        Self {
            id,
            x,
            y,
            z,
            ndof,
            mass: Vec::new(),
        }
    }

    pub fn with_mass(mut self, mass: Vec<f64>) -> Self {
        self.mass = mass;
        self
    }
}

/// Load factor as a function of pseudo-time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeSeries {
    /// f(t) = factor
    Constant { factor: f64 },
    /// f(t) = factor * t
    Linear { factor: f64 },
    /// f(t) = amplitude * sin(2π t / period + phase)
    Trigonometric {
        amplitude: f64,
        period: f64,
        #[serde(default)]
        phase: f64,
    },
}

impl TimeSeries {
    pub fn factor(&self, time: f64) -> f64 {
        match *self {
            TimeSeries::Constant { factor } => factor,
            TimeSeries::Linear { factor } => factor * time,
            TimeSeries::Trigonometric {
                amplitude,
                period,
                phase,
            } => amplitude * (2.0 * std::f64::consts::PI * time / period + phase).sin(),
        }
    }
}

impl Default for TimeSeries {
    fn default() -> Self {
        TimeSeries::Linear { factor: 1.0 }
    }
}

/// A reference nodal load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodalLoad {
    pub dof: DofId,
    pub value: f64,
}

/// Set of nodal loads scaled by a common time series
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadPattern {
    #[serde(default)]
    pub series: TimeSeries,
    pub loads: Vec<NodalLoad>,
}

/// Rayleigh damping C = α_M·M + β_K·K
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RayleighDamping {
    pub alpha_m: f64,
    pub beta_k: f64,
}

#[derive(Debug)]
pub(crate) struct ElementEntry {
    pub(crate) element: Box<dyn Element>,
    pub(crate) activation: Activation,
    /// Activation restored by `revert_to_start`
    pub(crate) scheduled: Activation,
}

/// Finite element model
#[derive(Debug, Default)]
pub struct Model {
    nodes: BTreeMap<i32, Node>,
    constraints: HashSet<DofId>,
    elements: Vec<ElementEntry>,
    element_index: HashMap<i32, usize>,
    patterns: Vec<LoadPattern>,
    rayleigh: RayleighDamping,
    mapper: DofMapper,
    state: ModelState,
    numbered: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(AnalysisError::Model(format!("Duplicate node {}", node.id)));
        }
        if !node.mass.is_empty() && node.mass.len() != node.ndof {
            return Err(AnalysisError::Model(format!(
                "Node {} has {} DOFs but {} mass entries",
                node.id,
                node.ndof,
                node.mass.len()
            )));
        }
        self.nodes.insert(node.id, node);
        self.numbered = false;
        Ok(())
    }

    pub fn node(&self, id: i32) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Fix a DOF (homogeneous constraint).
    pub fn fix(&mut self, dof: DofId) -> Result<()> {
        self.check_dof(dof)?;
        self.constraints.insert(dof);
        self.numbered = false;
        Ok(())
    }

    pub fn add_element(&mut self, element: Box<dyn Element>) -> Result<usize> {
        let id = element.id();
        if self.element_index.contains_key(&id) {
            return Err(AnalysisError::Model(format!("Duplicate element {id}")));
        }
        for &dof in element.dofs() {
            self.check_dof(dof)?;
        }
        let index = self.elements.len();
        self.elements.push(ElementEntry {
            element,
            activation: Activation::Active,
            scheduled: Activation::Active,
        });
        self.element_index.insert(id, index);
        Ok(index)
    }

    pub fn element(&self, id: i32) -> Option<&dyn Element> {
        self.element_index
            .get(&id)
            .map(|&i| self.elements[i].element.as_ref())
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn activation(&self, id: i32) -> Option<Activation> {
        self.element_index
            .get(&id)
            .map(|&i| self.elements[i].activation)
    }

    /// Remove an element over `steps` committed steps by ramping its
    /// contribution down instead of dropping it at once.
    ///
    /// The ramp is part of the model definition: `revert_to_start` restarts
    /// it from factor 1.
    pub fn deactivate_element(&mut self, id: i32, steps: usize) -> Result<()> {
        let &index = self
            .element_index
            .get(&id)
            .ok_or_else(|| AnalysisError::Model(format!("Element {id} not found")))?;
        let activation = if steps == 0 {
            Activation::Inactive
        } else {
            Activation::Deactivating {
                factor: 1.0,
                decrement: 1.0 / steps as f64,
            }
        };
        let entry = &mut self.elements[index];
        entry.activation = activation;
        entry.scheduled = activation;
        Ok(())
    }

    pub fn add_load_pattern(&mut self, pattern: LoadPattern) -> Result<()> {
        for load in &pattern.loads {
            self.check_dof(load.dof)?;
        }
        self.patterns.push(pattern);
        Ok(())
    }

    pub fn set_rayleigh_damping(&mut self, damping: RayleighDamping) {
        self.rayleigh = damping;
    }

    pub fn rayleigh_damping(&self) -> RayleighDamping {
        self.rayleigh
    }

    /// Renumber equations and resize the model state.
    ///
    /// The trial and committed state restart from zero.
    pub fn domain_changed(&mut self) {
        let ndofs: BTreeMap<i32, usize> = self.nodes.values().map(|n| (n.id, n.ndof)).collect();
        self.mapper = DofMapper::number(&ndofs, &self.constraints);
        self.state = ModelState::new(self.mapper.num_equations());
        self.numbered = true;
        debug!(
            "Numbered {} equations ({} constrained DOFs)",
            self.mapper.num_equations(),
            self.constraints.len()
        );
    }

    /// Whether the numbering reflects the current nodes and constraints.
    pub fn is_numbered(&self) -> bool {
        self.numbered
    }

    pub fn mapper(&self) -> &DofMapper {
        &self.mapper
    }

    pub fn num_equations(&self) -> usize {
        self.mapper.num_equations()
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    /// Trial displacement of a DOF (0.0 when constrained).
    pub fn displacement(&self, dof: DofId) -> Result<f64> {
        Ok(self
            .mapper
            .equation(dof)?
            .map_or(0.0, |eq| self.state.trial().displacement[eq]))
    }

    /// Committed displacement of a DOF (0.0 when constrained).
    pub fn committed_displacement(&self, dof: DofId) -> Result<f64> {
        Ok(self
            .mapper
            .equation(dof)?
            .map_or(0.0, |eq| self.state.committed().displacement[eq]))
    }

    /// External load vector at pseudo-time `time`.
    pub fn external_load(&self, time: f64) -> Result<DVector<f64>> {
        let mut p = DVector::zeros(self.num_equations());
        for pattern in &self.patterns {
            let factor = pattern.series.factor(time);
            for load in &pattern.loads {
                if let Some(eq) = self.mapper.equation(load.dof)? {
                    p[eq] += factor * load.value;
                }
            }
        }
        Ok(p)
    }

    /// Reference load: patterns evaluated with a unit factor.
    pub fn reference_load(&self) -> Result<DVector<f64>> {
        let mut p = DVector::zeros(self.num_equations());
        for pattern in &self.patterns {
            for load in &pattern.loads {
                if let Some(eq) = self.mapper.equation(load.dof)? {
                    p[eq] += load.value;
                }
            }
        }
        Ok(p)
    }

    /// Lumped nodal masses, indexed by equation.
    pub fn nodal_mass(&self) -> Result<DVector<f64>> {
        let mut m = DVector::zeros(self.num_equations());
        for node in self.nodes.values() {
            for (dof, &mass) in node.mass.iter().enumerate() {
                if let Some(eq) = self.mapper.equation(DofId::new(node.id, dof))? {
                    m[eq] += mass;
                }
            }
        }
        Ok(m)
    }

    /// Push the trial displacements to every element.
    pub fn update_elements(&mut self, parallel: bool) -> Result<()> {
        let mapper = &self.mapper;
        let displacement = &self.state.trial().displacement;

        let update = |entry: &mut ElementEntry| -> Result<()> {
            let equations = mapper.map_local_to_global(entry.element.dofs())?;
            let local: Vec<f64> = equations
                .iter()
                .map(|eq| eq.map_or(0.0, |e| displacement[e]))
                .collect();
            entry.element.update(&local)
        };

        if parallel {
            self.elements.par_iter_mut().try_for_each(update)
        } else {
            self.elements.iter_mut().try_for_each(update)
        }
    }

    /// Commit the trial state of the model, every element and its materials.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(entry) = self.elements.iter().find(|e| !e.element.trial_converged()) {
            return Err(AnalysisError::StateInconsistency(format!(
                "Element {} reports an unconverged trial state",
                entry.element.id()
            )));
        }
        for entry in &mut self.elements {
            entry.element.commit_state();
            entry.activation = entry.activation.advanced();
        }
        self.state.commit_state();
        Ok(())
    }

    pub fn revert_to_last_commit(&mut self) {
        for entry in &mut self.elements {
            entry.element.revert_to_last_commit();
        }
        self.state.revert_to_last_commit();
    }

    pub fn revert_to_start(&mut self) {
        for entry in &mut self.elements {
            entry.element.revert_to_start();
            entry.activation = entry.scheduled;
        }
        self.state.revert_to_start();
    }

    /// Support reactions at constrained DOFs from the trial resisting forces.
    pub fn reactions(&self) -> BTreeMap<DofId, f64> {
        let mut reactions = BTreeMap::new();
        for entry in self.elements.iter().filter(|e| e.activation.is_active()) {
            let force = entry.element.resisting_force();
            let factor = entry.activation.factor();
            for (i, &dof) in entry.element.dofs().iter().enumerate() {
                if self.mapper.is_constrained(dof) {
                    *reactions.entry(dof).or_insert(0.0) += factor * force[i];
                }
            }
        }
        reactions
    }

    pub(crate) fn entries(&self) -> &[ElementEntry] {
        &self.elements
    }

    fn check_dof(&self, dof: DofId) -> Result<()> {
        match self.nodes.get(&dof.node) {
            Some(node) if dof.dof < node.ndof => Ok(()),
            Some(node) => Err(AnalysisError::Model(format!(
                "Node {} has {} DOFs, DOF {} requested",
                node.id, node.ndof, dof.dof
            ))),
            None => Err(AnalysisError::Model(format!("Node {} not found", dof.node))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::Spring;
    use crate::materials::Elastic;
    use approx::assert_relative_eq;

    fn spring_model() -> Model {
        let mut model = Model::new();
        model.add_node(Node::new(1, 0.0, 0.0, 0.0, 1)).unwrap();
        model.add_node(Node::new(2, 1.0, 0.0, 0.0, 1)).unwrap();
        model.fix(DofId::new(1, 0)).unwrap();
        model
            .add_element(Box::new(Spring::between(
                1,
                DofId::new(1, 0),
                DofId::new(2, 0),
                Box::new(Elastic::new(100.0).unwrap()),
            )))
            .unwrap();
        model
            .add_load_pattern(LoadPattern {
                series: TimeSeries::Linear { factor: 1.0 },
                loads: vec![NodalLoad {
                    dof: DofId::new(2, 0),
                    value: 10.0,
                }],
            })
            .unwrap();
        model.domain_changed();
        model
    }

    #[test]
    fn time_series_factors() {
        assert_eq!(TimeSeries::Constant { factor: 2.0 }.factor(7.0), 2.0);
        assert_eq!(TimeSeries::Linear { factor: 2.0 }.factor(3.0), 6.0);
        let trig = TimeSeries::Trigonometric {
            amplitude: 1.0,
            period: 4.0,
            phase: 0.0,
        };
        assert_relative_eq!(trig.factor(1.0), 1.0);
    }

    #[test]
    fn rejects_unknown_dofs() {
        let mut model = spring_model();
        assert!(model.fix(DofId::new(5, 0)).is_err());
        assert!(model.fix(DofId::new(1, 3)).is_err());
        assert!(model.add_node(Node::new(1, 0.0, 0.0, 0.0, 1)).is_err());
    }

    #[test]
    fn loads_are_scaled_by_series() {
        let model = spring_model();
        assert_eq!(model.num_equations(), 1);
        assert_relative_eq!(model.external_load(0.5).unwrap()[0], 5.0);
        assert_relative_eq!(model.reference_load().unwrap()[0], 10.0);
    }

    #[test]
    fn commit_and_revert_drive_elements() {
        let mut model = spring_model();
        model
            .state_mut()
            .increment_displacement(&DVector::from_vec(vec![0.1]));
        model.update_elements(false).unwrap();
        model.commit().unwrap();
        assert_relative_eq!(model.committed_displacement(DofId::new(2, 0)).unwrap(), 0.1);

        model
            .state_mut()
            .increment_displacement(&DVector::from_vec(vec![0.4]));
        model.update_elements(true).unwrap();
        model.revert_to_last_commit();
        assert_relative_eq!(model.displacement(DofId::new(2, 0)).unwrap(), 0.1);

        model.update_elements(false).unwrap();
        let reactions = model.reactions();
        assert_relative_eq!(reactions[&DofId::new(1, 0)], -10.0);
    }

    #[test]
    fn staged_deactivation_advances_on_commit() {
        let mut model = spring_model();
        model.deactivate_element(1, 2).unwrap();
        model.commit().unwrap();
        assert_eq!(
            model.activation(1),
            Some(Activation::Deactivating {
                factor: 0.5,
                decrement: 0.5
            })
        );
        model.commit().unwrap();
        assert_eq!(model.activation(1), Some(Activation::Inactive));
    }

    #[test]
    fn revert_to_start_restarts_deactivation_ramp() {
        let mut model = spring_model();
        model.deactivate_element(1, 2).unwrap();
        model.commit().unwrap();
        model.commit().unwrap();
        assert_eq!(model.activation(1), Some(Activation::Inactive));

        model.revert_to_start();
        assert_eq!(
            model.activation(1),
            Some(Activation::Deactivating {
                factor: 1.0,
                decrement: 0.5
            })
        );
    }
}
