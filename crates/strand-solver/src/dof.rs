//! Equation numbering.
//!
//! Maps every nodal degree of freedom to an equation number of the global
//! system. Constrained DOFs receive no equation.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Degree of freedom identifier (0-based DOF index at a node)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DofId {
    /// Node ID
    pub node: i32,
    /// DOF index (0 = X, 1 = Y, 2 = Z, 3+ for rotations)
    pub dof: usize,
}

impl DofId {
    pub fn new(node: i32, dof: usize) -> Self {
        Self { node, dof }
    }
}

/// Plain numberer: equations follow node-id order, then local DOF order.
#[derive(Debug, Clone, Default)]
pub struct DofMapper {
    equations: HashMap<DofId, Option<usize>>,
    dof_of_equation: Vec<DofId>,
}

impl DofMapper {
    /// Number the DOFs of `nodes` (node id → DOF count), skipping `constrained`.
    pub fn number(nodes: &BTreeMap<i32, usize>, constrained: &HashSet<DofId>) -> Self {
        let mut equations = HashMap::new();
        let mut dof_of_equation = Vec::new();

        for (&node, &ndof) in nodes {
            for dof in 0..ndof {
                let id = DofId::new(node, dof);
                if constrained.contains(&id) {
                    equations.insert(id, None);
                } else {
                    equations.insert(id, Some(dof_of_equation.len()));
                    dof_of_equation.push(id);
                }
            }
        }

        Self {
            equations,
            dof_of_equation,
        }
    }

    pub fn num_equations(&self) -> usize {
        self.dof_of_equation.len()
    }

    /// Equation of a DOF: `Ok(None)` when constrained, error when unknown.
    pub fn equation(&self, dof: DofId) -> Result<Option<usize>> {
        self.equations.get(&dof).copied().ok_or_else(|| {
            AnalysisError::Model(format!(
                "DOF {} of node {} does not exist",
                dof.dof, dof.node
            ))
        })
    }

    /// Equation numbers for an element's DOF list, in the same order.
    pub fn map_local_to_global(&self, dofs: &[DofId]) -> Result<Vec<Option<usize>>> {
        dofs.iter().map(|&dof| self.equation(dof)).collect()
    }

    /// DOF owning an equation.
    pub fn dof_of(&self, equation: usize) -> Option<DofId> {
        self.dof_of_equation.get(equation).copied()
    }

    pub fn is_constrained(&self, dof: DofId) -> bool {
        matches!(self.equations.get(&dof), Some(None))
    }
}
