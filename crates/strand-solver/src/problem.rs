//! JSON problem definition: model plus analysis configuration.
//!
//! ```json
//! {
//!   "nodes": [ { "id": 1, "ndof": 1 }, { "id": 2, "x": 1.0, "ndof": 1 } ],
//!   "fixes": [ { "node": 1, "dof": 0 } ],
//!   "materials": [ { "id": 1, "type": "elastic", "modulus": 100.0 } ],
//!   "elements": [ { "type": "spring", "id": 1, "from": { "node": 1, "dof": 0 },
//!                   "to": { "node": 2, "dof": 0 }, "material": 1 } ],
//!   "load_patterns": [ { "loads": [ { "dof": { "node": 2, "dof": 0 }, "value": 10.0 } ] } ],
//!   "analysis": { "integrator": { "type": "load_control", "increment": 1.0 } }
//! }
//! ```

use crate::analysis::Analysis;
use crate::config::AnalysisConfig;
use crate::dof::DofId;
use crate::elements::{Spring, Truss, TrussGeometry};
use crate::error::{AnalysisError, Result};
use crate::materials::{Bilinear, Elastic, UniaxialMaterial};
use crate::model::{LoadPattern, Model, Node, RayleighDamping};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: i32,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    pub ndof: usize,
    #[serde(default)]
    pub mass: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterialKind {
    Elastic {
        modulus: f64,
    },
    Bilinear {
        modulus: f64,
        yield_stress: f64,
        #[serde(default)]
        hardening: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialDef {
    pub id: i32,
    #[serde(flatten)]
    pub kind: MaterialKind,
}

impl MaterialKind {
    /// A fresh material instance (every element owns its own state).
    pub fn instantiate(&self) -> Result<Box<dyn UniaxialMaterial>> {
        Ok(match *self {
            MaterialKind::Elastic { modulus } => Box::new(Elastic::new(modulus)?),
            MaterialKind::Bilinear {
                modulus,
                yield_stress,
                hardening,
            } => Box::new(Bilinear::new(modulus, yield_stress, hardening)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDef {
    /// Spring between two DOFs, or from `from` to ground when `to` is absent
    Spring {
        id: i32,
        from: DofId,
        #[serde(default)]
        to: Option<DofId>,
        material: i32,
    },
    Truss {
        id: i32,
        nodes: [i32; 2],
        area: f64,
        material: i32,
        #[serde(default)]
        corotational: bool,
        #[serde(default)]
        density: f64,
    },
}

/// Element staged out of the model over a number of committed steps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeactivationDef {
    pub element: i32,
    #[serde(default)]
    pub steps: usize,
}

/// Complete problem: model definition and analysis configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProblemDefinition {
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub fixes: Vec<DofId>,
    #[serde(default)]
    pub materials: Vec<MaterialDef>,
    #[serde(default)]
    pub elements: Vec<ElementDef>,
    #[serde(default)]
    pub load_patterns: Vec<LoadPattern>,
    #[serde(default)]
    pub rayleigh: Option<RayleighDamping>,
    #[serde(default)]
    pub deactivations: Vec<DeactivationDef>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl ProblemDefinition {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build and number the model.
    pub fn build_model(&self) -> Result<Model> {
        let mut model = Model::new();
        for n in &self.nodes {
            model.add_node(Node::new(n.id, n.x, n.y, n.z, n.ndof).with_mass(n.mass.clone()))?;
        }
        for &dof in &self.fixes {
            model.fix(dof)?;
        }

        let mut materials = HashMap::new();
        for m in &self.materials {
            if materials.insert(m.id, m.kind).is_some() {
                return Err(AnalysisError::Model(format!("Duplicate material {}", m.id)));
            }
        }
        let material = |id: i32| -> Result<Box<dyn UniaxialMaterial>> {
            materials
                .get(&id)
                .ok_or_else(|| AnalysisError::Model(format!("Material {id} not found")))?
                .instantiate()
        };

        for e in &self.elements {
            match e {
                ElementDef::Spring {
                    id,
                    from,
                    to,
                    material: mat,
                } => {
                    let spring = match to {
                        Some(to) => Spring::between(*id, *from, *to, material(*mat)?),
                        None => Spring::grounded(*id, *from, material(*mat)?),
                    };
                    model.add_element(Box::new(spring))?;
                }
                ElementDef::Truss {
                    id,
                    nodes,
                    area,
                    material: mat,
                    corotational,
                    density,
                } => {
                    let end = |node: i32| -> Result<(i32, f64, f64)> {
                        let n = model
                            .node(node)
                            .ok_or_else(|| AnalysisError::Model(format!("Node {node} not found")))?;
                        Ok((node, n.x, n.y))
                    };
                    let geometry = if *corotational {
                        TrussGeometry::Corotational
                    } else {
                        TrussGeometry::Linear
                    };
                    let truss = Truss::new(
                        *id,
                        [end(nodes[0])?, end(nodes[1])?],
                        *area,
                        material(*mat)?,
                        geometry,
                    )?
                    .with_density(*density);
                    model.add_element(Box::new(truss))?;
                }
            }
        }

        for pattern in &self.load_patterns {
            model.add_load_pattern(pattern.clone())?;
        }
        if let Some(damping) = self.rayleigh {
            model.set_rayleigh_damping(damping);
        }
        for d in &self.deactivations {
            model.deactivate_element(d.element, d.steps)?;
        }
        model.domain_changed();
        Ok(model)
    }

    /// Build the model and a configured analysis of it.
    pub fn build_analysis(&self) -> Result<Analysis> {
        self.analysis.build(self.build_model()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SPRING: &str = r#"{
        "nodes": [ { "id": 1, "ndof": 1 }, { "id": 2, "x": 1.0, "ndof": 1 } ],
        "fixes": [ { "node": 1, "dof": 0 } ],
        "materials": [ { "id": 7, "type": "elastic", "modulus": 100.0 } ],
        "elements": [ { "type": "spring", "id": 1, "from": { "node": 1, "dof": 0 },
                        "to": { "node": 2, "dof": 0 }, "material": 7 } ],
        "load_patterns": [ { "loads": [ { "dof": { "node": 2, "dof": 0 }, "value": 10.0 } ] } ],
        "analysis": { "integrator": { "type": "load_control", "increment": 1.0 } }
    }"#;

    #[test]
    fn builds_and_runs_spring_problem() {
        let problem = ProblemDefinition::from_json_str(SPRING).unwrap();
        let mut analysis = problem.build_analysis().unwrap();
        let reports = analysis.analyze(2).unwrap();
        assert_eq!(reports.len(), 2);
        assert_relative_eq!(
            analysis
                .model()
                .committed_displacement(DofId::new(2, 0))
                .unwrap(),
            0.2
        );
    }

    #[test]
    fn round_trips_through_json() {
        let problem = ProblemDefinition::from_json_str(SPRING).unwrap();
        let again = ProblemDefinition::from_json_str(&problem.to_json().unwrap()).unwrap();
        assert_eq!(problem, again);
    }

    #[test]
    fn unknown_material_is_a_model_error() {
        let json = SPRING.replace("\"material\": 7", "\"material\": 8");
        let problem = ProblemDefinition::from_json_str(&json).unwrap();
        assert!(matches!(problem.build_model(), Err(AnalysisError::Model(_))));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            ProblemDefinition::from_json_str("{ nodes: }"),
            Err(AnalysisError::Json(_))
        ));
    }

    #[test]
    fn truss_problem_uses_node_coordinates() {
        let json = r#"{
            "nodes": [ { "id": 1, "ndof": 2 }, { "id": 2, "x": 3.0, "y": 4.0, "ndof": 2 } ],
            "fixes": [ { "node": 1, "dof": 0 }, { "node": 1, "dof": 1 } ],
            "materials": [ { "id": 1, "type": "bilinear", "modulus": 1000.0, "yield_stress": 50.0 } ],
            "elements": [ { "type": "truss", "id": 1, "nodes": [1, 2], "area": 0.1,
                            "material": 1, "corotational": true } ]
        }"#;
        let model = ProblemDefinition::from_json_str(json)
            .unwrap()
            .build_model()
            .unwrap();
        assert_eq!(model.num_equations(), 2);
        assert_eq!(model.num_elements(), 1);
    }
}
