//! Plan data model: the named procedures an operator packages and the
//! catalogs they reference.
//!
//! A plan is a directed tree: plan → phases → steps → task references →
//! template keys. Catalog entries may be aliased by several steps; the
//! engine walks by reference lookup, never by graph traversal, so cycles
//! cannot occur by construction.

use crate::status::PlanStatus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the steps of a phase are scheduled across ticks.
///
/// `Serial` stops the tick at the first unfinished step; `Parallel` gives
/// every step of the phase its tick so they advance independently. Neither
/// spawns concurrent work within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Serial,
    Parallel,
}

/// A named operator procedure: an ordered list of phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub phases: Vec<Phase>,
}

/// An ordered group of steps with an execution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    pub steps: Vec<Step>,
}

/// A unit of apply or delete work referencing one or more tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// When set, the step removes its resources instead of creating them.
    #[serde(default)]
    pub delete: bool,
    /// Names of tasks in the task catalog, in application order.
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// A named bundle of resource template references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Keys into the template catalog, in application order.
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Everything one engine invocation consumes for a single plan run: the
/// plan spec, its current status, the task and template catalogs of the
/// operator version, and the resolved parameter bindings.
#[derive(Debug, Clone)]
pub struct ActivePlan {
    pub plan: Plan,
    pub status: PlanStatus,
    /// Task catalog of the operator version.
    pub tasks: Vec<Task>,
    /// Template catalog: resource key → unrendered template body.
    pub templates: IndexMap<String, String>,
    /// Parameter bindings, resolved by the outer loop before invocation.
    pub params: BTreeMap<String, String>,
}

impl ActivePlan {
    /// The plan's name.
    pub fn name(&self) -> &str {
        &self.plan.name
    }

    /// Look up a task in the task catalog.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Look up a template body in the template catalog.
    pub fn template(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_deserializes_from_yaml_with_defaults() {
        let yaml = r#"
name: deploy
phases:
  - name: main
    steps:
      - name: srv
        tasks: [app]
  - name: cleanup
    strategy: parallel
    steps:
      - name: drop
        delete: true
"#;
        let plan: Plan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.name, "deploy");
        assert_eq!(plan.phases[0].strategy, Strategy::Serial);
        assert_eq!(plan.phases[1].strategy, Strategy::Parallel);
        assert!(!plan.phases[0].steps[0].delete);
        assert!(plan.phases[1].steps[0].delete);
        assert!(plan.phases[1].steps[0].tasks.is_empty());
    }

    #[test]
    fn catalog_lookups_resolve_by_name() {
        let plan = ActivePlan {
            plan: Plan {
                name: "deploy".to_string(),
                phases: vec![],
            },
            status: PlanStatus::new(&Plan {
                name: "deploy".to_string(),
                phases: vec![],
            }),
            tasks: vec![Task {
                name: "app".to_string(),
                resources: vec!["deployment.yaml".to_string()],
            }],
            templates: IndexMap::from([(
                "deployment.yaml".to_string(),
                "kind: Deployment".to_string(),
            )]),
            params: BTreeMap::new(),
        };

        assert!(plan.task("app").is_some());
        assert!(plan.task("ghost").is_none());
        assert_eq!(plan.template("deployment.yaml"), Some("kind: Deployment"));
        assert!(plan.template("ghost.yaml").is_none());
    }
}
