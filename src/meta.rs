//! Execution metadata and the conventions stamped onto every emitted
//! resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

/// Label carrying the controller family on every managed resource.
pub const HERITAGE_LABEL: &str = "heritage";
/// Value of [`HERITAGE_LABEL`].
pub const HERITAGE: &str = "kudo";
/// Label carrying the operator name.
pub const OPERATOR_LABEL: &str = "operator";
/// Label carrying the instance name.
pub const INSTANCE_LABEL: &str = "instance";

/// Annotation carrying the plan that produced a resource.
pub const PLAN_ANNOTATION: &str = "plan";
/// Annotation carrying the phase that produced a resource.
pub const PHASE_ANNOTATION: &str = "phase";
/// Annotation carrying the step that produced a resource.
pub const STEP_ANNOTATION: &str = "step";
/// Annotation carrying the operator version that produced a resource.
pub const OPERATOR_VERSION_ANNOTATION: &str = "operatorVersion";

/// Identity of the instance a plan runs against, plus the owner every
/// applied resource is attached to.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub instance_name: String,
    pub instance_namespace: String,
    pub operator_name: String,
    pub operator_version_name: String,
    pub operator_version: String,
    /// Owner wired onto every applied resource with the controller bit set.
    pub resources_owner: OwnerReference,
}

impl ExecutionMetadata {
    /// The deterministic name prefix applied to every emitted resource.
    pub fn name_prefix(&self) -> String {
        format!("{}-", self.instance_name)
    }

    /// The label set applied to every emitted resource.
    pub fn common_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (HERITAGE_LABEL.to_string(), HERITAGE.to_string()),
            (OPERATOR_LABEL.to_string(), self.operator_name.clone()),
            (INSTANCE_LABEL.to_string(), self.instance_name.clone()),
        ])
    }

    /// The annotation set applied to every emitted resource of a step.
    pub fn common_annotations(&self, ctx: &StepContext) -> BTreeMap<String, String> {
        BTreeMap::from([
            (PLAN_ANNOTATION.to_string(), ctx.plan.clone()),
            (PHASE_ANNOTATION.to_string(), ctx.phase.clone()),
            (STEP_ANNOTATION.to_string(), ctx.step.clone()),
            (
                OPERATOR_VERSION_ANNOTATION.to_string(),
                self.operator_version.clone(),
            ),
        ])
    }

    /// The owner reference wired onto emitted resources, controller bit set.
    pub fn controller_owner(&self) -> OwnerReference {
        OwnerReference {
            controller: Some(true),
            block_owner_deletion: Some(true),
            ..self.resources_owner.clone()
        }
    }
}

/// Position of a step within its plan, fed to the renderer and the
/// enhancer so both see the same coordinates.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub plan: String,
    pub phase: String,
    pub step: String,
    /// Zero-based index of the step within its phase.
    pub step_number: usize,
}
