//! Resource preparation: from plan spec to ready-to-apply objects.
//!
//! The preparer walks phases → steps → tasks → template keys, renders every
//! referenced template, and hands each step's rendered group to the
//! enhancer in one call. The whole plan is prepared before the executor
//! touches the cluster, so authoring errors fail fast and never leave a
//! half-applied plan behind.

use crate::enhance::Enhancer;
use crate::errors::ExecutionError;
use crate::meta::{ExecutionMetadata, StepContext};
use crate::plan::ActivePlan;
use crate::render::{RenderConfig, TemplateRenderer};
use crate::status::{ExecutionStatus, PlanStatus};
use indexmap::IndexMap;
use kube::api::DynamicObject;

/// The prepared resource plan: phase → step → objects in application order.
#[derive(Debug, Default)]
pub struct PlanResources {
    phases: IndexMap<String, IndexMap<String, Vec<DynamicObject>>>,
}

impl PlanResources {
    /// The prepared objects of one step. Unknown coordinates resolve to an
    /// empty slice.
    pub fn step_resources(&self, phase: &str, step: &str) -> &[DynamicObject] {
        self.phases
            .get(phase)
            .and_then(|steps| steps.get(step))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Render and enhance every resource of the plan.
///
/// On failure the offending phase and step are marked in `status` so the
/// persisted tree explains where preparation stopped; the returned error
/// carries the classification the driver applies at the top level.
pub fn prepare(
    plan: &ActivePlan,
    meta: &ExecutionMetadata,
    enhancer: &dyn Enhancer,
    status: &mut PlanStatus,
) -> Result<PlanResources, ExecutionError> {
    let renderer = TemplateRenderer::new();
    let base = RenderConfig::new(meta, plan.params.clone());

    let mut resources = PlanResources::default();
    for phase in &plan.plan.phases {
        let mut steps = IndexMap::new();
        for (index, step) in phase.steps.iter().enumerate() {
            let ctx = StepContext {
                plan: plan.name().to_string(),
                phase: phase.name.clone(),
                step: step.name.clone(),
                step_number: index,
            };
            let config = base.for_step(&ctx);

            let mut rendered = IndexMap::new();
            for task_name in &step.tasks {
                let task = match plan.task(task_name) {
                    Some(task) => task,
                    None => {
                        let err = ExecutionError::MissingTask {
                            plan: plan.name().to_string(),
                            phase: phase.name.clone(),
                            step: step.name.clone(),
                            task: task_name.clone(),
                        };
                        mark_failure(status, &phase.name, &step.name, &err);
                        return Err(err);
                    }
                };
                for key in &task.resources {
                    let template = match plan.template(key) {
                        Some(template) => template,
                        None => {
                            let err = ExecutionError::MissingTemplate {
                                plan: plan.name().to_string(),
                                phase: phase.name.clone(),
                                step: step.name.clone(),
                                task: task_name.clone(),
                                key: key.clone(),
                            };
                            mark_failure(status, &phase.name, &step.name, &err);
                            return Err(err);
                        }
                    };
                    match renderer.render(key, template, &config) {
                        Ok(body) => {
                            rendered.insert(key.clone(), body);
                        }
                        Err(source) => {
                            let err = ExecutionError::Render {
                                plan: plan.name().to_string(),
                                phase: phase.name.clone(),
                                step: step.name.clone(),
                                source,
                            };
                            mark_failure(status, &phase.name, &step.name, &err);
                            return Err(err);
                        }
                    }
                }
            }

            match enhancer.apply(&rendered, meta, &ctx) {
                Ok(objects) => {
                    steps.insert(step.name.clone(), objects);
                }
                Err(source) => {
                    let err = ExecutionError::Enhance {
                        plan: plan.name().to_string(),
                        phase: phase.name.clone(),
                        step: step.name.clone(),
                        source,
                    };
                    mark_failure(status, &phase.name, &step.name, &err);
                    return Err(err);
                }
            }
        }
        resources.phases.insert(phase.name.clone(), steps);
    }
    Ok(resources)
}

/// Record a preparation failure on the offending phase and step. The top
/// level is left to the driver, which applies the error's classification.
fn mark_failure(status: &mut PlanStatus, phase: &str, step: &str, err: &ExecutionError) {
    let node = if err.is_fatal() {
        ExecutionStatus::FatalError
    } else {
        ExecutionStatus::Error
    };
    tracing::error!(phase, step, %err, "plan preparation failed");
    if let Some(phase_status) = status.phase_mut(phase) {
        phase_status.status = node;
        if let Some(step_status) = phase_status.step_mut(step) {
            step_status.status = node;
        }
    }
}
