//! The plan driver: one reconciliation tick over an active plan.
//!
//! A tick prepares the whole resource plan up front, then walks the status
//! tree phase by phase, step by step, executing whatever work remains.
//! Phases are serial with respect to each other; step scheduling within a
//! phase follows its strategy. The driver mutates a working copy of the
//! status and returns it in every outcome, so the caller can persist how
//! far the run got even when the tick failed.

use crate::client::ClusterClient;
use crate::enhance::Enhancer;
use crate::errors::ExecutionError;
use crate::execute::execute_step;
use crate::health::HealthOracle;
use crate::meta::ExecutionMetadata;
use crate::plan::{ActivePlan, Strategy};
use crate::prepare::prepare;
use crate::status::{ExecutionStatus, PlanStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Run one tick of the plan.
///
/// Repeated invocation with an unchanged spec and an unchanged cluster
/// returns an identical status; the outer loop re-invokes until the status
/// reaches a terminal state. The returned status is always the working
/// copy, also when an error is returned alongside it.
pub async fn execute_plan(
    plan: &ActivePlan,
    meta: &ExecutionMetadata,
    client: &dyn ClusterClient,
    enhancer: &dyn Enhancer,
    health: &dyn HealthOracle,
    now: DateTime<Utc>,
) -> (PlanStatus, Option<ExecutionError>) {
    if plan.status.status.is_terminal() {
        debug!(plan = %plan.name(), status = ?plan.status.status, "plan is terminal, nothing to do");
        return (plan.status.clone(), None);
    }

    let mut status = plan.status.clone();

    // Authoring errors surface here, before any cluster mutation.
    let resources = match prepare(plan, meta, enhancer, &mut status) {
        Ok(resources) => resources,
        Err(err) => {
            let level = if err.is_fatal() {
                ExecutionStatus::FatalError
            } else {
                ExecutionStatus::Error
            };
            status.set_with_message_at(level, err.to_string(), now);
            return (status, Some(err));
        }
    };

    let mut all_phases_complete = true;
    for phase in &plan.plan.phases {
        let Some(index) = status.phases.iter().position(|p| p.name == phase.name) else {
            let err = ExecutionError::MissingStatus {
                plan: plan.name().to_string(),
                node: format!("phase {}", phase.name),
            };
            status.set_with_message_at(ExecutionStatus::FatalError, err.to_string(), now);
            return (status, Some(err));
        };

        let current = status.phases[index].status;
        if current.is_active() {
            status.set_at(ExecutionStatus::InProgress, now);

            let phase_status = &mut status.phases[index];
            phase_status.status = ExecutionStatus::InProgress;

            let mut all_steps_healthy = true;
            let mut failure = None;
            for step in &phase.steps {
                let Some(step_status) = phase_status.step_mut(&step.name) else {
                    failure = Some(ExecutionError::MissingStatus {
                        plan: plan.name().to_string(),
                        node: format!("step {} of phase {}", step.name, phase.name),
                    });
                    break;
                };
                let step_resources = resources.step_resources(&phase.name, &step.name);
                match execute_step(step, step_status, step_resources, client, health).await {
                    Err(err) => {
                        step_status.status = if err.is_fatal() {
                            ExecutionStatus::FatalError
                        } else {
                            ExecutionStatus::Error
                        };
                        failure = Some(err);
                        break;
                    }
                    Ok(()) => {
                        if !step_status.status.is_complete() {
                            all_steps_healthy = false;
                            // a Serial phase never advances past unfinished work;
                            // a Parallel phase gives every step its tick
                            if phase.strategy == Strategy::Serial {
                                break;
                            }
                        }
                    }
                }
            }

            let failure = match failure {
                Some(err) => {
                    phase_status.status = if err.is_fatal() {
                        ExecutionStatus::FatalError
                    } else {
                        ExecutionStatus::Error
                    };
                    Some(err)
                }
                None => {
                    if all_steps_healthy {
                        phase_status.status = ExecutionStatus::Complete;
                        info!(plan = %plan.name(), phase = %phase.name, "phase complete");
                    }
                    None
                }
            };
            if let Some(err) = failure {
                status.message = Some(err.to_string());
                if err.is_fatal() {
                    status.set_at(ExecutionStatus::FatalError, now);
                }
                return (status, Some(err));
            }
        }

        // phases are serial: stop at the first one that is not complete
        if !status.phases[index].status.is_complete() {
            all_phases_complete = false;
            break;
        }
    }

    if all_phases_complete {
        status.set_at(ExecutionStatus::Complete, now);
        status.message = None;
        info!(plan = %plan.name(), "plan complete");
    }
    (status, None)
}
