//! Execution status tree for plan runs.
//!
//! The status tree mirrors the plan shape (plan → phases → steps) and is the
//! only durable state the engine produces. The outer reconciliation loop
//! persists it into the instance status and hands it back on the next tick;
//! progress across ticks comes from this tree mutating monotonically toward
//! a terminal state.

use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution state of a plan, phase, or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Started and not finished; re-entered on the next tick.
    InProgress,
    /// Finished. Terminal: a complete node is never revisited.
    Complete,
    /// A recoverable failure was observed; re-entered on the next tick.
    Error,
    /// An authoring bug was detected. Terminal: do not retry until the
    /// operator definition changes.
    FatalError,
}

impl ExecutionStatus {
    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::FatalError)
    }

    /// Check if work remains here. `Error` counts: a recoverable failure is
    /// retried on the outer loop's cadence until it completes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Error)
    }

    /// Check if this status is `Complete`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Status of one plan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatus {
    /// Plan name.
    pub name: String,
    /// Aggregate status of the run.
    pub status: ExecutionStatus,
    /// Human-readable context for the last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When `status` last changed value. Identical ticks leave it untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// One entry per phase declared in the plan, in declared order.
    pub phases: Vec<PhaseStatus>,
}

/// Status of one phase within a plan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub name: String,
    pub status: ExecutionStatus,
    /// One entry per step declared in the phase, in declared order.
    pub steps: Vec<StepStatus>,
}

/// Status of one step within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub name: String,
    pub status: ExecutionStatus,
}

impl PlanStatus {
    /// Create a pending status tree mirroring the plan's shape.
    pub fn new(plan: &Plan) -> Self {
        Self {
            name: plan.name.clone(),
            status: ExecutionStatus::Pending,
            message: None,
            last_updated: None,
            phases: plan
                .phases
                .iter()
                .map(|phase| PhaseStatus {
                    name: phase.name.clone(),
                    status: ExecutionStatus::Pending,
                    steps: phase
                        .steps
                        .iter()
                        .map(|step| StepStatus {
                            name: step.name.clone(),
                            status: ExecutionStatus::Pending,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Set the aggregate status, moving the timestamp only on an actual
    /// change so back-to-back identical ticks produce identical trees.
    pub fn set_at(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.last_updated = Some(now);
        }
    }

    /// Set the aggregate status together with a message.
    pub fn set_with_message_at(
        &mut self,
        status: ExecutionStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.set_at(status, now);
        self.message = Some(message.into());
    }

    /// Look up the status node for a phase.
    pub fn phase(&self, name: &str) -> Option<&PhaseStatus> {
        self.phases.iter().find(|phase| phase.name == name)
    }

    /// Look up the mutable status node for a phase.
    pub fn phase_mut(&mut self, name: &str) -> Option<&mut PhaseStatus> {
        self.phases.iter_mut().find(|phase| phase.name == name)
    }
}

impl PhaseStatus {
    /// Look up the status node for a step.
    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Look up the mutable status node for a step.
    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepStatus> {
        self.steps.iter_mut().find(|step| step.name == name)
    }
}
