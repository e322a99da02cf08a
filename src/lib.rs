//! Plan execution engine for the operator lifecycle controller.
//!
//! Operators package their day-1 and day-2 procedures as named plans; this
//! crate drives one plan instance from pending to complete, phase by phase,
//! step by step, by rendering parameterized resource templates and applying
//! them to the cluster. One call to [`execute_plan`] is one tick of the
//! outer reconciliation loop: it consumes the active plan and its current
//! status and returns a new status that moves monotonically toward a
//! terminal state across ticks.
//!
//! The engine keeps no state of its own. Everything durable lives in the
//! status tree the caller persists; everything else (cluster client,
//! enhancer, health oracle) is passed in explicitly, as traits, so tests
//! can substitute the doubles in [`testing`].

pub mod client;
pub mod driver;
pub mod enhance;
pub mod errors;
pub mod execute;
pub mod health;
pub mod meta;
pub mod plan;
pub mod prepare;
pub mod render;
pub mod status;
pub mod testing;

pub use client::{ClusterClient, KubeClusterClient};
pub use driver::execute_plan;
pub use enhance::{Enhancer, ResourceEnhancer};
pub use errors::{ClientError, EnhanceError, ExecutionError, RenderError};
pub use health::{DefaultHealthOracle, Health, HealthOracle};
pub use meta::{ExecutionMetadata, StepContext};
pub use plan::{ActivePlan, Phase, Plan, Step, Strategy, Task};
pub use status::{ExecutionStatus, PhaseStatus, PlanStatus, StepStatus};
