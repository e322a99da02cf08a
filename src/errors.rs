//! Typed error hierarchy for the plan execution engine.
//!
//! Four enums cover the four failure surfaces:
//! - `RenderError` — template expansion failures
//! - `EnhanceError` — convention enhancement failures
//! - `ClientError` — cluster API failures, with the predicates the step
//!   executor dispatches on
//! - `ExecutionError` — everything the engine itself returns, carrying the
//!   plan/phase/step/resource context of the failure
//!
//! `ExecutionError::is_fatal` is the single classification point: fatal
//! errors are authoring bugs that must not be retried, everything else is
//! retried by the outer reconciliation loop on its usual cadence.

use thiserror::Error;

/// Errors from expanding a single resource template.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to expand template {key}: {source}")]
    Expand {
        key: String,
        #[source]
        source: handlebars::RenderError,
    },
}

/// Errors from the convention enhancer.
#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("failed to prepare the scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("failed to write {name} into the scratch directory: {source}")]
    TemplateWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build the customization: {reason}")]
    CustomizationBuild { reason: String },

    #[error("failed to parse rendered template {name} as YAML: {source}")]
    YamlParse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot set the controller owner on {kind}/{name}: already controlled by {existing}")]
    OwnerReference {
        kind: String,
        name: String,
        existing: String,
    },
}

/// Errors from the cluster client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error("object {name} carries no type metadata")]
    MissingTypeMeta { name: String },

    #[error("object {name} has an unparseable apiVersion {api_version:?}")]
    InvalidApiVersion { name: String, api_version: String },

    #[error("failed to serialize {name} into a patch body: {source}")]
    PatchBody {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    fn code(&self) -> Option<u16> {
        match self {
            ClientError::Api(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// The target object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    /// The server rejected the patch media type. Custom resources do not
    /// participate in strategic merge and answer 415 to it.
    pub fn is_unsupported_media_type(&self) -> bool {
        self.code() == Some(415)
    }
}

/// Errors returned by the engine, one variant per failure class.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("plan {plan}, step {step} of phase {phase}: task {task} is not in the task catalog")]
    MissingTask {
        plan: String,
        phase: String,
        step: String,
        task: String,
    },

    #[error(
        "plan {plan}, step {step} of phase {phase}: template {key} of task {task} is not in the template catalog"
    )]
    MissingTemplate {
        plan: String,
        phase: String,
        step: String,
        task: String,
        key: String,
    },

    #[error("plan {plan}, step {step} of phase {phase}: {source}")]
    Render {
        plan: String,
        phase: String,
        step: String,
        #[source]
        source: RenderError,
    },

    #[error("plan {plan}, step {step} of phase {phase}: {source}")]
    Enhance {
        plan: String,
        phase: String,
        step: String,
        #[source]
        source: EnhanceError,
    },

    #[error("plan {plan}: no status node for {node}")]
    MissingStatus { plan: String, node: String },

    #[error("step {step}, resource {resource}: {source}")]
    ClusterApi {
        step: String,
        resource: String,
        #[source]
        source: ClientError,
    },

    #[error("step {step}: health evaluation of {resource} failed: {source}")]
    HealthCheck {
        step: String,
        resource: String,
        #[source]
        source: ClientError,
    },
}

impl ExecutionError {
    /// Fatal errors are authoring bugs. The outer loop must not retry them
    /// until the operator definition changes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::MissingTask { .. }
                | ExecutionError::MissingTemplate { .. }
                | ExecutionError::Render { .. }
                | ExecutionError::Enhance { .. }
                | ExecutionError::MissingStatus { .. }
        )
    }
}
