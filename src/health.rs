//! Health evaluation of applied resources.
//!
//! The engine observes health synchronously, once per invocation, through
//! the [`HealthOracle`] seam; it never polls. Unhealthy is not an error, it
//! means "re-poll later" — the step stays in progress and the outer loop
//! re-invokes on its usual cadence.

use crate::client::ClusterClient;
use crate::errors::ClientError;
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;

/// Result of one health observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Not ready yet; carries the reason for logs and status messages.
    Unhealthy(String),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Health oracle seam.
#[async_trait]
pub trait HealthOracle: Send + Sync {
    /// Evaluate one object. `Err` is an execution error for the step;
    /// `Ok(Unhealthy)` is ordinary not-yet-ready progress.
    async fn is_healthy(
        &self,
        client: &dyn ClusterClient,
        obj: &DynamicObject,
    ) -> Result<Health, ClientError>;
}

/// Health rules for the common workload kinds, read from the object's
/// status fields. Kinds without a rule are healthy by default so the engine
/// never blocks on resources it does not understand.
#[derive(Debug, Default)]
pub struct DefaultHealthOracle;

#[async_trait]
impl HealthOracle for DefaultHealthOracle {
    async fn is_healthy(
        &self,
        _client: &dyn ClusterClient,
        obj: &DynamicObject,
    ) -> Result<Health, ClientError> {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
        let health = match kind {
            "Deployment" | "StatefulSet" | "ReplicaSet" => replicas_ready(obj),
            "Job" => job_succeeded(obj),
            "Pod" => pod_running(obj),
            "PersistentVolumeClaim" => claim_bound(obj),
            _ => Health::Healthy,
        };
        Ok(health)
    }
}

fn int_at(obj: &DynamicObject, pointer: &str) -> Option<i64> {
    obj.data.pointer(pointer).and_then(|value| value.as_i64())
}

fn str_at<'a>(obj: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    obj.data.pointer(pointer).and_then(|value| value.as_str())
}

fn replicas_ready(obj: &DynamicObject) -> Health {
    let desired = int_at(obj, "/spec/replicas").unwrap_or(1);
    let ready = int_at(obj, "/status/readyReplicas").unwrap_or(0);
    // exact equality: during a scale-down a stale readyReplicas can exceed
    // the new desired count while excess pods are still terminating
    if ready == desired {
        Health::Healthy
    } else {
        Health::Unhealthy(format!(
            "{} has {ready}/{desired} ready replicas",
            obj.name_any()
        ))
    }
}

fn job_succeeded(obj: &DynamicObject) -> Health {
    if int_at(obj, "/status/succeeded").unwrap_or(0) > 0 {
        Health::Healthy
    } else {
        Health::Unhealthy(format!("job {} has not succeeded", obj.name_any()))
    }
}

fn pod_running(obj: &DynamicObject) -> Health {
    match str_at(obj, "/status/phase") {
        Some("Running") | Some("Succeeded") => Health::Healthy,
        phase => Health::Unhealthy(format!(
            "pod {} is in phase {}",
            obj.name_any(),
            phase.unwrap_or("unknown")
        )),
    }
}

fn claim_bound(obj: &DynamicObject) -> Health {
    match str_at(obj, "/status/phase") {
        Some("Bound") => Health::Healthy,
        phase => Health::Unhealthy(format!(
            "claim {} is in phase {}",
            obj.name_any(),
            phase.unwrap_or("unknown")
        )),
    }
}
