//! Step execution: applying one step's objects to the cluster.
//!
//! Apply steps fetch each object and create it when absent, otherwise patch
//! the live object toward the rendered one. Patches always go out; there is
//! no diff-based skip, because the server owns fields the engine cannot
//! cheaply reason about. Delete steps issue foreground deletes and treat
//! not-found as success.

use crate::client::ClusterClient;
use crate::errors::{ClientError, ExecutionError};
use crate::health::{Health, HealthOracle};
use crate::plan::Step;
use crate::status::{ExecutionStatus, StepStatus};
use kube::api::{DynamicObject, Patch, PropagationPolicy};
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Run one step against the cluster, mutating its status node.
///
/// Only steps with work remaining are entered; completed steps are left
/// untouched. The step reaches `Complete` once every resource applied
/// cleanly and passed its health check; with clean applies but lingering
/// unhealthy resources it stays `InProgress` so the outer loop re-invokes.
pub async fn execute_step(
    step: &Step,
    status: &mut StepStatus,
    resources: &[DynamicObject],
    client: &dyn ClusterClient,
    health: &dyn HealthOracle,
) -> Result<(), ExecutionError> {
    if !status.status.is_active() {
        return Ok(());
    }
    status.status = ExecutionStatus::InProgress;

    let mut all_healthy = true;
    for resource in resources {
        let resource_display = display_key(resource);
        if step.delete {
            debug!(resource = %resource_display, step = %step.name, "deleting resource");
            delete_resource(client, resource)
                .await
                .map_err(|source| ExecutionError::ClusterApi {
                    step: step.name.clone(),
                    resource: resource_display,
                    source,
                })?;
            continue;
        }

        debug!(resource = %resource_display, step = %step.name, "applying resource");
        let applied = apply_resource(client, resource).await.map_err(|source| {
            ExecutionError::ClusterApi {
                step: step.name.clone(),
                resource: resource_display.clone(),
                source,
            }
        })?;

        match health.is_healthy(client, &applied).await {
            Ok(Health::Healthy) => {}
            Ok(Health::Unhealthy(reason)) => {
                warn!(resource = %resource_display, step = %step.name, %reason, "resource not healthy yet");
                all_healthy = false;
            }
            Err(source) => {
                return Err(ExecutionError::HealthCheck {
                    step: step.name.clone(),
                    resource: resource_display,
                    source,
                });
            }
        }
    }

    if all_healthy {
        status.status = ExecutionStatus::Complete;
        info!(step = %step.name, "step complete");
    }
    Ok(())
}

/// Create the object when absent, otherwise patch the live object.
/// Returns the object the health check runs against: the created object on
/// the create path, the freshly-fetched live object on the patch path.
async fn apply_resource(
    client: &dyn ClusterClient,
    resource: &DynamicObject,
) -> Result<DynamicObject, ClientError> {
    match client.get(resource).await {
        Ok(existing) => {
            patch_existing(client, resource).await?;
            Ok(existing)
        }
        Err(err) if err.is_not_found() => client.create(resource).await,
        Err(err) => Err(err),
    }
}

/// Strategic merge patch with the rendered object as the body, retried once
/// as a plain merge patch iff the server answers 415. Custom resources do
/// not participate in strategic merge; the fallback covers exactly that.
async fn patch_existing(
    client: &dyn ClusterClient,
    resource: &DynamicObject,
) -> Result<(), ClientError> {
    let body = serde_json::to_value(resource).map_err(|source| ClientError::PatchBody {
        name: resource.name_any(),
        source,
    })?;
    match client.patch(resource, Patch::Strategic(body.clone())).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_unsupported_media_type() => {
            warn!(
                resource = %display_key(resource),
                "strategic merge rejected, retrying with a merge patch"
            );
            client.patch(resource, Patch::Merge(body)).await.map(|_| ())
        }
        Err(err) => Err(err),
    }
}

async fn delete_resource(
    client: &dyn ClusterClient,
    resource: &DynamicObject,
) -> Result<(), ClientError> {
    match client.delete(resource, PropagationPolicy::Foreground).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

/// `kind/namespace/name` for logs and error context.
fn display_key(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("?");
    match obj.namespace() {
        Some(namespace) => format!("{kind}/{namespace}/{}", obj.name_any()),
        None => format!("{kind}/{}", obj.name_any()),
    }
}
