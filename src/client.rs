//! Cluster client seam.
//!
//! The engine speaks to the cluster through the narrow [`ClusterClient`]
//! trait so tests can substitute an in-memory double. The single production
//! implementation wraps a `kube::Client` and derives the dynamic API for
//! each object from its own type metadata and namespace. Request timeouts
//! and authentication belong to the wrapped client.

use crate::errors::ClientError;
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams, PropagationPolicy,
};
use kube::ResourceExt;

/// Cluster CRUD as the engine consumes it.
///
/// `patch` carries the body and the media type together: the strategic
/// variant goes out as `application/strategic-merge-patch+json`, the merge
/// variant as `application/merge-patch+json`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch the live object with the same kind, namespace, and name.
    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Create the object.
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Patch the live object toward `obj` with the given patch.
    async fn patch(
        &self,
        obj: &DynamicObject,
        patch: Patch<serde_json::Value>,
    ) -> Result<DynamicObject, ClientError>;

    /// Delete the object with the given propagation policy.
    async fn delete(
        &self,
        obj: &DynamicObject,
        propagation: PropagationPolicy,
    ) -> Result<(), ClientError>;
}

/// Derive the API resource coordinates of an object from its type metadata.
/// The resource plural is inferred from the kind; operators with irregular
/// plurals must name their templates' kinds the way the server serves them.
fn api_resource(obj: &DynamicObject) -> Result<ApiResource, ClientError> {
    let name = obj.name_any();
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| ClientError::MissingTypeMeta { name: name.clone() })?;
    if types.api_version.is_empty() || types.kind.is_empty() {
        return Err(ClientError::InvalidApiVersion {
            name,
            api_version: types.api_version.clone(),
        });
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(ApiResource::from_gvk(&GroupVersionKind::gvk(
        group,
        version,
        &types.kind,
    )))
}

/// Production client backed by `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api_for(&self, obj: &DynamicObject) -> Result<Api<DynamicObject>, ClientError> {
        let resource = api_resource(obj)?;
        Ok(match obj.namespace() {
            Some(namespace) => Api::namespaced_with(self.client.clone(), &namespace, &resource),
            None => Api::default_namespaced_with(self.client.clone(), &resource),
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let api = self.api_for(obj)?;
        Ok(api.get(&obj.name_any()).await?)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let api = self.api_for(obj)?;
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn patch(
        &self,
        obj: &DynamicObject,
        patch: Patch<serde_json::Value>,
    ) -> Result<DynamicObject, ClientError> {
        let api = self.api_for(obj)?;
        Ok(api
            .patch(&obj.name_any(), &PatchParams::default(), &patch)
            .await?)
    }

    async fn delete(
        &self,
        obj: &DynamicObject,
        propagation: PropagationPolicy,
    ) -> Result<(), ClientError> {
        let api = self.api_for(obj)?;
        let params = DeleteParams {
            propagation_policy: Some(propagation),
            ..Default::default()
        };
        api.delete(&obj.name_any(), &params).await?;
        Ok(())
    }
}
