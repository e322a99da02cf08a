//! Test doubles for the engine's collaborator seams.
//!
//! `FakeClusterClient` is an in-memory cluster with scripted failures and
//! an operation log, `ScriptedHealthOracle` reports health by object key,
//! and `FailingEnhancer` fails every enhancement. They are used by this
//! crate's own test suite and are available to embedders' tests.

use crate::client::ClusterClient;
use crate::enhance::Enhancer;
use crate::errors::{ClientError, EnhanceError};
use crate::health::{Health, HealthOracle};
use crate::meta::{ExecutionMetadata, StepContext};
use async_trait::async_trait;
use indexmap::IndexMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DynamicObject, Patch, PropagationPolicy};
use kube::core::{ErrorResponse, TypeMeta};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// A minimal cluster object for tests.
pub fn test_object(kind: &str, api_version: &str, namespace: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: json!({}),
    }
}

/// Execution metadata for a `kafka` instance in `prod`.
pub fn test_metadata() -> ExecutionMetadata {
    ExecutionMetadata {
        instance_name: "kafka".to_string(),
        instance_namespace: "prod".to_string(),
        operator_name: "kafka-operator".to_string(),
        operator_version_name: "kafka-operator-1.2.0".to_string(),
        operator_version: "1.2.0".to_string(),
        resources_owner: OwnerReference {
            api_version: "kudo.dev/v1beta1".to_string(),
            kind: "Instance".to_string(),
            name: "kafka".to_string(),
            uid: "0000-1111".to_string(),
            ..Default::default()
        },
    }
}

/// One recorded cluster operation, keyed `kind/namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Get(String),
    Create(String),
    PatchStrategic(String),
    PatchMerge(String),
    Delete(String),
}

/// In-memory cluster double with scripted failures.
#[derive(Default)]
pub struct FakeClusterClient {
    objects: Mutex<BTreeMap<String, DynamicObject>>,
    reject_strategic: Mutex<BTreeSet<String>>,
    failures: Mutex<BTreeMap<String, u16>>,
    patch_failures: Mutex<BTreeMap<String, u16>>,
    ops: Mutex<Vec<Op>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// `kind/namespace/name` of an object, the key every script uses.
    pub fn object_key(obj: &DynamicObject) -> String {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("?");
        match obj.namespace() {
            Some(namespace) => format!("{kind}/{namespace}/{}", obj.name_any()),
            None => format!("{kind}/{}", obj.name_any()),
        }
    }

    /// Seed an object as existing cluster state.
    pub fn insert(&self, obj: DynamicObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(Self::object_key(&obj), obj);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// A copy of the stored object, if present.
    pub fn get_object(&self, key: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Answer 415 to strategic merge patches against this key.
    pub fn reject_strategic_patch(&self, key: &str) {
        self.reject_strategic.lock().unwrap().insert(key.to_string());
    }

    /// Fail every operation against this key with the given HTTP code.
    pub fn fail_with(&self, key: &str, code: u16) {
        self.failures.lock().unwrap().insert(key.to_string(), code);
    }

    /// Fail patch operations against this key with the given HTTP code.
    pub fn fail_patches_with(&self, key: &str, code: u16) {
        self.patch_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), code);
    }

    /// Stop failing operations against this key.
    pub fn clear_failure(&self, key: &str) {
        self.failures.lock().unwrap().remove(key);
        self.patch_failures.lock().unwrap().remove(key);
    }

    /// Every operation recorded so far.
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Drain the operation log, for per-tick assertions.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.lock().unwrap())
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn api_error(code: u16) -> ClientError {
        let reason = match code {
            404 => "NotFound",
            409 => "AlreadyExists",
            415 => "UnsupportedMediaType",
            _ => "InternalError",
        };
        ClientError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("scripted {code}"),
            reason: reason.to_string(),
            code,
        }))
    }

    fn scripted_failure(&self, key: &str) -> Result<(), ClientError> {
        match self.failures.lock().unwrap().get(key) {
            Some(code) => Err(Self::api_error(*code)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = Self::object_key(obj);
        self.record(Op::Get(key.clone()));
        self.scripted_failure(&key)?;
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::api_error(404))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = Self::object_key(obj);
        self.record(Op::Create(key.clone()));
        self.scripted_failure(&key)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Self::api_error(409));
        }
        objects.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn patch(
        &self,
        obj: &DynamicObject,
        patch: Patch<Value>,
    ) -> Result<DynamicObject, ClientError> {
        let key = Self::object_key(obj);
        let (op, body) = match patch {
            Patch::Strategic(body) => (Op::PatchStrategic(key.clone()), body),
            Patch::Merge(body) => (Op::PatchMerge(key.clone()), body),
            _ => panic!("unexpected patch variant"),
        };
        let strategic = matches!(op, Op::PatchStrategic(_));
        self.record(op);
        self.scripted_failure(&key)?;
        if let Some(code) = self.patch_failures.lock().unwrap().get(&key) {
            return Err(Self::api_error(*code));
        }
        if strategic && self.reject_strategic.lock().unwrap().contains(&key) {
            return Err(Self::api_error(415));
        }

        let mut objects = self.objects.lock().unwrap();
        let existing = objects.get_mut(&key).ok_or_else(|| Self::api_error(404))?;
        let mut merged = serde_json::to_value(&*existing).unwrap();
        json_merge(&mut merged, &body);
        *existing = serde_json::from_value(merged).unwrap();
        Ok(existing.clone())
    }

    async fn delete(
        &self,
        obj: &DynamicObject,
        _propagation: PropagationPolicy,
    ) -> Result<(), ClientError> {
        let key = Self::object_key(obj);
        self.record(Op::Delete(key.clone()));
        self.scripted_failure(&key)?;
        match self.objects.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(Self::api_error(404)),
        }
    }
}

/// RFC 7386 style merge: objects merge recursively, null removes, anything
/// else replaces.
fn json_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    json_merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Health oracle scripted by object key; unmarked objects are healthy.
#[derive(Default)]
pub struct ScriptedHealthOracle {
    unhealthy: Mutex<BTreeSet<String>>,
}

impl ScriptedHealthOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unhealthy(&self, key: &str) {
        self.unhealthy.lock().unwrap().insert(key.to_string());
    }

    pub fn mark_healthy(&self, key: &str) {
        self.unhealthy.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl HealthOracle for ScriptedHealthOracle {
    async fn is_healthy(
        &self,
        _client: &dyn ClusterClient,
        obj: &DynamicObject,
    ) -> Result<Health, ClientError> {
        let key = FakeClusterClient::object_key(obj);
        if self.unhealthy.lock().unwrap().contains(&key) {
            Ok(Health::Unhealthy(format!("{key} scripted unhealthy")))
        } else {
            Ok(Health::Healthy)
        }
    }
}

/// Enhancer that fails every call.
#[derive(Debug, Default)]
pub struct FailingEnhancer;

impl Enhancer for FailingEnhancer {
    fn apply(
        &self,
        _templates: &IndexMap<String, String>,
        _meta: &ExecutionMetadata,
        _ctx: &StepContext,
    ) -> Result<Vec<DynamicObject>, EnhanceError> {
        Err(EnhanceError::CustomizationBuild {
            reason: "scripted enhancer failure".to_string(),
        })
    }
}
