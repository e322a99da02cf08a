//! Convention enhancement of rendered templates.
//!
//! One enhancer call covers one step's whole template group: the rendered
//! bodies are placed into a scratch directory, a customization descriptor
//! is synthesized next to them, and the customization pass turns the group
//! into parsed cluster objects stamped with the canonical labels,
//! annotations, name prefix, and namespace, each wired to the controlling
//! owner. The scratch directory is scoped to the call and released on every
//! exit path.

use crate::errors::EnhanceError;
use crate::meta::{ExecutionMetadata, StepContext};
use indexmap::IndexMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Enhancer seam: turns one step's rendered templates into cluster objects
/// carrying the conventions.
pub trait Enhancer: Send + Sync {
    fn apply(
        &self,
        templates: &IndexMap<String, String>,
        meta: &ExecutionMetadata,
        ctx: &StepContext,
    ) -> Result<Vec<DynamicObject>, EnhanceError>;
}

/// The customization descriptor synthesized for one template group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub name_prefix: String,
    pub namespace: String,
    pub common_labels: BTreeMap<String, String>,
    pub common_annotations: BTreeMap<String, String>,
    /// File names of the group's templates, in application order.
    pub resources: Vec<String>,
    pub generator_options: GeneratorOptions,
}

/// Generator options; emitted names must be deterministic, so the suffix
/// hash is always disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    pub disable_name_suffix_hash: bool,
}

impl Customization {
    fn new(meta: &ExecutionMetadata, ctx: &StepContext) -> Self {
        Self {
            name_prefix: meta.name_prefix(),
            namespace: meta.instance_namespace.clone(),
            common_labels: meta.common_labels(),
            common_annotations: meta.common_annotations(ctx),
            resources: Vec::new(),
            generator_options: GeneratorOptions {
                disable_name_suffix_hash: true,
            },
        }
    }

    /// Load every listed resource file from `dir`, parse it, and apply the
    /// conventions. Output order is resource-list order, then document
    /// order within a file.
    fn run(&self, dir: &Path) -> Result<Vec<Value>, EnhanceError> {
        let mut documents = Vec::new();
        for file in &self.resources {
            let contents = fs::read_to_string(dir.join(file)).map_err(|err| {
                EnhanceError::CustomizationBuild {
                    reason: format!("resource {file} is not readable: {err}"),
                }
            })?;
            for document in serde_yaml::Deserializer::from_str(&contents) {
                let value = serde_yaml::Value::deserialize(document).map_err(|source| {
                    EnhanceError::YamlParse {
                        name: file.clone(),
                        source,
                    }
                })?;
                if value.is_null() {
                    continue;
                }
                let value =
                    serde_json::to_value(&value).map_err(|err| EnhanceError::CustomizationBuild {
                        reason: format!("resource {file} does not describe an object: {err}"),
                    })?;
                for item in flatten(value) {
                    documents.push(self.transform(item, file)?);
                }
            }
        }
        Ok(documents)
    }

    /// Stamp the conventions onto one document.
    fn transform(&self, mut value: Value, file: &str) -> Result<Value, EnhanceError> {
        let build_error = |reason: String| EnhanceError::CustomizationBuild { reason };

        let object = value
            .as_object_mut()
            .ok_or_else(|| build_error(format!("{file}: document is not an object")))?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| build_error(format!("{file}: document has no kind")))?;
        if object.get("apiVersion").and_then(Value::as_str).is_none() {
            return Err(build_error(format!("{file}: {kind} has no apiVersion")));
        }

        let metadata = object
            .entry("metadata")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| build_error(format!("{file}: {kind} metadata is not a mapping")))?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| build_error(format!("{file}: {kind} has no metadata.name")))?;

        metadata.insert(
            "name".to_string(),
            json!(format!("{}{name}", self.name_prefix)),
        );
        metadata.insert("namespace".to_string(), json!(self.namespace));
        merge_string_map(metadata, "labels", &self.common_labels)
            .map_err(|reason| build_error(format!("{file}: {kind} {reason}")))?;
        merge_string_map(metadata, "annotations", &self.common_annotations)
            .map_err(|reason| build_error(format!("{file}: {kind} {reason}")))?;

        Ok(value)
    }
}

/// Unfold `*List` kinds into their items; anything else passes through.
fn flatten(value: Value) -> Vec<Value> {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"));
    if is_list {
        if let Some(Value::Array(items)) = value.get("items") {
            return items.clone();
        }
    }
    vec![value]
}

fn merge_string_map(
    metadata: &mut serde_json::Map<String, Value>,
    field: &str,
    entries: &BTreeMap<String, String>,
) -> Result<(), String> {
    let target = metadata
        .entry(field)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| format!("{field} is not a mapping"))?;
    for (key, value) in entries {
        target.insert(key.clone(), json!(value));
    }
    Ok(())
}

/// Production enhancer.
#[derive(Debug, Default)]
pub struct ResourceEnhancer;

impl Enhancer for ResourceEnhancer {
    fn apply(
        &self,
        templates: &IndexMap<String, String>,
        meta: &ExecutionMetadata,
        ctx: &StepContext,
    ) -> Result<Vec<DynamicObject>, EnhanceError> {
        // TempDir removal on drop covers the error paths below.
        let scratch = tempfile::tempdir().map_err(EnhanceError::Scratch)?;

        let mut customization = Customization::new(meta, ctx);
        for (key, body) in templates {
            let file = file_name(key);
            fs::write(scratch.path().join(&file), body).map_err(|source| {
                EnhanceError::TemplateWrite {
                    name: file.clone(),
                    source,
                }
            })?;
            customization.resources.push(file);
        }

        let descriptor = serde_yaml::to_string(&customization).map_err(|err| {
            EnhanceError::CustomizationBuild {
                reason: format!("descriptor serialization failed: {err}"),
            }
        })?;
        fs::write(scratch.path().join("kustomization.yaml"), descriptor).map_err(|source| {
            EnhanceError::TemplateWrite {
                name: "kustomization.yaml".to_string(),
                source,
            }
        })?;

        let owner = meta.controller_owner();
        let mut objects = Vec::new();
        for document in customization.run(scratch.path())? {
            let mut obj: DynamicObject =
                serde_json::from_value(document).map_err(|err| EnhanceError::CustomizationBuild {
                    reason: format!("customized document is not a cluster object: {err}"),
                })?;
            set_controller_owner(&mut obj, &owner)?;
            tracing::debug!(
                kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or(""),
                name = %obj.metadata.name.as_deref().unwrap_or(""),
                step = %ctx.step,
                "enhanced resource"
            );
            objects.push(obj);
        }
        Ok(objects)
    }
}

/// Stable scratch file name for a template key.
fn file_name(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

/// Wire the controlling owner onto an object. An object that is already
/// controlled by someone else cannot be adopted.
fn set_controller_owner(
    obj: &mut DynamicObject,
    owner: &OwnerReference,
) -> Result<(), EnhanceError> {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let name = obj.metadata.name.clone().unwrap_or_default();
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);

    if let Some(existing) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(EnhanceError::OwnerReference {
            kind,
            name,
            existing: existing.name.clone(),
        });
    }
    if let Some(current) = refs.iter_mut().find(|r| r.uid == owner.uid) {
        *current = owner.clone();
    } else {
        refs.push(owner.clone());
    }
    Ok(())
}
