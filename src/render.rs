//! Template rendering.
//!
//! A thin wrapper over handlebars: templates reference instance identity
//! and parameter bindings (`{{Name}}`, `{{Params.REPLICAS}}`, ...) and are
//! expanded against a per-step configuration. Strict mode is on, so any
//! unresolved reference fails the render; render failures are authoring
//! bugs and classified fatal upstream.

use crate::errors::RenderError;
use crate::meta::{ExecutionMetadata, StepContext};
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::BTreeMap;

/// The configuration mapping a template is expanded against.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenderConfig {
    pub operator_name: String,
    pub operator_version: String,
    /// Instance name.
    pub name: String,
    pub namespace: String,
    pub params: BTreeMap<String, String>,
    pub plan_name: String,
    pub phase_name: String,
    pub step_name: String,
    /// Zero-based index of the step within its phase.
    pub step_number: usize,
}

impl RenderConfig {
    /// Build the base configuration shared by every step of a plan run.
    pub fn new(meta: &ExecutionMetadata, params: BTreeMap<String, String>) -> Self {
        Self {
            operator_name: meta.operator_name.clone(),
            operator_version: meta.operator_version.clone(),
            name: meta.instance_name.clone(),
            namespace: meta.instance_namespace.clone(),
            params,
            plan_name: String::new(),
            phase_name: String::new(),
            step_name: String::new(),
            step_number: 0,
        }
    }

    /// Derive the configuration for one concrete step.
    pub fn for_step(&self, ctx: &StepContext) -> Self {
        Self {
            plan_name: ctx.plan.clone(),
            phase_name: ctx.phase.clone(),
            step_name: ctx.step.clone(),
            step_number: ctx.step_number,
            ..self.clone()
        }
    }
}

/// Expands resource templates. Pure; no I/O.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        Self { registry }
    }

    /// Expand one template body against the configuration. `key` names the
    /// template in error messages only.
    pub fn render(
        &self,
        key: &str,
        template: &str,
        config: &RenderConfig,
    ) -> Result<String, RenderError> {
        self.registry
            .render_template(template, config)
            .map_err(|source| RenderError::Expand {
                key: key.to_string(),
                source,
            })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
