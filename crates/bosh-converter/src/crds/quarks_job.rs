//! `QuarksJob` Custom Resource Definition for errands and gathering jobs

use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A job run on demand or once, optionally persisting container output as secrets.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "quarks.cloudfoundry.org", version = "v1alpha1", kind = "QuarksJob")]
#[kube(namespaced)]
#[kube(shortname = "qjob")]
#[serde(rename_all = "camelCase")]
pub struct QuarksJobSpec {
    pub trigger: Trigger,

    pub template: JobTemplateSpec,

    /// Secrets written from the containers' output files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,

    /// Re-run when referenced secrets or config maps change
    #[serde(default)]
    pub update_on_config_change: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct Trigger {
    pub strategy: TriggerStrategy,
}

/// When a quarks job runs
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStrategy {
    /// Only when explicitly triggered (errands)
    Manual,
    /// Once, right after creation (auto-errands)
    Once,
}

impl Trigger {
    pub fn manual() -> Self {
        Trigger {
            strategy: TriggerStrategy::Manual,
        }
    }

    pub fn once() -> Self {
        Trigger {
            strategy: TriggerStrategy::Once,
        }
    }
}

/// Container output persisted by the quarks job controller
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Container name -> output file name -> secret name
    pub output_map: BTreeMap<String, BTreeMap<String, String>>,

    /// Format of the output files
    #[serde(default = "default_output_type")]
    pub output_type: String,

    #[serde(default)]
    pub secret_labels: BTreeMap<String, String>,

    /// Append `-v<N>` to the secret names, keeping older versions
    #[serde(default)]
    pub versioned: bool,
}

fn default_output_type() -> String {
    "json".to_string()
}
