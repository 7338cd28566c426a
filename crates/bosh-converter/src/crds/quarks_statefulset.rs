//! `QuarksStatefulSet` Custom Resource Definition for service instance groups

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A stateful set spread across availability zones.
///
/// The quarks-statefulset controller creates one `StatefulSet` per zone from
/// `template` and labels each pod with its zone index and ordinal.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "quarks.cloudfoundry.org",
    version = "v1alpha1",
    kind = "QuarksStatefulSet"
)]
#[kube(namespaced)]
#[kube(shortname = "qsts")]
#[serde(rename_all = "camelCase")]
pub struct QuarksStatefulSetSpec {
    /// Roll pods when referenced secrets or config maps change
    #[serde(default)]
    pub update_on_config_change: bool,

    /// Availability zones; empty means a single, zone-less stateful set
    #[serde(default)]
    pub zones: Vec<String>,

    pub template: StatefulSet,
}
