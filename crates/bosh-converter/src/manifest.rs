//! Resolved BOSH deployment manifest model.
//!
//! The manifest handed to the compiler has ops files applied and variables
//! interpolated. Only the parts the compiler reads are typed; arbitrary job
//! properties are kept as raw YAML.

use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{Affinity, EnvVar, LocalObjectReference, Probe, Toleration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A BOSH deployment manifest
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Manifest {
    /// Deployment name
    pub name: String,

    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,

    #[serde(default)]
    pub releases: Vec<Release>,

    #[serde(default)]
    pub stemcells: Vec<Stemcell>,

    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Manifest {
    /// Parse a manifest from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|ig| ig.name == name)
    }

    pub fn release(&self, name: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.name == name)
    }

    /// Stemcell for an instance group: the aliased one, or the only one declared.
    fn stemcell_for(&self, instance_group: &InstanceGroup) -> Option<&Stemcell> {
        match &instance_group.stemcell {
            Some(alias) => self.stemcells.iter().find(|s| &s.alias == alias),
            None => self.stemcells.first(),
        }
    }
}

/// Resolves the container image a job's release is packaged in.
#[cfg_attr(test, mockall::automock)]
pub trait ReleaseImageProvider {
    fn release_image(&self, instance_group: &str, job: &str) -> Result<String>;
}

impl ReleaseImageProvider for Manifest {
    /// `<url>/<release>:<stemcell-os>-<stemcell-version>-<release-version>`
    fn release_image(&self, instance_group: &str, job: &str) -> Result<String> {
        let lookup_failed = |reason: String| Error::ReleaseImageLookupFailed {
            instance_group: instance_group.to_string(),
            job: job.to_string(),
            reason,
        };

        let ig = self
            .instance_group(instance_group)
            .ok_or_else(|| lookup_failed("instance group not found".to_string()))?;
        let job = ig
            .jobs
            .iter()
            .find(|j| j.name == job)
            .ok_or_else(|| lookup_failed("job not found in instance group".to_string()))?;
        let release = self
            .release(&job.release)
            .ok_or_else(|| lookup_failed(format!("release '{}' not found", job.release)))?;
        let url = release
            .url
            .as_deref()
            .ok_or_else(|| lookup_failed(format!("release '{}' has no url", release.name)))?;

        let (os, stemcell_version) = match &release.stemcell {
            Some(stemcell) => (stemcell.os.as_str(), stemcell.version.as_str()),
            None => {
                let stemcell = self
                    .stemcell_for(ig)
                    .ok_or_else(|| lookup_failed("no stemcell declared".to_string()))?;
                (stemcell.os.as_str(), stemcell.version.as_str())
            }
        };

        Ok(format!(
            "{}/{}:{}-{}-{}",
            url.trim_end_matches('/'),
            release.name,
            os,
            stemcell_version,
            release.version
        ))
    }
}

/// A release referenced by the deployment
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub version: String,
    /// Registry the release image is pulled from
    #[serde(default)]
    pub url: Option<String>,
    /// Stemcell the release image was built on, overrides the deployment stemcell
    #[serde(default)]
    pub stemcell: Option<ReleaseStemcell>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReleaseStemcell {
    pub os: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Stemcell {
    pub alias: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub version: String,
}

/// How pods of an instance group are run
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Lifecycle {
    /// Long running, backed by a stateful set
    #[default]
    Service,
    /// Run once when triggered
    Errand,
    /// Run once automatically
    AutoErrand,
}

impl TryFrom<String> for Lifecycle {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "" | "service" => Ok(Lifecycle::Service),
            "errand" => Ok(Lifecycle::Errand),
            "auto-errand" => Ok(Lifecycle::AutoErrand),
            other => Err(format!("unknown lifecycle '{other}'")),
        }
    }
}

impl From<Lifecycle> for String {
    fn from(value: Lifecycle) -> Self {
        match value {
            Lifecycle::Service => "service",
            Lifecycle::Errand => "errand",
            Lifecycle::AutoErrand => "auto-errand",
        }
        .to_string()
    }
}

/// A named group of identical instances
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct InstanceGroup {
    pub name: String,

    #[serde(default)]
    pub lifecycle: Lifecycle,

    #[serde(default)]
    pub instances: usize,

    #[serde(default)]
    pub azs: Vec<String>,

    #[serde(default)]
    pub jobs: Vec<Job>,

    /// Persistent disk size in MiB
    #[serde(default)]
    pub persistent_disk: Option<u64>,

    /// Storage class of the persistent disk
    #[serde(default)]
    pub persistent_disk_type: Option<String>,

    /// Stemcell alias
    #[serde(default)]
    pub stemcell: Option<String>,

    #[serde(default)]
    pub env: AgentEnv,
}

impl InstanceGroup {
    /// Kubernetes specific settings from `env.bosh.agent.settings`
    pub fn settings(&self) -> &AgentSettings {
        &self.env.bosh.agent.settings
    }

    /// Persistent disk size in MiB, if one is declared
    pub fn persistent_disk_size(&self) -> Option<u64> {
        self.persistent_disk.filter(|size| *size > 0)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentEnv {
    #[serde(default)]
    pub bosh: BoshEnv,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BoshEnv {
    #[serde(default)]
    pub agent: Agent,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Agent {
    #[serde(default)]
    pub settings: AgentSettings,
}

/// Pod level settings carried through the BOSH agent env
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub affinity: Option<Affinity>,

    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    #[serde(default)]
    pub service_account_name: Option<String>,

    #[serde(default)]
    pub automount_service_account_token: Option<bool>,

    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Environment every run container starts from
    #[serde(default)]
    pub env: Vec<EnvVar>,

    #[serde(default, alias = "disable_log_sidecar")]
    pub disable_log_sidecar: bool,
}

/// A job of an instance group
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Job {
    pub name: String,
    pub release: String,
    #[serde(default)]
    pub properties: JobProperties,
}

impl Job {
    pub fn quarks(&self) -> &QuarksProperties {
        &self.properties.quarks
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct JobProperties {
    #[serde(default)]
    pub quarks: QuarksProperties,

    /// Job properties consumed by the job's templates
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_yaml::Value>,
}

/// Kubernetes specific job settings (`properties.quarks`)
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct QuarksProperties {
    #[serde(default)]
    pub ports: Vec<Port>,

    #[serde(default)]
    pub run: RunConfig,

    /// Environment overrides applied to every process of the job
    #[serde(default)]
    pub envs: Vec<EnvVar>,

    /// Keep failed pre-start containers alive for inspection
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RunConfig {
    /// Probes keyed by process name
    #[serde(default)]
    pub healthcheck: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct HealthCheck {
    #[serde(default)]
    pub readiness: Option<Probe>,
    #[serde(default)]
    pub liveness: Option<Probe>,
}

/// A port a job listens on
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub internal: i32,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// A value generated for the deployment (password, certificate, ...)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub options: Option<VariableOptions>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Password,
    Certificate,
    Ssh,
    Rsa,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VariableOptions {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub alternative_names: Vec<String>,
    #[serde(default)]
    pub is_ca: bool,
    /// Name of the variable holding the signing CA
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub extended_key_usage: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: cf
releases:
- name: redis
  version: "36.15.0"
  url: docker.io/cfcontainerization
stemcells:
- alias: default
  os: opensuse-42.3
  version: "36.g03b4653-30.80-7.0.0_332.g0d8469bb"
instance_groups:
- name: redis-slave
  lifecycle: errand
  instances: 2
  azs: [z1, z2]
  persistent_disk: 1024
  env:
    bosh:
      agent:
        settings:
          labels:
            team: data
          serviceAccountName: redis
          disable_log_sidecar: true
  jobs:
  - name: redis-server
    release: redis
    properties:
      port: 6379
      quarks:
        debug: true
        ports:
        - name: redis
          internal: 6379
        run:
          healthcheck:
            redis:
              readiness:
                exec:
                  command: ["redis-cli", "ping"]
"#;

    #[test]
    fn parses_instance_groups_and_quarks_properties() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let ig = manifest.instance_group("redis-slave").unwrap();

        assert_eq!(ig.lifecycle, Lifecycle::Errand);
        assert_eq!(ig.instances, 2);
        assert_eq!(ig.persistent_disk_size(), Some(1024));
        assert_eq!(ig.settings().labels.get("team").map(String::as_str), Some("data"));
        assert_eq!(ig.settings().service_account_name.as_deref(), Some("redis"));
        assert!(ig.settings().disable_log_sidecar);

        let job = &ig.jobs[0];
        assert!(job.quarks().debug);
        assert_eq!(job.quarks().ports[0].protocol, "TCP");
        assert!(job.quarks().run.healthcheck["redis"].readiness.is_some());
        assert_eq!(
            job.properties.properties.get("port").and_then(serde_yaml::Value::as_u64),
            Some(6379)
        );
    }

    #[test]
    fn empty_lifecycle_means_service() {
        let ig: InstanceGroup = serde_yaml::from_str("name: web\nlifecycle: \"\"\n").unwrap();
        assert_eq!(ig.lifecycle, Lifecycle::Service);
        assert!(serde_yaml::from_str::<InstanceGroup>("name: web\nlifecycle: daemon\n").is_err());
    }

    #[test]
    fn release_image_uses_deployment_stemcell() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let image = manifest.release_image("redis-slave", "redis-server").unwrap();
        assert_eq!(
            image,
            "docker.io/cfcontainerization/redis:opensuse-42.3-36.g03b4653-30.80-7.0.0_332.g0d8469bb-36.15.0"
        );
    }

    #[test]
    fn release_image_prefers_release_stemcell() {
        let mut manifest = Manifest::from_yaml(MANIFEST).unwrap();
        manifest.releases[0].stemcell = Some(ReleaseStemcell {
            os: "SLE_15_SP1".to_string(),
            version: "27.8".to_string(),
        });

        let image = manifest.release_image("redis-slave", "redis-server").unwrap();
        assert_eq!(image, "docker.io/cfcontainerization/redis:SLE_15_SP1-27.8-36.15.0");
    }

    #[test]
    fn release_image_lookup_failures() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let err = manifest.release_image("redis-slave", "missing").unwrap_err();
        assert!(matches!(err, Error::ReleaseImageLookupFailed { ref job, .. } if job == "missing"));

        let err = manifest.release_image("nope", "redis-server").unwrap_err();
        assert!(matches!(err, Error::ReleaseImageLookupFailed { .. }));
    }

    #[test]
    fn unknown_variable_type_is_rejected() {
        let yaml = "name: cf\nvariables:\n- name: x\n  type: blob\n";
        assert!(Manifest::from_yaml(yaml).is_err());
    }
}
