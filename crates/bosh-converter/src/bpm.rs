//! BPM process configuration.
//!
//! Every BOSH job ships a `bpm.yml` describing the processes BPM supervises.
//! The gathering job renders those files per instance group; this module
//! parses and validates them once so the compiler can rely on well-formed
//! processes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// BPM configs of an instance group, keyed by job name
pub type BpmConfigs = BTreeMap<String, Config>;

/// Parsed `bpm.yml` of one job
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub processes: Vec<Process>,
}

/// A process supervised by BPM
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Process {
    pub name: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub ephemeral_disk: bool,
    #[serde(default)]
    pub persistent_disk: bool,
    #[serde(default)]
    pub additional_volumes: Vec<Volume>,
    #[serde(default, rename = "unsafe")]
    pub unsafe_config: Unsafe,
}

impl Process {
    /// Script run before the process starts, if any
    pub fn pre_start(&self) -> Option<&str> {
        self.hooks
            .pre_start
            .as_deref()
            .filter(|script| !script.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Hooks {
    #[serde(default)]
    pub pre_start: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Limits {
    /// Memory limit, e.g. `1G`
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub open_files: Option<u64>,
    #[serde(default)]
    pub processes: Option<u64>,
}

/// A directory mounted into the process container
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Volume {
    pub path: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub allow_executions: bool,
    #[serde(default)]
    pub mount_only: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Unsafe {
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub unrestricted_volumes: Vec<Volume>,
}

impl Config {
    /// Parse and validate the `bpm.yml` of a job
    pub fn from_yaml(job: &str, yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate(job)?;
        Ok(config)
    }

    /// Reject configs the compiler cannot turn into containers
    pub fn validate(&self, job: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidBpmConfig {
            job: job.to_string(),
            reason,
        };

        let mut seen = BTreeSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() {
                return Err(invalid("process without a name".to_string()));
            }
            if process.executable.trim().is_empty() {
                return Err(invalid(format!(
                    "process '{}' has no executable",
                    process.name
                )));
            }
            if !seen.insert(process.name.as_str()) {
                return Err(invalid(format!(
                    "process '{}' is declared more than once",
                    process.name
                )));
            }
            for volume in process
                .additional_volumes
                .iter()
                .chain(&process.unsafe_config.unrestricted_volumes)
            {
                if !volume.path.starts_with('/') {
                    return Err(invalid(format!(
                        "volume path '{}' of process '{}' is not absolute",
                        volume.path, process.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Parse the BPM configs of a whole instance group, as written by the
/// BPM gathering job (a map of job name to `bpm.yml` content).
pub fn parse_bpm_configs(yaml: &str) -> Result<BpmConfigs> {
    let configs: BpmConfigs = serde_yaml::from_str(yaml)?;
    for (job, config) in &configs {
        config.validate(job)?;
    }
    Ok(configs)
}
