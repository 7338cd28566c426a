//! Converter Configuration
//!
//! The converter needs to know which image runs the operator's own utility
//! commands (template rendering, gathering, log tailing). That value is read
//! once at startup and handed to every factory by reference.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MISSING_IMAGE_CONFIG: &str = "MISSING_IMAGE_CONFIG";

/// Main converter configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    /// Image of the operator, used for every utility container
    #[serde(default = "default_operator_image")]
    pub operator_image: ImageConfig,

    /// Namespace the compiled objects are created in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the operator binary inside the operator image
    #[serde(default = "default_utility_binary")]
    pub utility_binary: String,

    /// Group owning the mounted volumes (vcap)
    #[serde(default = "default_fs_group")]
    pub fs_group: i64,
}

/// Image configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image repository (e.g., "ghcr.io/cloudfoundry-incubator/cf-operator")
    pub repository: String,

    /// Image tag (e.g., "v7.2.1")
    pub tag: String,
}

impl ImageConfig {
    /// Returns `true` when both repository and tag are populated with real values.
    pub fn is_configured(&self) -> bool {
        let repo = self.repository.trim();
        let tag = self.tag.trim();

        !repo.is_empty()
            && repo != MISSING_IMAGE_CONFIG
            && !tag.is_empty()
            && tag != MISSING_IMAGE_CONFIG
    }

    /// Full image reference (`repository:tag`)
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// Parse `repository:tag`. A missing tag defaults to `latest`; a colon
    /// that belongs to a registry port is not mistaken for a tag separator.
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => ImageConfig {
                repository: repository.to_string(),
                tag: tag.to_string(),
            },
            _ => ImageConfig {
                repository: reference.to_string(),
                tag: "latest".to_string(),
            },
        }
    }
}

fn default_operator_image() -> ImageConfig {
    ImageConfig {
        repository: MISSING_IMAGE_CONFIG.to_string(),
        tag: MISSING_IMAGE_CONFIG.to_string(),
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_utility_binary() -> String {
    "cf-operator".to_string()
}

fn default_fs_group() -> i64 {
    1000
}

impl ConverterConfig {
    /// Create a configuration for the given operator image with all other values defaulted
    pub fn with_operator_image(reference: &str) -> Self {
        Self {
            operator_image: ImageConfig::parse(reference),
            ..Self::default()
        }
    }

    /// Operator image reference used by utility containers
    pub fn operator_image(&self) -> String {
        self.operator_image.reference()
    }

    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<()> {
        if !self.operator_image.is_configured() {
            return Err(Error::Config(
                "Operator image is not configured. Provide operatorImage.repository and operatorImage.tag."
                    .to_string(),
            ));
        }

        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }

        if self.utility_binary.trim().is_empty() {
            return Err(Error::Config("utilityBinary must not be empty".to_string()));
        }

        Ok(())
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from mounted `ConfigMap` file
    pub fn from_mounted_file(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let config_str = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {e}",
                config_path.display()
            ))
        })?;

        Self::from_yaml_str(&config_str)
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            operator_image: default_operator_image(),
            namespace: default_namespace(),
            utility_binary: default_utility_binary(),
            fs_group: default_fs_group(),
        }
    }
}
