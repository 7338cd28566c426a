//! Error types for the converter.

use thiserror::Error;

/// Errors raised while parsing inputs or compiling an instance group.
///
/// None of these are retried inside the crate. The reconciler surfaces them
/// as a failed reconciliation and requeues with backoff.
#[derive(Debug, Error)]
pub enum Error {
    /// A job has no matching BPM configuration
    #[error("bpm configuration for job '{job}' not found")]
    BpmConfigNotFound { job: String },

    /// An additional volume is outside the directories BPM may sub-path
    #[error(
        "the '{path}' path of job '{job}' process '{process}' must be a path inside \
         /var/vcap/data, /var/vcap/store or /var/vcap/sys/run, for a path outside these, \
         you must use the unrestricted_volumes key"
    )]
    InvalidVolumePath {
        job: String,
        process: String,
        path: String,
    },

    /// A process wants a persistent disk the instance group does not declare
    #[error(
        "job '{job}' wants to use persistent disk although instance group \
         '{instance_group}' has no persistent disk declaration"
    )]
    PersistentDiskMissing { job: String, instance_group: String },

    /// The instance group has an empty job list
    #[error("instance group '{instance_group}' has no jobs defined")]
    NoJobsDefined { instance_group: String },

    /// Two init containers of one pod would share a name
    #[error(
        "init container '{name}' of instance group '{instance_group}' is defined more than once"
    )]
    DuplicateInitContainer { instance_group: String, name: String },

    /// The release image provider could not resolve an image
    #[error(
        "failed to get release image for job '{job}' of instance group '{instance_group}': \
         {reason}"
    )]
    ReleaseImageLookupFailed {
        instance_group: String,
        job: String,
        reason: String,
    },

    /// A BPM configuration failed validation at parse time
    #[error("invalid bpm configuration for job '{job}': {reason}")]
    InvalidBpmConfig { job: String, reason: String },

    /// A deployment variable cannot be converted into a secret request
    #[error("invalid variable '{name}': {reason}")]
    InvalidVariable { name: String, reason: String },

    /// YAML input could not be parsed
    #[error("failed to parse YAML: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    /// Converter configuration problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Any of the above, raised while compiling one instance group
    #[error(
        "failed to compile instance group '{instance_group}' of manifest '{manifest}': {source}"
    )]
    InstanceGroup {
        manifest: String,
        instance_group: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the manifest and instance group it was raised for.
    pub fn in_instance_group(self, manifest: &str, instance_group: &str) -> Self {
        Error::InstanceGroup {
            manifest: manifest.to_string(),
            instance_group: instance_group.to_string(),
            source: Box::new(self),
        }
    }

    /// The underlying error kind with all context wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::InstanceGroup { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for converter operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
