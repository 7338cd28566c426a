//! Deterministic object naming.
//!
//! Every generated name is a pure function of the manifest, instance group,
//! job and process names it is built from. Reconciliation relies on this to
//! find previously created objects again.

use sha1::{Digest, Sha1};

/// DNS-1123 label limit (containers, services, volumes)
pub const MAX_K8S_NAME_LENGTH: usize = 63;
/// DNS-1123 subdomain limit (secrets, custom resources)
pub const MAX_DNS_SUBDOMAIN_LENGTH: usize = 253;
/// Stateful set names leave room for the `-<ordinal>` pod suffix and the
/// controller-revision-hash label
pub const MAX_STATEFUL_SET_NAME_LENGTH: usize = 52;

const HASH_LENGTH: usize = 32;

/// Kinds of secrets generated for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentSecretType {
    /// Manifest with ops files applied, variables still unresolved
    WithOps,
    /// Manifest with ops files applied and variables interpolated
    DesiredManifest,
    /// Properties of one instance group after link resolution
    InstanceGroupResolvedProperties,
    /// BPM configs of one instance group
    BpmConfigs,
    /// Generated value of one manifest variable
    Variable,
}

impl DeploymentSecretType {
    /// Prefix used in secret names and the secret-type label.
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentSecretType::WithOps => "with-ops",
            DeploymentSecretType::DesiredManifest => "desired-manifest",
            DeploymentSecretType::InstanceGroupResolvedProperties => "ig-resolved",
            DeploymentSecretType::BpmConfigs => "bpm",
            DeploymentSecretType::Variable => "var",
        }
    }
}

/// Lowercase, replace runs of characters outside `[a-z0-9-]` with a single
/// dash, trim dashes and cap the length at 63 characters.
pub fn sanitize(name: &str) -> String {
    truncate_with_hash(&normalize(name, false), MAX_K8S_NAME_LENGTH)
}

/// Like [`sanitize`] but keeps dots and allows up to 253 characters.
pub fn sanitize_subdomain(name: &str) -> String {
    truncate_with_hash(&normalize(name, true), MAX_DNS_SUBDOMAIN_LENGTH)
}

fn normalize(name: &str, allow_dots: bool) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        let allowed =
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || (allow_dots && c == '.');
        if allowed {
            if pending_dash {
                out.push('-');
                pending_dash = false;
            }
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    out.trim_matches(|c: char| c == '-' || c == '.').to_string()
}

/// Keep names within `limit` by replacing the tail with a stable hash.
fn truncate_with_hash(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }

    let hash = hash_string(name);
    let prefix_len = limit.saturating_sub(HASH_LENGTH);
    // normalized names are ASCII so byte slicing is safe
    let prefix = name[..prefix_len].trim_end_matches(['-', '.']);
    format!("{prefix}{hash}")
}

fn hash_string(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LENGTH);
    hash
}

/// Join two name parts with a dash and sanitize (`<job>-<process>`).
pub fn container_name(first: &str, second: &str) -> String {
    sanitize(&format!("{first}-{second}"))
}

/// Name of the stateful workload for an instance group.
pub fn instance_group_workload_name(manifest_name: &str, instance_group: &str) -> String {
    truncate_with_hash(
        &normalize(&format!("{manifest_name}-{instance_group}"), false),
        MAX_STATEFUL_SET_NAME_LENGTH,
    )
}

/// Name of the headless service covering a whole instance group.
pub fn headless_service_name(manifest_name: &str, instance_group: &str) -> String {
    sanitize(&format!("{manifest_name}-{instance_group}"))
}

/// Name of the service addressing one pod of an instance group in one zone.
pub fn service_name(
    manifest_name: &str,
    instance_group: &str,
    az_index: usize,
    index: usize,
) -> String {
    sanitize(&format!("{manifest_name}-{instance_group}-z{az_index}-{index}"))
}

/// Name of the persistent volume claim shared by an instance group.
pub fn persistent_volume_claim_name(manifest_name: &str, instance_group: &str) -> String {
    sanitize(&format!("{manifest_name}-{instance_group}-pvc"))
}

/// Name of a deployment secret, e.g. `cf.ig-resolved.router` or `cf.var-admin-password`.
pub fn deployment_secret_name(
    secret_type: DeploymentSecretType,
    manifest_name: &str,
    name: Option<&str>,
) -> String {
    let raw = match (secret_type, name) {
        (DeploymentSecretType::Variable, Some(name)) => {
            format!("{manifest_name}.{}-{name}", secret_type.as_str())
        }
        (_, Some(name)) => format!("{manifest_name}.{}.{name}", secret_type.as_str()),
        (_, None) => format!("{manifest_name}.{}", secret_type.as_str()),
    };
    sanitize_subdomain(&raw)
}

/// Append a version suffix to an unversioned secret name.
pub fn versioned_secret_name(name: &str, version: &str) -> String {
    format!("{name}-v{version}")
}

/// Name of one of the auto-errand gathering jobs, e.g. `dm-<manifest>`.
pub fn auto_errand_job_name(prefix: &str, manifest_name: &str) -> String {
    sanitize(&format!("{prefix}-{manifest_name}"))
}
