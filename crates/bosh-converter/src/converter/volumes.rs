//! Volume factory
//!
//! Pure constructors for the volumes and mounts shared by instance group pods
//! and gathering jobs. Mount paths mirror the BOSH VM layout so release jobs
//! run unchanged.

use crate::names::{self, DeploymentSecretType};
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume,
    VolumeMount,
};

/// Rendered job templates and copied release sources
pub const VOLUME_RENDERING_DATA_NAME: &str = "rendering-data";
pub const VOLUME_RENDERING_DATA_MOUNT_PATH: &str = "/var/vcap/all-releases";

pub const VOLUME_JOBS_DIR_NAME: &str = "jobs-dir";
pub const VOLUME_JOBS_DIR_MOUNT_PATH: &str = "/var/vcap/jobs";

pub const VOLUME_DATA_DIR_NAME: &str = "data-dir";
pub const VOLUME_DATA_DIR_MOUNT_PATH: &str = "/var/vcap/data";

pub const VOLUME_SYS_DIR_NAME: &str = "sys-dir";
pub const VOLUME_SYS_DIR_MOUNT_PATH: &str = "/var/vcap/sys";

pub const VOLUME_STORE_DIR_MOUNT_PATH: &str = "/var/vcap/store";

/// Manifest with ops files applied (or the desired manifest in gathering jobs)
pub const VOLUME_WITH_OPS_NAME: &str = "with-ops";
pub const VOLUME_DESIRED_MANIFEST_NAME: &str = "desired-manifest";
pub const VOLUME_DEPLOYMENT_MOUNT_PATH: &str = "/var/run/secrets/deployment/";
pub const MANIFEST_FILE_NAME: &str = "manifest.yaml";

pub const VOLUME_RESOLVED_PROPERTIES_NAME: &str = "ig-resolved";
pub const VOLUME_RESOLVED_PROPERTIES_MOUNT_PATH: &str = "/var/run/secrets/resolved-properties";
pub const RESOLVED_PROPERTIES_FILE_NAME: &str = "properties.yaml";

pub const VOLUME_VARIABLES_NAME: &str = "variables";
pub const VOLUME_VARIABLES_MOUNT_PATH: &str = "/var/run/secrets/variables";

/// Scratch space gathering containers write their output file to
pub const VOLUME_OUTPUT_NAME: &str = "output";
pub const VOLUME_OUTPUT_MOUNT_PATH: &str = "/mnt/quarks";
pub const OUTPUT_FILE_NAME: &str = "output.json";

/// Location of the job sources inside release images
pub const JOBS_SRC_DIR: &str = "/var/vcap/jobs-src";

pub const UNRESTRICTED_VOLUME_BASE_NAME: &str = "bpm-unrestricted-volume";

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

pub fn rendering_data_volume() -> Volume {
    empty_dir_volume(VOLUME_RENDERING_DATA_NAME)
}

pub fn rendering_data_mount() -> VolumeMount {
    mount(VOLUME_RENDERING_DATA_NAME, VOLUME_RENDERING_DATA_MOUNT_PATH, false)
}

pub fn jobs_dir_volume() -> Volume {
    empty_dir_volume(VOLUME_JOBS_DIR_NAME)
}

pub fn jobs_dir_mount() -> VolumeMount {
    mount(VOLUME_JOBS_DIR_NAME, VOLUME_JOBS_DIR_MOUNT_PATH, false)
}

pub fn data_dir_volume() -> Volume {
    empty_dir_volume(VOLUME_DATA_DIR_NAME)
}

pub fn data_dir_mount() -> VolumeMount {
    mount(VOLUME_DATA_DIR_NAME, VOLUME_DATA_DIR_MOUNT_PATH, false)
}

pub fn sys_dir_volume() -> Volume {
    empty_dir_volume(VOLUME_SYS_DIR_NAME)
}

pub fn sys_dir_mount() -> VolumeMount {
    mount(VOLUME_SYS_DIR_NAME, VOLUME_SYS_DIR_MOUNT_PATH, false)
}

/// Secret holding the manifest with ops files applied
pub fn with_ops_volume(manifest_name: &str) -> Volume {
    secret_volume(
        VOLUME_WITH_OPS_NAME,
        &names::deployment_secret_name(DeploymentSecretType::WithOps, manifest_name, None),
    )
}

pub fn with_ops_mount() -> VolumeMount {
    mount(VOLUME_WITH_OPS_NAME, VOLUME_DEPLOYMENT_MOUNT_PATH, true)
}

/// Input manifest of a gathering job, mounted where the with-ops manifest would be
pub fn desired_manifest_volume(secret_name: &str) -> Volume {
    secret_volume(VOLUME_DESIRED_MANIFEST_NAME, secret_name)
}

pub fn desired_manifest_mount() -> VolumeMount {
    mount(VOLUME_DESIRED_MANIFEST_NAME, VOLUME_DEPLOYMENT_MOUNT_PATH, true)
}

/// Volume name of a variable secret (`var-<name>`)
pub fn variable_volume_name(variable: &str) -> String {
    names::sanitize(&format!("var-{variable}"))
}

/// Secret generated for one manifest variable
pub fn variable_volume(manifest_name: &str, variable: &str) -> Volume {
    secret_volume(
        &variable_volume_name(variable),
        &names::deployment_secret_name(
            DeploymentSecretType::Variable,
            manifest_name,
            Some(variable),
        ),
    )
}

pub fn variable_mount(variable: &str) -> VolumeMount {
    mount(
        &variable_volume_name(variable),
        &format!("{VOLUME_VARIABLES_MOUNT_PATH}/{variable}"),
        true,
    )
}

/// Placeholder for the variables directory of a manifest without variables
pub fn variables_empty_dir_volume() -> Volume {
    empty_dir_volume(VOLUME_VARIABLES_NAME)
}

pub fn variables_empty_dir_mount() -> VolumeMount {
    mount(VOLUME_VARIABLES_NAME, VOLUME_VARIABLES_MOUNT_PATH, true)
}

/// Name of the versioned secret holding an instance group's resolved properties
pub fn resolved_properties_secret_name(
    manifest_name: &str,
    instance_group: &str,
    version: &str,
) -> String {
    names::versioned_secret_name(
        &names::deployment_secret_name(
            DeploymentSecretType::InstanceGroupResolvedProperties,
            manifest_name,
            Some(instance_group),
        ),
        version,
    )
}

pub fn resolved_properties_volume(
    manifest_name: &str,
    instance_group: &str,
    version: &str,
) -> Volume {
    secret_volume(
        VOLUME_RESOLVED_PROPERTIES_NAME,
        &resolved_properties_secret_name(manifest_name, instance_group, version),
    )
}

pub fn resolved_properties_mount(instance_group: &str) -> VolumeMount {
    mount(
        VOLUME_RESOLVED_PROPERTIES_NAME,
        &resolved_properties_dir(instance_group),
        true,
    )
}

/// Directory the resolved properties secret of an instance group is mounted in
pub fn resolved_properties_dir(instance_group: &str) -> String {
    format!("{VOLUME_RESOLVED_PROPERTIES_MOUNT_PATH}/{instance_group}")
}

pub fn output_volume() -> Volume {
    empty_dir_volume(VOLUME_OUTPUT_NAME)
}

pub fn output_mount() -> VolumeMount {
    mount(VOLUME_OUTPUT_NAME, VOLUME_OUTPUT_MOUNT_PATH, false)
}

/// Volume backed by an existing persistent volume claim
pub fn persistent_volume(name: &str, claim_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

/// A job's own directory on the persistent disk, `/var/vcap/store/<job>`
pub fn persistent_mount(volume_name: &str, job: &str) -> VolumeMount {
    sub_path_mount(
        volume_name,
        &format!("{VOLUME_STORE_DIR_MOUNT_PATH}/{job}"),
        job,
        false,
    )
}

/// A job's own directory on the ephemeral disk, `/var/vcap/data/<job>`
pub fn ephemeral_mount(job: &str) -> VolumeMount {
    sub_path_mount(
        VOLUME_DATA_DIR_NAME,
        &format!("{VOLUME_DATA_DIR_MOUNT_PATH}/{job}"),
        job,
        false,
    )
}

/// Mount of a sub directory of a shared volume
pub fn sub_path_mount(
    name: &str,
    mount_path: &str,
    sub_path: &str,
    read_only: bool,
) -> VolumeMount {
    VolumeMount {
        sub_path: (!sub_path.is_empty()).then(|| sub_path.to_string()),
        ..mount(name, mount_path, read_only)
    }
}

/// Dedicated empty-dir volume for an unrestricted BPM volume
pub fn unrestricted_volume(job: &str, process: &str, index: usize) -> Volume {
    empty_dir_volume(&names::sanitize(&format!(
        "{UNRESTRICTED_VOLUME_BASE_NAME}-{job}-{process}-{index}"
    )))
}

pub fn unrestricted_mount(volume: &Volume, path: &str, writable: bool) -> VolumeMount {
    mount(&volume.name, path, !writable)
}

/// Mounts every run and pre-start container receives
pub fn default_volume_mounts() -> Vec<VolumeMount> {
    vec![
        rendering_data_mount(),
        jobs_dir_mount(),
        data_dir_mount(),
        sys_dir_mount(),
    ]
}
