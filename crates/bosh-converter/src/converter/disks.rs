//! Disk planning
//!
//! Computes every volume, mount and claim an instance group's pods need: the
//! fixed default set plus what the BPM configs of its jobs ask for.

use super::volumes::{
    self, VOLUME_DATA_DIR_MOUNT_PATH, VOLUME_DATA_DIR_NAME, VOLUME_JOBS_DIR_MOUNT_PATH,
    VOLUME_STORE_DIR_MOUNT_PATH, VOLUME_SYS_DIR_MOUNT_PATH, VOLUME_SYS_DIR_NAME,
};
use crate::bpm::{BpmConfigs, Process, Volume as BpmVolume};
use crate::error::{Error, Result};
use crate::labels;
use crate::manifest::InstanceGroup;
use crate::names;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Disk label holding the job a disk belongs to
pub const LABEL_JOB_NAME: &str = "job_name";
/// Disk label holding the process a disk belongs to
pub const LABEL_PROCESS_NAME: &str = "process_name";
/// Set to `true` on per-job ephemeral disks
pub const LABEL_EPHEMERAL: &str = "ephemeral";
/// Set to `true` on the instance group's persistent disk
pub const LABEL_PERSISTENT: &str = "persistent";

lazy_static! {
    static ref ADDITIONAL_VOLUME_PATH: Regex =
        Regex::new(r"^(/var/vcap/data/.+|/var/vcap/store/.+|/var/vcap/sys/run/.+)$")
            .expect("additional volume path pattern is valid");
}

/// A volume, its mount and (for persistent disks) its claim, with labels for lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Disk {
    pub persistent_volume_claim: Option<PersistentVolumeClaim>,
    pub volume: Option<Volume>,
    pub volume_mount: Option<VolumeMount>,
    pub labels: BTreeMap<String, String>,
}

impl Disk {
    fn with_labels<'a>(mut self, labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.labels.extend(
            labels
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        self
    }

    fn from_volume(volume: Volume, volume_mount: VolumeMount) -> Self {
        Disk {
            volume: Some(volume),
            volume_mount: Some(volume_mount),
            ..Default::default()
        }
    }

    fn from_mount(volume_mount: VolumeMount) -> Self {
        Disk {
            volume_mount: Some(volume_mount),
            ..Default::default()
        }
    }

    fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// Ordered collection of disks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Disks(Vec<Disk>);

impl Disks {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Disk> {
        self.0.iter()
    }

    pub fn push(&mut self, disk: Disk) {
        self.0.push(disk);
    }

    /// Disks whose label `key` equals `value`
    pub fn filter(&self, key: &str, value: &str) -> Disks {
        self.0
            .iter()
            .filter(|disk| disk.has_label(key, value))
            .cloned()
            .collect()
    }

    /// Volumes of all disks, first occurrence of each name wins
    pub fn volumes(&self) -> Vec<Volume> {
        let mut seen = BTreeSet::new();
        self.0
            .iter()
            .filter_map(|disk| disk.volume.clone())
            .filter(|volume| seen.insert(volume.name.clone()))
            .collect()
    }

    /// Mounts of all disks, first occurrence of each mount path wins
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        dedup_mounts(self.0.iter().filter_map(|disk| disk.volume_mount.clone()))
    }

    pub fn persistent_volume_claims(&self) -> Vec<PersistentVolumeClaim> {
        self.0
            .iter()
            .filter_map(|disk| disk.persistent_volume_claim.clone())
            .collect()
    }

    /// Name of the volume backed by the instance group's persistent disk
    pub fn persistent_volume_name(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|disk| disk.persistent_volume_claim.is_some())
            .and_then(|disk| disk.volume.as_ref())
            .map(|volume| volume.name.as_str())
    }
}

impl FromIterator<Disk> for Disks {
    fn from_iter<I: IntoIterator<Item = Disk>>(iter: I) -> Self {
        Disks(iter.into_iter().collect())
    }
}

impl Extend<Disk> for Disks {
    fn extend<I: IntoIterator<Item = Disk>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Disks {
    type Item = Disk;
    type IntoIter = std::vec::IntoIter<Disk>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Disks {
    type Item = &'a Disk;
    type IntoIter = std::slice::Iter<'a, Disk>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Keep the first mount for every mount path, preserving order.
pub fn dedup_mounts(mounts: impl IntoIterator<Item = VolumeMount>) -> Vec<VolumeMount> {
    let mut seen = BTreeSet::new();
    mounts
        .into_iter()
        .filter(|mount| seen.insert(mount.mount_path.clone()))
        .collect()
}

/// Plans the disks of one instance group.
pub struct DiskPlanner<'a> {
    manifest_name: &'a str,
    instance_group: &'a InstanceGroup,
    version: &'a str,
    namespace: &'a str,
}

impl<'a> DiskPlanner<'a> {
    #[must_use]
    pub fn new(
        manifest_name: &'a str,
        instance_group: &'a InstanceGroup,
        version: &'a str,
        namespace: &'a str,
    ) -> Self {
        Self {
            manifest_name,
            instance_group,
            version,
            namespace,
        }
    }

    /// The six disks every instance group pod has.
    pub fn default_disks(&self) -> Disks {
        let ig = &self.instance_group.name;
        [
            Disk::from_volume(volumes::rendering_data_volume(), volumes::rendering_data_mount()),
            Disk::from_volume(volumes::jobs_dir_volume(), volumes::jobs_dir_mount()),
            Disk::from_volume(volumes::data_dir_volume(), volumes::data_dir_mount()),
            Disk::from_volume(volumes::sys_dir_volume(), volumes::sys_dir_mount()),
            Disk::from_volume(
                volumes::with_ops_volume(self.manifest_name),
                volumes::with_ops_mount(),
            ),
            Disk::from_volume(
                volumes::resolved_properties_volume(self.manifest_name, ig, self.version),
                volumes::resolved_properties_mount(ig),
            ),
        ]
        .into_iter()
        .collect()
    }

    /// Disks requested by the BPM configs of the instance group's jobs.
    pub fn bpm_disks(&self, bpm_configs: &BpmConfigs) -> Result<Disks> {
        let ig = self.instance_group;
        let mut disks = Disks::default();

        let persistent_volume = if self.wants_persistent_disk(bpm_configs)? {
            let disk = self.persistent_disk()?;
            let name = disk.volume.as_ref().map(|v| v.name.clone());
            disks.push(disk);
            name
        } else {
            None
        };

        for job in &ig.jobs {
            let config = bpm_configs
                .get(&job.name)
                .ok_or_else(|| Error::BpmConfigNotFound {
                    job: job.name.clone(),
                })?;

            if config.processes.iter().any(|p| p.ephemeral_disk) {
                disks.push(
                    Disk::from_mount(volumes::ephemeral_mount(&job.name)).with_labels([
                        (LABEL_JOB_NAME, job.name.as_str()),
                        (LABEL_EPHEMERAL, "true"),
                    ]),
                );
            }

            for process in &config.processes {
                disks.extend(self.process_disks(&job.name, process, persistent_volume.as_deref())?);
            }
        }

        debug!(
            instance_group = %ig.name,
            disks = disks.len(),
            "planned bpm disks"
        );
        Ok(disks)
    }

    /// Whether any process asks for the persistent disk. Fails on the first
    /// job asking for one when the instance group declares none.
    fn wants_persistent_disk(&self, bpm_configs: &BpmConfigs) -> Result<bool> {
        let ig = self.instance_group;
        let mut wants = false;

        for job in &ig.jobs {
            let Some(config) = bpm_configs.get(&job.name) else {
                return Err(Error::BpmConfigNotFound {
                    job: job.name.clone(),
                });
            };
            if config.processes.iter().any(|p| p.persistent_disk) {
                if ig.persistent_disk_size().is_none() {
                    return Err(Error::PersistentDiskMissing {
                        job: job.name.clone(),
                        instance_group: ig.name.clone(),
                    });
                }
                wants = true;
            }
        }

        Ok(wants)
    }

    /// Claim and volume shared by all jobs using the persistent disk.
    fn persistent_disk(&self) -> Result<Disk> {
        let ig = self.instance_group;
        let size = ig
            .persistent_disk_size()
            .ok_or_else(|| Error::PersistentDiskMissing {
                job: String::new(),
                instance_group: ig.name.clone(),
            })?;
        let claim_name = names::persistent_volume_claim_name(self.manifest_name, &ig.name);

        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(claim_name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels::instance_group_labels(self.manifest_name, &ig.name)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(format!("{size}Mi")),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: ig.persistent_disk_type.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Disk {
            persistent_volume_claim: Some(claim),
            volume: Some(volumes::persistent_volume(&claim_name, &claim_name)),
            volume_mount: None,
            labels: BTreeMap::new(),
        }
        .with_labels([(LABEL_PERSISTENT, "true")]))
    }

    /// Additional and unrestricted volumes of one process.
    fn process_disks(
        &self,
        job: &str,
        process: &Process,
        persistent_volume: Option<&str>,
    ) -> Result<Vec<Disk>> {
        let labels = [(LABEL_JOB_NAME, job), (LABEL_PROCESS_NAME, process.name.as_str())];
        let mut disks = Vec::new();

        let invalid_path = |volume: &BpmVolume| Error::InvalidVolumePath {
            job: job.to_string(),
            process: process.name.clone(),
            path: volume.path.clone(),
        };

        for volume in &process.additional_volumes {
            let path = normalize_path(&volume.path);
            let mount = if is_resolved(path) && ADDITIONAL_VOLUME_PATH.is_match(path) {
                directory_mount(path, volume, persistent_volume)
            } else {
                None
            };
            let mount = mount.ok_or_else(|| invalid_path(volume))?;
            disks.push(Disk::from_mount(mount).with_labels(labels));
        }

        for (index, volume) in process.unsafe_config.unrestricted_volumes.iter().enumerate() {
            let path = normalize_path(&volume.path);
            if !is_resolved(path) {
                return Err(invalid_path(volume));
            }

            // the jobs directory is mounted into every container already
            if strip_dir(path, VOLUME_JOBS_DIR_MOUNT_PATH).is_some() {
                continue;
            }

            let disk = match directory_mount(path, volume, persistent_volume) {
                Some(mount) => Disk::from_mount(mount),
                None => {
                    let k8s_volume = volumes::unrestricted_volume(job, &process.name, index);
                    let mount = volumes::unrestricted_mount(&k8s_volume, path, volume.writable);
                    Disk::from_volume(k8s_volume, mount)
                }
            };
            disks.push(disk.with_labels(labels));
        }

        Ok(disks)
    }
}

fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Whether `path` is absolute and names every directory literally, with no
/// `.`, `..` or empty segment. Mount sub-paths are cut from the path text.
fn is_resolved(path: &str) -> bool {
    path.strip_prefix('/').is_some_and(|rest| {
        rest.split('/')
            .all(|segment| !matches!(segment, "" | "." | ".."))
    })
}

/// Path relative to `dir` if `path` is `dir` itself or lies below it.
fn strip_dir<'p>(path: &'p str, dir: &str) -> Option<&'p str> {
    if path == dir {
        return Some("");
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}

/// Sub-path mount of one of the shared BOSH directories, or `None` when the
/// path is outside data, store and sys.
///
/// Store paths land on the persistent disk when the instance group uses one
/// and on the ephemeral data volume otherwise.
fn directory_mount(
    path: &str,
    volume: &BpmVolume,
    persistent_volume: Option<&str>,
) -> Option<VolumeMount> {
    let read_only = !volume.writable;

    if let Some(sub_path) = strip_dir(path, VOLUME_DATA_DIR_MOUNT_PATH) {
        return Some(volumes::sub_path_mount(VOLUME_DATA_DIR_NAME, path, sub_path, read_only));
    }

    if let Some(sub_path) = strip_dir(path, VOLUME_STORE_DIR_MOUNT_PATH) {
        let mount = match persistent_volume {
            Some(name) => volumes::sub_path_mount(name, path, sub_path, read_only),
            None => {
                let fallback = if sub_path.is_empty() {
                    "store".to_string()
                } else {
                    format!("store/{sub_path}")
                };
                volumes::sub_path_mount(VOLUME_DATA_DIR_NAME, path, &fallback, read_only)
            }
        };
        return Some(mount);
    }

    strip_dir(path, VOLUME_SYS_DIR_MOUNT_PATH)
        .map(|sub_path| volumes::sub_path_mount(VOLUME_SYS_DIR_NAME, path, sub_path, read_only))
}
