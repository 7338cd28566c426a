//! Gathering jobs
//!
//! Auto-errands run by the operator before any instance group is compiled.
//! They interpolate variables into the manifest, resolve each instance
//! group's properties and collect each instance group's BPM configs. Their
//! output files are persisted as versioned secrets by the quarks job
//! controller.

use super::containers::{env, spec_copier_container, DUMB_INIT};
use super::volumes::{
    self, MANIFEST_FILE_NAME, OUTPUT_FILE_NAME, VOLUME_DEPLOYMENT_MOUNT_PATH,
    VOLUME_OUTPUT_MOUNT_PATH, VOLUME_RENDERING_DATA_MOUNT_PATH, VOLUME_VARIABLES_MOUNT_PATH,
};
use crate::config::ConverterConfig;
use crate::crds::{Output, QuarksJob, QuarksJobSpec, Trigger};
use crate::error::Result;
use crate::labels::{self, LABEL_DELETE, LABEL_DELETE_POD, LABEL_SECRET_TYPE};
use crate::manifest::{Manifest, ReleaseImageProvider};
use crate::names::{self, DeploymentSecretType};
use k8s_openapi::api::batch::v1::{JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

pub const VARIABLE_INTERPOLATION_CONTAINER_NAME: &str = "desired-manifest";

/// Version of the desired manifest secret gathering jobs reference. The
/// quarks job controller swaps in the latest version when the job runs.
pub const DESIRED_MANIFEST_INPUT_VERSION: &str = "1";

const JOB_PREFIX_DESIRED_MANIFEST: &str = "dm";
const JOB_PREFIX_INSTANCE_GROUP: &str = "ig";
const JOB_PREFIX_BPM: &str = "bpm";

/// What a gathering job produces
struct GatheringJob {
    name: String,
    input_secret: String,
    secret_type: DeploymentSecretType,
    containers: Vec<Container>,
    /// Secret name per container
    outputs: BTreeMap<String, String>,
    volumes: Vec<Volume>,
}

/// Builds the gathering auto-errands of a deployment.
pub struct JobFactory<'a> {
    config: &'a ConverterConfig,
}

impl<'a> JobFactory<'a> {
    #[must_use]
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self { config }
    }

    /// `dm-<manifest>`: interpolates variables into the with-ops manifest.
    #[instrument(skip_all, fields(manifest = %manifest.name))]
    pub fn variable_interpolation_job(&self, manifest: &Manifest) -> Result<QuarksJob> {
        let (variable_volumes, variable_mounts): (Vec<Volume>, Vec<VolumeMount>) =
            if manifest.variables.is_empty() {
                (
                    vec![volumes::variables_empty_dir_volume()],
                    vec![volumes::variables_empty_dir_mount()],
                )
            } else {
                manifest
                    .variables
                    .iter()
                    .map(|var| {
                        (
                            volumes::variable_volume(&manifest.name, &var.name),
                            volumes::variable_mount(&var.name),
                        )
                    })
                    .unzip()
            };

        let mut container = self.gathering_container(
            VARIABLE_INTERPOLATION_CONTAINER_NAME,
            "variable-interpolation",
            vec![env("VARIABLES_DIR", VOLUME_VARIABLES_MOUNT_PATH)],
        );
        if let Some(mounts) = container.volume_mounts.as_mut() {
            mounts.extend(variable_mounts);
        }

        let output_secret = names::deployment_secret_name(
            DeploymentSecretType::DesiredManifest,
            &manifest.name,
            None,
        );

        self.gathering_job(
            manifest,
            None,
            GatheringJob {
                name: names::auto_errand_job_name(JOB_PREFIX_DESIRED_MANIFEST, &manifest.name),
                input_secret: names::deployment_secret_name(
                    DeploymentSecretType::WithOps,
                    &manifest.name,
                    None,
                ),
                secret_type: DeploymentSecretType::DesiredManifest,
                outputs: BTreeMap::from([(container.name.clone(), output_secret)]),
                containers: vec![container],
                volumes: variable_volumes,
            },
        )
    }

    /// `ig-<manifest>`: resolves the properties of every instance group.
    #[instrument(skip_all, fields(manifest = %manifest.name))]
    pub fn instance_group_manifest_job(
        &self,
        manifest: &Manifest,
        release_images: &dyn ReleaseImageProvider,
    ) -> Result<QuarksJob> {
        self.per_instance_group_job(
            manifest,
            release_images,
            JOB_PREFIX_INSTANCE_GROUP,
            "instance-group",
            DeploymentSecretType::InstanceGroupResolvedProperties,
        )
    }

    /// `bpm-<manifest>`: renders the BPM configs of every instance group.
    #[instrument(skip_all, fields(manifest = %manifest.name))]
    pub fn bpm_configs_job(
        &self,
        manifest: &Manifest,
        release_images: &dyn ReleaseImageProvider,
    ) -> Result<QuarksJob> {
        self.per_instance_group_job(
            manifest,
            release_images,
            JOB_PREFIX_BPM,
            "bpm-configs",
            DeploymentSecretType::BpmConfigs,
        )
    }

    fn per_instance_group_job(
        &self,
        manifest: &Manifest,
        release_images: &dyn ReleaseImageProvider,
        prefix: &str,
        command: &str,
        secret_type: DeploymentSecretType,
    ) -> Result<QuarksJob> {
        let mut containers = Vec::with_capacity(manifest.instance_groups.len());
        let mut outputs = BTreeMap::new();

        for ig in &manifest.instance_groups {
            let container = self.gathering_container(
                &ig.name,
                command,
                vec![env("INSTANCE_GROUP_NAME", &ig.name)],
            );
            outputs.insert(
                container.name.clone(),
                names::deployment_secret_name(secret_type, &manifest.name, Some(&ig.name)),
            );
            containers.push(container);
        }

        let input_secret = names::versioned_secret_name(
            &names::deployment_secret_name(
                DeploymentSecretType::DesiredManifest,
                &manifest.name,
                None,
            ),
            DESIRED_MANIFEST_INPUT_VERSION,
        );

        self.gathering_job(
            manifest,
            Some(release_images),
            GatheringJob {
                name: names::auto_errand_job_name(prefix, &manifest.name),
                input_secret,
                secret_type,
                containers,
                outputs,
                volumes: Vec::new(),
            },
        )
    }

    /// Container running `<utility> util <command>` on the input manifest
    fn gathering_container(&self, name: &str, command: &str, extra_env: Vec<EnvVar>) -> Container {
        let mut container_env = vec![
            env(
                "BOSH_MANIFEST_PATH",
                &format!("{VOLUME_DEPLOYMENT_MOUNT_PATH}{MANIFEST_FILE_NAME}"),
            ),
            env("BASE_DIR", VOLUME_RENDERING_DATA_MOUNT_PATH),
            env(
                "OUTPUT_FILE_PATH",
                &format!("{VOLUME_OUTPUT_MOUNT_PATH}/{OUTPUT_FILE_NAME}"),
            ),
            env("NAMESPACE", &self.config.namespace),
        ];
        container_env.extend(extra_env);
        container_env.sort_by(|a, b| a.name.cmp(&b.name));

        Container {
            name: names::sanitize(name),
            image: Some(self.config.operator_image()),
            command: Some(vec![
                DUMB_INIT.to_string(),
                "--".to_string(),
                "/bin/sh".to_string(),
                "-xc".to_string(),
            ]),
            args: Some(vec![format!("{} util {command}", self.config.utility_binary)]),
            env: Some(container_env),
            volume_mounts: Some(vec![
                volumes::rendering_data_mount(),
                volumes::desired_manifest_mount(),
                volumes::output_mount(),
            ]),
            ..Default::default()
        }
    }

    fn gathering_job(
        &self,
        manifest: &Manifest,
        release_images: Option<&dyn ReleaseImageProvider>,
        job: GatheringJob,
    ) -> Result<QuarksJob> {
        // only jobs rendering templates need the release sources
        let init_containers = match release_images {
            Some(images) => spec_copiers(manifest, images)?,
            None => Vec::new(),
        };

        let mut pod_volumes = vec![
            volumes::rendering_data_volume(),
            volumes::desired_manifest_volume(&job.input_secret),
            volumes::output_volume(),
        ];
        pod_volumes.extend(job.volumes);

        let mut pod_labels = labels::deployment_labels(&manifest.name);
        pod_labels.insert(LABEL_DELETE.to_string(), LABEL_DELETE_POD.to_string());

        let mut secret_labels = labels::deployment_labels(&manifest.name);
        secret_labels.insert(
            LABEL_SECRET_TYPE.to_string(),
            job.secret_type.as_str().to_string(),
        );

        let output_map = job
            .outputs
            .into_iter()
            .map(|(container, secret)| {
                (container, BTreeMap::from([(OUTPUT_FILE_NAME.to_string(), secret)]))
            })
            .collect();

        debug!(
            job = %job.name,
            containers = job.containers.len(),
            init_containers = init_containers.len(),
            "built gathering job"
        );

        let mut qjob = QuarksJob::new(
            &job.name,
            QuarksJobSpec {
                trigger: Trigger::once(),
                template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(JobSpec {
                        template: PodTemplateSpec {
                            metadata: Some(ObjectMeta {
                                labels: Some(pod_labels),
                                ..Default::default()
                            }),
                            spec: Some(PodSpec {
                                init_containers: Some(init_containers),
                                containers: job.containers,
                                volumes: Some(pod_volumes),
                                restart_policy: Some("OnFailure".to_string()),
                                ..Default::default()
                            }),
                        },
                        ..Default::default()
                    }),
                },
                output: Some(Output {
                    output_map,
                    output_type: "json".to_string(),
                    secret_labels,
                    versioned: true,
                }),
                update_on_config_change: true,
            },
        );
        qjob.metadata.namespace = Some(self.config.namespace.clone());
        qjob.metadata.labels = Some(labels::deployment_labels(&manifest.name));
        Ok(qjob)
    }
}

/// One spec copier per distinct release used by the deployment's instance groups.
fn spec_copiers(
    manifest: &Manifest,
    release_images: &dyn ReleaseImageProvider,
) -> Result<Vec<Container>> {
    let mut seen = BTreeSet::new();
    let mut copiers = Vec::new();

    for ig in &manifest.instance_groups {
        for job in &ig.jobs {
            if seen.insert(job.release.as_str()) {
                let image = release_images.release_image(&ig.name, &job.name)?;
                copiers.push(spec_copier_container(&job.release, &image));
            }
        }
    }

    Ok(copiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::manifest::MockReleaseImageProvider;

    const MANIFEST: &str = r"
name: cf
instance_groups:
- name: redis-slave
  jobs:
  - name: redis-server
    release: redis
  - name: loggr
    release: loggregator
- name: redis-master
  jobs:
  - name: redis-server
    release: redis
variables:
- name: admin_password
  type: password
";

    fn factory_config() -> ConverterConfig {
        ConverterConfig::with_operator_image("operator:1")
    }

    fn images() -> MockReleaseImageProvider {
        let mut images = MockReleaseImageProvider::new();
        images
            .expect_release_image()
            .returning(|_, job| Ok(format!("registry/{job}:1")));
        images
    }

    fn pod_spec(qjob: &QuarksJob) -> &PodSpec {
        qjob.spec
            .template
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .unwrap()
    }

    #[test]
    fn variable_interpolation_job_mounts_every_variable() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let config = factory_config();
        let qjob = JobFactory::new(&config).variable_interpolation_job(&manifest).unwrap();

        assert_eq!(qjob.metadata.name.as_deref(), Some("dm-cf"));
        assert_eq!(qjob.spec.trigger, Trigger::once());

        let pod = pod_spec(&qjob);
        assert!(pod.init_containers.as_ref().unwrap().is_empty());
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "desired-manifest");
        assert_eq!(
            pod.containers[0].args.as_ref().unwrap()[0],
            "cf-operator util variable-interpolation"
        );

        let volumes = pod.volumes.as_ref().unwrap();
        let input = volumes.iter().find(|v| v.name == "desired-manifest").unwrap();
        assert_eq!(
            input.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("cf.with-ops")
        );
        assert!(volumes.iter().any(|v| v.name == "var-admin-password"));

        let output = qjob.spec.output.as_ref().unwrap();
        assert!(output.versioned);
        assert_eq!(output.output_map["desired-manifest"]["output.json"], "cf.desired-manifest");
        assert_eq!(output.secret_labels[LABEL_SECRET_TYPE], "desired-manifest");
    }

    #[test]
    fn variable_interpolation_without_variables_uses_empty_dir() {
        let mut manifest = Manifest::from_yaml(MANIFEST).unwrap();
        manifest.variables.clear();
        let config = factory_config();
        let qjob = JobFactory::new(&config).variable_interpolation_job(&manifest).unwrap();

        let volumes = pod_spec(&qjob).volumes.as_ref().unwrap();
        let variables = volumes.iter().find(|v| v.name == "variables").unwrap();
        assert!(variables.empty_dir.is_some());
    }

    #[test]
    fn instance_group_job_has_container_per_instance_group() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let config = factory_config();
        let qjob = JobFactory::new(&config)
            .instance_group_manifest_job(&manifest, &images())
            .unwrap();

        assert_eq!(qjob.metadata.name.as_deref(), Some("ig-cf"));
        let pod = pod_spec(&qjob);

        let copiers: Vec<_> = pod
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(copiers, vec!["spec-copier-redis", "spec-copier-loggregator"]);

        let containers: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(containers, vec!["redis-slave", "redis-master"]);

        let input = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "desired-manifest")
            .unwrap();
        assert_eq!(
            input.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("cf.desired-manifest-v1")
        );

        let output = qjob.spec.output.as_ref().unwrap();
        assert_eq!(output.output_map["redis-master"]["output.json"], "cf.ig-resolved.redis-master");
        assert_eq!(output.secret_labels[LABEL_SECRET_TYPE], "ig-resolved");
    }

    #[test]
    fn bpm_job_outputs_bpm_secrets() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let config = factory_config();
        let qjob = JobFactory::new(&config).bpm_configs_job(&manifest, &images()).unwrap();

        assert_eq!(qjob.metadata.name.as_deref(), Some("bpm-cf"));
        let pod = pod_spec(&qjob);
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.containers[0].args.as_ref().unwrap()[0], "cf-operator util bpm-configs");

        let pod_labels = qjob
            .spec
            .template
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|metadata| metadata.labels.as_ref())
            .unwrap();
        assert_eq!(pod_labels[LABEL_DELETE], "pod");

        let output = qjob.spec.output.as_ref().unwrap();
        assert_eq!(output.output_map["redis-slave"]["output.json"], "cf.bpm.redis-slave");
        assert_eq!(output.secret_labels[labels::LABEL_DEPLOYMENT_NAME], "cf");
    }

    #[test]
    fn release_image_errors_abort_the_job() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let config = factory_config();
        let mut images = MockReleaseImageProvider::new();
        images.expect_release_image().returning(|ig, job| {
            Err(Error::ReleaseImageLookupFailed {
                instance_group: ig.to_string(),
                job: job.to_string(),
                reason: "no url".to_string(),
            })
        });

        let err = JobFactory::new(&config).bpm_configs_job(&manifest, &images).unwrap_err();
        assert!(matches!(err, Error::ReleaseImageLookupFailed { .. }));
    }
}
