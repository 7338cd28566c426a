//! Instance group compiler
//!
//! Entry point of the conversion: plans disks, builds containers and wraps
//! them in the workload matching the instance group's lifecycle.

use super::containers::ContainerFactory;
use super::disks::{DiskPlanner, Disks};
use super::services::ServiceExposer;
use crate::bpm::BpmConfigs;
use crate::config::ConverterConfig;
use crate::crds::{QuarksJob, QuarksJobSpec, QuarksStatefulSet, QuarksStatefulSetSpec, Trigger};
use crate::error::Result;
use crate::labels::{self, LABEL_DELETE, LABEL_DELETE_POD, LABEL_DEPLOYMENT_VERSION};
use crate::manifest::{InstanceGroup, Lifecycle, ReleaseImageProvider};
use crate::names;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PodSecurityContext, PodSpec, PodTemplateSpec, Service, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// Everything compiled for one instance group.
#[derive(Debug, Clone)]
pub struct CompiledResources {
    /// Set for `service` instance groups
    pub stateful_set: Option<QuarksStatefulSet>,
    /// Set for `errand` and `auto-errand` instance groups
    pub errand: Option<QuarksJob>,
    pub services: Vec<Service>,
    pub disks: Disks,
}

/// Containers and volumes shared by both workload kinds
struct PodParts {
    init_containers: Vec<Container>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
}

/// Compiles instance groups into Kubernetes workloads.
pub struct InstanceGroupCompiler<'a> {
    config: &'a ConverterConfig,
}

impl<'a> InstanceGroupCompiler<'a> {
    #[must_use]
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self { config }
    }

    /// Compile one instance group. Errors carry the manifest and instance
    /// group names; nothing is returned partially.
    #[instrument(
        skip_all,
        fields(manifest = %manifest_name, instance_group = %instance_group.name, version = %version)
    )]
    pub fn bpm_resources(
        &self,
        manifest_name: &str,
        version: &str,
        instance_group: &InstanceGroup,
        release_images: &dyn ReleaseImageProvider,
        bpm_configs: &BpmConfigs,
    ) -> Result<CompiledResources> {
        self.compile(manifest_name, version, instance_group, release_images, bpm_configs)
            .map_err(|err| err.in_instance_group(manifest_name, &instance_group.name))
    }

    fn compile(
        &self,
        manifest_name: &str,
        version: &str,
        ig: &InstanceGroup,
        release_images: &dyn ReleaseImageProvider,
        bpm_configs: &BpmConfigs,
    ) -> Result<CompiledResources> {
        let namespace = self.config.namespace.as_str();
        let planner = DiskPlanner::new(manifest_name, ig, version, namespace);
        let mut disks = planner.default_disks();
        disks.extend(planner.bpm_disks(bpm_configs)?);

        let factory = ContainerFactory::new(
            manifest_name,
            ig,
            version,
            release_images,
            bpm_configs,
            self.config,
        );
        let parts = PodParts {
            containers: factory.jobs_to_containers(&disks)?,
            init_containers: factory.jobs_to_init_containers(&disks)?,
            volumes: disks.volumes(),
        };

        let resources = match ig.lifecycle {
            Lifecycle::Service => {
                let services = ServiceExposer::new(manifest_name, namespace).services(ig);
                let stateful_set = self.quarks_stateful_set(
                    manifest_name,
                    version,
                    ig,
                    parts,
                    &disks,
                    !services.is_empty(),
                );
                CompiledResources {
                    stateful_set: Some(stateful_set),
                    errand: None,
                    services,
                    disks,
                }
            }
            Lifecycle::Errand | Lifecycle::AutoErrand => CompiledResources {
                stateful_set: None,
                errand: Some(self.quarks_job(manifest_name, version, ig, parts)),
                services: Vec::new(),
                disks,
            },
        };

        debug!(
            lifecycle = %String::from(ig.lifecycle),
            services = resources.services.len(),
            disks = resources.disks.len(),
            "compiled instance group"
        );
        Ok(resources)
    }

    fn quarks_stateful_set(
        &self,
        manifest_name: &str,
        version: &str,
        ig: &InstanceGroup,
        mut parts: PodParts,
        disks: &Disks,
        has_services: bool,
    ) -> QuarksStatefulSet {
        let name = names::instance_group_workload_name(manifest_name, &ig.name);
        let headless = names::headless_service_name(manifest_name, &ig.name);
        let ig_labels = labels::instance_group_labels(manifest_name, &ig.name);

        // claims become templates so every replica gets its own volume
        let claim_templates = volume_claim_templates(disks);
        let claimed: BTreeSet<_> = claim_templates
            .iter()
            .filter_map(|claim| claim.metadata.name.clone())
            .collect();
        parts.volumes.retain(|volume| !claimed.contains(&volume.name));

        let mut template = self.pod_template(manifest_name, version, ig, parts, BTreeMap::new());
        if has_services {
            if let Some(spec) = template.spec.as_mut() {
                spec.subdomain = Some(headless.clone());
            }
        }

        let stateful_set = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(ig_labels.clone()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(i32::try_from(ig.instances).unwrap_or(i32::MAX)),
                selector: LabelSelector {
                    match_labels: Some(ig_labels.clone()),
                    match_expressions: None,
                },
                service_name: headless.into(),
                pod_management_policy: Some("Parallel".to_string()),
                template,
                volume_claim_templates: (!claim_templates.is_empty()).then_some(claim_templates),
                ..Default::default()
            }),
            status: None,
        };

        let mut qsts = QuarksStatefulSet::new(
            &name,
            QuarksStatefulSetSpec {
                update_on_config_change: true,
                zones: ig.azs.clone(),
                template: stateful_set,
            },
        );
        qsts.metadata.namespace = Some(self.config.namespace.clone());
        qsts.metadata.labels = Some(ig_labels);
        qsts
    }

    fn quarks_job(
        &self,
        manifest_name: &str,
        version: &str,
        ig: &InstanceGroup,
        parts: PodParts,
    ) -> QuarksJob {
        let name = names::instance_group_workload_name(manifest_name, &ig.name);
        let delete_label =
            BTreeMap::from([(LABEL_DELETE.to_string(), LABEL_DELETE_POD.to_string())]);

        let mut template =
            self.pod_template(manifest_name, version, ig, parts, delete_label.clone());
        if let Some(spec) = template.spec.as_mut() {
            spec.restart_policy = Some("OnFailure".to_string());
        }

        let mut job_labels = labels::instance_group_labels(manifest_name, &ig.name);
        job_labels.extend(delete_label);

        let trigger = if ig.lifecycle == Lifecycle::AutoErrand {
            Trigger::once()
        } else {
            Trigger::manual()
        };

        let mut qjob = QuarksJob::new(
            &name,
            QuarksJobSpec {
                trigger,
                template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(job_labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(JobSpec {
                        template,
                        ..Default::default()
                    }),
                },
                output: None,
                update_on_config_change: true,
            },
        );
        qjob.metadata.namespace = Some(self.config.namespace.clone());
        qjob.metadata.labels = Some(job_labels);
        qjob
    }

    /// Pod template carrying the agent settings of the instance group.
    fn pod_template(
        &self,
        manifest_name: &str,
        version: &str,
        ig: &InstanceGroup,
        parts: PodParts,
        extra_labels: BTreeMap<String, String>,
    ) -> PodTemplateSpec {
        let settings = ig.settings();

        let mut pod_labels = settings.labels.clone();
        pod_labels.extend(labels::instance_group_labels(manifest_name, &ig.name));
        pod_labels.insert(LABEL_DEPLOYMENT_VERSION.to_string(), version.to_string());
        pod_labels.extend(extra_labels);

        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels),
                annotations: (!settings.annotations.is_empty())
                    .then(|| settings.annotations.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(parts.init_containers),
                containers: parts.containers,
                volumes: Some(parts.volumes),
                security_context: Some(PodSecurityContext {
                    fs_group: Some(self.config.fs_group),
                    ..Default::default()
                }),
                affinity: settings.affinity.clone(),
                tolerations: (!settings.tolerations.is_empty())
                    .then(|| settings.tolerations.clone()),
                service_account_name: settings.service_account_name.clone(),
                automount_service_account_token: settings.automount_service_account_token,
                image_pull_secrets: (!settings.image_pull_secrets.is_empty())
                    .then(|| settings.image_pull_secrets.clone()),
                ..Default::default()
            }),
        }
    }
}

/// Claims of the disk set, stripped down to templates.
fn volume_claim_templates(disks: &Disks) -> Vec<PersistentVolumeClaim> {
    disks
        .persistent_volume_claims()
        .into_iter()
        .map(|mut claim| {
            claim.metadata.namespace = None;
            claim
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpm::Config;
    use crate::crds::TriggerStrategy;
    use crate::error::Error;
    use crate::manifest::MockReleaseImageProvider;

    const BPM: &str = r"
processes:
- name: redis
  executable: /bin/redis
  persistent_disk: true
";

    fn instance_group(lifecycle: &str) -> InstanceGroup {
        let yaml = format!(
            r"
name: redis
lifecycle: {lifecycle}
instances: 2
azs: [z1]
persistent_disk: 1024
env:
  bosh:
    agent:
      settings:
        labels:
          team: data
        annotations:
          owner: data-team
        serviceAccountName: redis
jobs:
- name: redis-server
  release: redis
  properties:
    quarks:
      ports:
      - name: redis
        internal: 6379
"
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn configs() -> BpmConfigs {
        BpmConfigs::from([(
            "redis-server".to_string(),
            Config::from_yaml("redis-server", BPM).unwrap(),
        )])
    }

    fn images() -> MockReleaseImageProvider {
        let mut images = MockReleaseImageProvider::new();
        images
            .expect_release_image()
            .returning(|_, _| Ok("registry/redis:1".to_string()));
        images
    }

    fn compile(ig: &InstanceGroup) -> Result<CompiledResources> {
        let config = ConverterConfig::with_operator_image("operator:1");
        InstanceGroupCompiler::new(&config).bpm_resources("cf", "3", ig, &images(), &configs())
    }

    #[test]
    fn service_lifecycle_builds_stateful_set() {
        let resources = compile(&instance_group("service")).unwrap();

        assert!(resources.errand.is_none());
        assert_eq!(resources.services.len(), 3);

        let qsts = resources.stateful_set.unwrap();
        assert_eq!(qsts.spec.zones, vec!["z1"]);
        assert!(qsts.spec.update_on_config_change);

        let sts = qsts.spec.template.spec.unwrap();
        assert_eq!(sts.replicas, Some(2));
        assert_eq!(sts.pod_management_policy.as_deref(), Some("Parallel"));

        let claims = sts.volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("cf-redis-pvc"));

        let pod = sts.template.spec.unwrap();
        assert_eq!(pod.subdomain.as_deref(), Some("cf-redis"));
        assert_eq!(pod.security_context.unwrap().fs_group, Some(1000));
        assert_eq!(pod.service_account_name.as_deref(), Some("redis"));
        assert!(pod
            .volumes
            .unwrap()
            .iter()
            .all(|volume| volume.persistent_volume_claim.is_none()));

        let redis = &pod.containers[0];
        assert!(redis
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.mount_path == "/var/vcap/store/redis-server" && m.name == "cf-redis-pvc"));

        let metadata = sts.template.metadata.unwrap();
        let labels = metadata.labels.unwrap();
        assert_eq!(labels["team"], "data");
        assert_eq!(labels[LABEL_DEPLOYMENT_VERSION], "3");
        assert_eq!(metadata.annotations.unwrap()["owner"], "data-team");
    }

    #[test]
    fn errand_lifecycle_builds_manual_job() {
        let resources = compile(&instance_group("errand")).unwrap();

        assert!(resources.stateful_set.is_none());
        assert!(resources.services.is_empty());

        let qjob = resources.errand.unwrap();
        assert_eq!(qjob.spec.trigger.strategy, TriggerStrategy::Manual);

        let pod_template = qjob.spec.template.spec.unwrap().template;
        assert_eq!(pod_template.metadata.unwrap().labels.unwrap()[LABEL_DELETE], "pod");

        let pod = pod_template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert!(pod.subdomain.is_none());
        // errands keep the claim as a plain volume
        assert!(pod
            .volumes
            .unwrap()
            .iter()
            .any(|volume| volume.persistent_volume_claim.is_some()));
    }

    #[test]
    fn auto_errand_runs_once() {
        let resources = compile(&instance_group("auto-errand")).unwrap();
        assert_eq!(
            resources.errand.unwrap().spec.trigger.strategy,
            TriggerStrategy::Once
        );
    }

    #[test]
    fn errors_carry_instance_group_context() {
        let mut ig = instance_group("service");
        ig.persistent_disk = None;

        let err = compile(&ig).unwrap_err();
        assert!(matches!(
            err,
            Error::InstanceGroup { ref manifest, ref instance_group, .. }
                if manifest == "cf" && instance_group == "redis"
        ));
        assert!(matches!(err.root(), Error::PersistentDiskMissing { .. }));
    }
}
