//! Container factory
//!
//! Turns the jobs of an instance group into init containers (preparing the
//! BOSH directory layout) and run containers (one per BPM process).

use super::disks::{dedup_mounts, Disks, LABEL_EPHEMERAL, LABEL_JOB_NAME, LABEL_PROCESS_NAME};
use super::drain::drain_lifecycle;
use super::volumes::{
    self, JOBS_SRC_DIR, RESOLVED_PROPERTIES_FILE_NAME, VOLUME_DATA_DIR_MOUNT_PATH,
    VOLUME_JOBS_DIR_MOUNT_PATH, VOLUME_RENDERING_DATA_MOUNT_PATH, VOLUME_SYS_DIR_MOUNT_PATH,
};
use crate::bpm::{BpmConfigs, Config, Process};
use crate::config::ConverterConfig;
use crate::error::{Error, Result};
use crate::labels::{LABEL_AZ_INDEX, LABEL_POD_ORDINAL};
use crate::manifest::{InstanceGroup, Job, ReleaseImageProvider};
use crate::names;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, ObjectFieldSelector, ResourceRequirements,
    SecurityContext, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const DUMB_INIT: &str = "/usr/bin/dumb-init";
pub const LOG_SIDECAR_CONTAINER_NAME: &str = "logs";
pub const TEMPLATE_RENDER_CONTAINER_NAME: &str = "template-render";
pub const CREATE_DIRS_CONTAINER_NAME: &str = "create-dirs";

const DEBUG_WINDOW: &str = r#"( echo "Debug window 1hr" ; sleep 3600 )"#;

/// Stages of pod initialization, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitStage {
    /// Copy job sources out of every release image
    SpecCopier,
    /// Render job templates from the resolved properties
    TemplateRender,
    /// Create the data, log and run directories of every job
    CreateDirs,
    /// BOSH `pre-start` scripts
    BoshPreStart,
    /// BPM `pre_start` hooks
    BpmPreStart,
}

/// Init containers grouped by stage. Flattening always yields them in stage
/// order, whatever order they were added in.
#[derive(Debug, Clone, Default)]
pub struct InitPipeline {
    stages: BTreeMap<InitStage, Vec<Container>>,
}

impl InitPipeline {
    pub fn add(&mut self, stage: InitStage, container: Container) {
        self.stages.entry(stage).or_default().push(container);
    }

    pub fn stage(&self, stage: InitStage) -> &[Container] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_containers(self) -> Vec<Container> {
        self.stages.into_values().flatten().collect()
    }
}

/// Builds the containers of one instance group's pods.
pub struct ContainerFactory<'a> {
    manifest_name: &'a str,
    instance_group: &'a InstanceGroup,
    version: &'a str,
    disable_log_sidecar: bool,
    release_images: &'a dyn ReleaseImageProvider,
    bpm_configs: &'a BpmConfigs,
    config: &'a ConverterConfig,
}

impl<'a> ContainerFactory<'a> {
    #[must_use]
    pub fn new(
        manifest_name: &'a str,
        instance_group: &'a InstanceGroup,
        version: &'a str,
        release_images: &'a dyn ReleaseImageProvider,
        bpm_configs: &'a BpmConfigs,
        config: &'a ConverterConfig,
    ) -> Self {
        Self {
            manifest_name,
            instance_group,
            version,
            disable_log_sidecar: instance_group.settings().disable_log_sidecar,
            release_images,
            bpm_configs,
            config,
        }
    }

    /// Init containers for all jobs, in stage order.
    pub fn jobs_to_init_containers(&self, disks: &Disks) -> Result<Vec<Container>> {
        Ok(self.init_pipeline(disks)?.into_containers())
    }

    /// The init stages of the instance group's pods.
    pub fn init_pipeline(&self, disks: &Disks) -> Result<InitPipeline> {
        let ig = self.instance_group;
        let mut pipeline = InitPipeline::default();
        let mut copied_releases = BTreeSet::new();
        // bpm pre-start containers are named by process only
        let mut pre_start_names = BTreeSet::new();

        for job in &ig.jobs {
            let config = self.bpm_config(job)?;
            let image = self.release_image(job)?;

            if copied_releases.insert(job.release.as_str()) {
                pipeline.add(InitStage::SpecCopier, spec_copier_container(&job.release, &image));
            }

            pipeline.add(
                InitStage::BoshPreStart,
                Self::bosh_pre_start_container(job, config, &image, disks),
            );

            for process in &config.processes {
                if let Some(hook) = process.pre_start() {
                    let container =
                        Self::bpm_pre_start_container(job, config, process, hook, &image, disks);
                    if !pre_start_names.insert(container.name.clone()) {
                        return Err(Error::DuplicateInitContainer {
                            instance_group: ig.name.clone(),
                            name: container.name,
                        });
                    }
                    pipeline.add(InitStage::BpmPreStart, container);
                }
            }
        }

        pipeline.add(InitStage::TemplateRender, self.template_render_container());
        pipeline.add(InitStage::CreateDirs, self.create_dirs_container());

        debug!(
            instance_group = %ig.name,
            version = %self.version,
            "built init pipeline"
        );
        Ok(pipeline)
    }

    /// One run container per BPM process, plus the log sidecar.
    pub fn jobs_to_containers(&self, disks: &Disks) -> Result<Vec<Container>> {
        let ig = self.instance_group;
        if ig.jobs.is_empty() {
            return Err(Error::NoJobsDefined {
                instance_group: ig.name.clone(),
            });
        }

        let mut containers = Vec::new();
        for job in &ig.jobs {
            let config = self.bpm_config(job)?;
            let image = self.release_image(job)?;

            for process in &config.processes {
                containers.push(self.process_container(job, config, process, &image, disks));
            }
        }

        if !self.disable_log_sidecar {
            containers.push(self.log_sidecar_container());
        }

        Ok(containers)
    }

    fn bpm_config(&self, job: &Job) -> Result<&'a Config> {
        self.bpm_configs
            .get(&job.name)
            .ok_or_else(|| Error::BpmConfigNotFound {
                job: job.name.clone(),
            })
    }

    fn release_image(&self, job: &Job) -> Result<String> {
        self.release_images
            .release_image(&self.instance_group.name, &job.name)
    }

    /// Ephemeral and persistent mounts of a job
    fn job_mounts(job: &Job, config: &Config, disks: &Disks) -> Vec<VolumeMount> {
        let mut mounts = disks
            .filter(LABEL_JOB_NAME, &job.name)
            .filter(LABEL_EPHEMERAL, "true")
            .volume_mounts();

        if config.processes.iter().any(|p| p.persistent_disk) {
            if let Some(volume) = disks.persistent_volume_name() {
                mounts.push(volumes::persistent_mount(volume, &job.name));
            }
        }

        mounts
    }

    /// Additional and unrestricted mounts of one process
    fn process_mounts(job: &Job, process: &Process, disks: &Disks) -> Vec<VolumeMount> {
        disks
            .filter(LABEL_JOB_NAME, &job.name)
            .filter(LABEL_PROCESS_NAME, &process.name)
            .volume_mounts()
    }

    fn all_mounts(
        job: &Job,
        config: &Config,
        process: &Process,
        disks: &Disks,
    ) -> Vec<VolumeMount> {
        dedup_mounts(
            volumes::default_volume_mounts()
                .into_iter()
                .chain(Self::job_mounts(job, config, disks))
                .chain(Self::process_mounts(job, process, disks)),
        )
    }

    fn template_render_container(&self) -> Container {
        let ig = &self.instance_group.name;
        let manifest_path = format!(
            "{}/{RESOLVED_PROPERTIES_FILE_NAME}",
            volumes::resolved_properties_dir(ig)
        );

        Container {
            name: TEMPLATE_RENDER_CONTAINER_NAME.to_string(),
            image: Some(self.config.operator_image()),
            command: Some(vec![DUMB_INIT.to_string(), "--".to_string()]),
            args: Some(vec![
                self.config.utility_binary.clone(),
                "util".to_string(),
                "template-render".to_string(),
            ]),
            env: Some(vec![
                env("INSTANCE_GROUP_NAME", ig),
                env("BOSH_MANIFEST_PATH", &manifest_path),
                env("JOBS_DIR", VOLUME_RENDERING_DATA_MOUNT_PATH),
                env("DEPLOYMENT_NAME", self.manifest_name),
                env("REPLICAS", &self.instance_group.instances.to_string()),
                field_env("POD_NAME", "metadata.name"),
                field_env("POD_IP", "status.podIP"),
                field_env("AZ_INDEX", &format!("metadata.labels['{LABEL_AZ_INDEX}']")),
                field_env("POD_ORDINAL", &format!("metadata.labels['{LABEL_POD_ORDINAL}']")),
            ]),
            volume_mounts: Some(vec![
                volumes::rendering_data_mount(),
                volumes::jobs_dir_mount(),
                volumes::resolved_properties_mount(ig),
            ]),
            ..Default::default()
        }
    }

    fn create_dirs_container(&self) -> Container {
        let dirs: Vec<String> = self
            .instance_group
            .jobs
            .iter()
            .flat_map(|job| {
                let job = &job.name;
                [
                    format!("{VOLUME_DATA_DIR_MOUNT_PATH}/{job}"),
                    format!("{VOLUME_DATA_DIR_MOUNT_PATH}/sys/log/{job}"),
                    format!("{VOLUME_DATA_DIR_MOUNT_PATH}/sys/run/{job}"),
                    format!("{VOLUME_SYS_DIR_MOUNT_PATH}/log/{job}"),
                    format!("{VOLUME_SYS_DIR_MOUNT_PATH}/run/{job}"),
                ]
            })
            .collect();

        shell_container(
            CREATE_DIRS_CONTAINER_NAME,
            &self.config.operator_image(),
            format!("mkdir -p {}", dirs.join(" ")),
            vec![volumes::data_dir_mount(), volumes::sys_dir_mount()],
        )
    }

    fn bosh_pre_start_container(
        job: &Job,
        config: &Config,
        image: &str,
        disks: &Disks,
    ) -> Container {
        let pre_start = format!("{VOLUME_JOBS_DIR_MOUNT_PATH}/{}/bin/pre-start", job.name);
        let script = with_debug_window(
            &format!("if [ -x {pre_start} ]; then {pre_start}; fi"),
            job.quarks().debug,
        );
        let mounts = dedup_mounts(
            volumes::default_volume_mounts()
                .into_iter()
                .chain(Self::job_mounts(job, config, disks)),
        );

        let mut container = shell_container(
            &names::container_name("bosh-pre-start", &job.name),
            image,
            script,
            mounts,
        );
        container.security_context = security_context(&[], job.quarks().privileged);
        container
    }

    fn bpm_pre_start_container(
        job: &Job,
        config: &Config,
        process: &Process,
        hook: &str,
        image: &str,
        disks: &Disks,
    ) -> Container {
        let mut container = shell_container(
            &names::container_name("bpm-pre-start", &process.name),
            image,
            with_debug_window(hook, job.quarks().debug),
            Self::all_mounts(job, config, process, disks),
        );
        container.security_context = security_context(
            &[],
            process.unsafe_config.privileged || job.quarks().privileged,
        );
        container
    }

    fn process_container(
        &self,
        job: &Job,
        config: &Config,
        process: &Process,
        image: &str,
        disks: &Disks,
    ) -> Container {
        let health = job.quarks().run.healthcheck.get(&process.name);
        let working_dir = process
            .workdir
            .clone()
            .unwrap_or_else(|| format!("{VOLUME_JOBS_DIR_MOUNT_PATH}/{}", job.name));

        Container {
            name: names::container_name(&job.name, &process.name),
            image: Some(image.to_string()),
            command: Some(vec![
                DUMB_INIT.to_string(),
                "--".to_string(),
                process.executable.clone(),
            ]),
            args: (!process.args.is_empty()).then(|| process.args.clone()),
            working_dir: Some(working_dir),
            env: Some(self.process_env(job, process)).filter(|env| !env.is_empty()),
            volume_mounts: Some(Self::all_mounts(job, config, process, disks)),
            security_context: security_context(
                &process.capabilities,
                process.unsafe_config.privileged || job.quarks().privileged,
            ),
            resources: process.limits.memory.as_deref().map(memory_limit),
            lifecycle: Some(drain_lifecycle(&job.name)),
            readiness_probe: health.and_then(|h| h.readiness.clone()),
            liveness_probe: health.and_then(|h| h.liveness.clone()),
            ..Default::default()
        }
    }

    /// Process env overrides job overrides, which override the instance
    /// group's defaults. Sorted by name.
    fn process_env(&self, job: &Job, process: &Process) -> Vec<EnvVar> {
        let mut merged: BTreeMap<String, EnvVar> = BTreeMap::new();

        for var in self
            .instance_group
            .settings()
            .env
            .iter()
            .chain(&job.quarks().envs)
        {
            merged.insert(var.name.clone(), var.clone());
        }
        for (name, value) in &process.env {
            merged.insert(name.clone(), env(name, value));
        }

        merged.into_values().collect()
    }

    fn log_sidecar_container(&self) -> Container {
        Container {
            name: LOG_SIDECAR_CONTAINER_NAME.to_string(),
            image: Some(self.config.operator_image()),
            command: Some(vec![DUMB_INIT.to_string(), "--".to_string()]),
            args: Some(vec![
                self.config.utility_binary.clone(),
                "util".to_string(),
                "tail-logs".to_string(),
            ]),
            env: Some(vec![env("LOGS_DIR", &format!("{VOLUME_SYS_DIR_MOUNT_PATH}/log"))]),
            volume_mounts: Some(vec![volumes::sys_dir_mount()]),
            ..Default::default()
        }
    }
}

/// Copies the job sources of a release image into the rendering volume.
pub fn spec_copier_container(release: &str, image: &str) -> Container {
    let target = format!("{VOLUME_RENDERING_DATA_MOUNT_PATH}/jobs-src");
    shell_container(
        &names::container_name("spec-copier", release),
        image,
        format!("mkdir -p {target} && time cp -ar {JOBS_SRC_DIR} {target}/{release}"),
        vec![volumes::rendering_data_mount()],
    )
}

/// Container running `script` with `sh -xc` under dumb-init
pub fn shell_container(
    name: &str,
    image: &str,
    script: String,
    mounts: Vec<VolumeMount>,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![
            DUMB_INIT.to_string(),
            "--".to_string(),
            "/bin/sh".to_string(),
            "-xc".to_string(),
        ]),
        args: Some(vec![script]),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn with_debug_window(script: &str, debug: bool) -> String {
    if debug {
        format!("{script} || {DEBUG_WINDOW}")
    } else {
        script.to_string()
    }
}

pub fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
    }
}

fn security_context(capabilities: &[String], privileged: bool) -> Option<SecurityContext> {
    if capabilities.is_empty() && !privileged {
        return None;
    }

    Some(SecurityContext {
        capabilities: (!capabilities.is_empty()).then(|| Capabilities {
            add: Some(capabilities.to_vec()),
            drop: None,
        }),
        privileged: privileged.then_some(true),
        ..Default::default()
    })
}

/// BPM memory limits use single letter binary units (`512M`, `1G`).
fn memory_limit(limit: &str) -> ResourceRequirements {
    let limit = limit.trim();
    let quantity = match limit.char_indices().last() {
        Some((index, unit))
            if matches!(unit.to_ascii_uppercase(), 'K' | 'M' | 'G' | 'T')
                && index > 0
                && limit[..index].chars().all(|c| c.is_ascii_digit()) =>
        {
            format!("{}{}i", &limit[..index], unit.to_ascii_uppercase())
        }
        _ => limit.to_string(),
    };

    ResourceRequirements {
        limits: Some(BTreeMap::from([("memory".to_string(), Quantity(quantity))])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::disks::DiskPlanner;
    use crate::manifest::MockReleaseImageProvider;
    use pretty_assertions::assert_eq;

    const REDIS_BPM: &str = r"
processes:
- name: redis
  executable: /var/vcap/packages/redis/bin/redis-server
  args: [/var/vcap/jobs/redis-server/config/redis.conf]
  env:
    REDIS_MODE: slave
  capabilities: [NET_BIND_SERVICE]
  ephemeral_disk: true
  limits:
    memory: 1G
  hooks:
    pre_start: /var/vcap/jobs/redis-server/bin/bpm-pre-start
  additional_volumes:
  - path: /var/vcap/data/shared/foo
    writable: true
";

    const LOGGR_BPM: &str = r"
processes:
- name: udp-forwarder
  executable: /var/vcap/packages/loggr/bin/forwarder
";

    fn instance_group() -> InstanceGroup {
        let yaml = r"
name: redis-slave
instances: 2
env:
  bosh:
    agent:
      settings:
        env:
        - name: REDIS_MODE
          value: standalone
        - name: TZ
          value: UTC
jobs:
- name: redis-server
  release: redis
  properties:
    quarks:
      debug: true
      envs:
      - name: TZ
        value: Europe/Berlin
      ports:
      - name: redis
        internal: 6379
      run:
        healthcheck:
          redis:
            readiness:
              exec:
                command: [redis-cli, ping]
- name: loggr
  release: loggregator
- name: redis-sentinel
  release: redis
";
        serde_yaml::from_str(yaml).unwrap()
    }

    fn bpm_configs() -> BpmConfigs {
        BpmConfigs::from([
            (
                "redis-server".to_string(),
                Config::from_yaml("redis-server", REDIS_BPM).unwrap(),
            ),
            ("loggr".to_string(), Config::from_yaml("loggr", LOGGR_BPM).unwrap()),
            (
                "redis-sentinel".to_string(),
                Config::from_yaml("redis-sentinel", "processes: []").unwrap(),
            ),
        ])
    }

    fn images() -> MockReleaseImageProvider {
        let mut images = MockReleaseImageProvider::new();
        images
            .expect_release_image()
            .returning(|_, job| Ok(format!("registry/{job}:1.0")));
        images
    }

    fn config() -> ConverterConfig {
        ConverterConfig::with_operator_image("operator/cf-operator:7.0")
    }

    fn disks(ig: &InstanceGroup, configs: &BpmConfigs) -> Disks {
        let planner = DiskPlanner::new("cf", ig, "1", "default");
        let mut disks = planner.default_disks();
        disks.extend(planner.bpm_disks(configs).unwrap());
        disks
    }

    fn names_of(containers: &[Container]) -> Vec<&str> {
        containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn init_containers_follow_stage_order() {
        let ig = instance_group();
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let containers = factory.jobs_to_init_containers(&disks(&ig, &configs)).unwrap();

        assert_eq!(
            names_of(&containers),
            vec![
                "spec-copier-redis",
                "spec-copier-loggregator",
                "template-render",
                "create-dirs",
                "bosh-pre-start-redis-server",
                "bosh-pre-start-loggr",
                "bosh-pre-start-redis-sentinel",
                "bpm-pre-start-redis",
            ]
        );
    }

    #[test]
    fn pipeline_keeps_stages_apart() {
        let mut pipeline = InitPipeline::default();
        let named = |name: &str| Container {
            name: name.to_string(),
            ..Default::default()
        };
        pipeline.add(InitStage::BpmPreStart, named("late"));
        pipeline.add(InitStage::SpecCopier, named("early"));

        assert_eq!(pipeline.stage(InitStage::SpecCopier).len(), 1);
        assert!(pipeline.stage(InitStage::CreateDirs).is_empty());
        assert_eq!(names_of(&pipeline.into_containers()), vec!["early", "late"]);
    }

    #[test]
    fn pre_start_containers_get_debug_window() {
        let ig = instance_group();
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);
        let containers = factory.jobs_to_init_containers(&disks(&ig, &configs)).unwrap();

        let bosh = containers.iter().find(|c| c.name == "bosh-pre-start-redis-server").unwrap();
        assert_eq!(
            bosh.args.as_ref().unwrap()[0],
            "if [ -x /var/vcap/jobs/redis-server/bin/pre-start ]; then \
             /var/vcap/jobs/redis-server/bin/pre-start; fi || \
             ( echo \"Debug window 1hr\" ; sleep 3600 )"
        );
        assert_eq!(bosh.image.as_deref(), Some("registry/redis-server:1.0"));

        let loggr = containers.iter().find(|c| c.name == "bosh-pre-start-loggr").unwrap();
        assert!(!loggr.args.as_ref().unwrap()[0].contains("Debug window"));

        let bpm = containers.iter().find(|c| c.name == "bpm-pre-start-redis").unwrap();
        let mount_paths: Vec<_> = bpm
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(
            mount_paths,
            vec![
                "/var/vcap/all-releases",
                "/var/vcap/jobs",
                "/var/vcap/data",
                "/var/vcap/sys",
                "/var/vcap/data/redis-server",
                "/var/vcap/data/shared/foo",
            ]
        );
    }

    #[test]
    fn clashing_bpm_pre_start_names_are_rejected() {
        let ig = instance_group();
        let mut configs = bpm_configs();
        configs.insert(
            "loggr".to_string(),
            Config::from_yaml(
                "loggr",
                r"
processes:
- name: redis
  executable: /bin/forwarder
  hooks:
    pre_start: /bin/setup
",
            )
            .unwrap(),
        );
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let err = factory.init_pipeline(&disks(&ig, &configs)).unwrap_err();
        match err {
            Error::DuplicateInitContainer {
                instance_group,
                name,
            } => {
                assert_eq!(instance_group, "redis-slave");
                assert_eq!(name, "bpm-pre-start-redis");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn colliding_mount_paths_keep_the_job_disk() {
        let ig = instance_group();
        let mut configs = bpm_configs();
        configs.insert(
            "redis-server".to_string(),
            Config::from_yaml(
                "redis-server",
                r"
processes:
- name: redis
  executable: /bin/redis
  ephemeral_disk: true
  additional_volumes:
  - path: /var/vcap/data/redis-server
",
            )
            .unwrap(),
        );
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let containers = factory.jobs_to_containers(&disks(&ig, &configs)).unwrap();
        let redis = containers.iter().find(|c| c.name == "redis-server-redis").unwrap();
        let mounts: Vec<_> = redis
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .filter(|m| m.mount_path == "/var/vcap/data/redis-server")
            .collect();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].sub_path.as_deref(), Some("redis-server"));
        assert_eq!(mounts[0].read_only, None);
    }

    #[test]
    fn template_render_uses_operator_image() {
        let ig = instance_group();
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);
        let pipeline = factory.init_pipeline(&disks(&ig, &configs)).unwrap();

        let render = &pipeline.stage(InitStage::TemplateRender)[0];
        assert_eq!(render.image.as_deref(), Some("operator/cf-operator:7.0"));
        let env = render.env.as_ref().unwrap();
        let manifest_path = env.iter().find(|e| e.name == "BOSH_MANIFEST_PATH").unwrap();
        assert_eq!(
            manifest_path.value.as_deref(),
            Some("/var/run/secrets/resolved-properties/redis-slave/properties.yaml")
        );
        let replicas = env.iter().find(|e| e.name == "REPLICAS").unwrap();
        assert_eq!(replicas.value.as_deref(), Some("2"));

        let create_dirs = &pipeline.stage(InitStage::CreateDirs)[0];
        let script = &create_dirs.args.as_ref().unwrap()[0];
        assert!(script.starts_with("mkdir -p /var/vcap/data/redis-server "));
        assert!(script.contains("/var/vcap/sys/run/loggr"));
    }

    #[test]
    fn run_containers_per_process_and_log_sidecar() {
        let ig = instance_group();
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let containers = factory.jobs_to_containers(&disks(&ig, &configs)).unwrap();
        assert_eq!(
            names_of(&containers),
            vec!["redis-server-redis", "loggr-udp-forwarder", "logs"]
        );

        let redis = &containers[0];
        assert_eq!(
            redis.command.as_ref().unwrap(),
            &vec![
                "/usr/bin/dumb-init".to_string(),
                "--".to_string(),
                "/var/vcap/packages/redis/bin/redis-server".to_string(),
            ]
        );
        assert_eq!(redis.working_dir.as_deref(), Some("/var/vcap/jobs/redis-server"));
        assert!(redis.readiness_probe.is_some());
        assert!(redis.liveness_probe.is_none());
        assert!(redis.lifecycle.as_ref().unwrap().pre_stop.is_some());
        assert_eq!(
            redis.resources.as_ref().unwrap().limits.as_ref().unwrap()["memory"],
            Quantity("1Gi".to_string())
        );
        let capabilities = redis.security_context.as_ref().unwrap().capabilities.as_ref().unwrap();
        assert_eq!(capabilities.add.as_deref(), Some(&["NET_BIND_SERVICE".to_string()][..]));

        assert!(containers[1].security_context.is_none());
        assert!(containers[1].resources.is_none());
    }

    #[test]
    fn env_precedence_is_process_then_job_then_instance_group() {
        let ig = instance_group();
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);
        let containers = factory.jobs_to_containers(&disks(&ig, &configs)).unwrap();

        let env: Vec<_> = containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(env, vec![("REDIS_MODE", "slave"), ("TZ", "Europe/Berlin")]);

        let loggr_env: Vec<_> = containers[1]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(loggr_env, vec![("REDIS_MODE", "standalone"), ("TZ", "UTC")]);
    }

    #[test]
    fn log_sidecar_can_be_disabled() {
        let mut ig = instance_group();
        ig.env.bosh.agent.settings.disable_log_sidecar = true;
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let containers = factory.jobs_to_containers(&disks(&ig, &configs)).unwrap();
        assert!(containers.iter().all(|c| c.name != "logs"));
    }

    #[test]
    fn privileged_job_makes_every_container_privileged() {
        let mut ig = instance_group();
        ig.jobs[1].properties.quarks.privileged = true;
        let configs = bpm_configs();
        let images = images();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let containers = factory.jobs_to_containers(&disks(&ig, &configs)).unwrap();
        let loggr = containers.iter().find(|c| c.name == "loggr-udp-forwarder").unwrap();
        assert_eq!(loggr.security_context.as_ref().unwrap().privileged, Some(true));
    }

    #[test]
    fn empty_job_list_is_rejected() {
        let ig = InstanceGroup {
            name: "empty".to_string(),
            ..Default::default()
        };
        let configs = BpmConfigs::new();
        let images = MockReleaseImageProvider::new();
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let err = factory.jobs_to_containers(&Disks::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::NoJobsDefined { ref instance_group } if instance_group == "empty"
        ));
    }

    #[test]
    fn image_lookup_errors_propagate() {
        let ig = instance_group();
        let configs = bpm_configs();
        let mut images = MockReleaseImageProvider::new();
        images.expect_release_image().returning(|ig, job| {
            Err(Error::ReleaseImageLookupFailed {
                instance_group: ig.to_string(),
                job: job.to_string(),
                reason: "release not found".to_string(),
            })
        });
        let config = config();
        let factory = ContainerFactory::new("cf", &ig, "1", &images, &configs, &config);

        let err = factory.jobs_to_init_containers(&disks(&ig, &configs)).unwrap_err();
        assert!(matches!(
            err,
            Error::ReleaseImageLookupFailed { ref job, .. } if job == "redis-server"
        ));
    }

    #[test]
    fn memory_limits_use_binary_units() {
        let quantity = |limit: &str| memory_limit(limit).limits.unwrap()["memory"].0.clone();
        assert_eq!(quantity("512M"), "512Mi");
        assert_eq!(quantity("2g"), "2Gi");
        assert_eq!(quantity("1Gi"), "1Gi");
        assert_eq!(quantity("1000"), "1000");
    }
}
