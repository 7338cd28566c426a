//! Drain hook for run containers.
//!
//! BOSH drain scripts live under `/var/vcap/jobs/<job>/bin/drain/`. Before a
//! container stops, every script runs in parallel. A script printing `-N`
//! asks to be polled again after N seconds, a script printing `N` asks for a
//! final wait of N seconds. Anything else ends its drain right away.

use super::volumes::VOLUME_JOBS_DIR_MOUNT_PATH;
use k8s_openapi::api::core::v1::{ExecAction, Lifecycle, LifecycleHandler};

const DRAIN_SCRIPT_TEMPLATE: &str = r#"run_drain() {
  script="$1"
  args="job_shutdown hash_unchanged"
  while true; do
    output="$("${script}" ${args})" || return 1
    output="$(echo "${output}" | tr -d '[:space:]')"
    if [[ "${output}" =~ ^-[0-9]+$ ]]; then
      sleep "${output#-}"
      args="job_check_status hash_unchanged"
      continue
    fi
    if [[ "${output}" =~ ^[0-9]+$ ]]; then
      sleep "${output}"
    fi
    return 0
  done
}
pids=()
for script in __DRAIN_DIR__/*; do
  [ -f "${script}" ] && [ -x "${script}" ] || continue
  run_drain "${script}" &
  pids+=($!)
done
status=0
for pid in "${pids[@]}"; do
  wait "${pid}" || status=1
done
exit "${status}""#;

/// Directory holding a job's drain scripts
pub fn drain_dir(job: &str) -> String {
    format!("{VOLUME_JOBS_DIR_MOUNT_PATH}/{job}/bin/drain")
}

/// Shell script draining every script of `job`
pub fn drain_script(job: &str) -> String {
    drain_script_in(&drain_dir(job))
}

fn drain_script_in(dir: &str) -> String {
    DRAIN_SCRIPT_TEMPLATE.replace("__DRAIN_DIR__", dir)
}

/// Pre-stop hook running the drain script of `job`
pub fn drain_lifecycle(job: &str) -> Lifecycle {
    Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    drain_script(job),
                ]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
