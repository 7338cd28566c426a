//! Label and annotation keys shared with downstream components.
//!
//! Service selectors and entanglement lookups match on these keys. Renaming
//! any of them breaks addressing of already running pods.

use std::collections::BTreeMap;

/// Deployment (manifest) name
pub const LABEL_DEPLOYMENT_NAME: &str = "quarks.cloudfoundry.org/deployment-name";
/// Instance group name
pub const LABEL_INSTANCE_GROUP_NAME: &str = "quarks.cloudfoundry.org/instance-group-name";
/// Version of the deployment the object was compiled for
pub const LABEL_DEPLOYMENT_VERSION: &str = "quarks.cloudfoundry.org/deployment-version";
/// Index of the availability zone the pod runs in
pub const LABEL_AZ_INDEX: &str = "quarks.cloudfoundry.org/az-index";
/// Ordinal of the pod within its stateful set
pub const LABEL_POD_ORDINAL: &str = "quarks.cloudfoundry.org/pod-ordinal";
/// Kind of generated secret (desired-manifest, ig-resolved, bpm, var)
pub const LABEL_SECRET_TYPE: &str = "quarks.cloudfoundry.org/secret-type";

/// Completed pods carrying this label are garbage collected
pub const LABEL_DELETE: &str = "delete";
pub const LABEL_DELETE_POD: &str = "pod";

/// Labels identifying every object belonging to a deployment.
#[must_use]
pub fn deployment_labels(manifest_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_DEPLOYMENT_NAME.to_string(), manifest_name.to_string())])
}

/// Labels identifying every object belonging to one instance group.
#[must_use]
pub fn instance_group_labels(
    manifest_name: &str,
    instance_group: &str,
) -> BTreeMap<String, String> {
    let mut labels = deployment_labels(manifest_name);
    labels.insert(
        LABEL_INSTANCE_GROUP_NAME.to_string(),
        instance_group.to_string(),
    );
    labels
}
