//! Service exposer
//!
//! Every instance of an instance group gets a stable per-pod service per
//! availability zone, plus one headless service for the whole group.

use crate::labels::{self, LABEL_AZ_INDEX, LABEL_POD_ORDINAL};
use crate::manifest::InstanceGroup;
use crate::names;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Builds the services addressing an instance group's pods.
pub struct ServiceExposer<'a> {
    manifest_name: &'a str,
    namespace: &'a str,
}

impl<'a> ServiceExposer<'a> {
    #[must_use]
    pub fn new(manifest_name: &'a str, namespace: &'a str) -> Self {
        Self {
            manifest_name,
            namespace,
        }
    }

    /// Per-pod services followed by the headless service. Empty when no job
    /// of the instance group declares a port.
    pub fn services(&self, instance_group: &InstanceGroup) -> Vec<Service> {
        let ports = service_ports(instance_group);
        if ports.is_empty() {
            return Vec::new();
        }

        let zones = instance_group.azs.len().max(1);
        let mut services = Vec::with_capacity(instance_group.instances * zones + 1);

        for index in 0..instance_group.instances {
            for az_index in 0..zones {
                let mut selector =
                    labels::instance_group_labels(self.manifest_name, &instance_group.name);
                selector.insert(LABEL_AZ_INDEX.to_string(), az_index.to_string());
                selector.insert(LABEL_POD_ORDINAL.to_string(), index.to_string());

                services.push(self.service(
                    names::service_name(self.manifest_name, &instance_group.name, az_index, index),
                    instance_group,
                    selector,
                    ports.clone(),
                    None,
                ));
            }
        }

        services.push(self.service(
            names::headless_service_name(self.manifest_name, &instance_group.name),
            instance_group,
            labels::instance_group_labels(self.manifest_name, &instance_group.name),
            ports,
            Some("None".to_string()),
        ));

        services
    }

    fn service(
        &self,
        name: String,
        instance_group: &InstanceGroup,
        selector: BTreeMap<String, String>,
        ports: Vec<ServicePort>,
        cluster_ip: Option<String>,
    ) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels::instance_group_labels(
                    self.manifest_name,
                    &instance_group.name,
                )),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector),
                ports: Some(ports),
                cluster_ip,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn service_ports(instance_group: &InstanceGroup) -> Vec<ServicePort> {
    instance_group
        .jobs
        .iter()
        .flat_map(|job| &job.quarks().ports)
        .map(|port| ServicePort {
            name: Some(names::sanitize(&port.name)),
            protocol: Some(port.protocol.clone()),
            port: port.internal,
            target_port: Some(IntOrString::Int(port.internal)),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_group(instances: usize, azs: &[&str], with_ports: bool) -> InstanceGroup {
        let ports = if with_ports {
            "      ports:\n      - name: redis\n        internal: 6379\n"
        } else {
            ""
        };
        let yaml = format!(
            "name: redis-slave\njobs:\n- name: redis-server\n  release: redis\n  properties:\n    quarks:\n{ports}      debug: false\n"
        );
        let mut ig: InstanceGroup = serde_yaml::from_str(&yaml).unwrap();
        ig.instances = instances;
        ig.azs = azs.iter().map(ToString::to_string).collect();
        ig
    }

    #[test]
    fn no_ports_no_services() {
        let ig = instance_group(3, &[], false);
        assert!(ServiceExposer::new("cf", "default").services(&ig).is_empty());
    }

    #[test]
    fn one_service_per_instance_and_zone_plus_headless() {
        let exposer = ServiceExposer::new("cf", "default");

        assert_eq!(exposer.services(&instance_group(2, &[], true)).len(), 3);
        assert_eq!(exposer.services(&instance_group(2, &["z1", "z2", "z3"], true)).len(), 7);
    }

    #[test]
    fn selectors_address_single_pods() {
        let ig = instance_group(1, &["z1", "z2"], true);
        let services = ServiceExposer::new("cf", "default").services(&ig);

        let second_zone = &services[1];
        assert_eq!(second_zone.metadata.name.as_deref(), Some("cf-redis-slave-z1-0"));
        let selector = second_zone.spec.as_ref().unwrap().selector.as_ref().unwrap();
        assert_eq!(selector[LABEL_AZ_INDEX], "1");
        assert_eq!(selector[LABEL_POD_ORDINAL], "0");
        assert_eq!(selector.len(), 4);

        let port = &second_zone.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 6379);
        assert_eq!(port.target_port, Some(IntOrString::Int(6379)));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn headless_service_selects_whole_group() {
        let ig = instance_group(2, &[], true);
        let services = ServiceExposer::new("cf", "default").services(&ig);

        let headless = services.last().unwrap();
        assert_eq!(headless.metadata.name.as_deref(), Some("cf-redis-slave"));
        let spec = headless.spec.as_ref().unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(
            spec.selector.as_ref().unwrap(),
            &labels::instance_group_labels("cf", "redis-slave")
        );
    }
}
