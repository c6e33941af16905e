use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{
            StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec,
        },
        core::v1::{
            ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort,
            EnvFromSource, EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector,
            PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
            ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
            VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
    },
};
use kube::Resource;

use crate::{
    domain::cluster::entities::{ClusterRef, DbType, WorkloadTemplate},
    infrastructure::cluster::crd::OVNDBCluster,
};

pub const CONTAINER_NAME: &str = "ovsdb-server";
pub const CLUSTER_LABEL: &str = "ovn.openstack.org/cluster";
pub const SERVICE_LABEL: &str = "service";
pub const SERVICE_CONFIG_ANNOTATION: &str = "ovn.openstack.org/service-config-hash";
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
pub const FIELD_MANAGER: &str = "ovndb-operator";

const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/etc/ovn";
const SCRIPTS_VOLUME: &str = "scripts";
const SCRIPTS_PATH: &str = "/usr/local/bin/container-scripts";
/// Where ovsdb-server puts its control and database sockets.
const RUN_DIR: &str = "/tmp";

const SETUP_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail
HOST="${POD_NAME}.${SERVICE_NAME}.${NAMESPACE}.svc.cluster.local"
OPTS=(
  "--db-${DB_TYPE}-cluster-local-addr=${HOST}"
  "--db-${DB_TYPE}-cluster-local-port=${RAFT_PORT}"
  "--db-${DB_TYPE}-election-timer=${ELECTION_TIMER}"
  "--db-${DB_TYPE}-addr=0.0.0.0"
  "--db-${DB_TYPE}-port=${DB_PORT}"
  "--db-${DB_TYPE}-create-insecure-remote=yes"
  "--ovn-${DB_TYPE}-log=-vconsole:${LOG_LEVEL} -vfile:off"
)
if [[ "${POD_NAME##*-}" != "0" ]]; then
  OPTS+=(
    "--db-${DB_TYPE}-cluster-remote-addr=${SERVICE_NAME}-0.${SERVICE_NAME}.${NAMESPACE}.svc.cluster.local"
    "--db-${DB_TYPE}-cluster-remote-port=${RAFT_PORT}"
  )
fi
exec /usr/share/ovn/scripts/ovn-ctl "run_${DB_TYPE}_ovsdb" "${OPTS[@]}"
"#;

pub fn config_map_name(cluster: &ClusterRef, db_type: DbType) -> String {
    format!("{}-config", cluster.workload_name(db_type))
}

pub fn labels(cluster: &ClusterRef, db_type: DbType) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_LABEL.to_string(), db_type.service_name().to_string()),
        (CLUSTER_LABEL.to_string(), cluster.name.clone()),
    ])
}

pub fn label_selector(cluster: &ClusterRef, db_type: DbType) -> String {
    labels(cluster, db_type)
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn owner_references(cluster: &ClusterRef) -> Option<Vec<OwnerReference>> {
    let uid = cluster.uid.clone()?;
    Some(vec![OwnerReference {
        api_version: OVNDBCluster::api_version(&()).to_string(),
        kind: OVNDBCluster::kind(&()).to_string(),
        name: cluster.name.clone(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    }])
}

fn metadata(cluster: &ClusterRef, db_type: DbType, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(cluster.namespace.clone()),
        labels: Some(labels(cluster, db_type)),
        owner_references: owner_references(cluster),
        ..ObjectMeta::default()
    }
}

/// Gives every member a stable DNS name, including while it is not ready, so
/// RAFT peers can find each other during bootstrap.
pub fn make_headless_service(cluster: &ClusterRef, db_type: DbType) -> Service {
    Service {
        metadata: metadata(cluster, db_type, cluster.workload_name(db_type)),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels(cluster, db_type)),
            ports: Some(vec![
                ServicePort {
                    name: Some("db".to_string()),
                    port: i32::from(db_type.client_port()),
                    ..ServicePort::default()
                },
                ServicePort {
                    name: Some("raft".to_string()),
                    port: i32::from(db_type.raft_port()),
                    ..ServicePort::default()
                },
            ]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Holds the timers and the startup script. Pods read it at start only, so editing
/// it never restarts members.
pub fn make_config_map(cluster: &ClusterRef, template: &WorkloadTemplate) -> ConfigMap {
    let tuning = &template.tuning;
    ConfigMap {
        metadata: metadata(
            cluster,
            template.db_type,
            config_map_name(cluster, template.db_type),
        ),
        data: Some(BTreeMap::from([
            ("ELECTION_TIMER".to_string(), tuning.election_timer.to_string()),
            (
                "INACTIVITY_PROBE".to_string(),
                tuning.inactivity_probe.to_string(),
            ),
            (
                "PROBE_INTERVAL_TO_ACTIVE".to_string(),
                tuning.probe_interval_to_active.to_string(),
            ),
            ("setup.sh".to_string(), SETUP_SCRIPT.to_string()),
        ])),
        ..ConfigMap::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(key, value)| (key.clone(), Quantity(value.clone())))
            .collect(),
    )
}

fn exec_probe(script: String, period_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["/bin/bash".to_string(), "-c".to_string(), script]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Probe::default()
    }
}

/// Qualifies a bare attachment name with the cluster namespace.
pub fn qualified_attachment(cluster: &ClusterRef, attachment: &str) -> (String, String) {
    match attachment.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (cluster.namespace.clone(), attachment.to_string()),
    }
}

fn make_pod_spec(cluster: &ClusterRef, template: &WorkloadTemplate) -> PodSpec {
    let db_type = template.db_type;
    let workload = &template.workload;
    let ctl = db_type.control_socket();
    let database = db_type.database_name();

    let (command, readiness_probe, liveness_probe) = if workload.debug.service {
        (
            vec!["/bin/sleep".to_string(), "infinity".to_string()],
            None,
            None,
        )
    } else {
        (
            vec![format!("{SCRIPTS_PATH}/setup.sh")],
            Some(exec_probe(
                format!("ovs-appctl -t {ctl} cluster/status {database} | grep -q 'Status: cluster member'"),
                10,
            )),
            Some(exec_probe(format!("ovs-appctl -t {ctl} list-commands"), 30)),
        )
    };

    PodSpec {
        containers: vec![Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(workload.container_image.clone()),
            command: Some(command),
            env: Some(vec![
                env("DB_TYPE", db_type.as_str().to_lowercase()),
                env("DB_PORT", db_type.client_port().to_string()),
                env("RAFT_PORT", db_type.raft_port().to_string()),
                env("SERVICE_NAME", cluster.workload_name(db_type)),
                env("LOG_LEVEL", workload.log_level.clone()),
                env("OVN_RUNDIR", RUN_DIR),
                field_env("POD_NAME", "metadata.name"),
                field_env("NAMESPACE", "metadata.namespace"),
            ]),
            env_from: Some(vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: config_map_name(cluster, db_type),
                    ..ConfigMapEnvSource::default()
                }),
                ..EnvFromSource::default()
            }]),
            ports: Some(vec![
                ContainerPort {
                    name: Some("db".to_string()),
                    container_port: i32::from(db_type.client_port()),
                    ..ContainerPort::default()
                },
                ContainerPort {
                    name: Some("raft".to_string()),
                    container_port: i32::from(db_type.raft_port()),
                    ..ContainerPort::default()
                },
            ]),
            resources: Some(ResourceRequirements {
                requests: quantities(&workload.resources.requests),
                limits: quantities(&workload.resources.limits),
                ..ResourceRequirements::default()
            }),
            readiness_probe,
            liveness_probe,
            volume_mounts: Some(vec![
                VolumeMount {
                    name: DATA_VOLUME.to_string(),
                    mount_path: DATA_PATH.to_string(),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: SCRIPTS_VOLUME.to_string(),
                    mount_path: SCRIPTS_PATH.to_string(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
            ]),
            ..Container::default()
        }],
        node_selector: if workload.node_selector.is_empty() {
            None
        } else {
            Some(workload.node_selector.clone())
        },
        volumes: Some(vec![Volume {
            name: SCRIPTS_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(cluster, db_type),
                default_mode: Some(0o755),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        }]),
        ..PodSpec::default()
    }
}

pub fn make_stateful_set(cluster: &ClusterRef, template: &WorkloadTemplate) -> StatefulSet {
    let db_type = template.db_type;
    let workload = &template.workload;

    let mut annotations = BTreeMap::from([(
        SERVICE_CONFIG_ANNOTATION.to_string(),
        template.service_config.to_hex(),
    )]);
    if let Some(attachment) = &workload.network_attachment {
        let (namespace, name) = qualified_attachment(cluster, attachment);
        annotations.insert(
            NETWORKS_ANNOTATION.to_string(),
            serde_json::json!([{ "name": name, "namespace": namespace }]).to_string(),
        );
    }

    StatefulSet {
        metadata: metadata(cluster, db_type, cluster.workload_name(db_type)),
        spec: Some(StatefulSetSpec {
            replicas: Some(i32::try_from(template.replicas).unwrap_or(i32::MAX)),
            service_name: Some(cluster.workload_name(db_type)),
            selector: LabelSelector {
                match_labels: Some(labels(cluster, db_type)),
                ..LabelSelector::default()
            },
            persistent_volume_claim_retention_policy: Some(
                StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Delete".to_string()),
                    when_scaled: Some("Delete".to_string()),
                },
            ),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(cluster, db_type)),
                    annotations: Some(annotations),
                    ..ObjectMeta::default()
                }),
                spec: Some(make_pod_spec(cluster, template)),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME.to_string()),
                    labels: Some(labels(cluster, db_type)),
                    ..ObjectMeta::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: workload.storage_class.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(workload.storage_request.clone()),
                        )])),
                        ..VolumeResourceRequirements::default()
                    }),
                    ..PersistentVolumeClaimSpec::default()
                }),
                ..PersistentVolumeClaim::default()
            }]),
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    }
}
