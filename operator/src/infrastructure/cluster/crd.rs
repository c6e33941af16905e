//! Kubernetes representation of an OVN database cluster and its mapping onto the
//! domain model.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::{CustomResource, KubeSchema, ResourceExt, core::Rule};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::domain::{
    cluster::entities::{
        ClusterRef, ClusterStatus, Condition, ConditionKind, ConditionStatus, Conditions,
        DbType, DebugSpec, Fingerprint, OvnDbCluster, RawClusterSpec, Reason, Resources, SubResource,
    },
    error::OperatorError,
};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, KubeSchema)]
#[kube(
    group = "ovn.openstack.org",
    version = "v1beta1",
    kind = "OVNDBCluster",
    plural = "ovndbclusters",
    status = "OVNDBClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"NetworkAttachments", "type":"string", "description":"NetworkAttachments", "jsonPath":".spec.networkAttachment"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "description":"Status", "jsonPath":".status.conditions[0].status"}"#,
    printcolumn = r#"{"name":"Message", "type":"string", "description":"Message", "jsonPath":".status.conditions[0].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OVNDBClusterSpec {
    /// Container image URL, the operator default is used when empty
    #[serde(default)]
    pub container_image: String,

    /// NB or SB, fixed once the cluster exists
    #[serde(default = "default_db_type")]
    #[x_kube(validation = Rule::new("self == oldSelf").message("dbType is immutable"))]
    pub db_type: String,

    #[serde(default = "default_replicas")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// ovsdb-server log level (info, dbg, emer, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub debug: OVNDBClusterDebug,

    /// RAFT election timer in milliseconds
    #[serde(default = "default_election_timer")]
    pub election_timer: Option<i32>,

    /// OVSDB session probe interval in milliseconds
    #[serde(default = "default_probe")]
    pub inactivity_probe: Option<i32>,

    /// Probe interval from a standby to the active remote in milliseconds
    #[serde(default = "default_probe")]
    pub probe_interval_to_active: Option<i32>,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    pub storage_request: String,

    /// NetworkAttachmentDefinition exposing the database to external nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_attachment: Option<String>,
}

fn default_db_type() -> String {
    "NB".to_string()
}

fn default_replicas() -> Option<i32> {
    Some(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_election_timer() -> Option<i32> {
    Some(10_000)
}

fn default_probe() -> Option<i32> {
    Some(60_000)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OVNDBClusterDebug {
    #[serde(default)]
    pub service: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OVNDBClusterStatus {
    /// Database type the cluster was created with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub ready_count: i32,

    /// Fingerprints of applied sub-resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hash: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StatusCondition>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raft_address: String,

    /// Address used by external nodes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub db_address: String,

    /// Address used by other pods in the cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_db_address: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network_attachments: BTreeMap<String, Vec<String>>,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: String,
}

impl From<&Condition> for StatusCondition {
    fn from(condition: &Condition) -> Self {
        StatusCondition {
            r#type: condition.kind.as_str().to_string(),
            status: condition.status.as_str().to_string(),
            reason: condition.reason.as_str().to_string(),
            message: condition.message.clone(),
            last_transition_time: condition
                .last_transition_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

impl From<&ClusterStatus> for OVNDBClusterStatus {
    fn from(status: &ClusterStatus) -> Self {
        OVNDBClusterStatus {
            db_type: status.db_type.map(|db_type| db_type.to_string()),
            ready_count: i32::try_from(status.ready_count).unwrap_or(i32::MAX),
            hash: status
                .hash
                .iter()
                .map(|(resource, fingerprint)| (resource.key().to_string(), fingerprint.to_hex()))
                .collect(),
            conditions: status.conditions.iter().map(StatusCondition::from).collect(),
            raft_address: status.raft_address.clone(),
            db_address: status.db_address.clone(),
            internal_db_address: status.internal_db_address.clone(),
            network_attachments: status.network_attachments.clone(),
        }
    }
}

impl TryFrom<&OVNDBClusterStatus> for ClusterStatus {
    type Error = OperatorError;

    fn try_from(status: &OVNDBClusterStatus) -> Result<Self, Self::Error> {
        let mut hash = BTreeMap::new();
        for (key, value) in &status.hash {
            // Keys written by other tooling are left alone.
            if let Some(resource) = SubResource::from_key(key) {
                hash.insert(resource, Fingerprint::from_hex(value)?);
            }
        }

        let mut conditions = Conditions::default();
        for entry in &status.conditions {
            let Some(kind) = ConditionKind::from_str_opt(&entry.r#type) else {
                continue;
            };
            let last_transition_time = DateTime::parse_from_rfc3339(&entry.last_transition_time)
                .map_err(|e| OperatorError::MalformedState {
                    message: format!(
                        "condition {} has an invalid transition time: {e}",
                        entry.r#type
                    ),
                })?
                .with_timezone(&Utc);
            conditions.insert(Condition {
                kind,
                status: ConditionStatus::parse(&entry.status),
                reason: Reason::parse(&entry.reason),
                message: entry.message.clone(),
                last_transition_time,
            });
        }

        let db_type = status
            .db_type
            .as_deref()
            .map(|value| {
                value.parse::<DbType>().map_err(|_| OperatorError::MalformedState {
                    message: format!("status records an unknown dbType {value:?}"),
                })
            })
            .transpose()?;

        Ok(ClusterStatus {
            db_type,
            ready_count: u32::try_from(status.ready_count).unwrap_or(0),
            hash,
            conditions,
            raft_address: status.raft_address.clone(),
            db_address: status.db_address.clone(),
            internal_db_address: status.internal_db_address.clone(),
            network_attachments: status.network_attachments.clone(),
        })
    }
}

impl From<&OVNDBClusterSpec> for RawClusterSpec {
    fn from(spec: &OVNDBClusterSpec) -> Self {
        RawClusterSpec {
            db_type: spec.db_type.clone(),
            replicas: spec.replicas,
            election_timer: spec.election_timer,
            inactivity_probe: spec.inactivity_probe,
            probe_interval_to_active: spec.probe_interval_to_active,
            container_image: spec.container_image.clone(),
            resources: Resources {
                requests: spec.resources.requests.clone(),
                limits: spec.resources.limits.clone(),
            },
            storage_class: spec.storage_class.clone().filter(|class| !class.is_empty()),
            storage_request: spec.storage_request.clone(),
            node_selector: spec.node_selector.clone(),
            network_attachment: spec.network_attachment.clone(),
            log_level: Some(spec.log_level.clone()).filter(|level| !level.is_empty()),
            debug: DebugSpec {
                service: spec.debug.service,
            },
        }
    }
}

impl TryFrom<&OVNDBCluster> for OvnDbCluster {
    type Error = OperatorError;

    fn try_from(object: &OVNDBCluster) -> Result<Self, Self::Error> {
        let namespace = object
            .namespace()
            .ok_or_else(|| OperatorError::MalformedState {
                message: format!("OVNDBCluster {} has no namespace", object.name_any()),
            })?;
        let mut cluster = ClusterRef::new(object.name_any(), namespace);
        if let Some(uid) = object.uid() {
            cluster = cluster.with_uid(uid);
        }
        let status = match &object.status {
            Some(status) => ClusterStatus::try_from(status)?,
            None => ClusterStatus::default(),
        };

        Ok(OvnDbCluster {
            cluster,
            spec: RawClusterSpec::from(&object.spec),
            status,
        })
    }
}
