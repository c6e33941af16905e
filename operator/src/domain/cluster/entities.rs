use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::domain::error::OperatorError;

/// Which OVN database a cluster serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DbType {
    Nb,
    Sb,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Nb => "NB",
            DbType::Sb => "SB",
        }
    }

    pub fn client_port(&self) -> u16 {
        match self {
            DbType::Nb => 6641,
            DbType::Sb => 6642,
        }
    }

    pub fn raft_port(&self) -> u16 {
        match self {
            DbType::Nb => 6643,
            DbType::Sb => 6644,
        }
    }

    /// Base name of the workload and its services.
    pub fn service_name(&self) -> &'static str {
        match self {
            DbType::Nb => "ovsdbserver-nb",
            DbType::Sb => "ovsdbserver-sb",
        }
    }

    pub fn database_name(&self) -> &'static str {
        match self {
            DbType::Nb => "OVN_Northbound",
            DbType::Sb => "OVN_Southbound",
        }
    }

    pub fn control_socket(&self) -> &'static str {
        match self {
            DbType::Nb => "/tmp/ovnnb_db.ctl",
            DbType::Sb => "/tmp/ovnsb_db.ctl",
        }
    }

    pub fn db_socket(&self) -> &'static str {
        match self {
            DbType::Nb => "/tmp/ovnnb_db.sock",
            DbType::Sb => "/tmp/ovnsb_db.sock",
        }
    }

    pub fn ctl_tool(&self) -> &'static str {
        match self {
            DbType::Nb => "ovn-nbctl",
            DbType::Sb => "ovn-sbctl",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NB" => Ok(DbType::Nb),
            "SB" => Ok(DbType::Sb),
            other => Err(OperatorError::InvalidSpec {
                field: "dbType",
                message: format!("expected NB or SB, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScope {
    Internal,
    External,
}

impl fmt::Display for EndpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointScope::Internal => f.write_str("internal"),
            EndpointScope::External => f.write_str("external"),
        }
    }
}

/// Identity of one cluster object. Reconciliation passes are serialized per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub name: String,
    pub namespace: String,
    /// Object UID, used to own the resources created on the cluster's behalf.
    pub uid: Option<String>,
}

impl ClusterRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Name of the workload and of its headless service.
    pub fn workload_name(&self, db_type: DbType) -> String {
        let base = db_type.service_name();
        if self.name == base {
            base.to_string()
        } else {
            format!("{base}-{}", self.name)
        }
    }

    pub fn pod_name(&self, db_type: DbType, ordinal: u32) -> String {
        format!("{}-{ordinal}", self.workload_name(db_type))
    }

    /// Stable per-member DNS name behind the headless service.
    pub fn member_host(&self, db_type: DbType, ordinal: u32) -> String {
        let workload = self.workload_name(db_type);
        format!(
            "{workload}-{ordinal}.{workload}.{}.svc.cluster.local",
            self.namespace
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugSpec {
    pub service: bool,
}

/// Desired state exactly as declared, before defaulting and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClusterSpec {
    pub db_type: String,
    pub replicas: Option<i32>,
    pub election_timer: Option<i32>,
    pub inactivity_probe: Option<i32>,
    pub probe_interval_to_active: Option<i32>,
    pub container_image: String,
    pub resources: Resources,
    pub storage_class: Option<String>,
    pub storage_request: String,
    pub node_selector: BTreeMap<String, String>,
    pub network_attachment: Option<String>,
    pub log_level: Option<String>,
    pub debug: DebugSpec,
}

/// RAFT/OVSDB timing, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub election_timer: u32,
    pub inactivity_probe: u32,
    pub probe_interval_to_active: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            election_timer: 10_000,
            inactivity_probe: 60_000,
            probe_interval_to_active: 60_000,
        }
    }
}

/// Parameters that shape each member's pod but are opaque to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub container_image: String,
    pub resources: Resources,
    pub storage_class: Option<String>,
    pub storage_request: String,
    pub node_selector: BTreeMap<String, String>,
    pub network_attachment: Option<String>,
    pub log_level: String,
    pub debug: DebugSpec,
}

/// Normalized desired state produced by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub db_type: DbType,
    pub replicas: u32,
    pub tuning: Tuning,
    pub workload: WorkloadSpec,
}

/// What the workload collaborator is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadTemplate {
    pub db_type: DbType,
    pub replicas: u32,
    pub tuning: Tuning,
    pub workload: WorkloadSpec,
    pub service_config: Fingerprint,
}

/// One live RAFT member as observed this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub ordinal: u32,
    pub pod_name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Leader,
    Follower,
    Candidate,
}

/// Sub-resources whose content is fingerprinted for drift detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubResource {
    Config,
    ServiceConfig,
}

impl SubResource {
    pub const ALL: [SubResource; 2] = [SubResource::Config, SubResource::ServiceConfig];

    pub fn key(&self) -> &'static str {
        match self {
            SubResource::Config => "config",
            SubResource::ServiceConfig => "service-config",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        SubResource::ALL.into_iter().find(|r| r.key() == key)
    }
}

/// Fixed-width SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, OperatorError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| OperatorError::MalformedState {
            message: format!("fingerprint {s:?} is not a SHA-256 hex digest: {e}"),
        })?;
        Ok(Fingerprint(out))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Condition kinds in publication order; `Ready` always comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionKind {
    Ready,
    SpecValid,
    WorkloadAvailable,
    QuorumSafe,
    MembersScaled,
    EndpointsResolved,
    MembersReady,
    ConfigApplied,
    Degraded,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 9] = [
        ConditionKind::Ready,
        ConditionKind::SpecValid,
        ConditionKind::WorkloadAvailable,
        ConditionKind::QuorumSafe,
        ConditionKind::MembersScaled,
        ConditionKind::EndpointsResolved,
        ConditionKind::MembersReady,
        ConditionKind::ConfigApplied,
        ConditionKind::Degraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Ready => "Ready",
            ConditionKind::SpecValid => "SpecValid",
            ConditionKind::WorkloadAvailable => "WorkloadAvailable",
            ConditionKind::QuorumSafe => "QuorumSafe",
            ConditionKind::MembersScaled => "MembersScaled",
            ConditionKind::EndpointsResolved => "EndpointsResolved",
            ConditionKind::MembersReady => "MembersReady",
            ConditionKind::ConfigApplied => "ConfigApplied",
            ConditionKind::Degraded => "Degraded",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        ConditionKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// Machine-readable reason attached to a condition. Failure reasons are listed in
/// the priority order used to explain a `Ready=False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reason {
    InvalidSpec,
    PlatformUnavailable,
    QuorumUnsafe,
    ScalingInProgress,
    EndpointsUnresolved,
    ProbesFailing,
    ConfigRolloutPending,
    ScaledToZero,
    AsExpected,
    Init,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::InvalidSpec => "InvalidSpec",
            Reason::PlatformUnavailable => "PlatformUnavailable",
            Reason::QuorumUnsafe => "QuorumUnsafe",
            Reason::ScalingInProgress => "ScalingInProgress",
            Reason::EndpointsUnresolved => "EndpointsUnresolved",
            Reason::ProbesFailing => "ProbesFailing",
            Reason::ConfigRolloutPending => "ConfigRolloutPending",
            Reason::ScaledToZero => "ScaledToZero",
            Reason::AsExpected => "AsExpected",
            Reason::Init => "Init",
        }
    }

    pub fn parse(s: &str) -> Self {
        [
            Reason::InvalidSpec,
            Reason::PlatformUnavailable,
            Reason::QuorumUnsafe,
            Reason::ScalingInProgress,
            Reason::EndpointsUnresolved,
            Reason::ProbesFailing,
            Reason::ConfigRolloutPending,
            Reason::ScaledToZero,
            Reason::AsExpected,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
        .unwrap_or(Reason::Init)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub status: ConditionStatus,
    pub reason: Reason,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// At most one record per kind, always iterated in `ConditionKind` order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions(BTreeMap<ConditionKind, Condition>);

impl Conditions {
    pub fn get(&self, kind: ConditionKind) -> Option<&Condition> {
        self.0.get(&kind)
    }

    pub fn is_true(&self, kind: ConditionKind) -> bool {
        self.get(kind)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Upserts a condition. The transition time only moves when the status flips.
    pub fn set(
        &mut self,
        kind: ConditionKind,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let last_transition_time = match self.0.get(&kind) {
            Some(existing) if existing.status == status => existing.last_transition_time,
            _ => now,
        };
        self.0.insert(
            kind,
            Condition {
                kind,
                status,
                reason,
                message: message.into(),
                last_transition_time,
            },
        );
    }

    pub fn insert(&mut self, condition: Condition) {
        self.0.insert(condition.kind, condition);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Observed state, written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Database type the cluster was first reconciled with.
    pub db_type: Option<DbType>,
    pub ready_count: u32,
    pub hash: BTreeMap<SubResource, Fingerprint>,
    pub conditions: Conditions,
    pub raft_address: String,
    pub db_address: String,
    pub internal_db_address: String,
    pub network_attachments: BTreeMap<String, Vec<String>>,
}

/// How soon the controller should run the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Converged or blocked on a human; the periodic resync is enough.
    Steady,
    /// Work is in flight, check back shortly.
    Progressing,
    /// A collaborator failed; retry on the backoff schedule.
    Backoff,
    /// Only a spec change can help.
    AwaitChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub status: ClusterStatus,
    pub requeue: Requeue,
}

/// A cluster object as handed to the core: identity, declared spec, last status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvnDbCluster {
    pub cluster: ClusterRef,
    pub spec: RawClusterSpec,
    pub status: ClusterStatus,
}

impl OvnDbCluster {
    pub fn is_ready(&self) -> bool {
        self.status.conditions.is_true(ConditionKind::Ready)
    }

    pub fn internal_endpoint(&self) -> Result<&str, OperatorError> {
        if self.status.internal_db_address.is_empty() {
            return Err(OperatorError::EndpointNotReady {
                scope: EndpointScope::Internal,
                db_type: self.spec.db_type.clone(),
            });
        }
        Ok(&self.status.internal_db_address)
    }

    pub fn external_endpoint(&self) -> Result<&str, OperatorError> {
        if self.status.db_address.is_empty() {
            return Err(OperatorError::EndpointNotReady {
                scope: EndpointScope::External,
                db_type: self.spec.db_type.clone(),
            });
        }
        Ok(&self.status.db_address)
    }

    pub fn rbac_namespace(&self) -> &str {
        &self.cluster.namespace
    }

    /// Name shared by the service account, role and role binding of this cluster.
    pub fn rbac_resource_name(&self) -> String {
        format!("ovncluster-{}", self.cluster.name)
    }
}
