use chrono::{DateTime, Duration, Utc};

use crate::domain::cluster::entities::{
    ClusterStatus, ConditionKind, ConditionStatus, Member, Reason,
};

/// Whether the tuning fingerprint matches what the members run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigState {
    Applied,
    Pending(String),
}

/// Everything the aggregator needs to know about one pass.
#[derive(Debug, Clone)]
pub struct PassObservation<'a> {
    pub replicas: u32,
    pub members: &'a [Member],
    pub platform_error: Option<String>,
    pub quorum_block: Option<String>,
    pub endpoints_resolved: bool,
    pub config: ConfigState,
}

/// Conditions contributing to `Ready`, in the order their reasons take precedence.
const READY_INPUTS: [ConditionKind; 7] = [
    ConditionKind::SpecValid,
    ConditionKind::WorkloadAvailable,
    ConditionKind::QuorumSafe,
    ConditionKind::MembersScaled,
    ConditionKind::EndpointsResolved,
    ConditionKind::MembersReady,
    ConditionKind::ConfigApplied,
];

/// Records a rejected spec without touching anything derived from live members.
pub fn mark_invalid_spec(status: &mut ClusterStatus, message: &str, now: DateTime<Utc>) {
    let conditions = &mut status.conditions;
    conditions.set(
        ConditionKind::SpecValid,
        ConditionStatus::False,
        Reason::InvalidSpec,
        message,
        now,
    );
    conditions.set(
        ConditionKind::Ready,
        ConditionStatus::False,
        Reason::InvalidSpec,
        message,
        now,
    );
}

/// Records a pass that could not observe the workload. Addresses and counts keep
/// their last-known values.
pub fn mark_platform_unavailable(status: &mut ClusterStatus, message: &str, now: DateTime<Utc>) {
    let conditions = &mut status.conditions;
    conditions.set(
        ConditionKind::SpecValid,
        ConditionStatus::True,
        Reason::AsExpected,
        "spec accepted",
        now,
    );
    conditions.set(
        ConditionKind::WorkloadAvailable,
        ConditionStatus::False,
        Reason::PlatformUnavailable,
        message,
        now,
    );
    conditions.set(
        ConditionKind::Ready,
        ConditionStatus::False,
        Reason::PlatformUnavailable,
        message,
        now,
    );
}

/// Folds one pass into `readyCount` and the condition set.
pub fn aggregate(
    status: &mut ClusterStatus,
    obs: &PassObservation<'_>,
    grace: Duration,
    now: DateTime<Utc>,
) {
    let replicas = obs.replicas;
    status.ready_count = obs.members.iter().filter(|m| m.ready).count() as u32;
    let serving_ready = obs
        .members
        .iter()
        .filter(|m| m.ready && m.ordinal < replicas)
        .count() as u32;
    let scaled = obs.members.len() as u32 == replicas
        && obs.members.iter().all(|m| m.ordinal < replicas);

    let conditions = &mut status.conditions;
    conditions.set(
        ConditionKind::SpecValid,
        ConditionStatus::True,
        Reason::AsExpected,
        "spec accepted",
        now,
    );

    match &obs.platform_error {
        Some(message) => conditions.set(
            ConditionKind::WorkloadAvailable,
            ConditionStatus::False,
            Reason::PlatformUnavailable,
            message.as_str(),
            now,
        ),
        None => conditions.set(
            ConditionKind::WorkloadAvailable,
            ConditionStatus::True,
            Reason::AsExpected,
            "workload reachable",
            now,
        ),
    }

    match &obs.quorum_block {
        Some(message) => conditions.set(
            ConditionKind::QuorumSafe,
            ConditionStatus::False,
            Reason::QuorumUnsafe,
            message.as_str(),
            now,
        ),
        None => conditions.set(
            ConditionKind::QuorumSafe,
            ConditionStatus::True,
            Reason::AsExpected,
            "quorum preserved",
            now,
        ),
    }

    if scaled {
        conditions.set(
            ConditionKind::MembersScaled,
            ConditionStatus::True,
            Reason::AsExpected,
            format!("{replicas} members"),
            now,
        );
    } else {
        conditions.set(
            ConditionKind::MembersScaled,
            ConditionStatus::False,
            Reason::ScalingInProgress,
            format!("{} live members, {replicas} desired", obs.members.len()),
            now,
        );
    }

    if obs.endpoints_resolved || replicas == 0 {
        conditions.set(
            ConditionKind::EndpointsResolved,
            ConditionStatus::True,
            Reason::AsExpected,
            "endpoints published",
            now,
        );
    } else {
        conditions.set(
            ConditionKind::EndpointsResolved,
            ConditionStatus::False,
            Reason::EndpointsUnresolved,
            "waiting for member addresses",
            now,
        );
    }

    if serving_ready >= replicas {
        conditions.set(
            ConditionKind::MembersReady,
            ConditionStatus::True,
            Reason::AsExpected,
            format!("{serving_ready}/{replicas} members ready"),
            now,
        );
    } else {
        conditions.set(
            ConditionKind::MembersReady,
            ConditionStatus::False,
            Reason::ProbesFailing,
            format!("{serving_ready}/{replicas} members ready"),
            now,
        );
    }

    match &obs.config {
        ConfigState::Applied => conditions.set(
            ConditionKind::ConfigApplied,
            ConditionStatus::True,
            Reason::AsExpected,
            "timers applied",
            now,
        ),
        ConfigState::Pending(message) => conditions.set(
            ConditionKind::ConfigApplied,
            ConditionStatus::False,
            Reason::ConfigRolloutPending,
            message.as_str(),
            now,
        ),
    }

    // Probe failures only escalate once every member exists and the shortfall has
    // outlasted the grace window.
    let probes_overdue = scaled
        && conditions
            .get(ConditionKind::MembersReady)
            .is_some_and(|c| {
                c.status == ConditionStatus::False && now - c.last_transition_time >= grace
            });
    if let Some(message) = &obs.quorum_block {
        conditions.set(
            ConditionKind::Degraded,
            ConditionStatus::True,
            Reason::QuorumUnsafe,
            message.as_str(),
            now,
        );
    } else if probes_overdue {
        conditions.set(
            ConditionKind::Degraded,
            ConditionStatus::True,
            Reason::ProbesFailing,
            format!("{serving_ready}/{replicas} members ready beyond grace window"),
            now,
        );
    } else {
        conditions.set(
            ConditionKind::Degraded,
            ConditionStatus::False,
            Reason::AsExpected,
            "no degradation",
            now,
        );
    }

    if replicas == 0 && obs.members.is_empty() {
        conditions.set(
            ConditionKind::Ready,
            ConditionStatus::Unknown,
            Reason::ScaledToZero,
            "cluster scaled to zero",
            now,
        );
        return;
    }

    let first_unmet = READY_INPUTS
        .iter()
        .filter_map(|kind| conditions.get(*kind))
        .find(|c| c.status != ConditionStatus::True)
        .map(|c| (c.reason, c.message.clone()));
    match first_unmet {
        Some((reason, message)) => conditions.set(
            ConditionKind::Ready,
            ConditionStatus::False,
            reason,
            message,
            now,
        ),
        None => conditions.set(
            ConditionKind::Ready,
            ConditionStatus::True,
            Reason::AsExpected,
            "Setup complete",
            now,
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::cluster::test_helpers::{member, ready_members};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn healthy<'a>(replicas: u32, members: &'a [Member]) -> PassObservation<'a> {
        PassObservation {
            replicas,
            members,
            platform_error: None,
            quorum_block: None,
            endpoints_resolved: true,
            config: ConfigState::Applied,
        }
    }

    fn ready_reason(status: &ClusterStatus) -> (ConditionStatus, Reason) {
        let c = status.conditions.get(ConditionKind::Ready).unwrap();
        (c.status, c.reason)
    }

    #[test]
    fn test_converged_cluster_is_ready() {
        let members = ready_members(3);
        let mut status = ClusterStatus::default();

        aggregate(&mut status, &healthy(3, &members), Duration::minutes(2), t0());

        assert_eq!(status.ready_count, 3);
        assert_eq!(ready_reason(&status), (ConditionStatus::True, Reason::AsExpected));
        assert_eq!(status.conditions.len(), ConditionKind::ALL.len());
        assert_eq!(
            status.conditions.iter().next().unwrap().kind,
            ConditionKind::Ready
        );
    }

    #[test]
    fn test_reason_priority() {
        let members = vec![member(0, true), member(1, false)];
        let mut status = ClusterStatus::default();
        let mut obs = healthy(3, &members);
        obs.endpoints_resolved = false;
        obs.quorum_block = Some("blocked".to_string());
        obs.platform_error = Some("api down".to_string());

        aggregate(&mut status, &obs, Duration::minutes(2), t0());
        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, Reason::PlatformUnavailable)
        );

        obs.platform_error = None;
        aggregate(&mut status, &obs, Duration::minutes(2), t0());
        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, Reason::QuorumUnsafe)
        );

        obs.quorum_block = None;
        aggregate(&mut status, &obs, Duration::minutes(2), t0());
        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, Reason::ScalingInProgress)
        );
    }

    #[test]
    fn test_probe_failure_reason_when_scaled() {
        let members = vec![member(0, true), member(1, true), member(2, false)];
        let mut status = ClusterStatus::default();

        aggregate(&mut status, &healthy(3, &members), Duration::minutes(2), t0());

        assert_eq!(status.ready_count, 2);
        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, Reason::ProbesFailing)
        );
        assert!(!status.conditions.is_true(ConditionKind::Degraded));
    }

    #[test]
    fn test_probe_failure_escalates_after_grace_window() {
        let members = vec![member(0, true), member(1, true), member(2, false)];
        let mut status = ClusterStatus::default();
        let obs = healthy(3, &members);

        aggregate(&mut status, &obs, Duration::minutes(2), t0());
        aggregate(
            &mut status,
            &obs,
            Duration::minutes(2),
            t0() + Duration::minutes(3),
        );

        let degraded = status.conditions.get(ConditionKind::Degraded).unwrap();
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, Reason::ProbesFailing);
    }

    #[test]
    fn test_quorum_block_is_reported_degraded() {
        let members = ready_members(3);
        let mut status = ClusterStatus::default();
        let mut obs = healthy(2, &members);
        obs.quorum_block = Some("would lose quorum".to_string());

        aggregate(&mut status, &obs, Duration::minutes(2), t0());

        let degraded = status.conditions.get(ConditionKind::Degraded).unwrap();
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, Reason::QuorumUnsafe);
    }

    #[test]
    fn test_scaled_to_zero_is_not_a_failure() {
        let mut status = ClusterStatus::default();

        aggregate(&mut status, &healthy(0, &[]), Duration::minutes(2), t0());

        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::Unknown, Reason::ScaledToZero)
        );
        assert_eq!(status.ready_count, 0);
    }

    #[test]
    fn test_invalid_spec_only_touches_spec_and_ready() {
        let members = ready_members(3);
        let mut status = ClusterStatus::default();
        aggregate(&mut status, &healthy(3, &members), Duration::minutes(2), t0());
        status.internal_db_address = "tcp:kept:6641".to_string();

        mark_invalid_spec(&mut status, "replicas out of range", t0());

        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, Reason::InvalidSpec)
        );
        assert!(status.conditions.is_true(ConditionKind::MembersReady));
        assert_eq!(status.ready_count, 3);
        assert_eq!(status.internal_db_address, "tcp:kept:6641");
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let members = ready_members(3);
        let mut first = ClusterStatus::default();
        aggregate(&mut first, &healthy(3, &members), Duration::minutes(2), t0());

        let mut second = first.clone();
        aggregate(
            &mut second,
            &healthy(3, &members),
            Duration::minutes(2),
            t0() + Duration::seconds(30),
        );

        assert_eq!(first, second);
    }
}
