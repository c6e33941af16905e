use sha2::{Digest, Sha256};

use crate::domain::cluster::entities::{ClusterSpec, DbType, Fingerprint, Member, Tuning};

/// Lowest election timer accepted by ovsdb-server, in milliseconds.
pub const MIN_ELECTION_TIMER: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    None,
    /// Nothing recorded yet; members were created with the current values.
    Initial(Fingerprint),
    Changed(Fingerprint),
}

fn digest(lines: &[String]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Fingerprint(hasher.finalize().into())
}

pub fn tuning_fingerprint(db_type: DbType, tuning: &Tuning) -> Fingerprint {
    digest(&[
        format!("dbType={db_type}"),
        format!("electionTimer={}", tuning.election_timer),
        format!("inactivityProbe={}", tuning.inactivity_probe),
        format!("probeIntervalToActive={}", tuning.probe_interval_to_active),
    ])
}

/// Digest of the pod-shaping parameters. Timers are excluded: they are rolled out
/// live, not by restarting pods.
pub fn service_config_fingerprint(spec: &ClusterSpec) -> Fingerprint {
    let workload = &spec.workload;
    let mut lines = vec![
        format!("dbType={}", spec.db_type),
        format!("containerImage={}", workload.container_image),
        format!(
            "storageClass={}",
            workload.storage_class.as_deref().unwrap_or_default()
        ),
        format!("storageRequest={}", workload.storage_request),
        format!(
            "networkAttachment={}",
            workload.network_attachment.as_deref().unwrap_or_default()
        ),
        format!("logLevel={}", workload.log_level),
        format!("debug.service={}", workload.debug.service),
    ];
    lines.extend(
        workload
            .node_selector
            .iter()
            .map(|(k, v)| format!("nodeSelector.{k}={v}")),
    );
    lines.extend(
        workload
            .resources
            .requests
            .iter()
            .map(|(k, v)| format!("requests.{k}={v}")),
    );
    lines.extend(
        workload
            .resources
            .limits
            .iter()
            .map(|(k, v)| format!("limits.{k}={v}")),
    );
    digest(&lines)
}

pub fn detect_drift(spec: &ClusterSpec, stored: Option<Fingerprint>) -> Drift {
    let current = tuning_fingerprint(spec.db_type, &spec.tuning);
    match stored {
        None => Drift::Initial(current),
        Some(stored) if stored == current => Drift::None,
        Some(_) => Drift::Changed(current),
    }
}

/// A rollout is only layered onto a cluster whose every desired member is live and ready.
pub fn rollout_blocker(replicas: u32, members: &[Member]) -> Option<String> {
    if replicas == 0 {
        return Some("cluster is scaled to zero".to_string());
    }
    let serving = members.iter().filter(|m| m.ordinal < replicas).count();
    let ready = members
        .iter()
        .filter(|m| m.ordinal < replicas && m.ready)
        .count();
    if members.len() != replicas as usize || serving != replicas as usize {
        return Some(format!(
            "membership not converged ({} live, {replicas} desired)",
            members.len()
        ));
    }
    if ready != replicas as usize {
        return Some(format!("{ready}/{replicas} members ready"));
    }
    None
}

/// Followers in ordinal order, then the leader.
pub fn rollout_order(members: &[Member], leader: u32) -> Vec<u32> {
    let mut followers: Vec<u32> = members
        .iter()
        .map(|m| m.ordinal)
        .filter(|ordinal| *ordinal != leader)
        .collect();
    followers.sort_unstable();
    followers.push(leader);
    followers
}

/// ovsdb-server refuses to more than double the election timer in one change, so an
/// increase is applied as a doubling sequence ending at the target.
pub fn election_timer_steps(current: u32, target: u32) -> Vec<u32> {
    let target = target.max(MIN_ELECTION_TIMER);
    if current == target {
        return Vec::new();
    }
    if current == 0 || target < current {
        return vec![target];
    }
    let mut steps = Vec::new();
    let mut value = current;
    while value.saturating_mul(2) < target {
        value *= 2;
        steps.push(value);
    }
    steps.push(target);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::test_helpers::{
        create_default_cluster_spec, member, ready_members,
    };

    #[test]
    fn test_drift_detection() {
        let spec = create_default_cluster_spec();
        let current = tuning_fingerprint(spec.db_type, &spec.tuning);

        assert_eq!(detect_drift(&spec, None), Drift::Initial(current));
        assert_eq!(detect_drift(&spec, Some(current)), Drift::None);

        let mut changed = spec.clone();
        changed.tuning.election_timer = 20_000;
        let expected = tuning_fingerprint(changed.db_type, &changed.tuning);
        assert_eq!(detect_drift(&changed, Some(current)), Drift::Changed(expected));
    }

    #[test]
    fn test_service_config_ignores_timers() {
        let spec = create_default_cluster_spec();
        let mut retimed = spec.clone();
        retimed.tuning.inactivity_probe = 1_000;
        assert_eq!(
            service_config_fingerprint(&spec),
            service_config_fingerprint(&retimed)
        );

        let mut reimaged = spec.clone();
        reimaged.workload.container_image = "quay.io/example/ovn-nb:next".to_string();
        assert_ne!(
            service_config_fingerprint(&spec),
            service_config_fingerprint(&reimaged)
        );
    }

    #[test]
    fn test_rollout_waits_for_full_readiness() {
        assert_eq!(rollout_blocker(3, &ready_members(3)), None);
        assert!(rollout_blocker(3, &ready_members(2)).is_some());
        assert!(rollout_blocker(2, &ready_members(3)).is_some());
        assert!(rollout_blocker(0, &[]).is_some());

        let members = vec![member(0, true), member(1, false), member(2, true)];
        assert_eq!(
            rollout_blocker(3, &members).as_deref(),
            Some("2/3 members ready")
        );
    }

    #[test]
    fn test_leader_goes_last() {
        assert_eq!(rollout_order(&ready_members(3), 0), vec![1, 2, 0]);
        assert_eq!(rollout_order(&ready_members(3), 2), vec![0, 1, 2]);
        assert_eq!(rollout_order(&ready_members(1), 0), vec![0]);
    }

    #[test]
    fn test_election_timer_steps() {
        assert_eq!(election_timer_steps(10_000, 10_000), Vec::<u32>::new());
        assert_eq!(election_timer_steps(10_000, 15_000), vec![15_000]);
        assert_eq!(
            election_timer_steps(1_000, 10_000),
            vec![2_000, 4_000, 8_000, 10_000]
        );
        assert_eq!(election_timer_steps(1_000, 4_000), vec![2_000, 4_000]);
        assert_eq!(election_timer_steps(10_000, 5_000), vec![5_000]);
        assert_eq!(election_timer_steps(1_000, 10), vec![MIN_ELECTION_TIMER]);
    }
}
