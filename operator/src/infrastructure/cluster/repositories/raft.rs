use kube::Client;
use tracing::{debug, info};

use crate::{
    domain::{
        cluster::{
            config::election_timer_steps,
            entities::{ClusterRef, DbType, Member, RaftRole, Tuning},
            ports::RaftRepository,
        },
        error::OperatorError,
    },
    infrastructure::cluster::repositories::exec::exec_in_member,
};

/// Reads the `Role:` line of `ovs-appctl cluster/status` output.
pub fn parse_role(status: &str) -> Result<RaftRole, OperatorError> {
    let role = status
        .lines()
        .find_map(|line| line.trim().strip_prefix("Role:"))
        .map(str::trim)
        .ok_or_else(|| OperatorError::MalformedState {
            message: "cluster/status output has no Role line".to_string(),
        })?;

    match role {
        "leader" => Ok(RaftRole::Leader),
        "follower" => Ok(RaftRole::Follower),
        "candidate" => Ok(RaftRole::Candidate),
        other => Err(OperatorError::MalformedState {
            message: format!("unknown RAFT role `{other}`"),
        }),
    }
}

/// Reads the current election timer, in milliseconds.
pub fn parse_election_timer(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.trim().strip_prefix("Election timer:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Whether `host` is still a voter in the `Servers:` section of `cluster/status` output.
pub fn lists_server(status: &str, host: &str) -> bool {
    let needle = format!(":{host}:");
    status
        .lines()
        .skip_while(|line| line.trim() != "Servers:")
        .skip(1)
        .take_while(|line| line.starts_with(char::is_whitespace) && !line.trim().is_empty())
        .any(|line| line.contains(&needle))
}

pub(crate) fn appctl(db_type: DbType, args: &[&str]) -> Vec<String> {
    ["ovs-appctl", "-t", db_type.control_socket()]
        .iter()
        .chain(args)
        .map(|arg| arg.to_string())
        .collect()
}

#[derive(Clone)]
pub struct K8sRaftRepository {
    client: Client,
}

impl K8sRaftRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn cluster_status(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        member: &Member,
    ) -> Result<String, OperatorError> {
        exec_in_member(
            &self.client,
            &cluster.namespace,
            &member.pod_name,
            appctl(db_type, &["cluster/status", db_type.database_name()]),
        )
        .await
    }

    async fn run(
        &self,
        cluster: &ClusterRef,
        member: &Member,
        command: Vec<String>,
    ) -> Result<(), OperatorError> {
        exec_in_member(&self.client, &cluster.namespace, &member.pod_name, command)
            .await
            .map(|_| ())
    }
}

impl RaftRepository for K8sRaftRepository {
    async fn role(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        member: &Member,
    ) -> Result<RaftRole, OperatorError> {
        let status = self.cluster_status(cluster, db_type, member).await?;
        let role = parse_role(&status)?;
        debug!(pod = %member.pod_name, ?role, "raft role");
        Ok(role)
    }

    async fn apply_tuning(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        member: &Member,
        role: RaftRole,
        tuning: &Tuning,
    ) -> Result<(), OperatorError> {
        let probe_interval = tuning.probe_interval_to_active.to_string();
        self.run(
            cluster,
            member,
            appctl(
                db_type,
                &[
                    "ovsdb-server/set-active-ovsdb-server-probe-interval",
                    &probe_interval,
                ],
            ),
        )
        .await?;

        if role != RaftRole::Leader {
            return Ok(());
        }

        // Cluster-wide settings go through the leader only.
        let status = self.cluster_status(cluster, db_type, member).await?;
        let current = parse_election_timer(&status).unwrap_or_default();
        for step in election_timer_steps(current, tuning.election_timer) {
            let step = step.to_string();
            self.run(
                cluster,
                member,
                appctl(
                    db_type,
                    &["cluster/change-election-timer", db_type.database_name(), &step],
                ),
            )
            .await?;
            info!(pod = %member.pod_name, election_timer = %step, "election timer changed");
        }

        let db = format!("--db=unix:{}", db_type.db_socket());
        let probe = format!("inactivity_probe={}", tuning.inactivity_probe);
        self.run(
            cluster,
            member,
            [
                db_type.ctl_tool(),
                "--no-leader-only",
                db.as_str(),
                "set",
                "connection",
                ".",
                probe.as_str(),
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEADER_STATUS: &str = "\
4b1c
Name: OVN_Northbound
Cluster ID: 7d5a (7d5a0a3c-77b4-4c1e-9f7f-6bd1b0b4b8d6)
Server ID: 4b1c (4b1c2a8e-1d1f-4f0e-8f0e-0a8e2f6d9b12)
Address: tcp:ovsdbserver-nb-0.ovsdbserver-nb.openstack.svc.cluster.local:6643
Status: cluster member
Role: leader
Term: 3
Leader: self
Vote: self

Last Election started 1234 ms ago, reason: timeout
Election timer: 10000
Log: [2, 15]
Servers:
    4b1c (4b1c at tcp:ovsdbserver-nb-0.ovsdbserver-nb.openstack.svc.cluster.local:6643) (self) next_index=2 match_index=14
    9e07 (9e07 at tcp:ovsdbserver-nb-1.ovsdbserver-nb.openstack.svc.cluster.local:6643) next_index=15 match_index=14
";

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role(LEADER_STATUS).unwrap(), RaftRole::Leader);
        assert_eq!(
            parse_role("Status: cluster member\nRole: follower\n").unwrap(),
            RaftRole::Follower
        );
        assert!(matches!(
            parse_role("Status: joining cluster\n"),
            Err(OperatorError::MalformedState { .. })
        ));
    }

    #[test]
    fn test_parse_election_timer() {
        assert_eq!(parse_election_timer(LEADER_STATUS), Some(10_000));
        assert_eq!(parse_election_timer("Role: leader\n"), None);
    }

    #[test]
    fn test_lists_server_reads_only_the_server_section() {
        let host = |ordinal: u32| {
            format!("ovsdbserver-nb-{ordinal}.ovsdbserver-nb.openstack.svc.cluster.local")
        };

        assert!(lists_server(LEADER_STATUS, &host(0)));
        assert!(lists_server(LEADER_STATUS, &host(1)));
        assert!(!lists_server(LEADER_STATUS, &host(2)));
        // The local address line is not part of the server list.
        assert!(!lists_server(
            "Address: tcp:ovsdbserver-nb-2.ovsdbserver-nb.openstack.svc.cluster.local:6643\n",
            &host(2)
        ));
    }

    #[test]
    fn test_lists_server_does_not_match_longer_ordinals() {
        let status = "Servers:\n    1a2b (1a2b at tcp:ovsdbserver-nb-10.ovsdbserver-nb.openstack.svc.cluster.local:6643)\n";

        assert!(!lists_server(
            status,
            "ovsdbserver-nb-1.ovsdbserver-nb.openstack.svc.cluster.local"
        ));
    }

    #[test]
    fn test_appctl_targets_control_socket() {
        assert_eq!(
            appctl(DbType::Sb, &["cluster/status", "OVN_Southbound"]),
            vec![
                "ovs-appctl",
                "-t",
                "/tmp/ovnsb_db.ctl",
                "cluster/status",
                "OVN_Southbound"
            ]
        );
    }
}
