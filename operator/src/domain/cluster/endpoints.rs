use std::{collections::BTreeMap, net::IpAddr};

use crate::domain::cluster::entities::{ClusterRef, ClusterStatus, DbType, Member};

/// Attachment IPs per pod for this pass. `None` means resolution failed or the pod
/// has not reported its networks yet.
pub type AttachmentLookup = BTreeMap<String, Option<Vec<IpAddr>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub raft_address: String,
    pub internal_db_address: String,
    pub db_address: String,
    pub network_attachments: BTreeMap<String, Vec<String>>,
}

impl Endpoints {
    pub fn resolved(&self, attachment_configured: bool) -> bool {
        !self.internal_db_address.is_empty()
            && (!attachment_configured || !self.db_address.is_empty())
    }

    pub fn apply_to(self, status: &mut ClusterStatus) {
        status.raft_address = self.raft_address;
        status.internal_db_address = self.internal_db_address;
        status.db_address = self.db_address;
        status.network_attachments = self.network_attachments;
    }
}

fn tcp(host: impl std::fmt::Display, port: u16) -> String {
    format!("tcp:{host}:{port}")
}

fn tcp_ip(ip: &IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => tcp(v4, port),
        IpAddr::V6(v6) => tcp(format!("[{v6}]"), port),
    }
}

/// Computes connection strings from the live member set.
///
/// Addresses name members through the headless service, never a particular leader,
/// so they survive elections. Anything that cannot be resolved this pass keeps the
/// value from `previous` instead of being blanked.
pub fn resolve_endpoints(
    cluster: &ClusterRef,
    db_type: DbType,
    desired: u32,
    members: &[Member],
    attachment: Option<&str>,
    lookup: &AttachmentLookup,
    previous: &ClusterStatus,
) -> Endpoints {
    let mut live: Vec<&Member> = members.iter().collect();
    live.sort_by_key(|m| m.ordinal);
    let serving: Vec<&Member> = live
        .iter()
        .copied()
        .filter(|m| m.ordinal < desired)
        .collect();

    let raft_address = live
        .iter()
        .map(|m| tcp(cluster.member_host(db_type, m.ordinal), db_type.raft_port()))
        .collect::<Vec<_>>()
        .join(",");

    let any_ready = serving.iter().any(|m| m.ready);
    let internal_db_address = if serving.is_empty() {
        String::new()
    } else if any_ready {
        serving
            .iter()
            .map(|m| tcp(cluster.member_host(db_type, m.ordinal), db_type.client_port()))
            .collect::<Vec<_>>()
            .join(",")
    } else {
        previous.internal_db_address.clone()
    };

    if attachment.is_none() {
        return Endpoints {
            raft_address,
            db_address: internal_db_address.clone(),
            internal_db_address,
            network_attachments: BTreeMap::new(),
        };
    }

    let mut network_attachments = BTreeMap::new();
    for member in &live {
        match lookup.get(&member.pod_name) {
            Some(Some(ips)) if !ips.is_empty() => {
                network_attachments.insert(
                    member.pod_name.clone(),
                    ips.iter().map(IpAddr::to_string).collect(),
                );
            }
            _ => {
                if let Some(known) = previous.network_attachments.get(&member.pod_name) {
                    network_attachments.insert(member.pod_name.clone(), known.clone());
                }
            }
        }
    }

    let external: Option<Vec<String>> = serving
        .iter()
        .map(|m| match lookup.get(&m.pod_name) {
            Some(Some(ips)) => ips.first().map(|ip| tcp_ip(ip, db_type.client_port())),
            _ => None,
        })
        .collect();
    let db_address = match external {
        Some(addresses) if any_ready && !addresses.is_empty() => addresses.join(","),
        _ if serving.is_empty() => String::new(),
        _ => previous.db_address.clone(),
    };

    Endpoints {
        raft_address,
        internal_db_address,
        db_address,
        network_attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::test_helpers::{default_cluster_ref, member, ready_members};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn lookup_all(members: &[Member], base: u8) -> AttachmentLookup {
        members
            .iter()
            .map(|m| {
                (
                    m.pod_name.clone(),
                    Some(vec![ip(&format!("172.17.0.{}", base + m.ordinal as u8))]),
                )
            })
            .collect()
    }

    #[test]
    fn test_without_attachment_external_matches_internal() {
        let members = ready_members(3);
        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            3,
            &members,
            None,
            &AttachmentLookup::new(),
            &ClusterStatus::default(),
        );

        assert_eq!(
            endpoints.internal_db_address,
            "tcp:ovsdbserver-nb-0.ovsdbserver-nb.openstack.svc.cluster.local:6641,\
             tcp:ovsdbserver-nb-1.ovsdbserver-nb.openstack.svc.cluster.local:6641,\
             tcp:ovsdbserver-nb-2.ovsdbserver-nb.openstack.svc.cluster.local:6641"
        );
        assert_eq!(endpoints.db_address, endpoints.internal_db_address);
        assert!(endpoints.raft_address.contains(":6643"));
        assert!(endpoints.network_attachments.is_empty());
        assert!(endpoints.resolved(false));
    }

    #[test]
    fn test_internal_address_waits_for_a_ready_member() {
        let members = vec![member(0, false)];
        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            1,
            &members,
            None,
            &AttachmentLookup::new(),
            &ClusterStatus::default(),
        );
        assert_eq!(endpoints.internal_db_address, "");
        assert!(!endpoints.resolved(false));
    }

    #[test]
    fn test_attachment_ips_become_external_address() {
        let cluster = ClusterRef::new("ovsdbserver-sb", "openstack");
        let members: Vec<Member> = (0..2)
            .map(|ordinal| Member {
                ordinal,
                pod_name: cluster.pod_name(DbType::Sb, ordinal),
                ready: true,
            })
            .collect();
        let lookup = lookup_all(&members, 30);

        let endpoints = resolve_endpoints(
            &cluster,
            DbType::Sb,
            2,
            &members,
            Some("internalapi"),
            &lookup,
            &ClusterStatus::default(),
        );

        assert_eq!(endpoints.db_address, "tcp:172.17.0.30:6642,tcp:172.17.0.31:6642");
        assert_eq!(
            endpoints.network_attachments["ovsdbserver-sb-0"],
            vec!["172.17.0.30".to_string()]
        );
        assert!(endpoints.resolved(true));
    }

    #[test]
    fn test_ipv6_attachment_is_bracketed() {
        let members = ready_members(1);
        let lookup = AttachmentLookup::from([(
            "ovsdbserver-nb-0".to_string(),
            Some(vec![ip("fd00::10")]),
        )]);

        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            1,
            &members,
            Some("internalapi"),
            &lookup,
            &ClusterStatus::default(),
        );

        assert_eq!(endpoints.db_address, "tcp:[fd00::10]:6641");
    }

    #[test]
    fn test_unresolvable_attachment_leaves_external_empty() {
        let members = ready_members(1);
        let lookup = AttachmentLookup::from([("ovsdbserver-nb-0".to_string(), None)]);

        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            1,
            &members,
            Some("internalapi"),
            &lookup,
            &ClusterStatus::default(),
        );

        assert_eq!(endpoints.db_address, "");
        assert!(!endpoints.internal_db_address.is_empty());
        assert!(!endpoints.resolved(true));
    }

    #[test]
    fn test_transient_failure_keeps_last_known_good() {
        let members = ready_members(2);
        let previous = ClusterStatus {
            db_address: "tcp:172.17.0.30:6641,tcp:172.17.0.31:6641".to_string(),
            network_attachments: BTreeMap::from([
                ("ovsdbserver-nb-0".to_string(), vec!["172.17.0.30".to_string()]),
                ("ovsdbserver-nb-1".to_string(), vec!["172.17.0.31".to_string()]),
            ]),
            ..ClusterStatus::default()
        };
        let mut lookup = lookup_all(&members, 30);
        lookup.insert("ovsdbserver-nb-1".to_string(), None);

        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            2,
            &members,
            Some("internalapi"),
            &lookup,
            &previous,
        );

        assert_eq!(endpoints.db_address, previous.db_address);
        assert_eq!(endpoints.network_attachments, previous.network_attachments);
    }

    #[test]
    fn test_members_above_target_are_not_advertised() {
        let members = ready_members(3);
        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            1,
            &members,
            None,
            &AttachmentLookup::new(),
            &ClusterStatus::default(),
        );

        assert_eq!(
            endpoints.internal_db_address,
            "tcp:ovsdbserver-nb-0.ovsdbserver-nb.openstack.svc.cluster.local:6641"
        );
        assert_eq!(endpoints.raft_address.split(',').count(), 3);
    }

    #[test]
    fn test_no_members_clears_addresses() {
        let previous = ClusterStatus {
            internal_db_address: "tcp:old:6641".to_string(),
            db_address: "tcp:old:6641".to_string(),
            ..ClusterStatus::default()
        };
        let endpoints = resolve_endpoints(
            &default_cluster_ref(),
            DbType::Nb,
            0,
            &[],
            Some("internalapi"),
            &AttachmentLookup::new(),
            &previous,
        );
        assert_eq!(endpoints, Endpoints::default());
    }
}
