use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{ConfigMap, Pod, Service},
};
use kube::{
    Client, ResourceExt,
    api::{Api, ListParams, Patch, PatchParams},
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        cluster::{
            entities::{ClusterRef, DbType, Member, WorkloadTemplate},
            ports::WorkloadRepository,
        },
        error::OperatorError,
    },
    infrastructure::cluster::repositories::{
        exec::exec_in_member,
        raft::{appctl, lists_server},
        resources::{
            FIELD_MANAGER, label_selector, make_config_map, make_headless_service,
            make_stateful_set,
        },
    },
};

#[derive(Clone)]
pub struct K8sWorkloadRepository {
    client: Client,
}

impl K8sWorkloadRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Maps a pod onto a member. Terminating pods are already leaving and are not
/// counted as live.
pub fn member_from_pod(cluster: &ClusterRef, db_type: DbType, pod: &Pod) -> Option<Member> {
    if pod.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let name = pod.name_any();
    let prefix = format!("{}-", cluster.workload_name(db_type));
    let ordinal = name.strip_prefix(&prefix)?.parse().ok()?;
    Some(Member {
        ordinal,
        ready: pod_ready(pod),
        pod_name: name,
    })
}

/// Decides whether the workload may drop `pod` after its `cluster/leave` failed.
/// Only a surviving member's configuration that no longer lists `host` allows it;
/// otherwise the member would linger as a dead voter.
pub fn confirm_departure(
    pod: &str,
    host: &str,
    leave_error: &OperatorError,
    survivor_status: Result<String, OperatorError>,
) -> Result<(), OperatorError> {
    match survivor_status {
        Ok(status) if !lists_server(&status, host) => Ok(()),
        Ok(_) => Err(OperatorError::platform(format!(
            "{pod} is still a RAFT voter after cluster/leave failed: {leave_error}"
        ))),
        Err(e) => Err(OperatorError::platform(format!(
            "cannot confirm {pod} left the RAFT cluster: {leave_error}; survivor status: {e}"
        ))),
    }
}

impl WorkloadRepository for K8sWorkloadRepository {
    async fn observe(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
    ) -> Result<Vec<Member>, OperatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &cluster.namespace);
        let list = pods
            .list(&ListParams::default().labels(&label_selector(cluster, db_type)))
            .await?;

        let mut members: Vec<Member> = list
            .items
            .iter()
            .filter_map(|pod| member_from_pod(cluster, db_type, pod))
            .collect();
        members.sort_by_key(|m| m.ordinal);
        debug!(cluster = %cluster.key(), live = members.len(), "observed members");
        Ok(members)
    }

    async fn ensure(
        &self,
        cluster: &ClusterRef,
        template: &WorkloadTemplate,
    ) -> Result<Vec<Member>, OperatorError> {
        let namespace = &cluster.namespace;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let service = make_headless_service(cluster, template.db_type);
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services
            .patch(&service.name_any(), &params, &Patch::Apply(&service))
            .await?;

        let config_map = make_config_map(cluster, template);
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        config_maps
            .patch(&config_map.name_any(), &params, &Patch::Apply(&config_map))
            .await?;

        let stateful_set = make_stateful_set(cluster, template);
        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        stateful_sets
            .patch(&stateful_set.name_any(), &params, &Patch::Apply(&stateful_set))
            .await?;
        debug!(
            cluster = %cluster.key(),
            replicas = template.replicas,
            "workload applied"
        );

        self.observe(cluster, template.db_type).await
    }

    async fn delete_member(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        ordinal: u32,
    ) -> Result<(), OperatorError> {
        let pod = cluster.pod_name(db_type, ordinal);

        // Leave the RAFT cluster first so the remaining members shrink the
        // configuration instead of waiting on a dead peer.
        let leave = appctl(db_type, &["cluster/leave", db_type.database_name()]);
        if let Err(e) = exec_in_member(&self.client, &cluster.namespace, &pod, leave).await {
            // The last member has no peers left to outvote it.
            if ordinal > 0 {
                let survivor = cluster.pod_name(db_type, 0);
                let status = exec_in_member(
                    &self.client,
                    &cluster.namespace,
                    &survivor,
                    appctl(db_type, &["cluster/status", db_type.database_name()]),
                )
                .await;
                confirm_departure(&pod, &cluster.member_host(db_type, ordinal), &e, status)?;
            }
            warn!(%pod, error = %e, "cluster/leave failed, removal is still safe");
        }

        let stateful_sets: Api<StatefulSet> =
            Api::namespaced(self.client.clone(), &cluster.namespace);
        stateful_sets
            .patch(
                &cluster.workload_name(db_type),
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "replicas": ordinal } })),
            )
            .await?;
        info!(cluster = %cluster.key(), %pod, "member removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::core::v1::{PodCondition, PodStatus},
        apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
    };

    use super::*;
    use crate::domain::cluster::test_helpers::default_cluster_ref;

    fn pod(name: &str, ready: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_member_from_pod_reads_ordinal_and_readiness() {
        let cluster = default_cluster_ref();

        let member = member_from_pod(&cluster, DbType::Nb, &pod("ovsdbserver-nb-2", "True"));
        assert_eq!(
            member,
            Some(Member {
                ordinal: 2,
                pod_name: "ovsdbserver-nb-2".to_string(),
                ready: true,
            })
        );

        let unready = member_from_pod(&cluster, DbType::Nb, &pod("ovsdbserver-nb-0", "False"));
        assert!(!unready.unwrap().ready);
    }

    const SURVIVOR_STATUS: &str = "\
Role: leader
Servers:
    4b1c (4b1c at tcp:ovsdbserver-nb-0.ovsdbserver-nb.openstack.svc.cluster.local:6643) (self)
    9e07 (9e07 at tcp:ovsdbserver-nb-1.ovsdbserver-nb.openstack.svc.cluster.local:6643)
";

    fn leave_error() -> OperatorError {
        OperatorError::ProbeFailing {
            message: "container not running".to_string(),
        }
    }

    #[test]
    fn test_failed_leave_blocks_removal_of_a_listed_voter() {
        let cluster = default_cluster_ref();

        let result = confirm_departure(
            "ovsdbserver-nb-1",
            &cluster.member_host(DbType::Nb, 1),
            &leave_error(),
            Ok(SURVIVOR_STATUS.to_string()),
        );

        match result {
            Err(OperatorError::PlatformUnavailable { message }) => {
                assert!(message.contains("still a RAFT voter"));
            }
            other => panic!("Expected PlatformUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_leave_allows_removal_of_an_absent_member() {
        let cluster = default_cluster_ref();

        let result = confirm_departure(
            "ovsdbserver-nb-2",
            &cluster.member_host(DbType::Nb, 2),
            &leave_error(),
            Ok(SURVIVOR_STATUS.to_string()),
        );

        assert!(result.is_ok());
    }

    #[test]
    fn test_failed_leave_blocks_removal_when_survivor_is_unreachable() {
        let cluster = default_cluster_ref();

        let result = confirm_departure(
            "ovsdbserver-nb-2",
            &cluster.member_host(DbType::Nb, 2),
            &leave_error(),
            Err(OperatorError::platform("connection refused")),
        );

        assert!(matches!(
            result,
            Err(OperatorError::PlatformUnavailable { .. })
        ));
    }

    #[test]
    fn test_member_from_pod_skips_foreign_and_terminating_pods() {
        let cluster = default_cluster_ref();
        assert_eq!(
            member_from_pod(&cluster, DbType::Nb, &pod("ovsdbserver-nb-x", "True")),
            None
        );

        let mut leaving = pod("ovsdbserver-nb-1", "True");
        leaving.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(member_from_pod(&cluster, DbType::Nb, &leaving), None);
    }
}
