use std::net::IpAddr;

use crate::domain::{
    cluster::entities::{
        ClusterRef, DbType, Member, OvnDbCluster, RaftRole, ReconcileOutcome, Tuning,
        WorkloadTemplate,
    },
    error::OperatorError,
};

#[cfg_attr(test, mockall::automock)]
pub trait ClusterService: Send + Sync {
    /// Runs one level-triggered pass and returns the status to publish.
    fn reconcile_cluster(
        &self,
        cluster: &OvnDbCluster,
    ) -> impl Future<Output = Result<ReconcileOutcome, OperatorError>> + Send;
}

/// Lifecycle of the replicated workload hosting the members.
#[cfg_attr(test, mockall::automock)]
pub trait WorkloadRepository: Send + Sync {
    fn observe(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
    ) -> impl Future<Output = Result<Vec<Member>, OperatorError>> + Send;

    /// Creates or updates the workload with `template.replicas` ordinals and returns
    /// the per-ordinal status afterwards.
    fn ensure(
        &self,
        cluster: &ClusterRef,
        template: &WorkloadTemplate,
    ) -> impl Future<Output = Result<Vec<Member>, OperatorError>> + Send;

    /// Removes one member. Only ever called for the highest live ordinal.
    fn delete_member(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        ordinal: u32,
    ) -> impl Future<Output = Result<(), OperatorError>> + Send;
}

#[cfg_attr(test, mockall::automock)]
pub trait NetworkAttachmentRepository: Send + Sync {
    fn resolve(
        &self,
        cluster: &ClusterRef,
        attachment: &str,
        pod_name: &str,
    ) -> impl Future<Output = Result<Vec<IpAddr>, OperatorError>> + Send;
}

/// Runtime access to each member's RAFT state.
#[cfg_attr(test, mockall::automock)]
pub trait RaftRepository: Send + Sync {
    fn role(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        member: &Member,
    ) -> impl Future<Output = Result<RaftRole, OperatorError>> + Send;

    fn apply_tuning(
        &self,
        cluster: &ClusterRef,
        db_type: DbType,
        member: &Member,
        role: RaftRole,
        tuning: &Tuning,
    ) -> impl Future<Output = Result<(), OperatorError>> + Send;
}
