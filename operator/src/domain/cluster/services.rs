use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::{
    cluster::{
        config::{
            Drift, detect_drift, rollout_blocker, rollout_order, service_config_fingerprint,
        },
        endpoints::{AttachmentLookup, resolve_endpoints},
        entities::{
            ClusterRef, ClusterSpec, Member, OvnDbCluster, RaftRole, ReconcileOutcome, Requeue,
            SubResource, WorkloadTemplate,
        },
        members::{MemberPlan, ensure_target, plan_members},
        ports::{ClusterService, NetworkAttachmentRepository, RaftRepository, WorkloadRepository},
        status::{ConfigState, PassObservation, aggregate, mark_invalid_spec, mark_platform_unavailable},
        validation::{ensure_db_type_unchanged, validate_spec},
    },
    common::services::Service,
    error::OperatorError,
};

/// Result of one attempt to roll timers out.
enum Rollout {
    Done,
    Pending(String),
    Failed(OperatorError),
}

impl<W, N, R> Service<W, N, R>
where
    W: WorkloadRepository,
    N: NetworkAttachmentRepository,
    R: RaftRepository,
{
    /// Executes one member-set step. Returns the members as they stand afterwards.
    async fn converge_members(
        &self,
        target: &ClusterRef,
        spec: &ClusterSpec,
        observed: Vec<Member>,
        plan: &MemberPlan,
        platform_error: &mut Option<String>,
    ) -> Result<Vec<Member>, OperatorError> {
        let template = WorkloadTemplate {
            db_type: spec.db_type,
            replicas: ensure_target(spec.replicas, &observed),
            tuning: spec.tuning,
            workload: spec.workload.clone(),
            service_config: service_config_fingerprint(spec),
        };

        if let MemberPlan::ScaleUp { missing } = plan {
            info!(cluster = %target.key(), ?missing, "scaling up");
        }

        let mut members = match self
            .bounded(self.workload_repository.ensure(target, &template))
            .await
        {
            Ok(members) => members,
            Err(OperatorError::PlatformUnavailable { message }) => {
                warn!(cluster = %target.key(), %message, "workload ensure failed");
                *platform_error = Some(message);
                return Ok(observed);
            }
            Err(e) => return Err(e),
        };

        if let Some(victim) = plan.removes() {
            info!(cluster = %target.key(), ordinal = victim, "removing member");
            match self
                .bounded(
                    self.workload_repository
                        .delete_member(target, spec.db_type, victim),
                )
                .await
            {
                Ok(()) => members.retain(|m| m.ordinal != victim),
                Err(OperatorError::PlatformUnavailable { message }) => {
                    warn!(cluster = %target.key(), ordinal = victim, %message, "member removal failed");
                    *platform_error = Some(message);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(members)
    }

    async fn lookup_attachments(
        &self,
        target: &ClusterRef,
        attachment: &str,
        members: &[Member],
    ) -> AttachmentLookup {
        let lookups = members.iter().map(|member| async move {
            let resolved = self
                .bounded(
                    self.attachment_repository
                        .resolve(target, attachment, &member.pod_name),
                )
                .await;
            let ips = match resolved {
                Ok(ips) if !ips.is_empty() => Some(ips),
                Ok(_) => None,
                Err(e) => {
                    debug!(pod = %member.pod_name, error = %e, "attachment not resolved");
                    None
                }
            };
            (member.pod_name.clone(), ips)
        });
        join_all(lookups).await.into_iter().collect()
    }

    async fn find_leader(
        &self,
        target: &ClusterRef,
        spec: &ClusterSpec,
        members: &[Member],
    ) -> Result<Option<u32>, OperatorError> {
        let roles = join_all(members.iter().map(|member| async move {
            let role = self
                .bounded(self.raft_repository.role(target, spec.db_type, member))
                .await;
            (member.ordinal, role)
        }))
        .await;

        let mut leaders = Vec::new();
        for (ordinal, role) in roles {
            if role? == RaftRole::Leader {
                leaders.push(ordinal);
            }
        }
        Ok(match leaders.as_slice() {
            [leader] => Some(*leader),
            _ => None,
        })
    }

    /// Applies timers to every follower, then the leader. Stops at the first failure
    /// so the stored fingerprint is never advanced past what was actually applied.
    async fn roll_out_tuning(
        &self,
        target: &ClusterRef,
        spec: &ClusterSpec,
        members: &[Member],
    ) -> Rollout {
        let leader = match self.find_leader(target, spec, members).await {
            Ok(Some(leader)) => leader,
            Ok(None) => return Rollout::Pending("no single RAFT leader elected".to_string()),
            Err(e) => return Rollout::Failed(e),
        };

        for ordinal in rollout_order(members, leader) {
            let Some(member) = members.iter().find(|m| m.ordinal == ordinal) else {
                continue;
            };
            let role = if ordinal == leader {
                RaftRole::Leader
            } else {
                RaftRole::Follower
            };
            if let Err(e) = self
                .bounded(self.raft_repository.apply_tuning(
                    target,
                    spec.db_type,
                    member,
                    role,
                    &spec.tuning,
                ))
                .await
            {
                return Rollout::Failed(e);
            }
            info!(
                cluster = %target.key(),
                ordinal,
                ?role,
                applied_at = %Utc::now(),
                "timers applied to member"
            );
        }
        Rollout::Done
    }
}

impl<W, N, R> ClusterService for Service<W, N, R>
where
    W: WorkloadRepository,
    N: NetworkAttachmentRepository,
    R: RaftRepository,
{
    async fn reconcile_cluster(
        &self,
        cluster: &OvnDbCluster,
    ) -> Result<ReconcileOutcome, OperatorError> {
        let now = Utc::now();
        let target = &cluster.cluster;
        let mut status = cluster.status.clone();

        let validated = validate_spec(&cluster.spec, &self.config.images)
            .and_then(|spec| ensure_db_type_unchanged(&spec, &status).map(|()| spec));
        let spec = match validated {
            Ok(spec) => spec,
            Err(e) => {
                warn!(cluster = %target.key(), error = %e, "spec rejected, live members left untouched");
                mark_invalid_spec(&mut status, &e.to_string(), now);
                return Ok(ReconcileOutcome {
                    status,
                    requeue: Requeue::AwaitChange,
                });
            }
        };
        status.db_type = Some(spec.db_type);

        let observed = match self
            .bounded(self.workload_repository.observe(target, spec.db_type))
            .await
        {
            Ok(members) => members,
            Err(OperatorError::PlatformUnavailable { message }) => {
                warn!(cluster = %target.key(), %message, "unable to observe members");
                mark_platform_unavailable(&mut status, &message, now);
                return Ok(ReconcileOutcome {
                    status,
                    requeue: Requeue::Backoff,
                });
            }
            Err(e) => return Err(e),
        };

        let mut platform_error = None;
        let plan = plan_members(spec.replicas, &observed);
        let quorum_block = match &plan {
            MemberPlan::Deferred { victim, reason } => {
                warn!(cluster = %target.key(), ordinal = victim, %reason, "scale-down deferred");
                Some(reason.clone())
            }
            _ => None,
        };
        let members = self
            .converge_members(target, &spec, observed, &plan, &mut platform_error)
            .await?;
        if platform_error.is_none() {
            status
                .hash
                .insert(SubResource::ServiceConfig, service_config_fingerprint(&spec));
        }

        let attachment = spec.workload.network_attachment.as_deref();
        let lookup = match attachment {
            Some(name) => self.lookup_attachments(target, name, &members).await,
            None => AttachmentLookup::new(),
        };
        let endpoints = resolve_endpoints(
            target,
            spec.db_type,
            spec.replicas,
            &members,
            attachment,
            &lookup,
            &status,
        );
        let endpoints_resolved = endpoints.resolved(attachment.is_some());
        endpoints.apply_to(&mut status);

        let stored = status.hash.get(&SubResource::Config).copied();
        let blocker = if plan != MemberPlan::Steady {
            Some("membership change in progress".to_string())
        } else if platform_error.is_some() {
            Some("workload unavailable".to_string())
        } else {
            rollout_blocker(spec.replicas, &members)
        };
        let config = match (detect_drift(&spec, stored), blocker) {
            (Drift::None, _) => ConfigState::Applied,
            (Drift::Initial(fingerprint), None) => {
                status.hash.insert(SubResource::Config, fingerprint);
                ConfigState::Applied
            }
            (Drift::Initial(_), Some(reason)) => {
                ConfigState::Pending(format!("waiting for convergence: {reason}"))
            }
            (Drift::Changed(_), Some(reason)) => {
                debug!(cluster = %target.key(), %reason, "timer change queued");
                ConfigState::Pending(format!("queued: {reason}"))
            }
            (Drift::Changed(fingerprint), None) => {
                match self.roll_out_tuning(target, &spec, &members).await {
                    Rollout::Done => {
                        info!(cluster = %target.key(), "timer rollout complete");
                        status.hash.insert(SubResource::Config, fingerprint);
                        ConfigState::Applied
                    }
                    Rollout::Pending(reason) => ConfigState::Pending(reason),
                    Rollout::Failed(e) => {
                        warn!(cluster = %target.key(), error = %e, "timer rollout interrupted");
                        if let OperatorError::PlatformUnavailable { message } = &e {
                            platform_error = Some(message.clone());
                        }
                        ConfigState::Pending(e.to_string())
                    }
                }
            }
        };

        let requeue = if platform_error.is_some() {
            Requeue::Backoff
        } else if quorum_block.is_some() {
            Requeue::Steady
        } else if plan != MemberPlan::Steady
            || config != ConfigState::Applied
            || !endpoints_resolved
            || members.iter().any(|m| !m.ready)
        {
            Requeue::Progressing
        } else {
            Requeue::Steady
        };

        aggregate(
            &mut status,
            &PassObservation {
                replicas: spec.replicas,
                members: &members,
                platform_error,
                quorum_block,
                endpoints_resolved,
                config,
            },
            self.config.probe_grace,
            now,
        );

        debug!(
            cluster = %target.key(),
            ready = status.ready_count,
            replicas = spec.replicas,
            ?requeue,
            "pass complete"
        );
        Ok(ReconcileOutcome { status, requeue })
    }
}
