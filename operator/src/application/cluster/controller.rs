use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
};
use rand::Rng;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{
        cluster::{
            entities::{OvnDbCluster, Requeue},
            ports::ClusterService,
        },
        common::OperatorConfig,
        error::OperatorError,
    },
    infrastructure::cluster::{
        crd::{OVNDBCluster, OVNDBClusterStatus},
        repositories::resources::FIELD_MANAGER,
    },
};

/// One async mutex per cluster key, so two passes on the same cluster never overlap.
#[derive(Default)]
pub struct ClusterLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClusterLocks {
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    /// Forgets a deleted cluster. A pass still holding the lock keeps its own handle.
    pub fn remove(&self, key: &str) {
        self.locks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Consecutive failed passes per cluster, driving the backoff schedule.
#[derive(Default)]
pub struct FailureTracker {
    counts: DashMap<String, u32>,
}

impl FailureTracker {
    pub fn record(&self, key: &str) -> u32 {
        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&self, key: &str) {
        self.counts.remove(key);
    }
}

pub struct Context<S: ClusterService> {
    pub client: Client,
    pub service: Arc<S>,
    pub config: OperatorConfig,
    pub locks: ClusterLocks,
    pub failures: FailureTracker,
}

fn object_key(object: &OVNDBCluster) -> String {
    format!(
        "{}/{}",
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

/// Turns the requested requeue into a controller action. `failures` is the
/// consecutive failure count including this pass.
pub fn next_action<G: Rng + ?Sized>(
    requeue: Requeue,
    config: &OperatorConfig,
    failures: u32,
    rng: &mut G,
) -> Action {
    match requeue {
        Requeue::Steady => Action::requeue(config.requeue_interval),
        Requeue::Progressing => Action::requeue(config.progress_interval),
        Requeue::Backoff => Action::requeue(config.backoff.delay(failures.max(1), rng)),
        Requeue::AwaitChange => Action::await_change(),
    }
}

async fn publish_status(
    client: &Client,
    object: &OVNDBCluster,
    status: &OVNDBClusterStatus,
) -> Result<(), OperatorError> {
    if object.status.as_ref() == Some(status) {
        debug!(cluster = %object_key(object), "status unchanged");
        return Ok(());
    }
    let namespace = object.namespace().unwrap_or_default();
    let api: Api<OVNDBCluster> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({
        "apiVersion": OVNDBCluster::api_version(&()),
        "kind": OVNDBCluster::kind(&()),
        "status": status,
    });
    api.patch_status(
        &object.name_any(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&patch),
    )
    .await?;
    Ok(())
}

async fn reconcile<S: ClusterService>(
    object: Arc<OVNDBCluster>,
    ctx: Arc<Context<S>>,
) -> Result<Action, OperatorError> {
    let key = object_key(&object);
    let lock = ctx.locks.get(&key);
    let _guard = lock.lock().await;

    if object.meta().deletion_timestamp.is_some() {
        debug!(cluster = %key, "cluster is being deleted, owned resources follow");
        ctx.failures.reset(&key);
        ctx.locks.remove(&key);
        return Ok(Action::await_change());
    }

    let cluster = OvnDbCluster::try_from(object.as_ref())?;
    let outcome = ctx.service.reconcile_cluster(&cluster).await?;

    publish_status(
        &ctx.client,
        &object,
        &OVNDBClusterStatus::from(&outcome.status),
    )
    .await?;

    let failures = if outcome.requeue == Requeue::Backoff {
        ctx.failures.record(&key)
    } else {
        ctx.failures.reset(&key);
        0
    };
    let action = next_action(outcome.requeue, &ctx.config, failures, &mut rand::rng());
    debug!(cluster = %key, ready = outcome.status.ready_count, ?action, "reconciled");
    Ok(action)
}

fn error_policy<S: ClusterService>(
    object: Arc<OVNDBCluster>,
    error: &OperatorError,
    ctx: Arc<Context<S>>,
) -> Action {
    let key = object_key(&object);
    let failures = ctx.failures.record(&key);
    match error {
        OperatorError::EndpointNotReady { .. } => {
            debug!(cluster = %key, %error, "endpoint not ready")
        }
        e if e.is_transient() => warn!(cluster = %key, failures, %error, "reconcile failed"),
        _ => error!(cluster = %key, failures, %error, "reconcile failed"),
    }
    next_action(Requeue::Backoff, &ctx.config, failures, &mut rand::rng())
}

pub async fn run_cluster_controller<S>(client: Client, service: Arc<S>, config: OperatorConfig)
where
    S: ClusterService + 'static,
{
    let (clusters, stateful_sets): (Api<OVNDBCluster>, Api<StatefulSet>) =
        match &config.watch_namespace {
            Some(namespace) => (
                Api::namespaced(client.clone(), namespace),
                Api::namespaced(client.clone(), namespace),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    info!(namespace = ?config.watch_namespace, "starting OVNDBCluster controller");
    let context = Arc::new(Context {
        client,
        service,
        config,
        locks: ClusterLocks::default(),
        failures: FailureTracker::default(),
    });

    Controller::new(clusters, watcher::Config::default())
        .owns(stateful_sets, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(name = %object.name, namespace = ?object.namespace, "pass complete"),
                Err(e) => debug!(error = %e, "controller event"),
            }
        })
        .await;
    info!("OVNDBCluster controller terminated");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::domain::common::testing::test_config;

    #[test]
    fn test_next_action_per_requeue() {
        let config = test_config();
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(
            next_action(Requeue::Steady, &config, 0, &mut rng),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(
            next_action(Requeue::Progressing, &config, 0, &mut rng),
            Action::requeue(Duration::from_secs(5))
        );
        assert_eq!(
            next_action(Requeue::AwaitChange, &config, 0, &mut rng),
            Action::await_change()
        );
    }

    #[test]
    fn test_backoff_follows_policy() {
        let config = test_config();

        for failures in [1, 4, 9, 30] {
            let mut rng = StdRng::seed_from_u64(failures.into());
            let mut expected_rng = StdRng::seed_from_u64(failures.into());

            let action = next_action(Requeue::Backoff, &config, failures, &mut rng);

            assert_eq!(
                action,
                Action::requeue(config.backoff.delay(failures, &mut expected_rng)),
                "failures = {failures}"
            );
        }
    }

    #[test]
    fn test_failure_tracker_counts_and_resets() {
        let tracker = FailureTracker::default();

        assert_eq!(tracker.record("openstack/ovsdbserver-nb"), 1);
        assert_eq!(tracker.record("openstack/ovsdbserver-nb"), 2);
        assert_eq!(tracker.record("openstack/ovsdbserver-sb"), 1);

        tracker.reset("openstack/ovsdbserver-nb");
        assert_eq!(tracker.record("openstack/ovsdbserver-nb"), 1);
    }

    #[tokio::test]
    async fn test_cluster_locks_are_shared_per_key() {
        let locks = ClusterLocks::default();

        let first = locks.get("openstack/ovsdbserver-nb");
        let _held = first.lock().await;

        assert!(locks.get("openstack/ovsdbserver-nb").try_lock().is_err());
        assert!(locks.get("openstack/ovsdbserver-sb").try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_cluster_locks_forget_deleted_clusters() {
        let locks = ClusterLocks::default();
        let held = locks.get("openstack/ovsdbserver-nb");
        let _other = locks.get("openstack/ovsdbserver-sb");
        assert_eq!(locks.len(), 2);

        let _guard = held.lock().await;
        locks.remove("openstack/ovsdbserver-nb");

        assert_eq!(locks.len(), 1);
        assert!(held.try_lock().is_err());
    }
}
