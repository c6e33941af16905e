use std::time::Duration;

use crate::domain::{cluster::entities::DbType, common::backoff::BackoffPolicy};

pub mod backoff;
pub mod services;

/// Fall-back container image for NB clusters.
pub const OVN_NB_CONTAINER_IMAGE: &str =
    "quay.io/podified-antelope-centos9/openstack-ovn-nb-db-server:current-podified";
/// Fall-back container image for SB clusters.
pub const OVN_SB_CONTAINER_IMAGE: &str =
    "quay.io/podified-antelope-centos9/openstack-ovn-sb-db-server:current-podified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDefaults {
    pub nb: String,
    pub sb: String,
}

impl ImageDefaults {
    pub fn for_db_type(&self, db_type: DbType) -> &str {
        match db_type {
            DbType::Nb => &self.nb,
            DbType::Sb => &self.sb,
        }
    }
}

impl Default for ImageDefaults {
    fn default() -> Self {
        ImageDefaults {
            nb: OVN_NB_CONTAINER_IMAGE.to_string(),
            sb: OVN_SB_CONTAINER_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub env: Environment,
    pub images: ImageDefaults,
    pub call_timeout: Duration,
    pub requeue_interval: Duration,
    pub progress_interval: Duration,
    pub backoff: BackoffPolicy,
    pub probe_grace: chrono::Duration,
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            env: Environment::Production,
            images: ImageDefaults::default(),
            call_timeout: Duration::from_secs(30),
            requeue_interval: Duration::from_secs(60),
            progress_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            probe_grace: chrono::Duration::seconds(120),
            watch_namespace: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Development,
    Production,
}
