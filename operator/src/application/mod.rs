use std::sync::Arc;

use kube::Client;
use tracing::{debug, error, info};

use crate::{
    application::cluster::controller::run_cluster_controller,
    domain::{
        common::{OperatorConfig, services::Service},
        error::OperatorError,
    },
    infrastructure::cluster::repositories::{
        network::K8sNetworkAttachmentRepository, raft::K8sRaftRepository,
        workload::K8sWorkloadRepository,
    },
};

pub mod cluster;

pub type OperatorService =
    Service<K8sWorkloadRepository, K8sNetworkAttachmentRepository, K8sRaftRepository>;
pub struct OperatorApp;

pub fn create_service(client: Client, config: OperatorConfig) -> OperatorService {
    Service::new(
        K8sWorkloadRepository::new(client.clone()),
        K8sNetworkAttachmentRepository::new(client.clone()),
        K8sRaftRepository::new(client),
        config,
    )
}

impl OperatorApp {
    pub async fn run(config: OperatorConfig) -> Result<(), OperatorError> {
        debug!("initializing kubernetes client...");
        let client = Client::try_default().await.map_err(|e| {
            error!("unable to create the Kubernetes client: {:?}", e);
            OperatorError::InternalServerError {
                message: format!("Kubernetes client error: {}", e),
            }
        })?;
        info!("kubernetes client initialized");

        let service = Arc::new(create_service(client.clone(), config.clone()));
        info!(env = ?config.env, "service initialized");

        run_cluster_controller(client, service, config).await;
        info!("cluster controller has stopped");

        Ok(())
    }
}
