use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use kube::{Client, api::Api};
use serde::Deserialize;

use crate::{
    domain::{
        cluster::{entities::ClusterRef, ports::NetworkAttachmentRepository},
        error::OperatorError,
    },
    infrastructure::cluster::repositories::resources::qualified_attachment,
};

/// Written by the CNI meta-plugin once the pod's secondary interfaces are up.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

#[derive(Debug, Deserialize)]
struct NetworkStatus {
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

/// Extracts the IPs of `network` (`namespace/name`) from a network-status annotation.
pub fn attachment_ips(annotation: &str, network: &str) -> Result<Vec<IpAddr>, OperatorError> {
    let entries: Vec<NetworkStatus> =
        serde_json::from_str(annotation).map_err(|e| OperatorError::MalformedState {
            message: format!("unreadable {NETWORK_STATUS_ANNOTATION} annotation: {e}"),
        })?;

    Ok(entries
        .into_iter()
        .filter(|entry| entry.name == network)
        .flat_map(|entry| entry.ips)
        .filter_map(|ip| ip.parse().ok())
        .collect())
}

#[derive(Clone)]
pub struct K8sNetworkAttachmentRepository {
    client: Client,
}

impl K8sNetworkAttachmentRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl NetworkAttachmentRepository for K8sNetworkAttachmentRepository {
    async fn resolve(
        &self,
        cluster: &ClusterRef,
        attachment: &str,
        pod_name: &str,
    ) -> Result<Vec<IpAddr>, OperatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &cluster.namespace);
        let Some(pod) = pods.get_opt(pod_name).await? else {
            return Ok(Vec::new());
        };
        let Some(annotation) = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(NETWORK_STATUS_ANNOTATION))
        else {
            return Ok(Vec::new());
        };

        let (namespace, name) = qualified_attachment(cluster, attachment);
        attachment_ips(annotation, &format!("{namespace}/{name}"))
    }
}
