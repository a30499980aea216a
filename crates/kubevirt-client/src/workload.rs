//! Workload cluster access
//!
//! Node operations against the guest cluster, backed by a `kube::Client`
//! built from that cluster's kubeconfig.

use crate::error::KubevirtError;
use crate::kubevirt_trait::WorkloadCluster;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

/// Workload cluster reached through a kube client
#[derive(Clone)]
pub struct KubeWorkloadCluster {
    nodes: Api<Node>,
}

impl std::fmt::Debug for KubeWorkloadCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadCluster").finish_non_exhaustive()
    }
}

impl KubeWorkloadCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { nodes: Api::all(client) }
    }

    /// Build a client from raw kubeconfig YAML
    pub async fn from_kubeconfig_bytes(kubeconfig: &[u8]) -> Result<Self, KubevirtError> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| KubevirtError::Kubeconfig(format!("not UTF-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(text).map_err(|e| KubevirtError::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| KubevirtError::Kubeconfig(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait::async_trait]
impl WorkloadCluster for KubeWorkloadCluster {
    async fn node_provider_id(&self, node_name: &str) -> Result<Option<String>, KubevirtError> {
        let node = self
            .nodes
            .get_opt(node_name)
            .await?
            .ok_or_else(|| KubevirtError::NotFound(format!("node {node_name}")))?;
        Ok(node.spec.and_then(|s| s.provider_id))
    }

    async fn set_node_provider_id(&self, node_name: &str, provider_id: &str) -> Result<(), KubevirtError> {
        let patch = serde_json::json!({ "spec": { "providerID": provider_id } });
        self.nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
