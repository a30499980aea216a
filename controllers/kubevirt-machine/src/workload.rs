//! Workload cluster clients
//!
//! A client for the guest cluster is rebuilt on every reconciliation from the
//! kubeconfig the cluster infrastructure controller stores in
//! `<kubevirtCluster>-kubeconfig` (key `value`).

use crate::api::ManagementApi;
use crate::error::ControllerError;
use crds::KubevirtCluster;
use kubevirt_client::{KubeWorkloadCluster, WorkloadCluster};

/// Data key of the kubeconfig secret
pub const KUBECONFIG_VALUE_KEY: &str = "value";

/// Builds workload cluster clients from kubeconfig bytes
#[async_trait::async_trait]
pub trait WorkloadClientFactory: Send + Sync {
    /// Parse `kubeconfig` and connect
    async fn from_kubeconfig_bytes(&self, kubeconfig: &[u8]) -> Result<Box<dyn WorkloadCluster>, ControllerError>;
}

/// Factory producing kube-backed clients
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeWorkloadClientFactory;

#[async_trait::async_trait]
impl WorkloadClientFactory for KubeWorkloadClientFactory {
    async fn from_kubeconfig_bytes(&self, kubeconfig: &[u8]) -> Result<Box<dyn WorkloadCluster>, ControllerError> {
        let cluster = KubeWorkloadCluster::from_kubeconfig_bytes(kubeconfig).await?;
        Ok(Box::new(cluster))
    }
}

/// Read the workload kubeconfig of `kubevirt_cluster`
pub async fn workload_kubeconfig(
    api: &dyn ManagementApi,
    kubevirt_cluster: &KubevirtCluster,
) -> Result<Vec<u8>, ControllerError> {
    let namespace = kubevirt_cluster
        .metadata
        .namespace
        .as_deref()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let name = kubevirt_cluster.kubeconfig_secret_name();

    let secret = api
        .get_secret(namespace, &name)
        .await?
        .ok_or_else(|| ControllerError::WorkloadCluster(format!("kubeconfig secret {namespace}/{name} not found")))?;
    secret
        .data
        .and_then(|mut data| data.remove(KUBECONFIG_VALUE_KEY))
        .map(|bytes| bytes.0)
        .ok_or_else(|| {
            ControllerError::WorkloadCluster(format!(
                "kubeconfig secret {namespace}/{name} has no '{KUBECONFIG_VALUE_KEY}' entry"
            ))
        })
}

/// Client for the workload cluster of `kubevirt_cluster`
pub async fn workload_cluster_client(
    api: &dyn ManagementApi,
    factory: &dyn WorkloadClientFactory,
    kubevirt_cluster: &KubevirtCluster,
) -> Result<Box<dyn WorkloadCluster>, ControllerError> {
    let kubeconfig = workload_kubeconfig(api, kubevirt_cluster).await?;
    factory.from_kubeconfig_bytes(&kubeconfig).await
}
