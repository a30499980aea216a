//! KubevirtCluster CRD
//!
//! Cluster-level infrastructure object. The machine controller only reads it:
//! it locates the SSH key secret and the workload kubeconfig through it.

use crate::condition::{Condition, HasConditions};
use crate::references::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "KubevirtCluster",
    namespaced,
    status = "KubevirtClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtClusterSpec {
    /// Endpoint used to reach the workload control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// SSH keys shared by every node of the cluster
    #[serde(default)]
    pub ssh_keys: SshKeys,
}

/// API endpoint of the workload control plane
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Hostname or IP
    pub host: String,
    /// Port
    pub port: i32,
}

/// Where the cluster's node SSH keys live
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshKeys {
    /// Optional reference to a user supplied key configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Name of the secret holding the generated key pair; set once persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtClusterStatus {
    /// Cluster infrastructure is ready
    #[serde(default)]
    pub ready: bool,

    /// Observed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl KubevirtCluster {
    /// Name of the secret holding the workload cluster kubeconfig
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.metadata.name.as_deref().unwrap_or_default())
    }
}

impl HasConditions for KubevirtCluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(KubevirtClusterStatus::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_secret_name() {
        let cluster = KubevirtCluster::new("demo", KubevirtClusterSpec::default());
        assert_eq!(cluster.kubeconfig_secret_name(), "demo-kubeconfig");
    }

    #[test]
    fn test_ssh_keys_default_when_absent() {
        let spec: KubevirtClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.ssh_keys.data_secret_name.is_none());
    }
}
