//! Collaborator traits for mocking
//!
//! These traits abstract the VM, the remote command channel into the VM and the
//! workload cluster, so the machine reconciler can be unit tested against
//! in-memory implementations. All async methods must be `Send` to work with
//! Tokio's work-stealing runtime.

use crate::error::KubevirtError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Runs a command inside a VM and returns its trimmed stdout
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` remotely
    async fn execute(&self, command: &str) -> Result<String, KubevirtError>;
}

/// Node operations against the workload cluster
#[async_trait::async_trait]
pub trait WorkloadCluster: Send + Sync {
    /// Current provider ID of a node; `NotFound` when the node is not registered yet
    async fn node_provider_id(&self, node_name: &str) -> Result<Option<String>, KubevirtError>;

    /// Set `spec.providerID` on a node
    async fn set_node_provider_id(&self, node_name: &str, provider_id: &str) -> Result<(), KubevirtError>;
}

/// Handle on the VM backing one machine
///
/// A handle is a snapshot taken when it was obtained: `exists()` and
/// `address()` do not change after `create()`; the next reconciliation
/// obtains a fresh handle.
#[async_trait::async_trait]
pub trait VirtualMachineHandle: Send + Sync {
    /// VM name (same as the machine name)
    fn name(&self) -> &str;

    /// The VM object exists
    fn exists(&self) -> bool;

    /// Create the VM; an already existing VM is not an error
    async fn create(&self) -> Result<(), KubevirtError>;

    /// Address of the VM's first interface, empty when not known yet
    fn address(&self) -> String;

    /// The guest is running and answers remote commands
    async fn is_booted(&self, executor: &dyn CommandExecutor) -> bool;

    /// The bootstrap payload reported success
    async fn is_bootstrapped(&self, executor: &dyn CommandExecutor) -> bool;

    /// Register the provider ID on the workload node and return it
    async fn set_provider_id(&self, workload: &dyn WorkloadCluster) -> Result<String, KubevirtError>;

    /// Delete the VM; a missing VM is not an error
    async fn delete(&self) -> Result<(), KubevirtError>;
}

/// What a VM handle needs to know about the machine it backs
#[derive(Debug, Clone, Default)]
pub struct VmRequest {
    /// Namespace of the machine and its VM
    pub namespace: String,
    /// Machine name, used as VM name and node name
    pub name: String,
    /// Owning Cluster API cluster
    pub cluster_name: String,
    /// `VirtualMachineSpec` template from the machine, if any
    pub vm_spec: Option<serde_json::Value>,
    /// Secret holding the VM user data
    pub user_data_secret_name: String,
    /// Owner reference pointing back at the machine
    pub owner: OwnerReference,
}

/// Obtains VM handles
#[async_trait::async_trait]
pub trait VmProvider: Send + Sync {
    /// Look up the VM for a machine and return a handle on it
    async fn machine(&self, request: &VmRequest) -> Result<Box<dyn VirtualMachineHandle>, KubevirtError>;
}
