//! KubeVirt Client
//!
//! Collaborators of the KubeVirt machine controller:
//!
//! - **VM handle**: existence, creation, address, boot and bootstrap probes and
//!   deletion of the `VirtualMachine` backing one machine
//! - **Remote command execution**: `ssh` into a VM with the cluster key pair
//! - **Workload cluster**: register provider IDs on the guest cluster's nodes
//!
//! Each collaborator is a trait so the controller can be tested against the
//! in-memory implementations in `mock` (feature `test-util`).

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod kubevirt_trait;
pub mod models;
pub mod ssh;
pub mod workload;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{provider_id_for, KubevirtVm, KubevirtVmProvider};
pub use error::KubevirtError;
pub use kubevirt_trait::{CommandExecutor, VirtualMachineHandle, VmProvider, VmRequest, WorkloadCluster};
pub use ssh::SshCommandExecutor;
pub use workload::KubeWorkloadCluster;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCommandExecutor, MockVirtualMachine, MockVmProvider, MockVmState, MockWorkloadCluster};
