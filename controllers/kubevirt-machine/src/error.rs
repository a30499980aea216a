//! Controller-specific error types.
//!
//! Every error carries a kind telling the dispatcher how to treat it:
//! absent dependencies, dependencies that are not ready yet, and failures
//! that need a backoff retry.

use crate::bootstrap::document::BootstrapDocumentError;
use kube::Error as KubeError;
use kubevirt_client::KubevirtError;
use thiserror::Error;

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A dependency is absent; usually a soft wait
    NotFound,
    /// A dependency exists but is not ready; a timed requeue
    Transient,
    /// Unexpected failure; dispatcher backoff
    Fatal,
}

/// Errors that can occur in the KubeVirt machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// VM, SSH or workload cluster error
    #[error("KubeVirt error: {0}")]
    Kubevirt(#[from] KubevirtError),

    /// Cluster SSH key secret missing or malformed
    #[error("SSH keys: {0}")]
    SshKeys(String),

    /// Generic bootstrap secret missing or malformed
    #[error("Bootstrap data: {0}")]
    BootstrapData(String),

    /// Bootstrap payload could not be parsed or rewritten
    #[error("Bootstrap document: {0}")]
    BootstrapDocument(#[from] BootstrapDocumentError),

    /// Workload cluster client could not be built
    #[error("Workload cluster: {0}")]
    WorkloadCluster(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object lacks a name or namespace
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Persisting the KubevirtMachine failed
    #[error("Failed to patch KubevirtMachine: {0}")]
    Patch(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry or server failure
    #[error("Metrics: {0}")]
    Metrics(String),
}

impl ControllerError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Kube(KubeError::Api(response)) if response.code == 404 => ErrorKind::NotFound,
            Self::Kube(KubeError::Api(response)) if response.code == 409 || response.code >= 500 => {
                ErrorKind::Transient
            }
            Self::Kubevirt(e) if e.is_not_found() => ErrorKind::NotFound,
            Self::Kubevirt(KubevirtError::Ssh(_)) => ErrorKind::Transient,
            Self::WorkloadCluster(_) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<prometheus::Error> for ControllerError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics(e.to_string())
    }
}
