//! KubeVirt client errors

use thiserror::Error;

/// Errors that can occur when talking to KubeVirt, a VM over SSH, or a workload cluster
#[derive(Debug, Error)]
pub enum KubevirtError {
    /// Kubernetes API error (management or workload cluster)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote command failed or could not be started
    #[error("SSH command failed: {0}")]
    Ssh(String),

    /// Local I/O error (temp key file, child process)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubeconfig could not be parsed or turned into a client
    #[error("Invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object content is not usable (e.g. malformed VM template)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl KubevirtError {
    /// Returns true for "does not exist" errors, including API 404s
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}
