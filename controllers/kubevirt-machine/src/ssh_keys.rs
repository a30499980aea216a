//! Cluster node SSH key material
//!
//! The KubevirtCluster controller generates one key pair per cluster and
//! records the secret it persisted it to in `spec.sshKeys.dataSecretName`.
//! Machines only read it.

use crate::api::ManagementApi;
use crate::error::ControllerError;
use crds::KubevirtCluster;

/// Secret data key of the public key
pub const PUBLIC_KEY_DATA_KEY: &str = "pub";
/// Secret data key of the private key
pub const PRIVATE_KEY_DATA_KEY: &str = "key";

/// SSH key pair shared by the nodes of one cluster
#[derive(Clone, PartialEq, Eq)]
pub struct SshKeyPair {
    /// OpenSSH public key
    pub public_key: Vec<u8>,
    /// PEM private key
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for SshKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshKeyPair")
            .field("public_key", &String::from_utf8_lossy(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Access to the persisted key pair of a cluster
pub struct ClusterNodeSshKeys<'a> {
    api: &'a dyn ManagementApi,
    cluster: &'a KubevirtCluster,
}

impl<'a> ClusterNodeSshKeys<'a> {
    /// Keys of `cluster`
    pub fn new(api: &'a dyn ManagementApi, cluster: &'a KubevirtCluster) -> Self {
        Self { api, cluster }
    }

    /// The cluster controller has persisted the key pair
    pub fn is_persisted(&self) -> bool {
        self.secret_name().is_some()
    }

    fn secret_name(&self) -> Option<&str> {
        self.cluster
            .spec
            .ssh_keys
            .data_secret_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Read the key pair from its secret
    pub async fn fetch(&self) -> Result<SshKeyPair, ControllerError> {
        let name = self
            .secret_name()
            .ok_or_else(|| ControllerError::SshKeys("key pair not persisted yet".to_string()))?;
        let namespace = self
            .cluster
            .metadata
            .namespace
            .as_deref()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;

        let secret = self
            .api
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::SshKeys(format!("secret {namespace}/{name} not found")))?;
        let data = secret.data.unwrap_or_default();

        let field = |key: &str| {
            data.get(key)
                .map(|bytes| bytes.0.clone())
                .filter(|bytes| !bytes.is_empty())
                .ok_or_else(|| ControllerError::SshKeys(format!("secret {namespace}/{name} has no '{key}' entry")))
        };

        Ok(SshKeyPair {
            public_key: field(PUBLIC_KEY_DATA_KEY)?,
            private_key: field(PRIVATE_KEY_DATA_KEY)?,
        })
    }
}
