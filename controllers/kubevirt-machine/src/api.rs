//! Management cluster access
//!
//! The reconciler reads and writes the management cluster only through
//! `ManagementApi`, so it can be tested against `MockManagementApi`.
//! Absence is reported as `Ok(None)`, never as an error.

use crate::error::ControllerError;
use crate::reconcile_helpers::MachinePatch;
use crds::{Cluster, KubevirtCluster, KubevirtMachine, Machine};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Reads and writes against the management cluster
#[async_trait::async_trait]
pub trait ManagementApi: Send + Sync {
    /// Load a KubevirtMachine
    async fn get_kubevirt_machine(&self, namespace: &str, name: &str)
        -> Result<Option<KubevirtMachine>, ControllerError>;

    /// Load a Cluster API Machine
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError>;

    /// Load a Cluster API Cluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError>;

    /// Load a KubevirtCluster
    async fn get_kubevirt_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<KubevirtCluster>, ControllerError>;

    /// Load a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    /// Create a Secret; an existing one is left untouched
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ControllerError>;

    /// Persist finalizer/spec and status changes of a KubevirtMachine
    async fn patch_kubevirt_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &MachinePatch,
    ) -> Result<(), ControllerError>;
}

/// `ManagementApi` on top of a kube client
#[derive(Clone)]
pub struct KubeManagementApi {
    client: Client,
}

impl std::fmt::Debug for KubeManagementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeManagementApi").finish_non_exhaustive()
    }
}

impl KubeManagementApi {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ManagementApi for KubeManagementApi {
    async fn get_kubevirt_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KubevirtMachine>, ControllerError> {
        Ok(self.api::<KubevirtMachine>(namespace).get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        Ok(self.api::<Machine>(namespace).get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(self.api::<Cluster>(namespace).get_opt(name).await?)
    }

    async fn get_kubevirt_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KubevirtCluster>, ControllerError> {
        Ok(self.api::<KubevirtCluster>(namespace).get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ControllerError> {
        match self.api::<Secret>(namespace).create(&PostParams::default(), secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(
                    "Secret {}/{} already exists",
                    namespace,
                    secret.metadata.name.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_kubevirt_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &MachinePatch,
    ) -> Result<(), ControllerError> {
        let api = self.api::<KubevirtMachine>(namespace);
        let pp = PatchParams::default();

        // Status goes first: removing the last finalizer may purge the object
        if let Some(status) = &patch.status {
            api.patch_status(name, &pp, &Patch::Merge(status))
                .await
                .map_err(|e| ControllerError::Patch(format!("{namespace}/{name} status: {e}")))?;
        }
        if let Some(object) = &patch.object {
            api.patch(name, &pp, &Patch::Merge(object))
                .await
                .map_err(|e| ControllerError::Patch(format!("{namespace}/{name}: {e}")))?;
        }
        Ok(())
    }
}
