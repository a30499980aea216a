//! Per-machine bootstrap secret
//!
//! The bootstrap provider writes a generic payload to the secret named by
//! `Machine.spec.bootstrap.dataSecretName` (key `value`). The VM consumes a
//! derived copy, `<dataSecretName>-userdata` (key `userdata`), owned by the
//! KubevirtMachine. The copy is created once; an existing copy is never
//! rewritten.

pub mod document;

use crate::api::ManagementApi;
use crate::config::BootstrapOptions;
use crate::error::ControllerError;
use crate::ssh_keys::SshKeyPair;
use crds::{KubevirtMachine, Machine, CLUSTER_NAME_LABEL, CLUSTER_SECRET_TYPE};
use document::BootstrapDocument;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Suffix of the derived secret
pub const USERDATA_SECRET_SUFFIX: &str = "-userdata";
/// Data key of the derived secret
pub const USERDATA_KEY: &str = "userdata";
/// Data key of the generic bootstrap secret
pub const BOOTSTRAP_VALUE_KEY: &str = "value";

/// Name of the derived secret for a bootstrap data secret
pub fn userdata_secret_name(data_secret_name: &str) -> String {
    format!("{data_secret_name}{USERDATA_SECRET_SUFFIX}")
}

/// Creates the derived bootstrap secret of a machine
pub struct BootstrapSecretSynthesizer<'a> {
    api: &'a dyn ManagementApi,
    options: &'a BootstrapOptions,
}

impl<'a> BootstrapSecretSynthesizer<'a> {
    /// Synthesizer writing through `api`
    pub fn new(api: &'a dyn ManagementApi, options: &'a BootstrapOptions) -> Self {
        Self { api, options }
    }

    /// Make sure the derived secret exists and return its name
    pub async fn ensure(
        &self,
        kubevirt_machine: &KubevirtMachine,
        machine: &Machine,
        ssh_keys: &SshKeyPair,
    ) -> Result<String, ControllerError> {
        let data_secret_name = machine
            .spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .ok_or_else(|| ControllerError::BootstrapData("Machine has no bootstrap.dataSecretName".to_string()))?;
        let namespace = machine
            .metadata
            .namespace
            .as_deref()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let name = userdata_secret_name(data_secret_name);

        if self.api.get_secret(namespace, &name).await?.is_some() {
            debug!("Bootstrap secret {}/{} already exists", namespace, name);
            return Ok(name);
        }

        let source = self
            .api
            .get_secret(namespace, data_secret_name)
            .await?
            .ok_or_else(|| {
                ControllerError::BootstrapData(format!("secret {namespace}/{data_secret_name} not found"))
            })?;
        let value = source
            .data
            .as_ref()
            .and_then(|data| data.get(BOOTSTRAP_VALUE_KEY))
            .map(|bytes| bytes.0.clone())
            .ok_or_else(|| {
                ControllerError::BootstrapData(format!(
                    "secret {namespace}/{data_secret_name} has no '{BOOTSTRAP_VALUE_KEY}' entry"
                ))
            })?;

        let userdata = if self.options.inject_ssh_user {
            let public_key = String::from_utf8_lossy(&ssh_keys.public_key);
            BootstrapDocument::parse(&value)?
                .ensure_user(&self.options.ssh_user, public_key.trim())
                .to_bytes()?
        } else {
            value
        };

        let owner = kubevirt_machine
            .owner_ref(&())
            .ok_or(ControllerError::MissingObjectKey("uid"))?;
        let cluster_name = &machine.spec.cluster_name;

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone())])),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            type_: Some(CLUSTER_SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([(USERDATA_KEY.to_string(), ByteString(userdata))])),
            ..Secret::default()
        };

        self.api.create_secret(namespace, &secret).await?;
        info!("Created bootstrap secret {}/{}", namespace, name);
        Ok(name)
    }
}
