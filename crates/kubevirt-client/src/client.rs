//! KubeVirt-backed VM handle
//!
//! `KubevirtVmProvider` loads the `VirtualMachine` and `VirtualMachineInstance`
//! named after a machine and wraps them in a `KubevirtVm` handle.

use crate::error::KubevirtError;
use crate::kubevirt_trait::{
    CommandExecutor, VirtualMachineHandle, VmProvider, VmRequest, WorkloadCluster,
};
use crate::models::{VirtualMachine, VirtualMachineInstance, VirtualMachineSpec};
use crds::CLUSTER_NAME_LABEL;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label linking a VMI back to its VM
pub const VM_NAME_LABEL: &str = "kubevirt.io/vm";
/// Scheme of provider IDs assigned to workload nodes
pub const PROVIDER_ID_PREFIX: &str = "kubevirt://";
/// Probe command proving the guest answers remote commands
pub const BOOT_PROBE_COMMAND: &str = "hostname";
/// Probe command reading the bootstrap sentinel written by the bootstrap provider
pub const BOOTSTRAP_PROBE_COMMAND: &str = "cat /run/cluster-api/bootstrap-success.complete";
/// Sentinel content after a successful bootstrap
pub const BOOTSTRAP_SUCCESS: &str = "success";

/// Provider ID for a VM
pub fn provider_id_for(vm_name: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{vm_name}")
}

/// Obtains `KubevirtVm` handles from the management cluster
#[derive(Clone)]
pub struct KubevirtVmProvider {
    client: Client,
}

impl std::fmt::Debug for KubevirtVmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtVmProvider").finish_non_exhaustive()
    }
}

impl KubevirtVmProvider {
    /// Create a provider on top of a management cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl VmProvider for KubevirtVmProvider {
    async fn machine(&self, request: &VmRequest) -> Result<Box<dyn VirtualMachineHandle>, KubevirtError> {
        let vms: Api<VirtualMachine> = Api::namespaced(self.client.clone(), &request.namespace);
        let vmis: Api<VirtualMachineInstance> = Api::namespaced(self.client.clone(), &request.namespace);

        let vm = vms.get_opt(&request.name).await?;
        let vmi = vmis.get_opt(&request.name).await?;
        debug!(
            "Loaded VM {}/{} (exists: {}, instance: {})",
            request.namespace,
            request.name,
            vm.is_some(),
            vmi.is_some()
        );

        Ok(Box::new(KubevirtVm {
            api: vms,
            request: request.clone(),
            vm,
            vmi,
        }))
    }
}

/// Handle on one KubeVirt VM, snapshotted when loaded
pub struct KubevirtVm {
    api: Api<VirtualMachine>,
    request: VmRequest,
    vm: Option<VirtualMachine>,
    vmi: Option<VirtualMachineInstance>,
}

impl std::fmt::Debug for KubevirtVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtVm")
            .field("namespace", &self.request.namespace)
            .field("name", &self.request.name)
            .field("exists", &self.vm.is_some())
            .finish_non_exhaustive()
    }
}

impl KubevirtVm {
    /// Build the `VirtualMachine` object for the request
    pub fn build(request: &VmRequest) -> Result<VirtualMachine, KubevirtError> {
        let template = request
            .vm_spec
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let mut spec: VirtualMachineSpec = serde_json::from_value(template)
            .map_err(|e| KubevirtError::InvalidObject(format!("vmSpec of {}/{}: {e}", request.namespace, request.name)))?;

        if spec.run_strategy.is_none() {
            spec.running = Some(true);
        }
        spec.ensure_cloud_init_volume(&request.user_data_secret_name);

        let template_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
        template_meta
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(VM_NAME_LABEL.to_string(), request.name.clone());

        let labels = BTreeMap::from([
            (CLUSTER_NAME_LABEL.to_string(), request.cluster_name.clone()),
            (VM_NAME_LABEL.to_string(), request.name.clone()),
        ]);

        let mut vm = VirtualMachine::new(&request.name, spec);
        vm.metadata.namespace = Some(request.namespace.clone());
        vm.metadata.labels = Some(labels);
        vm.metadata.owner_references = Some(vec![request.owner.clone()]);
        Ok(vm)
    }
}

#[async_trait::async_trait]
impl VirtualMachineHandle for KubevirtVm {
    fn name(&self) -> &str {
        &self.request.name
    }

    fn exists(&self) -> bool {
        self.vm.is_some()
    }

    async fn create(&self) -> Result<(), KubevirtError> {
        let vm = Self::build(&self.request)?;
        match self.api.create(&PostParams::default(), &vm).await {
            Ok(_) => {
                info!("Created VM {}/{}", self.request.namespace, self.request.name);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!("VM {}/{} already exists", self.request.namespace, self.request.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn address(&self) -> String {
        self.vmi
            .as_ref()
            .and_then(VirtualMachineInstance::address)
            .unwrap_or_default()
            .to_string()
    }

    async fn is_booted(&self, executor: &dyn CommandExecutor) -> bool {
        probe_booted(&self.request.name, self.vmi.as_ref(), executor).await
    }

    async fn is_bootstrapped(&self, executor: &dyn CommandExecutor) -> bool {
        probe_bootstrapped(&self.request.name, executor).await
    }

    async fn set_provider_id(&self, workload: &dyn WorkloadCluster) -> Result<String, KubevirtError> {
        set_node_provider_id(&self.request.name, workload).await
    }

    async fn delete(&self) -> Result<(), KubevirtError> {
        match self.api.delete(&self.request.name, &DeleteParams::background()).await {
            Ok(_) => {
                info!("Deleted VM {}/{}", self.request.namespace, self.request.name);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => {
                warn!("Failed to delete VM {}/{}: {}", self.request.namespace, self.request.name, e);
                Err(e.into())
            }
        }
    }
}

/// VMI is running and the guest answers remote commands
pub async fn probe_booted(
    vm_name: &str,
    vmi: Option<&VirtualMachineInstance>,
    executor: &dyn CommandExecutor,
) -> bool {
    if !vmi.is_some_and(VirtualMachineInstance::is_running) {
        return false;
    }

    match executor.execute(BOOT_PROBE_COMMAND).await {
        Ok(_) => true,
        Err(e) => {
            debug!("VM {} not answering yet: {}", vm_name, e);
            false
        }
    }
}

/// The bootstrap sentinel reads `success`
pub async fn probe_bootstrapped(vm_name: &str, executor: &dyn CommandExecutor) -> bool {
    match executor.execute(BOOTSTRAP_PROBE_COMMAND).await {
        Ok(output) => output.trim() == BOOTSTRAP_SUCCESS,
        Err(e) => {
            debug!("Bootstrap sentinel of VM {} not readable: {}", vm_name, e);
            false
        }
    }
}

/// Install `kubevirt://<vm>` on the workload node named after the VM
///
/// Skips the write when the node already carries the value.
pub async fn set_node_provider_id(vm_name: &str, workload: &dyn WorkloadCluster) -> Result<String, KubevirtError> {
    let provider_id = provider_id_for(vm_name);
    let current = workload.node_provider_id(vm_name).await?;
    if current.as_deref() == Some(provider_id.as_str()) {
        return Ok(provider_id);
    }

    workload.set_node_provider_id(vm_name, &provider_id).await?;
    info!("Set provider id {} on node {}", provider_id, vm_name);
    Ok(provider_id)
}
