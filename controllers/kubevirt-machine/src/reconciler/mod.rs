//! KubevirtMachine reconciliation.
//!
//! Every call re-derives state from the API server: it loads the
//! KubevirtMachine, its owner Machine, the Cluster and the KubevirtCluster,
//! then runs either the convergence path (`machine`) or the delete path
//! (`delete`) against a working copy held in a `MachineScope`. Whatever the
//! path returns, the scope is flushed once at the end; a flush failure only
//! becomes the result when the path itself succeeded.
//!
//! - `machine`: staged convergence (finalizer, VM, boot, bootstrap, provider ID)
//! - `delete`: teardown and finalizer removal
//! - `mapper`: maps watched Machines/Clusters/KubevirtClusters to KubevirtMachines

pub mod delete;
pub mod machine;
pub mod mapper;

use crate::api::ManagementApi;
use crate::config::{BootstrapOptions, ControllerConfig, RequeueTimings};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::machine_patch;
use crate::workload::WorkloadClientFactory;
use crds::condition::set_summary;
use crds::{
    find_capi_owner, has_paused_annotation, Cluster, HasConditions, KubevirtCluster, KubevirtMachine, Machine,
    BOOTSTRAP_EXEC_SUCCEEDED_CONDITION, VM_PROVISIONED_CONDITION,
};
use kube::Resource;
use kube_runtime::controller::Action;
use kubevirt_client::{VmProvider, VmRequest};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Condition types summarized into `Ready`
const SUMMARY_CONDITIONS: &[&str] = &[VM_PROVISIONED_CONDITION, BOOTSTRAP_EXEC_SUCCEEDED_CONDITION];

/// What the dispatcher should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do until a watched object changes
    Done,
    /// Check again after the delay
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    /// Convert into a kube-runtime action
    pub fn into_action(self) -> Action {
        match self {
            Self::Done => Action::await_change(),
            Self::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Reconciler settings taken from the controller configuration
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Stage requeue delays
    pub requeue: RequeueTimings,
    /// Bootstrap payload handling
    pub bootstrap: BootstrapOptions,
}

impl From<&ControllerConfig> for ReconcilerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            requeue: config.requeue,
            bootstrap: config.bootstrap.clone(),
        }
    }
}

/// Objects a KubevirtMachine depends on, loaded at the start of a call
#[derive(Debug, Clone)]
pub struct MachineContext {
    /// Owner Cluster API Machine
    pub machine: Machine,
    /// Cluster of the Machine
    pub cluster: Cluster,
    /// Infrastructure of the Cluster
    pub kubevirt_cluster: KubevirtCluster,
}

/// Working copy of a KubevirtMachine plus the last persisted state
#[derive(Debug, Clone)]
pub struct MachineScope {
    namespace: String,
    name: String,
    persisted: KubevirtMachine,
    /// Working copy mutated by the stages
    pub machine: KubevirtMachine,
}

impl MachineScope {
    /// Scope over a freshly loaded object
    pub fn new(machine: KubevirtMachine) -> Result<Self, ControllerError> {
        let namespace = machine
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingObjectKey("namespace"))?;
        let name = machine
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey("name"))?;
        Ok(Self {
            namespace,
            name,
            persisted: machine.clone(),
            machine,
        })
    }

    /// Namespace of the machine
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the machine
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write pending changes; no request when nothing changed
    pub async fn patch(&mut self, api: &dyn ManagementApi) -> Result<(), ControllerError> {
        set_summary(&mut self.machine, SUMMARY_CONDITIONS);
        let patch = machine_patch(&self.persisted, &self.machine);
        if patch.is_empty() {
            return Ok(());
        }

        api.patch_kubevirt_machine(&self.namespace, &self.name, &patch).await?;
        self.persisted = self.machine.clone();
        debug!("Patched KubevirtMachine {}/{}", self.namespace, self.name);
        Ok(())
    }
}

/// Reconciles KubevirtMachines.
pub struct Reconciler {
    pub(crate) api: Box<dyn ManagementApi>,
    pub(crate) vms: Box<dyn VmProvider>,
    pub(crate) workload_clients: Box<dyn WorkloadClientFactory>,
    pub(crate) config: ReconcilerConfig,
    pub(crate) metrics: Metrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        api: Box<dyn ManagementApi>,
        vms: Box<dyn VmProvider>,
        workload_clients: Box<dyn WorkloadClientFactory>,
        config: ReconcilerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            vms,
            workload_clients,
            config,
            metrics,
        }
    }

    /// Reconcile the KubevirtMachine `namespace/name`
    #[instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let Some(kubevirt_machine) = self.api.get_kubevirt_machine(namespace, name).await? else {
            debug!("KubevirtMachine is gone");
            return Ok(ReconcileOutcome::Done);
        };

        let Some(context) = self.load_context(namespace, &kubevirt_machine).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        if context.cluster.is_paused() || has_paused_annotation(&kubevirt_machine.metadata) {
            info!("Reconciliation is paused for this object");
            return Ok(ReconcileOutcome::Done);
        }

        let mut scope = MachineScope::new(kubevirt_machine)?;
        let result = self.reconcile_scope(&mut scope, &context).await;
        let flushed = scope.patch(self.api.as_ref()).await;

        match (result, flushed) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(patch_error)) => {
                error!("Failed to patch KubevirtMachine: {}", patch_error);
                Err(patch_error)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(patch_error)) => {
                error!("Failed to patch KubevirtMachine: {}", patch_error);
                Err(e)
            }
        }
    }

    /// Load owner Machine, Cluster and KubevirtCluster; `None` means wait
    async fn load_context(
        &self,
        namespace: &str,
        kubevirt_machine: &KubevirtMachine,
    ) -> Result<Option<MachineContext>, ControllerError> {
        let Some(owner) = find_capi_owner(&kubevirt_machine.metadata, "Machine") else {
            info!("Waiting for Machine Controller to set OwnerRef on KubevirtMachine");
            return Ok(None);
        };
        let Some(machine) = self.api.get_machine(namespace, &owner.name).await? else {
            info!("Owner Machine {} not found", owner.name);
            return Ok(None);
        };

        let Some(cluster_name) = machine.cluster_label().map(str::to_string) else {
            info!(
                "Machine {} is not associated with a cluster; set the label {}",
                owner.name,
                crds::CLUSTER_NAME_LABEL
            );
            return Ok(None);
        };
        let Some(cluster) = self.api.get_cluster(namespace, &cluster_name).await? else {
            info!("Cluster {} not found", cluster_name);
            return Ok(None);
        };

        let Some(infra_name) = cluster.spec.infrastructure_ref.as_ref().map(|r| r.name.clone()) else {
            info!("Cluster {} has no infrastructureRef yet", cluster_name);
            return Ok(None);
        };
        let Some(kubevirt_cluster) = self.api.get_kubevirt_cluster(namespace, &infra_name).await? else {
            info!("KubevirtCluster {} is not available yet", infra_name);
            return Ok(None);
        };

        Ok(Some(MachineContext {
            machine,
            cluster,
            kubevirt_cluster,
        }))
    }

    async fn reconcile_scope(
        &self,
        scope: &mut MachineScope,
        context: &MachineContext,
    ) -> Result<ReconcileOutcome, ControllerError> {
        if !scope.machine.has_finalizer() {
            if scope.machine.is_being_deleted() {
                return Ok(ReconcileOutcome::Done);
            }
            // Persisted before any VM exists so deletion cannot orphan it
            scope.machine.add_finalizer();
            return Ok(ReconcileOutcome::Done);
        }

        if !context.cluster.infrastructure_ready() {
            info!("Waiting for KubevirtCluster Controller to create cluster infrastructure");
            scope.machine.mark_false(
                VM_PROVISIONED_CONDITION,
                crds::WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
                crds::ConditionSeverity::Info,
                "",
            );
            return Ok(ReconcileOutcome::Done);
        }

        if scope.machine.is_being_deleted() {
            return self.reconcile_delete(scope, context).await;
        }

        self.reconcile_normal(scope, context).await
    }

    /// Describe the VM backing `scope` for the VM provider
    pub(crate) fn vm_request(
        scope: &MachineScope,
        context: &MachineContext,
        user_data_secret_name: String,
    ) -> Result<VmRequest, ControllerError> {
        let owner = scope
            .machine
            .owner_ref(&())
            .ok_or(ControllerError::MissingObjectKey("uid"))?;
        Ok(VmRequest {
            namespace: scope.namespace().to_string(),
            name: scope.name().to_string(),
            cluster_name: context.machine.cluster_label().unwrap_or_default().to_string(),
            vm_spec: scope.machine.spec.vm_spec.clone(),
            user_data_secret_name,
            owner,
        })
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
