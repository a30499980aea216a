//! Convergence path for KubevirtMachines that are not being deleted.
//!
//! The stages run in a fixed order and each one either advances or returns an
//! outcome. Stages that poll the VM or the workload cluster requeue with a
//! fixed delay instead of failing.

use super::{MachineContext, MachineScope, ReconcileOutcome, Reconciler};
use crate::bootstrap::BootstrapSecretSynthesizer;
use crate::error::ControllerError;
use crate::ssh_keys::ClusterNodeSshKeys;
use crate::workload::workload_cluster_client;
use crds::{
    ConditionSeverity, HasConditions, MachineAddress, MachineAddressType, BOOTSTRAPPING_REASON,
    BOOTSTRAP_EXEC_SUCCEEDED_CONDITION, BOOTSTRAP_FAILED_REASON, CONTROL_PLANE_INITIALIZED_CONDITION,
    VM_PROVISIONED_CONDITION, WAITING_FOR_BOOTSTRAP_DATA_REASON, WAITING_FOR_CONTROL_PLANE_AVAILABLE_REASON,
};
use kubevirt_client::SshCommandExecutor;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Drive a KubevirtMachine towards a booted, bootstrapped and registered VM
    pub(crate) async fn reconcile_normal(
        &self,
        scope: &mut MachineScope,
        context: &MachineContext,
    ) -> Result<ReconcileOutcome, ControllerError> {
        if scope.machine.spec.provider_id.as_deref().is_some_and(|id| !id.is_empty()) {
            scope.machine.status_mut().ready = true;
            scope.machine.mark_true(VM_PROVISIONED_CONDITION);
            return Ok(ReconcileOutcome::Done);
        }

        if context.machine.spec.bootstrap.data_secret_name.is_none() {
            if !context.machine.is_control_plane()
                && !context.cluster.is_condition_true(CONTROL_PLANE_INITIALIZED_CONDITION)
            {
                info!("Waiting for the control plane to be initialized");
                scope.machine.mark_false(
                    VM_PROVISIONED_CONDITION,
                    WAITING_FOR_CONTROL_PLANE_AVAILABLE_REASON,
                    ConditionSeverity::Info,
                    "",
                );
                return Ok(ReconcileOutcome::Done);
            }

            info!("Waiting for the bootstrap provider to set bootstrap data");
            scope.machine.mark_false(
                VM_PROVISIONED_CONDITION,
                WAITING_FOR_BOOTSTRAP_DATA_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(ReconcileOutcome::Done);
        }

        let ssh_keys = ClusterNodeSshKeys::new(self.api.as_ref(), &context.kubevirt_cluster);
        if !ssh_keys.is_persisted() {
            info!("Waiting for the cluster SSH keys to be persisted");
            return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue.ssh_keys));
        }
        let key_pair = ssh_keys.fetch().await?;

        let synthesizer = BootstrapSecretSynthesizer::new(self.api.as_ref(), &self.config.bootstrap);
        let user_data_secret_name = match synthesizer.ensure(&scope.machine, &context.machine, &key_pair).await {
            Ok(name) => name,
            Err(e) => {
                info!("Waiting for bootstrap data: {}", e);
                scope.machine.mark_false(
                    VM_PROVISIONED_CONDITION,
                    WAITING_FOR_BOOTSTRAP_DATA_REASON,
                    ConditionSeverity::Info,
                    "",
                );
                return Ok(ReconcileOutcome::Done);
            }
        };

        let request = Self::vm_request(scope, context, user_data_secret_name)?;
        let vm = self.vms.machine(&request).await?;
        if !vm.exists() {
            info!("Creating VM {}/{}", request.namespace, request.name);
            vm.create().await?;
            self.metrics.inc_vm_creations();
        }

        let executor = SshCommandExecutor::new(vm.address(), key_pair.public_key.clone(), key_pair.private_key)
            .with_user(self.config.bootstrap.ssh_user.clone());
        if !vm.is_booted(&executor).await {
            info!("Waiting for VM {} to boot", vm.name());
            return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue.vm_boot));
        }

        scope.machine.mark_true(VM_PROVISIONED_CONDITION);
        if !scope.machine.has_condition(BOOTSTRAP_EXEC_SUCCEEDED_CONDITION) {
            scope.machine.mark_false(
                BOOTSTRAP_EXEC_SUCCEEDED_CONDITION,
                BOOTSTRAPPING_REASON,
                ConditionSeverity::Info,
                "",
            );
            // Surface the bootstrapping phase before the probes below block on the VM
            scope.patch(self.api.as_ref()).await?;
        }

        if !scope.machine.spec.bootstrapped {
            if !vm.is_bootstrapped(&executor).await {
                info!("Waiting for VM {} to finish bootstrapping", vm.name());
                scope.machine.mark_false(
                    BOOTSTRAP_EXEC_SUCCEEDED_CONDITION,
                    BOOTSTRAP_FAILED_REASON,
                    ConditionSeverity::Warning,
                    "VM not bootstrapped yet",
                );
                return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue.bootstrap));
            }
            scope.machine.spec.bootstrapped = true;
        }

        scope.machine.mark_true(BOOTSTRAP_EXEC_SUCCEEDED_CONDITION);
        let address = vm.address();
        scope.machine.status_mut().addresses = vec![
            MachineAddress::new(MachineAddressType::Hostname, vm.name()),
            MachineAddress::new(MachineAddressType::InternalIP, address.clone()),
            MachineAddress::new(MachineAddressType::ExternalIP, address),
        ];

        let workload = match workload_cluster_client(
            self.api.as_ref(),
            self.workload_clients.as_ref(),
            &context.kubevirt_cluster,
        )
        .await
        {
            Ok(workload) => workload,
            Err(e) => {
                warn!("Workload cluster client is not available: {}", e);
                return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue.workload_client));
            }
        };

        let provider_id = match vm.set_provider_id(workload.as_ref()).await {
            Ok(provider_id) => provider_id,
            Err(e) => {
                warn!("Failed to set provider ID on node {}: {}", vm.name(), e);
                return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue.provider_id));
            }
        };
        debug!("Node {} registered as {}", vm.name(), provider_id);

        scope.machine.spec.provider_id = Some(provider_id);
        scope.machine.status_mut().ready = true;
        scope.machine.mark_true(VM_PROVISIONED_CONDITION);
        info!("KubevirtMachine {}/{} is ready", scope.namespace(), scope.name());
        Ok(ReconcileOutcome::Done)
    }
}

#[cfg(test)]
#[path = "machine_test.rs"]
mod machine_test;
