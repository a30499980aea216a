//! Delete path for KubevirtMachines marked for deletion.

use super::{MachineContext, MachineScope, ReconcileOutcome, Reconciler};
use crate::bootstrap::userdata_secret_name;
use crate::error::ControllerError;
use crds::{ConditionSeverity, HasConditions, DELETING_REASON, VM_PROVISIONED_CONDITION};
use tracing::info;

impl Reconciler {
    /// Tear the VM down and release the finalizer
    ///
    /// The finalizer is only removed once the `Deleting` condition has been
    /// persisted and the VM is gone; any failure leaves it in place so the next
    /// attempt starts over.
    pub(crate) async fn reconcile_delete(
        &self,
        scope: &mut MachineScope,
        context: &MachineContext,
    ) -> Result<ReconcileOutcome, ControllerError> {
        info!("Deleting KubevirtMachine {}/{}", scope.namespace(), scope.name());

        scope
            .machine
            .mark_false(VM_PROVISIONED_CONDITION, DELETING_REASON, ConditionSeverity::Info, "");
        scope.patch(self.api.as_ref()).await?;

        let user_data_secret_name = context
            .machine
            .spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .map(userdata_secret_name)
            .unwrap_or_default();
        let request = Self::vm_request(scope, context, user_data_secret_name)?;
        let vm = self.vms.machine(&request).await?;
        if vm.exists() {
            info!("Deleting VM {}/{}", request.namespace, request.name);
            vm.delete().await?;
        }

        scope.machine.remove_finalizer();
        Ok(ReconcileOutcome::Done)
    }
}

#[cfg(test)]
#[path = "delete_test.rs"]
mod delete_test;
