//! KubevirtMachine CRD
//!
//! Infrastructure record for one Cluster API machine backed by a KubeVirt VM.

use crate::condition::{Condition, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer protecting a KubevirtMachine until its cleanup has run
pub const MACHINE_FINALIZER: &str = "kubevirtmachine.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "KubevirtMachine",
    namespaced,
    status = "KubevirtMachineStatus",
    derive = "PartialEq",
    shortname = "kvm"
)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineSpec {
    /// KubeVirt `VirtualMachineSpec` used to create the VM (passed through as-is)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub vm_spec: Option<serde_json::Value>,

    /// Unique identifier of the node as registered with the workload cluster
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Set once the bootstrap payload has completed inside the VM; never cleared
    #[serde(default)]
    pub bootstrapped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineStatus {
    /// The VM is provisioned and registered with the workload cluster
    #[serde(default)]
    pub ready: bool,

    /// Addresses assigned to the machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Observed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Terminal failure reason, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// One address of a machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address kind
    #[serde(rename = "type")]
    pub type_: MachineAddressType,

    /// The address itself
    pub address: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
/// Kind of machine address, same vocabulary as Cluster API
pub enum MachineAddressType {
    /// Node hostname
    Hostname,
    /// Address on the cluster-internal network
    InternalIP,
    /// Externally reachable address
    ExternalIP,
    /// Internal DNS name
    InternalDNS,
    /// External DNS name
    ExternalDNS,
}

impl MachineAddress {
    /// Build an address record
    pub fn new(type_: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            type_,
            address: address.into(),
        }
    }
}

impl KubevirtMachine {
    /// Returns true when the finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == MACHINE_FINALIZER))
    }

    /// Add the finalizer if missing
    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(MACHINE_FINALIZER.to_string());
        }
    }

    /// Remove the finalizer if present
    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != MACHINE_FINALIZER);
        }
    }

    /// Returns true once the API layer marked the object for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Status, created on demand
    pub fn status_mut(&mut self) -> &mut KubevirtMachineStatus {
        self.status.get_or_insert_with(KubevirtMachineStatus::default)
    }
}

impl HasConditions for KubevirtMachine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionSeverity, VM_PROVISIONED_CONDITION, WAITING_FOR_BOOTSTRAP_DATA_REASON};

    #[test]
    fn test_finalizer_add_remove() {
        let mut machine = KubevirtMachine::new("worker-0", KubevirtMachineSpec::default());
        assert!(!machine.has_finalizer());

        machine.add_finalizer();
        machine.add_finalizer();
        assert_eq!(machine.metadata.finalizers.as_ref().unwrap().len(), 1);

        machine.remove_finalizer();
        assert!(!machine.has_finalizer());
    }

    #[test]
    fn test_conditions_create_status() {
        let mut machine = KubevirtMachine::new("worker-0", KubevirtMachineSpec::default());
        assert!(machine.conditions().is_empty());

        machine.mark_false(VM_PROVISIONED_CONDITION, WAITING_FOR_BOOTSTRAP_DATA_REASON, ConditionSeverity::Info, "");
        assert!(machine.status.is_some());
        assert!(machine.has_condition(VM_PROVISIONED_CONDITION));
    }

    #[test]
    fn test_spec_wire_names() {
        let spec = KubevirtMachineSpec {
            vm_spec: None,
            provider_id: Some("kubevirt://worker-0".to_string()),
            bootstrapped: true,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["providerID"], "kubevirt://worker-0");
        assert_eq!(value["bootstrapped"], true);
    }

    #[test]
    fn test_address_type_wire_names() {
        let address = MachineAddress::new(MachineAddressType::InternalIP, "10.0.0.4");
        let value = serde_json::to_value(&address).unwrap();
        assert_eq!(value["type"], "InternalIP");
    }
}
