//! KubeVirt Provider CRD Definitions
//!
//! Kubernetes Custom Resource Definitions owned by the KubeVirt infrastructure
//! provider, plus typed views of the Cluster API objects it consumes.

pub mod capi;
pub mod condition;
pub mod kubevirt_cluster;
pub mod kubevirt_machine;
pub mod references;

pub use capi::*;
pub use condition::{
    Condition, ConditionSeverity, ConditionStatus, HasConditions, BOOTSTRAP_EXEC_SUCCEEDED_CONDITION,
    BOOTSTRAPPING_REASON, BOOTSTRAP_FAILED_REASON, CONTROL_PLANE_INITIALIZED_CONDITION, DELETING_REASON,
    READY_CONDITION, VM_PROVISIONED_CONDITION, WAITING_FOR_BOOTSTRAP_DATA_REASON,
    WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON, WAITING_FOR_CONTROL_PLANE_AVAILABLE_REASON,
};
pub use kubevirt_cluster::*;
pub use kubevirt_machine::*;
pub use references::ObjectReference;

/// Schema for opaque pass-through objects (`x-kubernetes-preserve-unknown-fields`)
pub(crate) fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
