//! Cluster API core types
//!
//! Read-only proxies for `cluster.x-k8s.io` `Machine` and `Cluster`. These CRDs
//! are owned by Cluster API itself, so no schema is generated for them and only
//! the fields the infrastructure provider consumes are modelled.

use crate::condition::{Condition, HasConditions};
use crate::references::ObjectReference;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// API group of the Cluster API core types
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";
/// Label carrying the owning cluster's name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
/// Label present on control plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";
/// Annotation pausing reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";
/// Secret type used for Cluster API owned secrets
pub const CLUSTER_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "Machine",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Infrastructure object backing this machine
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,

    /// Provider ID copied from the infrastructure object
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Bootstrap data of a Machine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Bootstrap config object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the generated bootstrap data (set by the bootstrap provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Stops all reconciliation of the cluster's objects
    #[serde(default)]
    pub paused: bool,

    /// Cluster-level infrastructure object (a KubevirtCluster for this provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Observed state of a Cluster
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Infrastructure provider reported ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Observed conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Machine {
    /// Control plane machines carry the control-plane label
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(CONTROL_PLANE_LABEL))
    }

    /// Cluster name from the cluster label
    pub fn cluster_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
    }
}

impl Cluster {
    /// Returns true when infrastructure is reported ready
    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }

    /// Paused via spec or annotation
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(&self.metadata)
    }
}

impl HasConditions for Cluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(ClusterStatus::default).conditions
    }
}

/// Returns true when the object carries the paused annotation
pub fn has_paused_annotation(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Find the owner reference of a Cluster API kind (any version of the group)
pub fn find_capi_owner<'a>(
    meta: &'a k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    kind: &str,
) -> Option<&'a k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference> {
    meta.owner_references.as_ref()?.iter().find(|owner| {
        owner.kind == kind
            && owner
                .api_version
                .split_once('/')
                .is_some_and(|(group, _)| group == CLUSTER_API_GROUP)
    })
}
