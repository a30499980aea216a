//! Kubernetes object references for Cluster API resources
//!
//! Provides the `ObjectReference` shape Cluster API uses for cross-resource
//! references (`infrastructureRef`, `sshKeys.configRef`, ...). Only the fields the
//! provider reads are modelled; anything else on the wire is ignored.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Kubernetes object.
///
/// This mirrors `corev1.ObjectReference` closely enough for Cluster API:
/// - `apiVersion`: API group/version of the referenced object (e.g. "infrastructure.cluster.x-k8s.io/v1alpha4")
/// - `kind`: The kind of the referenced object (e.g. "KubevirtMachine")
/// - `name`: The name of the referenced object
/// - `namespace`: Optional namespace, defaults to the referencing object's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referenced object
    #[serde(default)]
    pub name: String,

    /// Namespace of the referenced object (defaults to same namespace as the referencing object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Create a new reference with apiVersion, kind, and name (same namespace)
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: Some(api_version.into()),
            kind: Some(kind.into()),
            name: name.into(),
            namespace: None,
            uid: None,
        }
    }

    /// Returns true when the reference points at the given kind
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    /// API group of the referenced object ("" for the core group)
    pub fn group(&self) -> &str {
        match self.api_version.as_deref() {
            Some(api_version) => api_version.rsplit_once('/').map_or("", |(group, _)| group),
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_from_api_version() {
        let reference = ObjectReference::new("cluster.x-k8s.io/v1alpha4", "Cluster", "demo");
        assert_eq!(reference.group(), "cluster.x-k8s.io");
        assert!(reference.is_kind("Cluster"));

        let core = ObjectReference::new("v1", "Secret", "demo");
        assert_eq!(core.group(), "");
    }

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let reference: ObjectReference = serde_json::from_value(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1alpha4",
            "kind": "KubevirtMachine",
            "name": "worker-0",
            "fieldPath": "spec"
        }))
        .unwrap();
        assert_eq!(reference.name, "worker-0");
        assert!(reference.namespace.is_none());
    }
}
