//! Helper functions for the compare-before-write pattern
//!
//! The reconciler mutates a working copy of the KubevirtMachine and only talks
//! to the API server when the copy differs from what was loaded. The helpers
//! here compute those differences as JSON merge patches (RFC 7386).

use crds::KubevirtMachine;
use serde_json::{Map, Value};

/// Patches needed to persist a KubevirtMachine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachinePatch {
    /// Merge patch for finalizers and spec
    pub object: Option<Value>,
    /// Merge patch for the status subresource
    pub status: Option<Value>,
}

impl MachinePatch {
    /// Returns true when nothing needs to be written
    pub fn is_empty(&self) -> bool {
        self.object.is_none() && self.status.is_none()
    }
}

/// Merge patch turning `before` into `after`; `None` when they are equal
///
/// Removed keys become `null`; arrays and scalars are replaced wholesale.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(diff) = merge_diff(old_value, new_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ => Some(after.clone()),
    }
}

/// Apply a merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// The part of a KubevirtMachine the reconciler owns outside of status
fn object_view(machine: &KubevirtMachine) -> Value {
    serde_json::json!({
        "metadata": { "finalizers": machine.metadata.finalizers.clone().unwrap_or_default() },
        "spec": serde_json::to_value(&machine.spec).unwrap_or(Value::Null),
    })
}

fn status_view(machine: &KubevirtMachine) -> Value {
    serde_json::json!({
        "status": machine.status.as_ref().map_or(Value::Null, |s| serde_json::to_value(s).unwrap_or(Value::Null)),
    })
}

/// Patches persisting the changes between the loaded and the working copy
pub fn machine_patch(original: &KubevirtMachine, current: &KubevirtMachine) -> MachinePatch {
    MachinePatch {
        object: merge_diff(&object_view(original), &object_view(current)),
        status: merge_diff(&status_view(original), &status_view(current)),
    }
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
