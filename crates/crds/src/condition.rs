//! Cluster API style conditions
//!
//! Conditions are the user-visible progress surface of every provider object.
//! A condition only records a new `lastTransitionTime` when its status flips;
//! reason, severity and message may change freely while the status holds.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition computed from the other conditions of an object
pub const READY_CONDITION: &str = "Ready";
/// The VM backing a KubevirtMachine exists and has booted
pub const VM_PROVISIONED_CONDITION: &str = "VMProvisioned";
/// The bootstrap payload has run to completion inside the VM
pub const BOOTSTRAP_EXEC_SUCCEEDED_CONDITION: &str = "BootstrapExecSucceeded";
/// Set on a Cluster once its first control plane node is up
pub const CONTROL_PLANE_INITIALIZED_CONDITION: &str = "ControlPlaneInitialized";

/// Cluster infrastructure is not ready yet
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON: &str = "WaitingForClusterInfrastructure";
/// Worker machines wait for the control plane before provisioning
pub const WAITING_FOR_CONTROL_PLANE_AVAILABLE_REASON: &str = "WaitingForControlPlaneAvailable";
/// Bootstrap data has not been generated or copied yet
pub const WAITING_FOR_BOOTSTRAP_DATA_REASON: &str = "WaitingForBootstrapData";
/// The VM booted and bootstrap is running
pub const BOOTSTRAPPING_REASON: &str = "Bootstrapping";
/// Bootstrap has not (yet) reported success
pub const BOOTSTRAP_FAILED_REASON: &str = "BootstrapFailed";
/// The object is being deleted
pub const DELETING_REASON: &str = "Deleting";

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not enough information
    #[default]
    Unknown,
}

/// Severity of a condition that is not True
///
/// Serializes as an empty string when unset, the way Cluster API writes
/// conditions with status True.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConditionSeverity {
    /// No severity (status True)
    #[default]
    #[serde(rename = "")]
    None,
    /// Informational, expected during normal convergence
    Info,
    /// Something may need attention
    Warning,
    /// Convergence is blocked
    Error,
}

/// A single named condition record
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. VMProvisioned)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False or Unknown
    #[serde(default)]
    pub severity: ConditionSeverity,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition status flipped
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A True condition with the current timestamp
    pub fn true_condition(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            severity: ConditionSeverity::None,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// A False condition with the current timestamp
    pub fn false_condition(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.into(),
            status: ConditionStatus::False,
            severity,
            reason: Some(reason.into()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: Utc::now(),
        }
    }

    /// Returns true when status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Same status, reason, severity and message (timestamps ignored)
    pub fn has_same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Objects that carry a list of conditions
///
/// Implemented by every provider object the reconciler reads or writes
/// conditions on. The default methods carry all condition semantics so each
/// implementation only has to expose its backing vector.
pub trait HasConditions {
    /// Current conditions (empty when the object has no status)
    fn conditions(&self) -> &[Condition];

    /// Mutable conditions, creating the status on demand
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Look up a condition by type
    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Returns true when a condition of that type exists
    fn has_condition(&self, type_: &str) -> bool {
        self.get_condition(type_).is_some()
    }

    /// Returns true when the condition exists with status True
    fn is_condition_true(&self, type_: &str) -> bool {
        self.get_condition(type_).is_some_and(Condition::is_true)
    }

    /// Set a condition, keeping the previous transition time if status is unchanged
    fn set_condition(&mut self, condition: Condition) {
        set(self.conditions_mut(), condition);
    }

    /// Mark a condition True
    fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::true_condition(type_));
    }

    /// Mark a condition False with a reason
    fn mark_false(&mut self, type_: &str, reason: &str, severity: ConditionSeverity, message: &str) {
        self.set_condition(Condition::false_condition(type_, reason, severity, message));
    }
}

/// Insert or replace a condition in a list
///
/// `lastTransitionTime` is carried over from the existing entry whenever the
/// status did not change. The list is kept sorted with `Ready` first and the
/// rest alphabetically so serialized status stays stable across reconciles.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }

    conditions.sort_by(|a, b| {
        let a_ready = a.type_ == READY_CONDITION;
        let b_ready = b.type_ == READY_CONDITION;
        b_ready.cmp(&a_ready).then_with(|| a.type_.cmp(&b.type_))
    });
}

/// Compute the `Ready` summary from the given condition types
///
/// Ready is True when every listed condition that is present is True. Otherwise
/// it takes the reason, severity and message of the worst offending condition
/// (highest severity, first in `types` order on ties). Nothing is written when
/// none of the listed conditions exist yet.
pub fn set_summary<T: HasConditions + ?Sized>(object: &mut T, types: &[&str]) {
    let present: Vec<Condition> = types
        .iter()
        .filter_map(|t| object.get_condition(t).cloned())
        .collect();
    if present.is_empty() {
        return;
    }

    let mut worst: Option<&Condition> = None;
    for condition in present.iter().filter(|c| !c.is_true()) {
        match worst {
            Some(current) if current.severity >= condition.severity => {}
            _ => worst = Some(condition),
        }
    }

    let summary = match worst {
        None => Condition::true_condition(READY_CONDITION),
        Some(condition) => Condition {
            type_: READY_CONDITION.to_string(),
            status: condition.status,
            severity: condition.severity,
            reason: condition.reason.clone(),
            message: condition.message.clone(),
            last_transition_time: Utc::now(),
        },
    };
    object.set_condition(summary);
}
