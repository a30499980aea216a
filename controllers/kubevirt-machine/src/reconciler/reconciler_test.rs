use super::*;
use crate::test_utils::*;
use crds::{PAUSED_ANNOTATION, WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON};
use std::collections::BTreeMap;

fn entry_loads() -> Vec<String> {
    vec![
        "get KubevirtMachine default/worker-0".to_string(),
        "get Machine default/worker-0".to_string(),
        "get Cluster default/demo".to_string(),
        "get KubevirtCluster default/kvcluster".to_string(),
    ]
}

#[tokio::test]
async fn test_missing_kubevirt_machine_is_noop() {
    let harness = TestHarness::new();
    let outcome = harness.reconciler.reconcile("default", "ghost").await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.api.patches().is_empty());
}

#[tokio::test]
async fn test_first_reconcile_only_adds_finalizer() {
    let harness = TestHarness::new();

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.machine().has_finalizer());
    let state = harness.vm().snapshot();
    assert_eq!(state.create_calls, 0);
    assert!(harness.vms.requests().is_empty());
    assert!(harness.api.created_secrets().is_empty());

    let patches = harness.api.patches();
    assert_eq!(patches.len(), 1);
    assert!(patches[0].status.is_none());
}

#[tokio::test]
async fn test_missing_owner_reference_waits() {
    let harness = TestHarness::new();
    harness.update_machine(|m| m.metadata.owner_references = None);

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.api.patches().is_empty());
    assert!(!harness.machine().has_finalizer());
}

#[tokio::test]
async fn test_missing_cluster_label_waits() {
    let harness = TestHarness::new();
    let mut machine = create_test_machine("worker-0", "default", "demo", Some("worker-0-bootstrap"));
    machine.metadata.labels = None;
    harness.api.insert_machine(machine);

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.api.patches().is_empty());
    assert!(!harness.api.calls().iter().any(|c| c.starts_with("get Cluster")));
}

#[tokio::test]
async fn test_missing_kubevirt_cluster_waits() {
    let harness = TestHarness::new();
    harness.update_cluster(|c| {
        c.spec.infrastructure_ref = Some(crds::ObjectReference::new(
            "infrastructure.cluster.x-k8s.io/v1alpha4",
            "KubevirtCluster",
            "missing",
        ))
    });

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.api.patches().is_empty());
}

#[tokio::test]
async fn test_paused_cluster_writes_nothing() {
    let harness = TestHarness::new();
    harness.update_cluster(|c| c.spec.paused = true);

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(harness.api.patches().is_empty());
    assert_eq!(harness.api.calls(), entry_loads());
}

#[tokio::test]
async fn test_paused_annotation_writes_nothing() {
    let harness = TestHarness::new().with_finalizer();
    harness.update_machine(|m| {
        m.metadata.annotations = Some(BTreeMap::from([(PAUSED_ANNOTATION.to_string(), String::new())]))
    });

    harness.reconcile().await.unwrap();

    assert!(harness.api.patches().is_empty());
    assert_eq!(harness.vm().snapshot().create_calls, 0);
}

#[tokio::test]
async fn test_waits_for_cluster_infrastructure() {
    let harness = TestHarness::new().with_finalizer();
    harness.update_cluster(|c| c.status.get_or_insert_with(Default::default).infrastructure_ready = false);

    let outcome = harness.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    let machine = harness.machine();
    let condition = machine.get_condition(VM_PROVISIONED_CONDITION).unwrap();
    assert!(!condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some(WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON));
    let ready = machine.get_condition(crds::READY_CONDITION).unwrap();
    assert_eq!(ready.reason.as_deref(), Some(WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON));
    assert!(harness.vms.requests().is_empty());
}

#[tokio::test]
async fn test_patch_error_surfaces_when_stages_succeed() {
    let harness = TestHarness::new();
    harness.api.fail_patches(1);

    let err = harness.reconcile().await.unwrap_err();

    assert!(matches!(err, ControllerError::Patch(_)));
    assert!(!harness.machine().has_finalizer());
}

#[tokio::test]
async fn test_stage_error_wins_over_patch_error() {
    let harness = TestHarness::with_vm(kubevirt_client::MockVirtualMachine::new("worker-0")).with_finalizer();
    // A stored condition without a Ready summary makes the final patch non-empty
    harness.update_machine(|m| {
        m.mark_false(
            VM_PROVISIONED_CONDITION,
            WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
            crds::ConditionSeverity::Info,
            "",
        )
    });
    harness.vm().fail_create();
    harness.api.fail_patches(1);

    let err = harness.reconcile().await.unwrap_err();

    assert!(matches!(err, ControllerError::Kubevirt(_)));
    assert!(harness.api.calls().iter().any(|c| c.starts_with("patch KubevirtMachine")));
}

#[test]
fn test_outcome_into_action() {
    assert_eq!(ReconcileOutcome::Done.into_action(), Action::await_change());
    assert_eq!(
        ReconcileOutcome::RequeueAfter(Duration::from_secs(20)).into_action(),
        Action::requeue(Duration::from_secs(20))
    );
}

#[tokio::test]
async fn test_scope_patch_skips_unchanged_object() {
    let api = MockManagementApi::new();
    let machine = create_test_kubevirt_machine("worker-0", "default");
    api.insert_kubevirt_machine(machine.clone());
    let mut scope = MachineScope::new(machine).unwrap();

    scope.patch(&api).await.unwrap();
    assert!(api.calls().is_empty());

    scope.machine.add_finalizer();
    scope.patch(&api).await.unwrap();
    scope.patch(&api).await.unwrap();
    assert_eq!(api.patches().len(), 1);
}
