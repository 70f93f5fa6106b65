// Rollback tests: scopes, idempotency, executor integration

mod test_utils;

use hookflow::{
    FnHook, HookExecutionError, HookMetadata, HookOutcome, HookState, HookflowError,
    OrchestratorConfig, PlanRequest, RollbackError, RollbackManager, RollbackScope,
    TransactionState, UndoAction,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use test_utils::{failing_hook, orchestrator_with, recording_hook, Journal};

fn undo(journal: &Journal, hook: &str) -> UndoAction {
    let journal = journal.clone();
    let event = format!("undo:{hook}");
    UndoAction::inverse(move || {
        journal.push(event.clone());
        Ok(())
    })
}

fn request() -> PlanRequest {
    PlanRequest::new()
        .with_system_load(0.0)
        .with_resource_availability(1.0)
}

#[test]
fn test_single_hook_scope_leaves_dependencies_untouched() {
    let manager = RollbackManager::default();
    let journal = Journal::new();
    let dependencies = BTreeMap::from([("B".to_string(), BTreeSet::from(["A".to_string()]))]);
    let id = manager.begin_transaction_with_dependencies(
        RollbackScope::SingleHook,
        ["A", "B"],
        dependencies,
    );
    manager.record_snapshot(id, "A", undo(&journal, "A")).unwrap();
    manager.record_snapshot(id, "B", undo(&journal, "B")).unwrap();
    manager.mark_failed(id, "B").unwrap();

    assert!(manager.rollback(id).unwrap());
    assert_eq!(journal.events(), vec!["undo:B"]);

    // Second call is a no-op that still reports success
    assert!(manager.rollback(id).unwrap());
    assert_eq!(journal.events(), vec!["undo:B"]);
    assert_eq!(manager.state(id), Some(TransactionState::RolledBack));
}

#[test]
fn test_trigger_group_reverts_in_reverse_order() {
    let manager = RollbackManager::default();
    let journal = Journal::new();
    let id = manager.begin_transaction(RollbackScope::TriggerGroup, ["first", "second", "third"]);
    for hook in ["first", "second", "third"] {
        manager.record_snapshot(id, hook, undo(&journal, hook)).unwrap();
    }
    manager.mark_failed(id, "third").unwrap();

    assert!(manager.rollback(id).unwrap());
    assert_eq!(
        journal.events(),
        vec!["undo:third", "undo:second", "undo:first"]
    );
}

#[test]
fn test_snapshot_restore() {
    let manager = RollbackManager::default();
    let restored = Arc::new(parking_lot::Mutex::new(None));
    let sink = Arc::clone(&restored);
    let id = manager.begin_transaction(RollbackScope::SingleHook, ["config_writer"]);
    manager
        .record_snapshot(
            id,
            "config_writer",
            UndoAction::snapshot(json!({"theme": "dark"}), move |state| {
                *sink.lock() = Some(state.clone());
                Ok(())
            }),
        )
        .unwrap();

    assert!(manager.rollback(id).unwrap());
    assert_eq!(*restored.lock(), Some(json!({"theme": "dark"})));
}

#[test]
fn test_failed_inverse_can_be_retried() {
    let manager = RollbackManager::default();
    let journal = Journal::new();
    let healthy = Arc::new(AtomicBool::new(false));
    let id = manager.begin_transaction(RollbackScope::TriggerGroup, ["flaky", "steady"]);
    manager.record_snapshot(id, "steady", undo(&journal, "steady")).unwrap();
    {
        let healthy = Arc::clone(&healthy);
        let journal = journal.clone();
        manager
            .record_snapshot(
                id,
                "flaky",
                UndoAction::inverse(move || {
                    if !healthy.load(Ordering::SeqCst) {
                        anyhow::bail!("backend unavailable");
                    }
                    journal.push("undo:flaky");
                    Ok(())
                }),
            )
            .unwrap();
    }

    assert!(!manager.rollback(id).unwrap());
    assert_eq!(manager.state(id), Some(TransactionState::Open));
    let summary = manager.summary(id).unwrap();
    assert!(summary.last_error.unwrap().contains("backend unavailable"));

    healthy.store(true, Ordering::SeqCst);
    assert!(manager.rollback(id).unwrap());
    assert_eq!(journal.events(), vec!["undo:steady", "undo:flaky"]);
    assert_eq!(journal.count("undo:steady"), 1);
}

#[test]
fn test_committed_transaction_cannot_roll_back() {
    let manager = RollbackManager::default();
    let id = manager.begin_transaction(RollbackScope::SingleHook, ["done"]);
    manager.commit(id).unwrap();
    let err = manager.rollback(id).unwrap_err();
    assert!(matches!(
        err,
        HookflowError::Rollback(ref rollback) if matches!(**rollback, RollbackError::AlreadyCommitted { .. })
    ));
}

#[test]
fn test_history_is_bounded() {
    let manager = RollbackManager::new(2);
    for _ in 0..3 {
        let id = manager.begin_transaction(RollbackScope::SingleHook, ["h"]);
        manager.rollback(id).unwrap();
    }
    assert_eq!(manager.history().len(), 2);
}

#[tokio::test]
async fn test_executor_rolls_back_trigger_group() {
    let hooks = vec![
        HookMetadata::new("A")
            .with_trigger("save")
            .with_rollback_support(true),
        HookMetadata::new("B")
            .with_trigger("save")
            .with_dependencies(["A"])
            .with_rollback_support(true),
        HookMetadata::new("C")
            .with_trigger("save")
            .with_dependencies(["B"])
            .with_rollback_support(true),
    ];
    let config = OrchestratorConfig::default().with_rollback_scope(RollbackScope::TriggerGroup);
    let (orchestrator, _) = orchestrator_with(config, hooks);
    let journal = Journal::new();
    orchestrator.register_hook(recording_hook("A", &journal));
    orchestrator.register_hook(recording_hook("B", &journal));
    orchestrator.register_hook(failing_hook("C", &journal));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert!(!result.overall_success);
    assert_eq!(result.rollbacks.len(), 1);
    let rollback = &result.rollbacks[0];
    assert!(rollback.success);
    assert_eq!(rollback.scope, RollbackScope::TriggerGroup);
    assert_eq!(rollback.failed_hooks, vec!["C"]);
    assert_eq!(
        journal.events(),
        vec!["run:A", "run:B", "run:C", "undo:B", "undo:A"]
    );
    assert_eq!(
        orchestrator.rollback_manager().state(rollback.transaction_id),
        Some(TransactionState::RolledBack)
    );
}

#[tokio::test]
async fn test_dependency_chain_keeps_upstream_changes() {
    let hooks = vec![
        HookMetadata::new("A")
            .with_trigger("save")
            .with_rollback_support(true),
        HookMetadata::new("B")
            .with_trigger("save")
            .with_dependencies(["A"])
            .with_rollback_support(true),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let journal = Journal::new();
    orchestrator.register_hook(recording_hook("A", &journal));
    orchestrator.register_hook(failing_hook("B", &journal));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert_eq!(result.rollbacks.len(), 1);
    assert!(result.rollbacks[0].success);
    assert_eq!(journal.count("undo:A"), 0);
}

#[tokio::test]
async fn test_pre_execution_snapshot_restored_on_failure() {
    let hooks = vec![HookMetadata::new("writer")
        .with_trigger("save")
        .with_rollback_support(true)];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let restored = Arc::new(parking_lot::Mutex::new(None));
    let sink = Arc::clone(&restored);
    orchestrator.register_hook(Arc::new(
        FnHook::new("writer", |_| -> anyhow::Result<HookOutcome> {
            anyhow::bail!("disk full")
        })
        .with_snapshot(move |_| {
            let sink = Arc::clone(&sink);
            Ok(Some(UndoAction::snapshot(json!({"bytes": 0}), move |state| {
                *sink.lock() = Some(state.clone());
                Ok(())
            })))
        }),
    ));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert!(result.rollbacks[0].success);
    assert_eq!(*restored.lock(), Some(json!({"bytes": 0})));
}

#[tokio::test]
async fn test_successful_run_commits_transaction() {
    let hooks = vec![HookMetadata::new("A")
        .with_trigger("save")
        .with_rollback_support(true)];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let journal = Journal::new();
    orchestrator.register_hook(recording_hook("A", &journal));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert!(result.overall_success);
    assert!(result.rollbacks.is_empty());
    assert!(orchestrator.rollback_manager().open_transactions().is_empty());
    assert_eq!(journal.count("undo:A"), 0);
}

#[tokio::test]
async fn test_rollback_disabled_records_nothing() {
    let hooks = vec![HookMetadata::new("A")
        .with_trigger("save")
        .with_rollback_support(true)];
    let config = OrchestratorConfig::default().with_rollback(false);
    let (orchestrator, _) = orchestrator_with(config, hooks);
    let journal = Journal::new();
    orchestrator.register_hook(failing_hook("A", &journal));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert!(!result.overall_success);
    assert!(result.rollbacks.is_empty());
    assert_eq!(orchestrator.metrics().rollback_attempts, 0);
}

/// `A` and `X` share the first batch, `X` fails, and `B` builds on `A`
async fn run_with_failing_sibling(scope: RollbackScope) -> (hookflow::ExecutionResult, Journal) {
    let hooks = vec![
        HookMetadata::new("A")
            .with_trigger("save")
            .with_rollback_support(true),
        HookMetadata::new("X")
            .with_trigger("save")
            .with_rollback_support(true),
        HookMetadata::new("B")
            .with_trigger("save")
            .with_dependencies(["A"])
            .with_rollback_support(true),
    ];
    let config = OrchestratorConfig::default().with_rollback_scope(scope);
    let (orchestrator, _) = orchestrator_with(config, hooks);
    let journal = Journal::new();
    orchestrator.register_hook(recording_hook("A", &journal));
    orchestrator.register_hook(failing_hook("X", &journal));
    orchestrator.register_hook(recording_hook("B", &journal));

    let result = orchestrator.run("save", request()).await.unwrap().result;
    assert!(orchestrator.rollback_manager().open_transactions().is_empty());
    (result, journal)
}

#[tokio::test]
async fn test_group_rollback_skips_dependents_of_reverted_hooks() {
    for scope in [RollbackScope::TriggerGroup, RollbackScope::SystemWide] {
        let (result, journal) = run_with_failing_sibling(scope).await;

        assert_eq!(journal.count("undo:A"), 1, "{scope:?}");
        assert_eq!(journal.count("run:B"), 0, "{scope:?}");
        assert_eq!(result.state_of("B"), Some(HookState::Skipped), "{scope:?}");
        match &result.report("B").unwrap().error {
            Some(HookExecutionError::DependencyFailed { failed, .. }) => {
                assert_eq!(failed, &vec!["A".to_string()]);
            }
            other => panic!("{scope:?}: unexpected error {other:?}"),
        }
        assert_eq!(result.rollbacks.len(), 1);
        assert_eq!(result.rollbacks[0].reverted_hooks, vec!["A"]);
    }
}

#[tokio::test]
async fn test_narrow_rollback_lets_dependents_of_untouched_hooks_run() {
    for scope in [RollbackScope::SingleHook, RollbackScope::DependencyChain] {
        let (result, journal) = run_with_failing_sibling(scope).await;

        assert_eq!(journal.count("undo:A"), 0, "{scope:?}");
        assert_eq!(journal.count("run:B"), 1, "{scope:?}");
        assert_eq!(result.state_of("B"), Some(HookState::Succeeded), "{scope:?}");
        assert_eq!(result.rollbacks.len(), 1);
        assert!(result.rollbacks[0].reverted_hooks.is_empty());
        assert_eq!(result.rollbacks[0].failed_hooks, vec!["X"]);
    }
}
