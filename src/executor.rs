// Batched execution of a plan on a bounded worker pool
use crate::error::HookExecutionError;
use crate::hook::{Hook, HookOutcome, HookSet, InvocationContext, UndoAction};
use crate::logging::utils;
use crate::metadata::{ExecutionPhase, HookMetadata};
use crate::monitor::{PerformanceMonitor, PerformanceRecord};
use crate::optimizer::ExecutionPlan;
use crate::rollback::{RollbackManager, RollbackScope};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Per-hook state machine:
/// `Pending -> Scheduled -> Running -> Succeeded | Failed | TimedOut`.
/// Hooks that never start end as `Cancelled` or `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Skipped,
}

impl HookState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HookState::Succeeded
                | HookState::Failed
                | HookState::TimedOut
                | HookState::Cancelled
                | HookState::Skipped
        )
    }

    /// Timeouts count as failures
    pub fn is_failure(self) -> bool {
        matches!(self, HookState::Failed | HookState::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub sequence: u64,
    pub hook: String,
    pub batch: Option<usize>,
    pub state: HookState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TransitionLog {
    next: AtomicU64,
    entries: Mutex<Vec<StateTransition>>,
}

impl TransitionLog {
    fn record(&self, hook: &str, batch: Option<usize>, state: HookState) {
        // Sequence is taken under the lock so the log stays ordered
        let mut entries = self.entries.lock();
        entries.push(StateTransition {
            sequence: self.next.fetch_add(1, Ordering::SeqCst),
            hook: hook.to_string(),
            batch,
            state,
            timestamp: Utc::now(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct HookReport {
    pub hook: String,
    pub batch: Option<usize>,
    pub state: HookState,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<HookExecutionError>,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub transaction_id: Uuid,
    pub scope: RollbackScope,
    pub failed_hooks: Vec<String>,
    /// Hooks of this run that had succeeded and fell inside the rollback
    /// scope; their dependents are skipped
    pub reverted_hooks: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub trigger: String,
    pub invocation_id: Uuid,
    pub per_hook: BTreeMap<String, HookReport>,
    pub overall_success: bool,
    /// Set when fail-fast stopped the plan early
    pub aborted: bool,
    pub transitions: Vec<StateTransition>,
    pub rollbacks: Vec<RollbackReport>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn report(&self, hook: &str) -> Option<&HookReport> {
        self.per_hook.get(hook)
    }

    pub fn state_of(&self, hook: &str) -> Option<HookState> {
        self.per_hook.get(hook).map(|r| r.state)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.per_hook
            .values()
            .filter(|r| r.success)
            .map(|r| r.hook.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.per_hook
            .values()
            .filter(|r| r.state.is_failure())
            .map(|r| r.hook.as_str())
            .collect()
    }

    /// Every state a hook passed through, in order
    pub fn history_of(&self, hook: &str) -> Vec<HookState> {
        self.transitions
            .iter()
            .filter(|t| t.hook == hook)
            .map(|t| t.state)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub max_execution_time: Duration,
    pub phase_timeouts: BTreeMap<ExecutionPhase, Duration>,
    pub fail_fast: bool,
    pub enable_rollback: bool,
    pub rollback_scope: RollbackScope,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_execution_time: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            phase_timeouts: BTreeMap::new(),
            fail_fast: false,
            enable_rollback: true,
            rollback_scope: RollbackScope::DependencyChain,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.max_execution_time = timeout;
        self
    }

    pub fn with_phase_timeout(mut self, phase: ExecutionPhase, timeout: Duration) -> Self {
        self.phase_timeouts.insert(phase, timeout);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.enable_rollback = enabled;
        self
    }

    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.rollback_scope = scope;
        self
    }

    pub fn timeout_for(&self, phase: ExecutionPhase) -> Duration {
        self.phase_timeouts
            .get(&phase)
            .copied()
            .unwrap_or(self.max_execution_time)
    }
}

struct HookRun {
    name: String,
    state: HookState,
    duration_ms: u64,
    error: Option<HookExecutionError>,
    outcome: Option<HookOutcome>,
    hook: Option<Arc<dyn Hook>>,
    started: bool,
    snapshot_taken: bool,
}

impl HookRun {
    fn unstarted(name: String, state: HookState, error: HookExecutionError) -> Self {
        Self {
            name,
            state,
            duration_ms: 0,
            error: Some(error),
            outcome: None,
            hook: None,
            started: false,
            snapshot_taken: false,
        }
    }
}

/// Runs sub-batches strictly in plan order; hooks inside a sub-batch run
/// concurrently on blocking worker threads, bounded by a semaphore of
/// `max_workers` permits.
pub struct Executor {
    config: ExecutorConfig,
    hooks: HookSet,
    rollback: Arc<RollbackManager>,
    monitor: Arc<PerformanceMonitor>,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        hooks: HookSet,
        rollback: Arc<RollbackManager>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        let workers = config.max_workers.max(1);
        Self {
            config,
            hooks,
            rollback,
            monitor,
            semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub async fn execute(&self, plan: &ExecutionPlan, context: &InvocationContext) -> ExecutionResult {
        let started = Instant::now();
        let log = Arc::new(TransitionLog::default());
        let mut reports: BTreeMap<String, HookReport> = BTreeMap::new();
        for batch in &plan.batches {
            for name in &batch.hooks {
                log.record(name, Some(batch.id), HookState::Pending);
            }
        }

        let mut unsuccessful: BTreeSet<String> = BTreeSet::new();
        let mut rollbacks = Vec::new();
        let mut transaction: Option<Uuid> = None;
        let mut aborted = false;

        for batch in &plan.batches {
            if aborted {
                for name in &batch.hooks {
                    let error = HookExecutionError::Cancelled {
                        hook: name.clone(),
                        reason: "plan aborted after an earlier failure".to_string(),
                    };
                    log.record(name, Some(batch.id), HookState::Cancelled);
                    reports.insert(name.clone(), unstarted_report(name, batch.id, HookState::Cancelled, error));
                    unsuccessful.insert(name.clone());
                }
                continue;
            }

            let mut runnable = Vec::new();
            for name in &batch.hooks {
                let failed: Vec<String> = plan
                    .dependencies
                    .get(name)
                    .map(|deps| deps.intersection(&unsuccessful).cloned().collect())
                    .unwrap_or_default();
                if failed.is_empty() {
                    runnable.push(name.clone());
                    continue;
                }
                tracing::warn!(hook = %name, failed = ?failed, "Skipping hook with failed dependencies");
                let error = HookExecutionError::DependencyFailed {
                    hook: name.clone(),
                    failed,
                };
                log.record(name, Some(batch.id), HookState::Skipped);
                reports.insert(name.clone(), unstarted_report(name, batch.id, HookState::Skipped, error));
                unsuccessful.insert(name.clone());
            }

            let needs_transaction = self.config.enable_rollback
                && runnable
                    .iter()
                    .any(|name| plan.hooks.get(name).is_some_and(|m| m.supports_rollback));
            if needs_transaction && transaction.is_none() {
                transaction = Some(self.rollback.begin_transaction_with_dependencies(
                    self.config.rollback_scope,
                    Vec::<String>::new(),
                    plan.dependencies.clone(),
                ));
            }
            if let Some(id) = transaction {
                if let Err(e) = self.rollback.add_affected(id, runnable.iter().cloned()) {
                    tracing::warn!(transaction = %id, error = %e, "Could not extend rollback transaction");
                }
            }

            for name in &runnable {
                log.record(name, Some(batch.id), HookState::Scheduled);
            }

            let (abort_siblings, _) = watch::channel(false);
            let runs = futures::future::join_all(runnable.iter().map(|name| {
                self.run_hook(
                    name.clone(),
                    plan.hooks.get(name).cloned(),
                    batch.id,
                    context,
                    Arc::clone(&log),
                    &abort_siblings,
                    transaction,
                )
                .instrument(utils::hook_span(name))
            }))
            .instrument(utils::batch_span(batch.id, runnable.len()))
            .await;

            let mut batch_failures = Vec::new();
            for run in runs {
                let metadata = plan.hooks.get(&run.name);
                let success = run.state == HookState::Succeeded;
                let supports_rollback =
                    self.config.enable_rollback && metadata.is_some_and(|m| m.supports_rollback);

                // Hooks abandoned mid-run say nothing about their own health
                if run.started && run.state != HookState::Cancelled {
                    let (cpu, memory) =
                        metadata.map_or((0.0, 0.0), |m| (m.estimated_cpu, m.estimated_memory));
                    self.monitor.record(
                        PerformanceRecord::new(&run.name, run.duration_ms as f64, success)
                            .with_resources(cpu, memory),
                    );
                    utils::log_hook_completion(&run.name, success, run.duration_ms);
                }

                let mut output = None;
                let mut undo_recorded = run.snapshot_taken;
                if let Some(outcome) = run.outcome {
                    output = outcome.output;
                    if let (Some(id), Some(undo), true) = (transaction, outcome.undo, supports_rollback) {
                        match self.rollback.record_snapshot(id, &run.name, undo) {
                            Ok(()) => undo_recorded = true,
                            Err(e) => tracing::warn!(hook = %run.name, error = %e, "Could not record undo action"),
                        }
                    }
                }

                if let (Some(id), Some(hook), true, false) =
                    (
                        transaction,
                        run.hook.as_ref(),
                        supports_rollback && run.started && run.state != HookState::Cancelled,
                        undo_recorded,
                    )
                {
                    let hook = Arc::clone(hook);
                    let ctx = context.clone();
                    let fallback = UndoAction::inverse(move || hook.rollback(&ctx));
                    if let Err(e) = self.rollback.record_snapshot(id, &run.name, fallback) {
                        tracing::warn!(hook = %run.name, error = %e, "Could not record rollback fallback");
                    }
                }

                if !success {
                    unsuccessful.insert(run.name.clone());
                    batch_failures.push(run.name.clone());
                    if let Some(id) = transaction {
                        if let Err(e) = self.rollback.mark_failed(id, &run.name) {
                            tracing::warn!(hook = %run.name, error = %e, "Could not mark hook failed");
                        }
                    }
                }

                reports.insert(
                    run.name.clone(),
                    HookReport {
                        hook: run.name.clone(),
                        batch: Some(batch.id),
                        state: run.state,
                        success,
                        duration_ms: run.duration_ms,
                        error: run.error,
                        output,
                    },
                );
            }

            if batch_failures.is_empty() {
                continue;
            }

            // Finish any rollback before the next sub-batch may start
            if let Some(id) = transaction.take() {
                let targets = self.rollback.rollback_targets(id).unwrap_or_default();
                let reverted: Vec<String> = targets
                    .into_iter()
                    .filter(|hook| reports.get(hook).is_some_and(|r| r.success))
                    .collect();
                if !reverted.is_empty() {
                    tracing::warn!(batch = batch.id, reverted = ?reverted, "Rollback undid successful hooks, their dependents will be skipped");
                }
                unsuccessful.extend(reverted.iter().cloned());
                rollbacks.push(self.roll_back(id, batch_failures.clone(), reverted).await);
            }
            if self.config.fail_fast {
                tracing::warn!(batch = batch.id, failed = ?batch_failures, "Fail-fast: aborting remaining batches");
                aborted = true;
            }
        }

        if let Some(id) = transaction {
            if let Err(e) = self.rollback.commit(id) {
                tracing::warn!(transaction = %id, error = %e, "Could not commit rollback transaction");
            }
        }

        let overall_success = reports.values().all(|r| r.success);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            trigger = %plan.trigger,
            hooks = reports.len(),
            success = overall_success,
            duration_ms = duration_ms,
            "Plan execution finished"
        );

        let transitions = log.entries.lock().clone();
        ExecutionResult {
            trigger: plan.trigger.clone(),
            invocation_id: context.invocation_id,
            per_hook: reports,
            overall_success,
            aborted,
            transitions,
            rollbacks,
            duration_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_hook(
        &self,
        name: String,
        metadata: Option<HookMetadata>,
        batch: usize,
        context: &InvocationContext,
        log: Arc<TransitionLog>,
        abort: &watch::Sender<bool>,
        transaction: Option<Uuid>,
    ) -> HookRun {
        let Some(hook) = self.hooks.get(&name) else {
            log.record(&name, Some(batch), HookState::Failed);
            let error = HookExecutionError::NotRegistered { hook: name.clone() };
            return HookRun::unstarted(name, HookState::Failed, error);
        };

        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                log.record(&name, Some(batch), HookState::Cancelled);
                let error = HookExecutionError::Cancelled {
                    hook: name.clone(),
                    reason: "worker pool closed".to_string(),
                };
                return HookRun::unstarted(name, HookState::Cancelled, error);
            }
        };

        if *abort.borrow() {
            drop(permit);
            log.record(&name, Some(batch), HookState::Cancelled);
            let error = HookExecutionError::Cancelled {
                hook: name.clone(),
                reason: "a sibling hook failed".to_string(),
            };
            return HookRun::unstarted(name, HookState::Cancelled, error);
        }

        let phase = metadata.as_ref().map(|m| m.phase).unwrap_or_default();
        let timeout = self.config.timeout_for(phase);
        let supports_rollback =
            self.config.enable_rollback && metadata.as_ref().is_some_and(|m| m.supports_rollback);
        let snapshot_taken = Arc::new(AtomicBool::new(false));
        let abandoned = Arc::new(AtomicBool::new(false));

        log.record(&name, Some(batch), HookState::Running);
        let started = Instant::now();

        let task = {
            let hook = Arc::clone(&hook);
            let ctx = context.clone();
            let manager = Arc::clone(&self.rollback);
            let taken = Arc::clone(&snapshot_taken);
            let abandoned = Arc::clone(&abandoned);
            let name = name.clone();
            tokio::task::spawn_blocking(move || -> anyhow::Result<HookOutcome> {
                if let (true, Some(id)) = (supports_rollback, transaction) {
                    if let Some(snapshot) = hook.snapshot(&ctx).context("snapshot failed")? {
                        manager.record_snapshot(id, &name, snapshot)?;
                        taken.store(true, Ordering::SeqCst);
                    }
                }
                // Nobody waits for the result any more
                if abandoned.load(Ordering::SeqCst) {
                    anyhow::bail!("hook {name} abandoned before it started");
                }
                hook.execute(&ctx)
            })
        };

        let mut tripped = abort.subscribe();
        let result = tokio::select! {
            biased;
            result = tokio::time::timeout(timeout, task) => Some(result),
            true = async { tripped.wait_for(|value| *value).await.is_ok() }, if self.config.fail_fast => None,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        drop(permit);

        let Some(result) = result else {
            abandoned.store(true, Ordering::SeqCst);
            tracing::warn!(hook = %name, "Hook cancelled after a sibling failed");
            log.record(&name, Some(batch), HookState::Cancelled);
            return HookRun {
                name: name.clone(),
                state: HookState::Cancelled,
                duration_ms,
                error: Some(HookExecutionError::Cancelled {
                    hook: name,
                    reason: "a sibling hook failed while this one was running".to_string(),
                }),
                outcome: None,
                hook: Some(hook),
                started: true,
                snapshot_taken: snapshot_taken.load(Ordering::SeqCst),
            };
        };
        if result.is_err() {
            abandoned.store(true, Ordering::SeqCst);
        }

        let (state, error, outcome) = match result {
            Ok(Ok(Ok(outcome))) => (HookState::Succeeded, None, Some(outcome)),
            Ok(Ok(Err(e))) => (
                HookState::Failed,
                Some(HookExecutionError::Failed {
                    hook: name.clone(),
                    message: format!("{e:#}"),
                }),
                None,
            ),
            Ok(Err(join_error)) if join_error.is_panic() => (
                HookState::Failed,
                Some(HookExecutionError::Panicked {
                    hook: name.clone(),
                    message: panic_message(join_error.into_panic()),
                }),
                None,
            ),
            Ok(Err(join_error)) => (
                HookState::Cancelled,
                Some(HookExecutionError::Cancelled {
                    hook: name.clone(),
                    reason: join_error.to_string(),
                }),
                None,
            ),
            Err(_) => (
                HookState::TimedOut,
                Some(HookExecutionError::Timeout {
                    hook: name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
                None,
            ),
        };

        if let Some(error) = &error {
            tracing::warn!(hook = %name, error = %error, "Hook did not succeed");
            if self.config.fail_fast && state.is_failure() {
                abort.send_replace(true);
            }
        }
        log.record(&name, Some(batch), state);

        HookRun {
            name,
            state,
            duration_ms,
            error,
            outcome,
            hook: Some(hook),
            started: true,
            snapshot_taken: snapshot_taken.load(Ordering::SeqCst),
        }
    }

    async fn roll_back(
        &self,
        id: Uuid,
        failed_hooks: Vec<String>,
        reverted_hooks: Vec<String>,
    ) -> RollbackReport {
        let manager = Arc::clone(&self.rollback);
        let joined = tokio::task::spawn_blocking(move || manager.rollback(id)).await;
        let (success, error) = match joined {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) => (
                false,
                self.rollback
                    .summary(id)
                    .and_then(|summary| summary.last_error),
            ),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(e) => (false, Some(format!("rollback task failed: {e}"))),
        };
        if !success {
            tracing::error!(transaction = %id, error = ?error, "Rollback did not complete");
        }

        RollbackReport {
            transaction_id: id,
            scope: self.config.rollback_scope,
            failed_hooks,
            reverted_hooks,
            success,
            error,
        }
    }
}

fn unstarted_report(
    name: &str,
    batch: usize,
    state: HookState,
    error: HookExecutionError,
) -> HookReport {
    HookReport {
        hook: name.to_string(),
        batch: Some(batch),
        state,
        success: false,
        duration_ms: 0,
        error: Some(error),
        output: None,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
