// Transactional rollback of hook side effects
use crate::error::{Result, RollbackError};
use crate::graph;
use crate::hook::UndoAction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// How far a rollback reaches once a hook fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Only the failed hook
    SingleHook,
    /// The failed hook and everything that depends on it
    #[default]
    DependencyChain,
    /// Every hook of the same trigger invocation
    TriggerGroup,
    /// Every open transaction
    SystemWide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug)]
pub struct RollbackEntry {
    pub hook: String,
    pub action: UndoAction,
    pub applied: bool,
    pub sequence: u64,
}

#[derive(Debug)]
pub struct RollbackTransaction {
    pub id: Uuid,
    pub scope: RollbackScope,
    pub affected_hooks: BTreeSet<String>,
    pub entries: Vec<RollbackEntry>,
    pub state: TransactionState,
    pub failed_hooks: BTreeSet<String>,
    /// `hook -> direct dependencies`, used to find dependency chains
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl RollbackTransaction {
    fn new(
        scope: RollbackScope,
        affected_hooks: BTreeSet<String>,
        dependencies: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            affected_hooks,
            entries: Vec::new(),
            state: TransactionState::Open,
            failed_hooks: BTreeSet::new(),
            dependencies,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// Hooks whose entries a rollback of this transaction replays
    fn targets(&self) -> BTreeSet<String> {
        if self.failed_hooks.is_empty() {
            return self.affected_hooks.clone();
        }
        match self.scope {
            RollbackScope::SingleHook => self.failed_hooks.clone(),
            RollbackScope::DependencyChain => {
                let mut targets = self.failed_hooks.clone();
                for failed in &self.failed_hooks {
                    targets.extend(graph::transitive_dependents(&self.dependencies, failed));
                }
                targets
            }
            RollbackScope::TriggerGroup | RollbackScope::SystemWide => {
                self.affected_hooks.clone()
            }
        }
    }
}

/// Read-only view of a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub id: Uuid,
    pub scope: RollbackScope,
    pub state: TransactionState,
    pub affected_hooks: Vec<String>,
    pub failed_hooks: Vec<String>,
    pub entries: usize,
    pub applied: usize,
    pub last_error: Option<String>,
}

/// One rollback attempt, kept in a bounded history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackRecord {
    pub transaction_id: Uuid,
    pub scope: RollbackScope,
    pub affected_hooks: Vec<String>,
    pub reverted: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Manages rollback transactions.
///
/// Each transaction sits behind its own mutex so concurrent rollbacks of the
/// same id are serialized and an inverse action is never applied twice.
#[derive(Debug)]
pub struct RollbackManager {
    transactions: DashMap<Uuid, Arc<Mutex<RollbackTransaction>>>,
    closed: Mutex<VecDeque<Uuid>>,
    history: Mutex<VecDeque<RollbackRecord>>,
    history_size: usize,
    sequence: AtomicU64,
}

impl Default for RollbackManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl RollbackManager {
    pub fn new(history_size: usize) -> Self {
        Self {
            transactions: DashMap::new(),
            closed: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            history_size: history_size.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn begin_transaction<I, S>(&self, scope: RollbackScope, affected_hooks: I) -> Uuid
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.begin_transaction_with_dependencies(scope, affected_hooks, BTreeMap::new())
    }

    /// Open a transaction that knows the dependency graph, so
    /// `DependencyChain` rollbacks can reach dependents
    pub fn begin_transaction_with_dependencies<I, S>(
        &self,
        scope: RollbackScope,
        affected_hooks: I,
        dependencies: BTreeMap<String, BTreeSet<String>>,
    ) -> Uuid
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let affected: BTreeSet<String> = affected_hooks.into_iter().map(Into::into).collect();
        let transaction = RollbackTransaction::new(scope, affected, dependencies);
        let id = transaction.id;
        tracing::debug!(transaction = %id, scope = ?scope, hooks = transaction.affected_hooks.len(), "Rollback transaction opened");
        self.transactions
            .insert(id, Arc::new(Mutex::new(transaction)));
        id
    }

    /// Record an undo entry for `hook`. Entries replay in reverse order of
    /// recording.
    pub fn record_snapshot(&self, id: Uuid, hook: &str, action: UndoAction) -> Result<()> {
        let transaction = self.get(id)?;
        let mut tx = transaction.lock();
        Self::ensure_open(&tx)?;
        tx.affected_hooks.insert(hook.to_string());
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(transaction = %id, hook = %hook, kind = action.kind(), "Undo entry recorded");
        tx.entries.push(RollbackEntry {
            hook: hook.to_string(),
            action,
            applied: false,
            sequence,
        });
        Ok(())
    }

    pub fn add_affected<I, S>(&self, id: Uuid, hooks: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transaction = self.get(id)?;
        let mut tx = transaction.lock();
        Self::ensure_open(&tx)?;
        tx.affected_hooks.extend(hooks.into_iter().map(Into::into));
        Ok(())
    }

    pub fn mark_failed(&self, id: Uuid, hook: &str) -> Result<()> {
        let transaction = self.get(id)?;
        let mut tx = transaction.lock();
        Self::ensure_open(&tx)?;
        tx.affected_hooks.insert(hook.to_string());
        tx.failed_hooks.insert(hook.to_string());
        Ok(())
    }

    /// Replay recorded undo entries in reverse order.
    ///
    /// Returns `Ok(true)` once the transaction is rolled back, including on
    /// repeated calls. Returns `Ok(false)` if an inverse action failed; the
    /// transaction then stays open and a later call retries only the entries
    /// that were not applied.
    pub fn rollback(&self, id: Uuid) -> Result<bool> {
        let transaction = self.get(id)?;
        let (success, scope) = {
            let mut tx = transaction.lock();
            match tx.state {
                TransactionState::RolledBack => return Ok(true),
                TransactionState::Committed => {
                    return Err(RollbackError::AlreadyCommitted { id }.into())
                }
                TransactionState::Open => {}
            }
            let targets = tx.targets();
            (self.replay(&mut tx, &targets), tx.scope)
        };

        if scope == RollbackScope::SystemWide {
            let others: Vec<Uuid> = self
                .transactions
                .iter()
                .filter(|entry| *entry.key() != id)
                .map(|entry| *entry.key())
                .collect();
            for other in others {
                let Ok(transaction) = self.get(other) else {
                    continue;
                };
                let mut tx = transaction.lock();
                if tx.state == TransactionState::Open {
                    let targets = tx.affected_hooks.clone();
                    self.replay(&mut tx, &targets);
                }
            }
        }

        Ok(success)
    }

    fn replay(&self, tx: &mut RollbackTransaction, targets: &BTreeSet<String>) -> bool {
        let mut order: Vec<usize> = (0..tx.entries.len())
            .filter(|&i| !tx.entries[i].applied && targets.contains(&tx.entries[i].hook))
            .collect();
        order.sort_by(|&a, &b| tx.entries[b].sequence.cmp(&tx.entries[a].sequence));

        let mut reverted = Vec::new();
        let mut errors = Vec::new();
        for index in order {
            let entry = &mut tx.entries[index];
            match entry.action.apply() {
                Ok(()) => {
                    entry.applied = true;
                    reverted.push(entry.hook.clone());
                }
                Err(e) => {
                    let error = RollbackError::ActionFailed {
                        id: tx.id,
                        hook: entry.hook.clone(),
                        message: e.to_string(),
                    };
                    tracing::error!(transaction = %tx.id, hook = %entry.hook, error = %e, "Rollback action failed");
                    errors.push(error.to_string());
                }
            }
        }

        let success = errors.is_empty();
        let error = (!success).then(|| errors.join("; "));
        if success {
            tx.state = TransactionState::RolledBack;
            tracing::info!(transaction = %tx.id, scope = ?tx.scope, reverted = reverted.len(), "Transaction rolled back");
        }
        tx.last_error = error.clone();

        self.push_history(RollbackRecord {
            transaction_id: tx.id,
            scope: tx.scope,
            affected_hooks: tx.affected_hooks.iter().cloned().collect(),
            reverted,
            success,
            error,
            timestamp: Utc::now(),
        });
        if success {
            self.mark_closed(tx.id);
        }
        success
    }

    /// Hooks a rollback of `id` replays under the transaction's scope
    pub fn rollback_targets(&self, id: Uuid) -> Result<BTreeSet<String>> {
        let transaction = self.get(id)?;
        let tx = transaction.lock();
        Ok(tx.targets())
    }

    pub fn commit(&self, id: Uuid) -> Result<()> {
        let transaction = self.get(id)?;
        let mut tx = transaction.lock();
        match tx.state {
            TransactionState::Committed => Ok(()),
            TransactionState::RolledBack => Err(RollbackError::AlreadyRolledBack { id }.into()),
            TransactionState::Open => {
                tx.state = TransactionState::Committed;
                tracing::debug!(transaction = %id, entries = tx.entries.len(), "Rollback transaction committed");
                drop(tx);
                self.mark_closed(id);
                Ok(())
            }
        }
    }

    pub fn state(&self, id: Uuid) -> Option<TransactionState> {
        self.transactions.get(&id).map(|tx| tx.lock().state)
    }

    pub fn summary(&self, id: Uuid) -> Option<TransactionSummary> {
        let transaction = self.transactions.get(&id)?.value().clone();
        let tx = transaction.lock();
        Some(TransactionSummary {
            id: tx.id,
            scope: tx.scope,
            state: tx.state,
            affected_hooks: tx.affected_hooks.iter().cloned().collect(),
            failed_hooks: tx.failed_hooks.iter().cloned().collect(),
            entries: tx.entries.len(),
            applied: tx.entries.iter().filter(|e| e.applied).count(),
            last_error: tx.last_error.clone(),
        })
    }

    pub fn open_transactions(&self) -> Vec<Uuid> {
        let transactions: Vec<(Uuid, Arc<Mutex<RollbackTransaction>>)> = self
            .transactions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        transactions
            .into_iter()
            .filter(|(_, tx)| tx.lock().state == TransactionState::Open)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn history(&self) -> Vec<RollbackRecord> {
        self.history.lock().iter().cloned().collect()
    }

    fn get(&self, id: Uuid) -> Result<Arc<Mutex<RollbackTransaction>>> {
        self.transactions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RollbackError::TransactionNotFound { id }.into())
    }

    fn ensure_open(tx: &RollbackTransaction) -> Result<()> {
        match tx.state {
            TransactionState::Open => Ok(()),
            TransactionState::Committed => Err(RollbackError::AlreadyCommitted { id: tx.id }.into()),
            TransactionState::RolledBack => {
                Err(RollbackError::AlreadyRolledBack { id: tx.id }.into())
            }
        }
    }

    fn push_history(&self, record: RollbackRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.history_size {
            history.pop_front();
        }
    }

    /// Closed transactions stay queryable until `history_size` newer ones
    /// have closed
    fn mark_closed(&self, id: Uuid) {
        let evicted: Vec<Uuid> = {
            let mut closed = self.closed.lock();
            closed.push_back(id);
            let mut evicted = Vec::new();
            while closed.len() > self.history_size {
                if let Some(old) = closed.pop_front() {
                    evicted.push(old);
                }
            }
            evicted
        };
        for old in evicted {
            self.transactions.remove(&old);
        }
    }
}
