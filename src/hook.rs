// Hook capability contract and the values exchanged with hook implementations
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type InverseAction = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
pub type RestoreFn = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// A recorded way to undo the effect of a hook
pub enum UndoAction {
    /// Closure that reverts the change when invoked
    Inverse(InverseAction),
    /// Captured state plus the function that restores it
    Snapshot { state: Value, restore: RestoreFn },
}

impl UndoAction {
    pub fn inverse<F>(action: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        UndoAction::Inverse(Box::new(action))
    }

    pub fn snapshot<F>(state: Value, restore: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        UndoAction::Snapshot {
            state,
            restore: Arc::new(restore),
        }
    }

    pub(crate) fn apply(&mut self) -> anyhow::Result<()> {
        match self {
            UndoAction::Inverse(action) => action(),
            UndoAction::Snapshot { state, restore } => restore(state),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UndoAction::Inverse(_) => "inverse",
            UndoAction::Snapshot { .. } => "snapshot",
        }
    }
}

impl fmt::Debug for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoAction::Inverse(_) => f.write_str("UndoAction::Inverse(..)"),
            UndoAction::Snapshot { state, .. } => f
                .debug_struct("UndoAction::Snapshot")
                .field("state", state)
                .finish(),
        }
    }
}

/// Data handed to every hook of one trigger invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub trigger: String,
    pub invocation_id: Uuid,
    pub data: Map<String, Value>,
}

impl InvocationContext {
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            invocation_id: Uuid::new_v4(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// What a successful hook reports back
#[derive(Debug, Default)]
pub struct HookOutcome {
    pub undo: Option<UndoAction>,
    pub output: Option<Value>,
}

impl HookOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_undo(mut self, undo: UndoAction) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// A named, independently invocable unit of work.
///
/// `execute` is a synchronous, possibly blocking call; the executor moves it
/// onto a worker thread. Hooks whose metadata declares rollback support may
/// capture a snapshot before running, return an inverse action on success,
/// or implement `rollback` as a last resort.
///
/// A worker thread cannot be interrupted. When a hook times out, or a
/// fail-fast sibling failure cancels it, the executor stops waiting but the
/// call keeps running, and its side effects may land after the batch has been
/// rolled back. A hook that had not reached `execute` by then is not started.
/// Hooks with external effects should keep `execute` shorter than their
/// timeout or make it safe to apply late.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, context: &InvocationContext) -> anyhow::Result<HookOutcome>;

    fn snapshot(&self, _context: &InvocationContext) -> anyhow::Result<Option<UndoAction>> {
        Ok(None)
    }

    fn rollback(&self, _context: &InvocationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

type ExecuteFn = dyn Fn(&InvocationContext) -> anyhow::Result<HookOutcome> + Send + Sync;
type SnapshotFn = dyn Fn(&InvocationContext) -> anyhow::Result<Option<UndoAction>> + Send + Sync;

/// Closure-backed hook implementation
pub struct FnHook {
    name: String,
    execute: Box<ExecuteFn>,
    snapshot: Option<Box<SnapshotFn>>,
}

impl FnHook {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(&InvocationContext) -> anyhow::Result<HookOutcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(execute),
            snapshot: None,
        }
    }

    pub fn with_snapshot<F>(mut self, snapshot: F) -> Self
    where
        F: Fn(&InvocationContext) -> anyhow::Result<Option<UndoAction>> + Send + Sync + 'static,
    {
        self.snapshot = Some(Box::new(snapshot));
        self
    }
}

impl Hook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, context: &InvocationContext) -> anyhow::Result<HookOutcome> {
        (self.execute)(context)
    }

    fn snapshot(&self, context: &InvocationContext) -> anyhow::Result<Option<UndoAction>> {
        match &self.snapshot {
            Some(snapshot) => snapshot(context),
            None => Ok(None),
        }
    }
}

/// Hook implementations keyed by name
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Arc<Mutex<HashMap<String, Arc<dyn Hook>>>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn Hook>) {
        self.hooks.lock().insert(hook.name().to_string(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.hooks.lock().keys().cloned().collect();
        names.sort();
        f.debug_struct("HookSet").field("hooks", &names).finish()
    }
}
