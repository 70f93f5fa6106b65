// Shared fixtures for orchestrator integration tests

use hookflow::{
    FnHook, Hook, HookMetadata, HookOrchestrator, HookOutcome, InMemoryRegistry,
    OrchestratorConfig, StaticProbe, UndoAction,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Ordered log of everything hooks did during a test
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

/// Hook that logs `run:<name>` and returns an inverse action logging
/// `undo:<name>`
#[allow(dead_code)]
pub fn recording_hook(name: &str, journal: &Journal) -> Arc<dyn Hook> {
    let journal = journal.clone();
    let hook_name = name.to_string();
    Arc::new(FnHook::new(name, move |_| {
        journal.push(format!("run:{hook_name}"));
        let undo_journal = journal.clone();
        let undo_name = hook_name.clone();
        Ok(HookOutcome::ok().with_undo(UndoAction::inverse(move || {
            undo_journal.push(format!("undo:{undo_name}"));
            Ok(())
        })))
    }))
}

#[allow(dead_code)]
pub fn failing_hook(name: &str, journal: &Journal) -> Arc<dyn Hook> {
    let journal = journal.clone();
    let hook_name = name.to_string();
    Arc::new(FnHook::new(name, move |_| {
        journal.push(format!("run:{hook_name}"));
        anyhow::bail!("{hook_name} refused to run")
    }))
}

#[allow(dead_code)]
pub fn sleeping_hook(name: &str, delay: Duration, journal: &Journal) -> Arc<dyn Hook> {
    let journal = journal.clone();
    let hook_name = name.to_string();
    Arc::new(FnHook::new(name, move |_| {
        journal.push(format!("start:{hook_name}"));
        std::thread::sleep(delay);
        journal.push(format!("end:{hook_name}"));
        Ok(HookOutcome::ok())
    }))
}

/// Orchestrator over an in-memory registry with an idle static probe
#[allow(dead_code)]
pub fn orchestrator_with(
    config: OrchestratorConfig,
    hooks: Vec<HookMetadata>,
) -> (HookOrchestrator, Arc<InMemoryRegistry>) {
    let registry = Arc::new(InMemoryRegistry::new());
    for hook in hooks {
        registry.register(hook);
    }
    let orchestrator =
        HookOrchestrator::with_probe(config, registry.clone(), Arc::new(StaticProbe::idle()))
            .expect("valid test configuration");
    (orchestrator, registry)
}

#[allow(dead_code)]
pub fn names(batches: &[Vec<String>]) -> Vec<Vec<&str>> {
    batches
        .iter()
        .map(|batch| batch.iter().map(String::as_str).collect())
        .collect()
}
