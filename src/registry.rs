// Registry adapter: the read-only source of hook metadata snapshots
use crate::metadata::HookMetadata;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Supplies metadata for the hooks bound to a trigger.
///
/// Implementations must answer from memory; the planner calls this once per
/// planning pass and treats the result as an immutable snapshot.
pub trait HookRegistry: Send + Sync {
    fn list_hooks_for_trigger(&self, trigger: &str) -> Vec<HookMetadata>;
}

/// Simple registry keeping metadata in registration order
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    hooks: RwLock<BTreeMap<String, HookMetadata>>,
    next_order: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a hook. Registration order is assigned here
    /// unless the metadata already carries one.
    pub fn register(&self, mut metadata: HookMetadata) {
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        if metadata.registration_order == 0 {
            metadata.registration_order = order;
        }
        tracing::debug!(hook = %metadata.name, order = metadata.registration_order, "Registered hook metadata");
        self.hooks.write().insert(metadata.name.clone(), metadata);
    }

    pub fn unregister(&self, name: &str) -> Option<HookMetadata> {
        self.hooks.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<HookMetadata> {
        self.hooks.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }
}

impl HookRegistry for InMemoryRegistry {
    fn list_hooks_for_trigger(&self, trigger: &str) -> Vec<HookMetadata> {
        let mut hooks: Vec<HookMetadata> = self
            .hooks
            .read()
            .values()
            .filter(|hook| hook.triggers.contains(trigger))
            .cloned()
            .collect();
        hooks.sort_by(|a, b| {
            a.registration_order
                .cmp(&b.registration_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        hooks
    }
}
