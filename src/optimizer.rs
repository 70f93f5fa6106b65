// Resource-aware splitting of dependency layers into parallel sub-batches
use crate::conflict::ConflictResolution;
use crate::graph::{self, DependencyIssue, DependencyPlan};
use crate::metadata::{ExecutionPhase, HookMetadata, ResourceBudget};
use crate::priority::{PlanningContext, PriorityScore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Latency assumed for hooks without history
pub const DEFAULT_HOOK_DURATION_MS: u64 = 1000;

/// Hooks that may run concurrently: no dependency edge between any two of
/// them and within the resource budget together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionBatch {
    pub id: usize,
    pub phase: ExecutionPhase,
    /// Index of the dependency layer this sub-batch was split from
    pub layer: usize,
    pub hooks: Vec<String>,
    pub estimated_cpu: f64,
    pub estimated_memory: f64,
    pub estimated_duration_ms: u64,
}

impl ExecutionBatch {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn contains(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }
}

/// Final plan for one trigger invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPlan {
    pub trigger: String,
    pub batches: Vec<ExecutionBatch>,
    pub issues: Vec<DependencyIssue>,
    pub conflicts: Vec<ConflictResolution>,
    pub hooks: BTreeMap<String, HookMetadata>,
    pub scores: HashMap<String, PriorityScore>,
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    pub total_estimated_duration_ms: u64,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of hooks scheduled
    pub fn len(&self) -> usize {
        self.batches.iter().map(ExecutionBatch::len).sum()
    }

    /// Hook names in execution order
    pub fn hook_names(&self) -> Vec<String> {
        self.batches
            .iter()
            .flat_map(|batch| batch.hooks.iter().cloned())
            .collect()
    }

    pub fn batch_of(&self, hook: &str) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(hook))
    }

    pub fn batch_names(&self) -> Vec<Vec<String>> {
        self.batches.iter().map(|batch| batch.hooks.clone()).collect()
    }

    pub fn transitive_dependents(&self, hook: &str) -> BTreeSet<String> {
        graph::transitive_dependents(&self.dependencies, hook)
    }

    pub fn transitive_dependencies(&self, hook: &str) -> BTreeSet<String> {
        graph::transitive_dependencies(&self.dependencies, hook)
    }
}

#[derive(Debug, Default)]
struct Bin {
    hooks: Vec<(usize, String)>,
    cpu: f64,
    memory: f64,
    isolated: bool,
}

/// Greedy first-fit bin packing of each dependency layer.
///
/// Hooks are taken in descending resource share and placed in the first
/// sub-batch that still has room in the budget, has fewer than the worker
/// cap, and does not already hold an isolated hook when the incoming one is
/// isolated. A hook larger than the whole budget runs alone.
#[derive(Debug, Clone)]
pub struct ExecutionOptimizer {
    max_workers: usize,
    budget: ResourceBudget,
    phase_parallelism: BTreeMap<ExecutionPhase, usize>,
}

impl ExecutionOptimizer {
    pub fn new(max_workers: usize, budget: ResourceBudget) -> Self {
        Self {
            max_workers: max_workers.max(1),
            budget,
            phase_parallelism: BTreeMap::new(),
        }
    }

    pub fn with_phase_parallelism(mut self, phase: ExecutionPhase, max_parallelism: usize) -> Self {
        self.phase_parallelism.insert(phase, max_parallelism.max(1));
        self
    }

    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }

    fn capacity(&self, phase: ExecutionPhase) -> usize {
        self.phase_parallelism
            .get(&phase)
            .map_or(self.max_workers, |&cap| cap.min(self.max_workers))
    }

    pub fn optimize(
        &self,
        trigger: &str,
        plan: DependencyPlan,
        context: &PlanningContext,
    ) -> ExecutionPlan {
        let mut batches = Vec::new();

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            let capacity = self.capacity(layer.phase);
            for bin in self.pack(&layer.hooks, &plan.hooks, capacity) {
                let mut hooks = bin.hooks;
                // Keep the layer's priority order inside each sub-batch
                hooks.sort_by_key(|(rank, _)| *rank);
                let hooks: Vec<String> = hooks.into_iter().map(|(_, name)| name).collect();

                let estimated_duration_ms = hooks
                    .iter()
                    .map(|name| {
                        context
                            .feedback
                            .get(name)
                            .map(|f| f.average_duration_ms.max(0.0).round() as u64)
                            .unwrap_or(DEFAULT_HOOK_DURATION_MS)
                    })
                    .max()
                    .unwrap_or(0);

                batches.push(ExecutionBatch {
                    id: batches.len(),
                    phase: layer.phase,
                    layer: layer_index,
                    hooks,
                    estimated_cpu: bin.cpu,
                    estimated_memory: bin.memory,
                    estimated_duration_ms,
                });
            }
        }

        let total_estimated_duration_ms = batches.iter().map(|b| b.estimated_duration_ms).sum();
        tracing::debug!(
            trigger = %trigger,
            layers = plan.layers.len(),
            batches = batches.len(),
            estimated_ms = total_estimated_duration_ms,
            "Execution plan optimized"
        );

        ExecutionPlan {
            trigger: trigger.to_string(),
            batches,
            issues: plan.issues,
            conflicts: Vec::new(),
            hooks: plan.hooks,
            scores: plan.scores,
            dependencies: plan.dependencies,
            total_estimated_duration_ms,
        }
    }

    fn pack(
        &self,
        layer: &[String],
        catalog: &BTreeMap<String, HookMetadata>,
        capacity: usize,
    ) -> Vec<Bin> {
        let mut order: Vec<(usize, &HookMetadata)> = layer
            .iter()
            .enumerate()
            .filter_map(|(rank, name)| catalog.get(name).map(|hook| (rank, hook)))
            .collect();
        // Stable, so equal shares keep priority order
        order.sort_by(|(_, a), (_, b)| {
            self.budget
                .share_of(b)
                .partial_cmp(&self.budget.share_of(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut bins: Vec<Bin> = Vec::new();
        for (rank, hook) in order {
            let cpu = hook.estimated_cpu.max(0.0);
            let memory = hook.estimated_memory.max(0.0);

            if !self.budget.fits(cpu, memory) {
                tracing::warn!(
                    hook = %hook.name,
                    cpu = cpu,
                    memory = memory,
                    "Hook exceeds the resource budget on its own, scheduling alone"
                );
                bins.push(Bin {
                    hooks: vec![(rank, hook.name.clone())],
                    cpu,
                    memory,
                    isolated: hook.is_isolated(),
                });
                continue;
            }

            let slot = bins.iter_mut().find(|bin| {
                bin.hooks.len() < capacity
                    && self.budget.fits(bin.cpu + cpu, bin.memory + memory)
                    && !(hook.is_isolated() && bin.isolated)
            });
            match slot {
                Some(bin) => {
                    bin.hooks.push((rank, hook.name.clone()));
                    bin.cpu += cpu;
                    bin.memory += memory;
                    bin.isolated |= hook.is_isolated();
                }
                None => bins.push(Bin {
                    hooks: vec![(rank, hook.name.clone())],
                    cpu,
                    memory,
                    isolated: hook.is_isolated(),
                }),
            }
        }
        bins
    }
}
