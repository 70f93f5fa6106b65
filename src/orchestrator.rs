// End-to-end control flow: registry snapshot -> plan -> execute -> feedback
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::conflict::{ConflictResolution, ConflictResolver, ConflictStrategy};
use crate::error::Result;
use crate::executor::{ExecutionResult, Executor};
use crate::graph::DependencyGraphResolver;
use crate::hook::{Hook, InvocationContext};
use crate::logging::utils;
use crate::metadata::{HookMetadata, TimeSensitivity};
use crate::monitor::{PerformanceMonitor, Recommendation};
use crate::optimizer::{ExecutionOptimizer, ExecutionPlan};
use crate::priority::{PlanningContext, PriorityCalculator};
use crate::registry::HookRegistry;
use crate::rollback::RollbackManager;
use crate::system::{ResourceProbe, SysinfoProbe};

/// Per-invocation inputs. Load and availability left unset are sampled from
/// the resource probe.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub system_load: Option<f64>,
    pub resource_availability: Option<f64>,
    pub time_sensitivity: TimeSensitivity,
    pub adjustments: HashMap<String, f64>,
    pub data: Map<String, Value>,
}

impl PlanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_load(mut self, load: f64) -> Self {
        self.system_load = Some(load);
        self
    }

    pub fn with_resource_availability(mut self, availability: f64) -> Self {
        self.resource_availability = Some(availability);
        self
    }

    pub fn with_time_sensitivity(mut self, sensitivity: TimeSensitivity) -> Self {
        self.time_sensitivity = sensitivity;
        self
    }

    pub fn with_adjustment(mut self, hook: impl Into<String>, delta: f64) -> Self {
        *self.adjustments.entry(hook.into()).or_insert(0.0) += delta;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub plan: ExecutionPlan,
    pub result: ExecutionResult,
}

/// Point-in-time view of orchestrator health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub open_transactions: usize,
    pub rollback_attempts: usize,
    pub monitored_hooks: usize,
    pub records_held: usize,
    pub average_load: Option<f64>,
    pub conflict_strategy: ConflictStrategy,
    pub max_workers: usize,
    pub max_execution_time_ms: u64,
}

pub struct HookOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<dyn HookRegistry>,
    probe: Arc<dyn ResourceProbe>,
    resolver: DependencyGraphResolver,
    conflicts: ConflictResolver,
    optimizer: ExecutionOptimizer,
    executor: Executor,
    rollback: Arc<RollbackManager>,
    monitor: Arc<PerformanceMonitor>,
}

impl std::fmt::Debug for HookOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookOrchestrator")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl HookOrchestrator {
    /// Build an orchestrator that samples machine load through `sysinfo`
    pub fn new(config: OrchestratorConfig, registry: Arc<dyn HookRegistry>) -> Result<Self> {
        Self::with_probe(config, registry, Arc::new(SysinfoProbe::new()))
    }

    pub fn with_probe(
        config: OrchestratorConfig,
        registry: Arc<dyn HookRegistry>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let calculator = Arc::new(PriorityCalculator::new(config.priority_weights)?);
        let resolver = DependencyGraphResolver::new(Arc::clone(&calculator))
            .with_max_cycle_breaks(config.max_cycle_breaks);
        let conflicts = ConflictResolver::new(Arc::clone(&calculator))
            .with_registration_order(config.registration_order);

        let optimizer = config.phases.iter().fold(
            ExecutionOptimizer::new(config.max_workers, config.resource_budget),
            |optimizer, (phase, settings)| match settings.max_parallelism {
                Some(cap) => optimizer.with_phase_parallelism(*phase, cap),
                None => optimizer,
            },
        );

        let rollback = Arc::new(RollbackManager::new(config.rollback_history_size));
        let monitor = Arc::new(
            PerformanceMonitor::new(config.performance_window)
                .with_load_threshold(config.load_threshold)
                .with_slow_hook_threshold_ms(config.slow_hook_threshold_ms),
        );
        let executor = Executor::new(
            config.executor_config(),
            Default::default(),
            Arc::clone(&rollback),
            Arc::clone(&monitor),
        );

        tracing::debug!(
            strategy = %config.conflict_strategy,
            max_workers = config.max_workers,
            "Hook orchestrator ready"
        );

        Ok(Self {
            config,
            registry,
            probe,
            resolver,
            conflicts,
            optimizer,
            executor,
            rollback,
            monitor,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn conflict_resolver(&self) -> &ConflictResolver {
        &self.conflicts
    }

    /// Bind an implementation to the metadata of the same name
    pub fn register_hook(&self, hook: Arc<dyn Hook>) {
        tracing::debug!(hook = %hook.name(), "Registered hook implementation");
        self.executor.hooks().register(hook);
    }

    /// Build a plan for one invocation of `trigger`. Side-effect free apart
    /// from advancing conflict cursors and recording the load sample.
    pub fn plan(&self, trigger: &str, request: &PlanRequest) -> Result<ExecutionPlan> {
        let hooks = self.registry.list_hooks_for_trigger(trigger);
        let _span = utils::planning_span(trigger, hooks.len()).entered();

        if hooks.is_empty() {
            tracing::debug!(trigger = %trigger, "No hooks bound to trigger");
            return Ok(ExecutionPlan {
                trigger: trigger.to_string(),
                ..ExecutionPlan::default()
            });
        }

        let context = self.planning_context(request);
        let preliminary = self.resolver.build_plan(&hooks, &context);
        let context = context.with_depths(preliminary.depths.clone());

        let (hooks, conflicts) =
            self.resolve_exclusive_groups(trigger, hooks, &preliminary.hooks, &context)?;
        let dependency_plan = if conflicts.is_empty() {
            preliminary
        } else {
            self.resolver.build_plan(&hooks, &context)
        };

        let mut plan = self.optimizer.optimize(trigger, dependency_plan, &context);
        plan.conflicts = conflicts;

        tracing::info!(
            trigger = %trigger,
            hooks = plan.len(),
            batches = plan.batches.len(),
            issues = plan.issues.len(),
            "Execution plan ready"
        );
        Ok(plan)
    }

    pub async fn run(&self, trigger: &str, request: PlanRequest) -> Result<TriggerReport> {
        let plan = self.plan(trigger, &request)?;
        let mut context = InvocationContext::new(trigger);
        context.data = request.data;

        let result = self.executor.execute(&plan, &context).await;
        Ok(TriggerReport { plan, result })
    }

    /// Retry a rollback that did not complete during execution
    pub fn rollback(&self, transaction: Uuid) -> Result<bool> {
        self.rollback.rollback(transaction)
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.monitor.recommendations(self.config.max_workers)
    }

    pub fn metrics(&self) -> SystemMetrics {
        SystemMetrics {
            open_transactions: self.rollback.open_transactions().len(),
            rollback_attempts: self.rollback.history().len(),
            monitored_hooks: self.monitor.monitored_hooks(),
            records_held: self.monitor.records_held(),
            average_load: self.monitor.average_load(),
            conflict_strategy: self.config.conflict_strategy,
            max_workers: self.config.max_workers,
            max_execution_time_ms: self.config.max_execution_time_ms,
        }
    }

    fn planning_context(&self, request: &PlanRequest) -> PlanningContext {
        let (load, availability) = match (request.system_load, request.resource_availability) {
            (Some(load), Some(availability)) => (load, availability),
            (load, availability) => {
                let sample = self.probe.sample();
                (
                    load.unwrap_or_else(|| sample.system_load()),
                    availability.unwrap_or(sample.available_fraction),
                )
            }
        };
        let load = load.clamp(0.0, 100.0);
        self.monitor.record_load(load);

        let mut context = PlanningContext::new()
            .with_system_load(load)
            .with_resource_availability(availability.clamp(0.0, 1.0))
            .with_time_sensitivity(request.time_sensitivity)
            .with_feedback(self.monitor.feedback());
        for (hook, delta) in self.monitor.priority_adjustments() {
            context = context.with_adjustment(hook, delta);
        }
        for (hook, delta) in &request.adjustments {
            context = context.with_adjustment(hook.clone(), *delta);
        }
        context
    }

    /// Keep one winner per exclusive group. Each group arbitrates under its
    /// own `trigger/group` key so rotation cursors do not interfere.
    fn resolve_exclusive_groups(
        &self,
        trigger: &str,
        mut hooks: Vec<HookMetadata>,
        planned: &BTreeMap<String, HookMetadata>,
        context: &PlanningContext,
    ) -> Result<(Vec<HookMetadata>, Vec<ConflictResolution>)> {
        let mut groups: BTreeMap<&str, Vec<HookMetadata>> = BTreeMap::new();
        for hook in planned.values() {
            if let Some(group) = hook.exclusive_group.as_deref() {
                groups.entry(group).or_default().push(hook.clone());
            }
        }

        let strategy = self.config.strategy_for(trigger);
        let mut losers: HashSet<String> = HashSet::new();
        let mut resolutions = Vec::new();
        for (group, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let key = format!("{trigger}/{group}");
            let resolution = self.conflicts.resolve(&key, &members, strategy, context)?;
            losers.extend(resolution.losers.iter().cloned());
            resolutions.push(resolution);
        }

        hooks.retain(|hook| !losers.contains(&hook.name));
        Ok((hooks, resolutions))
    }

}
