// Hook metadata snapshots consumed by the planner
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Base priority of a hook. Lower variants are more urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HookPriority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
    Maintenance = 5,
}

impl HookPriority {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Inverse mapping onto [0, 1]: CRITICAL -> 1.0, MAINTENANCE -> 0.0
    pub fn normalized(self) -> f64 {
        f64::from(5 - self.value()) / 4.0
    }
}

impl fmt::Display for HookPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPriority::Critical => "CRITICAL",
            HookPriority::High => "HIGH",
            HookPriority::Normal => "NORMAL",
            HookPriority::Low => "LOW",
            HookPriority::Maintenance => "MAINTENANCE",
        };
        f.write_str(name)
    }
}

/// Fixed execution stages. Plans proceed phase by phase in declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    PreValidation,
    Initialization,
    #[default]
    CoreProcessing,
    PostProcessing,
    Cleanup,
    Finalization,
}

impl ExecutionPhase {
    pub const ALL: [ExecutionPhase; 6] = [
        ExecutionPhase::PreValidation,
        ExecutionPhase::Initialization,
        ExecutionPhase::CoreProcessing,
        ExecutionPhase::PostProcessing,
        ExecutionPhase::Cleanup,
        ExecutionPhase::Finalization,
    ];

    /// Derive a phase from conventional tags, falling back to core processing
    pub fn from_tags(tags: &BTreeSet<String>) -> Self {
        let has = |tag: &str| tags.contains(tag);
        if has("validation") {
            ExecutionPhase::PreValidation
        } else if has("initialization") || has("setup") {
            ExecutionPhase::Initialization
        } else if has("cleanup") {
            ExecutionPhase::Cleanup
        } else if has("finalization") || has("teardown") {
            ExecutionPhase::Finalization
        } else if has("post_process") {
            ExecutionPhase::PostProcessing
        } else {
            ExecutionPhase::CoreProcessing
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPhase::PreValidation => "pre_validation",
            ExecutionPhase::Initialization => "initialization",
            ExecutionPhase::CoreProcessing => "core_processing",
            ExecutionPhase::PostProcessing => "post_processing",
            ExecutionPhase::Cleanup => "cleanup",
            ExecutionPhase::Finalization => "finalization",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently the current trigger invocation needs to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeSensitivity {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl TimeSensitivity {
    pub fn normalized(self) -> f64 {
        match self {
            TimeSensitivity::Urgent => 1.0,
            TimeSensitivity::High => 0.75,
            TimeSensitivity::Normal => 0.5,
            TimeSensitivity::Low => 0.25,
        }
    }
}

/// Resources that concurrently running hooks may use together, in the same
/// relative units as the hook estimates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            cpu: 100.0,
            memory: 100.0,
        }
    }
}

impl ResourceBudget {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    pub fn fits(&self, cpu: f64, memory: f64) -> bool {
        cpu <= self.cpu && memory <= self.memory
    }

    /// Share of the budget a hook consumes, using its tighter dimension
    pub fn share_of(&self, hook: &HookMetadata) -> f64 {
        let cpu = if self.cpu > 0.0 {
            hook.estimated_cpu / self.cpu
        } else {
            0.0
        };
        let memory = if self.memory > 0.0 {
            hook.estimated_memory / self.memory
        } else {
            0.0
        };
        cpu.max(memory)
    }
}

/// Immutable description of a hook as supplied by the registry adapter.
///
/// `dependencies` may name hooks or capability tags listed in another hook's
/// `provides`. Hooks with `isolation_level > 0` never share a sub-batch with
/// another isolated hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookMetadata {
    pub name: String,
    #[serde(default)]
    pub base_priority: HookPriority,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub provides: BTreeSet<String>,
    #[serde(default)]
    pub phase: ExecutionPhase,
    #[serde(default)]
    pub isolation_level: u8,
    #[serde(default = "default_estimate")]
    pub estimated_cpu: f64,
    #[serde(default = "default_estimate")]
    pub estimated_memory: f64,
    #[serde(default)]
    pub triggers: BTreeSet<String>,
    #[serde(default)]
    pub exclusive_group: Option<String>,
    #[serde(default)]
    pub registration_order: u64,
    #[serde(default)]
    pub sub_priority_hint: Option<u8>,
    #[serde(default)]
    pub supports_rollback: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

fn default_estimate() -> f64 {
    10.0
}

impl HookMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_priority: HookPriority::Normal,
            dependencies: BTreeSet::new(),
            provides: BTreeSet::new(),
            phase: ExecutionPhase::CoreProcessing,
            isolation_level: 0,
            estimated_cpu: default_estimate(),
            estimated_memory: default_estimate(),
            triggers: BTreeSet::new(),
            exclusive_group: None,
            registration_order: 0,
            sub_priority_hint: None,
            supports_rollback: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: HookPriority) -> Self {
        self.base_priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provides<I, S>(mut self, provides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = provides.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_phase(mut self, phase: ExecutionPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_isolation(mut self, isolation_level: u8) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    pub fn with_resources(mut self, cpu: f64, memory: f64) -> Self {
        self.estimated_cpu = cpu;
        self.estimated_memory = memory;
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.triggers.insert(trigger.into());
        self
    }

    pub fn with_exclusive_group(mut self, group: impl Into<String>) -> Self {
        self.exclusive_group = Some(group.into());
        self
    }

    pub fn with_registration_order(mut self, order: u64) -> Self {
        self.registration_order = order;
        self
    }

    pub fn with_sub_priority(mut self, hint: u8) -> Self {
        self.sub_priority_hint = Some(hint);
        self
    }

    pub fn with_rollback_support(mut self, supported: bool) -> Self {
        self.supports_rollback = supported;
        self
    }

    /// Attach tags and derive phase and isolation from them
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.phase = ExecutionPhase::from_tags(&self.tags);
        self.isolation_level = if self.tags.contains("exclusive") {
            2
        } else if self.tags.contains("isolated") {
            1
        } else {
            0
        };
        self
    }

    pub fn is_isolated(&self) -> bool {
        self.isolation_level > 0
    }

    /// Combined relative resource cost used by the optimizer and load-based
    /// arbitration
    pub fn resource_cost(&self) -> f64 {
        self.estimated_cpu + self.estimated_memory
    }
}
