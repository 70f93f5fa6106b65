// Weighted multi-factor priority scoring
use crate::error::{ConfigError, PlanningError, Result};
use crate::metadata::{HookMetadata, TimeSensitivity};
use crate::monitor::HookFeedback;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Scores closer than this are considered equal and fall back to sub-priority
pub const SCORE_EPSILON: f64 = 1e-9;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Dependency depth at which the depth factor saturates
const MAX_DEPTH: f64 = 10.0;

/// Neutral value used when a hook has no execution history yet
const NEUTRAL: f64 = 0.5;

fn zero() -> f64 {
    0.0
}

/// Factor weights. Must be non-negative and sum to 1.0; they are never
/// renormalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorityWeights {
    #[serde(default = "zero")]
    pub base_priority: f64,
    #[serde(default = "zero")]
    pub dependency_depth: f64,
    #[serde(default = "zero")]
    pub execution_frequency: f64,
    #[serde(default = "zero")]
    pub success_rate: f64,
    #[serde(default = "zero")]
    pub system_load: f64,
    #[serde(default = "zero")]
    pub time_sensitivity: f64,
    #[serde(default = "zero")]
    pub resource_availability: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            base_priority: 0.40,
            dependency_depth: 0.15,
            execution_frequency: 0.15,
            success_rate: 0.10,
            system_load: 0.10,
            time_sensitivity: 0.05,
            resource_availability: 0.05,
        }
    }
}

impl PriorityWeights {
    fn entries(&self) -> [(&'static str, f64); 7] {
        [
            ("base_priority", self.base_priority),
            ("dependency_depth", self.dependency_depth),
            ("execution_frequency", self.execution_frequency),
            ("success_rate", self.success_rate),
            ("system_load", self.system_load),
            ("time_sensitivity", self.time_sensitivity),
            ("resource_availability", self.resource_availability),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.entries().iter().map(|(_, w)| w).sum()
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (name, weight) in self.entries() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidValue {
                    message: "Priority weights must be finite and non-negative".to_string(),
                    field: format!("priority_weights.{name}"),
                    value: weight.to_string(),
                    expected: "value in [0, 1]".to_string(),
                });
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne { sum });
        }
        Ok(())
    }
}

/// Ambient signals for scoring a single hook
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityContext {
    /// Current system load, 0-100
    pub system_load: f64,
    pub time_sensitivity: TimeSensitivity,
    pub dependency_depth: usize,
    /// Historical success rate in [0, 1]; `None` means no history
    pub success_rate: Option<f64>,
    /// Where the hook's execution count sits among all hooks, in [0, 1]
    pub frequency_percentile: Option<f64>,
    /// Fraction of system resources currently available, in [0, 1]
    pub resource_availability: f64,
    /// Advisory nudge from the performance monitor, added to the score
    pub priority_adjustment: f64,
}

impl Default for PriorityContext {
    fn default() -> Self {
        Self {
            system_load: 0.0,
            time_sensitivity: TimeSensitivity::Normal,
            dependency_depth: 0,
            success_rate: None,
            frequency_percentile: None,
            resource_availability: 1.0,
            priority_adjustment: 0.0,
        }
    }
}

/// Ambient signals for a whole planning pass
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub system_load: f64,
    pub time_sensitivity: TimeSensitivity,
    pub resource_availability: f64,
    pub feedback: HashMap<String, HookFeedback>,
    pub adjustments: HashMap<String, f64>,
    /// Dependency depths from a previous graph pass, used by conflict
    /// arbitration
    pub depths: HashMap<String, usize>,
}

impl PlanningContext {
    pub fn new() -> Self {
        Self {
            resource_availability: 1.0,
            ..Self::default()
        }
    }

    pub fn with_system_load(mut self, load: f64) -> Self {
        self.system_load = load;
        self
    }

    pub fn with_time_sensitivity(mut self, sensitivity: TimeSensitivity) -> Self {
        self.time_sensitivity = sensitivity;
        self
    }

    pub fn with_resource_availability(mut self, availability: f64) -> Self {
        self.resource_availability = availability;
        self
    }

    pub fn with_feedback(mut self, feedback: HashMap<String, HookFeedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_adjustment(mut self, hook: impl Into<String>, delta: f64) -> Self {
        *self.adjustments.entry(hook.into()).or_insert(0.0) += delta;
        self
    }

    pub fn with_depths(mut self, depths: HashMap<String, usize>) -> Self {
        self.depths = depths;
        self
    }

    pub fn depth_of(&self, hook: &str) -> usize {
        self.depths.get(hook).copied().unwrap_or(0)
    }

    /// Build the per-hook context used by the calculator
    pub fn priority_context(&self, hook: &str, dependency_depth: usize) -> PriorityContext {
        let feedback = self.feedback.get(hook);
        PriorityContext {
            system_load: self.system_load,
            time_sensitivity: self.time_sensitivity,
            dependency_depth,
            success_rate: feedback.map(|f| f.success_rate),
            frequency_percentile: feedback.map(|f| f.frequency_percentile),
            resource_availability: self.resource_availability,
            priority_adjustment: self.adjustments.get(hook).copied().unwrap_or(0.0),
        }
    }
}

/// The seven normalized factors behind a score, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityFactors {
    pub base_priority: f64,
    pub dependency_depth: f64,
    pub execution_frequency: f64,
    pub success_rate: f64,
    pub system_load: f64,
    pub time_sensitivity: f64,
    pub resource_availability: f64,
}

/// Computed priority: higher `priority` runs first; `sub_priority` (1-100,
/// higher wins) breaks ties within `SCORE_EPSILON`, then the earlier
/// registration wins
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub priority: f64,
    pub sub_priority: u8,
    #[serde(default)]
    pub registration_order: u64,
}

impl PriorityScore {
    /// Ordering where `Less` means "runs / wins first"
    pub fn rank(&self, other: &PriorityScore) -> Ordering {
        if (self.priority - other.priority).abs() > SCORE_EPSILON {
            return other
                .priority
                .partial_cmp(&self.priority)
                .unwrap_or(Ordering::Equal);
        }
        other
            .sub_priority
            .cmp(&self.sub_priority)
            .then_with(|| self.registration_order.cmp(&other.registration_order))
    }
}

/// Pure scoring function over hook metadata and supplied context
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    weights: PriorityWeights,
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
        }
    }
}

impl PriorityCalculator {
    pub fn new(weights: PriorityWeights) -> Result<Self> {
        weights.validate().map_err(Box::new)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    pub fn factors(&self, hook: &HookMetadata, context: &PriorityContext) -> PriorityFactors {
        let load = context.system_load.clamp(0.0, 100.0);
        let availability = context.resource_availability.clamp(0.0, 1.0);
        let cost = hook.resource_cost().max(0.0);

        PriorityFactors {
            base_priority: hook.base_priority.normalized(),
            dependency_depth: (context.dependency_depth as f64 / MAX_DEPTH).min(1.0),
            execution_frequency: 1.0
                - context
                    .frequency_percentile
                    .unwrap_or(NEUTRAL)
                    .clamp(0.0, 1.0),
            success_rate: context.success_rate.unwrap_or(NEUTRAL).clamp(0.0, 1.0),
            system_load: 1.0 - load / 100.0,
            time_sensitivity: context.time_sensitivity.normalized(),
            resource_availability: availability / (1.0 + cost / 100.0),
        }
    }

    pub fn score(&self, hook: &HookMetadata, context: &PriorityContext) -> PriorityScore {
        let f = self.factors(hook, context);
        let w = &self.weights;
        let priority = f.base_priority * w.base_priority
            + f.dependency_depth * w.dependency_depth
            + f.execution_frequency * w.execution_frequency
            + f.success_rate * w.success_rate
            + f.system_load * w.system_load
            + f.time_sensitivity * w.time_sensitivity
            + f.resource_availability * w.resource_availability
            + context.priority_adjustment;

        PriorityScore {
            priority,
            sub_priority: Self::sub_priority(hook),
            registration_order: hook.registration_order,
        }
    }

    /// Score a hook looked up by name in a catalog snapshot
    pub fn score_registered(
        &self,
        catalog: &HashMap<String, HookMetadata>,
        name: &str,
        context: &PriorityContext,
    ) -> Result<PriorityScore> {
        let hook = catalog
            .get(name)
            .ok_or_else(|| PlanningError::UnknownHook {
                hook: name.to_string(),
            })?;
        Ok(self.score(hook, context))
    }

    fn sub_priority(hook: &HookMetadata) -> u8 {
        match hook.sub_priority_hint {
            Some(hint) => hint.clamp(1, 100),
            None => (100 - hook.registration_order.min(99)) as u8,
        }
    }
}
