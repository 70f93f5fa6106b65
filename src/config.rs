// Configuration handling for Hookflow
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::{ConflictStrategy, RegistrationOrder};
use crate::error::{ConfigError, HookflowError, Result};
use crate::executor::ExecutorConfig;
use crate::graph::DEFAULT_MAX_CYCLE_BREAKS;
use crate::metadata::{ExecutionPhase, ResourceBudget};
use crate::monitor::{DEFAULT_LOAD_THRESHOLD, DEFAULT_SLOW_HOOK_THRESHOLD_MS, DEFAULT_WINDOW};
use crate::priority::PriorityWeights;
use crate::rollback::{RollbackScope, DEFAULT_HISTORY_SIZE};

/// Overrides applied to every hook in one execution phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseSettings {
    pub timeout_ms: Option<u64>,
    pub max_parallelism: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub conflict_strategy: ConflictStrategy,
    pub conflict_strategies_by_trigger: HashMap<String, ConflictStrategy>,
    pub registration_order: RegistrationOrder,
    pub max_workers: usize,
    pub max_execution_time_ms: u64,
    pub enable_rollback: bool,
    pub priority_weights: PriorityWeights,
    pub default_rollback_scope: RollbackScope,
    pub fail_fast: bool,
    pub max_cycle_breaks: usize,
    pub resource_budget: ResourceBudget,
    pub performance_window: usize,
    pub rollback_history_size: usize,
    pub load_threshold: f64,
    pub slow_hook_threshold_ms: u64,
    pub phases: BTreeMap<ExecutionPhase, PhaseSettings>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::PriorityBased,
            conflict_strategies_by_trigger: HashMap::new(),
            registration_order: RegistrationOrder::First,
            max_workers: 8,
            max_execution_time_ms: 30_000,
            enable_rollback: true,
            priority_weights: PriorityWeights::default(),
            default_rollback_scope: RollbackScope::DependencyChain,
            fail_fast: false,
            max_cycle_breaks: DEFAULT_MAX_CYCLE_BREAKS,
            resource_budget: ResourceBudget::default(),
            performance_window: DEFAULT_WINDOW,
            rollback_history_size: DEFAULT_HISTORY_SIZE,
            load_threshold: DEFAULT_LOAD_THRESHOLD,
            slow_hook_threshold_ms: DEFAULT_SLOW_HOOK_THRESHOLD_MS,
            phases: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HookflowError::config(ConfigError::NotFound {
                path: path.to_path_buf(),
            }));
        }

        if !path.is_file() {
            return Err(HookflowError::config(ConfigError::InvalidValue {
                message: "Configuration path is not a file".to_string(),
                field: "config_path".to_string(),
                value: path.display().to_string(),
                expected: "file path".to_string(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(HookflowError::Io)?;
        Self::from_yaml_with_context(&content, Some(path))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_context(yaml, None)
    }

    fn from_yaml_with_context(yaml: &str, path: Option<&Path>) -> Result<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).map_err(|e| {
            let mut config_error = *Box::<ConfigError>::from(e);
            if let ConfigError::InvalidYaml {
                ref mut file_path, ..
            } = config_error
            {
                *file_path = path.map(PathBuf::from);
            }
            HookflowError::config(config_error)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orchestrator cannot run with. A single
    /// problem is returned as is; several are gathered into
    /// `ConfigError::ValidationFailed`.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.priority_weights.validate() {
            errors.push(e);
        }
        if self.max_workers < 1 {
            errors.push(invalid("max_workers", self.max_workers, "integer >= 1"));
        }
        if self.max_execution_time_ms < 1 {
            errors.push(invalid(
                "max_execution_time_ms",
                self.max_execution_time_ms,
                "integer >= 1",
            ));
        }
        if self.performance_window < 1 {
            errors.push(invalid(
                "performance_window",
                self.performance_window,
                "integer >= 1",
            ));
        }
        if !(self.resource_budget.cpu.is_finite() && self.resource_budget.cpu > 0.0) {
            errors.push(invalid(
                "resource_budget.cpu",
                self.resource_budget.cpu,
                "positive number",
            ));
        }
        if !(self.resource_budget.memory.is_finite() && self.resource_budget.memory > 0.0) {
            errors.push(invalid(
                "resource_budget.memory",
                self.resource_budget.memory,
                "positive number",
            ));
        }
        if !(0.0..=100.0).contains(&self.load_threshold) {
            errors.push(invalid("load_threshold", self.load_threshold, "0-100"));
        }

        for (phase, settings) in &self.phases {
            if settings.timeout_ms == Some(0) {
                errors.push(invalid(
                    &format!("phases.{phase}.timeout_ms"),
                    0,
                    "integer >= 1",
                ));
            }
            if settings.max_parallelism == Some(0) {
                errors.push(invalid(
                    &format!("phases.{phase}.max_parallelism"),
                    0,
                    "integer >= 1",
                ));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(HookflowError::config(errors.remove(0))),
            count => Err(HookflowError::config(ConfigError::ValidationFailed {
                message: format!("{count} invalid configuration values"),
                errors: errors.iter().map(ToString::to_string).collect(),
            })),
        }
    }

    pub fn strategy_for(&self, trigger: &str) -> ConflictStrategy {
        self.conflict_strategies_by_trigger
            .get(trigger)
            .copied()
            .unwrap_or(self.conflict_strategy)
    }

    pub fn timeout_for(&self, phase: ExecutionPhase) -> Duration {
        let ms = self
            .phases
            .get(&phase)
            .and_then(|settings| settings.timeout_ms)
            .unwrap_or(self.max_execution_time_ms);
        Duration::from_millis(ms)
    }

    pub fn max_parallelism_for(&self, phase: ExecutionPhase) -> usize {
        self.phases
            .get(&phase)
            .and_then(|settings| settings.max_parallelism)
            .map_or(self.max_workers, |cap| cap.min(self.max_workers))
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn with_trigger_strategy(
        mut self,
        trigger: impl Into<String>,
        strategy: ConflictStrategy,
    ) -> Self {
        self.conflict_strategies_by_trigger
            .insert(trigger.into(), strategy);
        self
    }

    pub fn with_registration_order(mut self, order: RegistrationOrder) -> Self {
        self.registration_order = order;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.max_execution_time_ms = timeout_ms;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.enable_rollback = enabled;
        self
    }

    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.default_rollback_scope = scope;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_weights(mut self, weights: PriorityWeights) -> Self {
        self.priority_weights = weights;
        self
    }

    pub fn with_resource_budget(mut self, budget: ResourceBudget) -> Self {
        self.resource_budget = budget;
        self
    }

    pub fn with_phase(mut self, phase: ExecutionPhase, settings: PhaseSettings) -> Self {
        self.phases.insert(phase, settings);
        self
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let phase_timeouts = self
            .phases
            .iter()
            .filter_map(|(phase, settings)| {
                settings
                    .timeout_ms
                    .map(|ms| (*phase, Duration::from_millis(ms)))
            })
            .collect();

        ExecutorConfig {
            max_workers: self.max_workers,
            max_execution_time: Duration::from_millis(self.max_execution_time_ms),
            phase_timeouts,
            fail_fast: self.fail_fast,
            enable_rollback: self.enable_rollback,
            rollback_scope: self.default_rollback_scope,
        }
    }
}

fn invalid(field: &str, value: impl ToString, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        message: format!("expected {expected}"),
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_execution_time_ms, 30_000);
        assert_eq!(config.default_rollback_scope, RollbackScope::DependencyChain);
        assert!(config.enable_rollback);
        assert!(!config.fail_fast);
    }

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = OrchestratorConfig::from_yaml("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
conflict_strategy: round_robin
conflict_strategies_by_trigger:
  save: weighted_random
registration_order: last
max_workers: 4
max_execution_time_ms: 500
fail_fast: true
default_rollback_scope: single_hook
resource_budget:
  cpu: 50.0
  memory: 80.0
phases:
  cleanup:
    timeout_ms: 100
    max_parallelism: 2
"#;
        let config = OrchestratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.conflict_strategy, ConflictStrategy::RoundRobin);
        assert_eq!(config.strategy_for("save"), ConflictStrategy::WeightedRandom);
        assert_eq!(config.strategy_for("load"), ConflictStrategy::RoundRobin);
        assert_eq!(config.registration_order, RegistrationOrder::Last);
        assert_eq!(config.timeout_for(ExecutionPhase::Cleanup), Duration::from_millis(100));
        assert_eq!(
            config.timeout_for(ExecutionPhase::CoreProcessing),
            Duration::from_millis(500)
        );
        assert_eq!(config.max_parallelism_for(ExecutionPhase::Cleanup), 2);
        assert_eq!(config.max_parallelism_for(ExecutionPhase::Finalization), 4);

        let executor = config.executor_config();
        assert!(executor.fail_fast);
        assert_eq!(executor.rollback_scope, RollbackScope::SingleHook);
        assert_eq!(
            executor.timeout_for(ExecutionPhase::Cleanup),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = OrchestratorConfig::from_yaml("max_workers: 0").unwrap_err();
        match err {
            HookflowError::Config(config) => match *config {
                ConfigError::InvalidValue { field, .. } => assert_eq!(field, "max_workers"),
                other => panic!("unexpected config error: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let yaml = r#"
priority_weights:
  base_priority: 0.5
  dependency_depth: 0.1
"#;
        let err = OrchestratorConfig::from_yaml(yaml).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(matches!(
            err,
            HookflowError::Config(ref config) if matches!(**config, ConfigError::WeightsDoNotSumToOne { .. })
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(OrchestratorConfig::from_yaml("max_wrokers: 3").is_err());
        assert!(OrchestratorConfig::from_yaml("priority_weights:\n  mystery: 1.0").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_workers: 2\nenable_rollback: false").unwrap();
        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_workers, 2);
        assert!(!config.enable_rollback);
    }

    #[test]
    fn test_from_file_errors() {
        let missing = OrchestratorConfig::from_file(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(
            missing,
            Err(HookflowError::Config(ref config)) if matches!(**config, ConfigError::NotFound { .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_workers: [1, 2").unwrap();
        match OrchestratorConfig::from_file(file.path()) {
            Err(HookflowError::Config(config)) => match *config {
                ConfigError::InvalidYaml { file_path, .. } => {
                    assert_eq!(file_path.as_deref(), Some(file.path()));
                }
                other => panic!("unexpected config error: {other}"),
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_every_invalid_value_is_reported() {
        let yaml = "max_workers: 0\nload_threshold: 120.0\nresource_budget: {cpu: -1.0, memory: 10.0}";
        match OrchestratorConfig::from_yaml(yaml) {
            Err(HookflowError::Config(config)) => match *config {
                ConfigError::ValidationFailed { errors, .. } => {
                    assert_eq!(errors.len(), 3);
                    assert!(errors[0].contains("max_workers"));
                    assert!(errors[1].contains("resource_budget.cpu"));
                    assert!(errors[2].contains("load_threshold"));
                }
                other => panic!("unexpected config error: {other}"),
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
