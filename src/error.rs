// Error taxonomy for the hook orchestrator
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, HookflowError>;

/// Main error type for Hookflow with one boxed sub-error per concern
#[derive(Debug, Error)]
pub enum HookflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<ConfigError>),

    #[error("Planning failed: {0}")]
    Planning(#[from] Box<PlanningError>),

    #[error("Conflict resolution failed: {0}")]
    Conflict(#[from] Box<ConflictError>),

    #[error("Hook execution failed: {0}")]
    HookExecution(#[from] Box<HookExecutionError>),

    #[error("Rollback failed: {0}")]
    Rollback(#[from] Box<RollbackError>),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

/// Configuration errors are fatal at construction time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid YAML syntax: {message}")]
    InvalidYaml {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        file_path: Option<PathBuf>,
    },

    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        message: String,
        field: String,
        value: String,
        expected: String,
    },

    #[error("Priority weights sum to {sum:.3}, expected 1.0")]
    WeightsDoNotSumToOne { sum: f64 },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String, errors: Vec<String> },
}

/// Errors raised while scoring or planning; dependency problems are reported
/// as plan issues instead
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Hook is not registered: {hook}")]
    UnknownHook { hook: String },
}

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("No candidates supplied for trigger {trigger}")]
    NoCandidates { trigger: String },

    #[error("Conflict for trigger {trigger} left unresolved: {reason}")]
    Unresolved { trigger: String, reason: String },
}

/// Per-hook execution errors; caught by the executor and never propagated
#[derive(Debug, Clone, Error)]
pub enum HookExecutionError {
    #[error("Hook {hook} failed: {message}")]
    Failed { hook: String, message: String },

    #[error("Hook execution timeout after {timeout_ms}ms: {hook}")]
    Timeout { hook: String, timeout_ms: u64 },

    #[error("Hook {hook} panicked: {message}")]
    Panicked { hook: String, message: String },

    #[error("No implementation registered for hook: {hook}")]
    NotRegistered { hook: String },

    #[error("Hook {hook} cancelled: {reason}")]
    Cancelled { hook: String, reason: String },

    #[error("Hook {hook} skipped, failed dependencies: {failed:?}")]
    DependencyFailed { hook: String, failed: Vec<String> },
}

impl HookExecutionError {
    pub fn hook(&self) -> &str {
        match self {
            HookExecutionError::Failed { hook, .. }
            | HookExecutionError::Timeout { hook, .. }
            | HookExecutionError::Panicked { hook, .. }
            | HookExecutionError::NotRegistered { hook }
            | HookExecutionError::Cancelled { hook, .. }
            | HookExecutionError::DependencyFailed { hook, .. } => hook,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RollbackError {
    #[error("Rollback transaction not found: {id}")]
    TransactionNotFound { id: Uuid },

    #[error("Rollback transaction {id} is already committed")]
    AlreadyCommitted { id: Uuid },

    #[error("Rollback transaction {id} is already rolled back")]
    AlreadyRolledBack { id: Uuid },

    #[error("Inverse action for hook {hook} in transaction {id} failed: {message}")]
    ActionFailed {
        id: Uuid,
        hook: String,
        message: String,
    },
}

impl HookflowError {
    /// Configuration errors and empty-candidate conflicts cannot be recovered
    /// from at call time; everything else is isolated per plan or per hook.
    pub fn is_recoverable(&self) -> bool {
        match self {
            HookflowError::Config(_) | HookflowError::Logging { .. } => false,
            HookflowError::Conflict(conflict) => {
                !matches!(conflict.as_ref(), ConflictError::NoCandidates { .. })
            }
            _ => true,
        }
    }

    pub(crate) fn config(error: ConfigError) -> Self {
        HookflowError::Config(Box::new(error))
    }
}

// Conversion from serde_yaml::Error to ConfigError
impl From<serde_yaml::Error> for Box<ConfigError> {
    fn from(error: serde_yaml::Error) -> Self {
        let location = error.location();
        Box::new(ConfigError::InvalidYaml {
            message: error.to_string(),
            line: location.as_ref().map(|l| l.line() as u32),
            column: location.as_ref().map(|l| l.column() as u32),
            file_path: None,
        })
    }
}

impl From<serde_yaml::Error> for HookflowError {
    fn from(error: serde_yaml::Error) -> Self {
        HookflowError::Config(Box::<ConfigError>::from(error))
    }
}

impl From<HookExecutionError> for HookflowError {
    fn from(error: HookExecutionError) -> Self {
        HookflowError::HookExecution(Box::new(error))
    }
}

impl From<RollbackError> for HookflowError {
    fn from(error: RollbackError) -> Self {
        HookflowError::Rollback(Box::new(error))
    }
}

impl From<ConflictError> for HookflowError {
    fn from(error: ConflictError) -> Self {
        HookflowError::Conflict(Box::new(error))
    }
}

impl From<PlanningError> for HookflowError {
    fn from(error: PlanningError) -> Self {
        HookflowError::Planning(Box::new(error))
    }
}
