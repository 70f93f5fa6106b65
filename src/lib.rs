// Hookflow - Library module
// Dependency-aware, resource-bounded hook execution with rollback

pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hook;
pub mod logging;
pub mod metadata;
pub mod monitor;
pub mod optimizer;
pub mod orchestrator;
pub mod priority;
pub mod registry;
pub mod rollback;
pub mod system;

// Re-export main types for easier access
pub use config::{OrchestratorConfig, PhaseSettings};
pub use conflict::{ConflictResolution, ConflictResolver, ConflictStrategy, RegistrationOrder};
pub use error::{
    ConfigError, ConflictError, HookExecutionError, HookflowError, PlanningError, Result,
    RollbackError,
};
pub use executor::{
    ExecutionResult, Executor, ExecutorConfig, HookReport, HookState, RollbackReport,
    StateTransition,
};
pub use graph::{DependencyGraphResolver, DependencyIssue, DependencyLayer, DependencyPlan};
pub use hook::{FnHook, Hook, HookOutcome, HookSet, InvocationContext, UndoAction};
pub use logging::{init_logging, ColorConfig, LogConfig, LogFormat};
pub use metadata::{ExecutionPhase, HookMetadata, HookPriority, ResourceBudget, TimeSensitivity};
pub use monitor::{
    HookFeedback, HookStats, PerformanceMonitor, PerformanceRecord, Recommendation,
    TrendDirection, TrendReport,
};
pub use optimizer::{ExecutionBatch, ExecutionOptimizer, ExecutionPlan};
pub use orchestrator::{HookOrchestrator, PlanRequest, SystemMetrics, TriggerReport};
pub use priority::{
    PlanningContext, PriorityCalculator, PriorityContext, PriorityFactors, PriorityScore,
    PriorityWeights,
};
pub use registry::{HookRegistry, InMemoryRegistry};
pub use rollback::{
    RollbackManager, RollbackRecord, RollbackScope, RollbackTransaction, TransactionState,
    TransactionSummary,
};
pub use system::{ResourceProbe, ResourceSample, StaticProbe, SysinfoProbe};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
