// Logging setup and span helpers for Hookflow
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{HookflowError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format (pretty for terminals, json for log shippers)
    pub format: LogFormat,
    /// Color output configuration
    pub color: ColorConfig,
    /// Whether to show targets (module names)
    pub show_targets: bool,
}

/// Log output format options
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorConfig {
    Auto,
    Always,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            color: ColorConfig::Auto,
            show_targets: false,
        }
    }
}

impl LogConfig {
    /// Map host application verbosity flags onto a level
    pub fn from_verbosity(verbose: bool, quiet: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else if verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };

        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_color(mut self, color: ColorConfig) -> Self {
        self.color = color;
        self
    }

    pub fn with_targets(mut self, show_targets: bool) -> Self {
        self.show_targets = show_targets;
        self
    }

    /// Check if colors should be used based on configuration and terminal
    pub fn should_use_colors(&self) -> bool {
        match self.color {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => {
                io::stderr().is_terminal()
                    && std::env::var("TERM").map_or(true, |term| term != "dumb")
                    && std::env::var("NO_COLOR").is_err()
            }
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::new(format!("hookflow={}", self.level))
    }
}

/// Install a global subscriber. A second call reports an error instead of
/// panicking.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = config.env_filter();
    let ansi = config.should_use_colors();

    let installed = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_target(config.show_targets)
            .with_ansi(ansi)
            .try_init(),
        LogFormat::Json => fmt().with_env_filter(env_filter).json().try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(env_filter)
            .compact()
            .with_target(config.show_targets)
            .with_ansi(ansi)
            .try_init(),
    };

    installed.map_err(|e| HookflowError::Logging {
        message: e.to_string(),
    })
}

/// Spans and log lines shared by the planner and executor
pub mod utils {
    use tracing::{error, info, span, Level, Span};

    pub fn planning_span(trigger: &str, hook_count: usize) -> Span {
        span!(Level::DEBUG, "planning", trigger = %trigger, hook_count = hook_count)
    }

    pub fn batch_span(batch_id: usize, size: usize) -> Span {
        span!(Level::DEBUG, "batch", batch_id = batch_id, size = size)
    }

    pub fn hook_span(hook: &str) -> Span {
        span!(Level::INFO, "hook", hook = %hook)
    }

    pub fn log_hook_completion(hook: &str, success: bool, duration_ms: u64) {
        if success {
            info!(hook = %hook, duration_ms = duration_ms, "Hook completed successfully");
        } else {
            error!(hook = %hook, duration_ms = duration_ms, "Hook failed");
        }
    }
}
