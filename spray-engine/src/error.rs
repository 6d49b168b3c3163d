//! Error types for the spray engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for spray engine operations
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum SprayError {
    #[error("Unexpected response from {module}: {details}")]
    Protocol { module: String, details: String },

    #[error("Transport error: {details}")]
    Transport { details: String },

    #[error("Provider throttled the request: {details}")]
    Throttled { details: String },

    #[error("Account locked out: {identity}")]
    Lockout { identity: String },

    #[error("Configuration error: {component} - {reason}")]
    Configuration { component: String, reason: String },

    #[error("Scheduling deadlock: {remaining} task(s) can never become eligible")]
    SchedulingDeadlock { remaining: usize },

    #[error("Module failure in {module}: {reason}")]
    ModuleFailure { module: String, reason: String },

    #[error("I/O error: {details}")]
    Io { details: String },

    #[error("Serialization error: {error}")]
    Serialization { error: String },
}

impl SprayError {
    /// Create a configuration error
    pub fn configuration(component: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error for a module
    pub fn protocol(module: &str, details: impl Into<String>) -> Self {
        Self::Protocol {
            module: module.to_string(),
            details: details.into(),
        }
    }

    /// Create a module failure
    pub fn module_failure(module: &str, reason: impl Into<String>) -> Self {
        Self::ModuleFailure {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            SprayError::Transport { .. } => true,
            SprayError::Throttled { .. } => true,
            SprayError::Io { .. } => true,

            SprayError::Protocol { .. } => false,
            SprayError::Lockout { .. } => false,
            SprayError::Configuration { .. } => false,
            SprayError::SchedulingDeadlock { .. } => false,
            SprayError::ModuleFailure { .. } => false,
            SprayError::Serialization { .. } => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SprayError::Configuration { .. } => ErrorSeverity::Critical,
            SprayError::ModuleFailure { .. } => ErrorSeverity::Critical,
            SprayError::Lockout { .. } => ErrorSeverity::High,
            SprayError::SchedulingDeadlock { .. } => ErrorSeverity::Medium,
            SprayError::Throttled { .. } => ErrorSeverity::Medium,
            SprayError::Protocol { .. } => ErrorSeverity::Medium,
            SprayError::Io { .. } => ErrorSeverity::Medium,
            SprayError::Transport { .. } => ErrorSeverity::Low,
            SprayError::Serialization { .. } => ErrorSeverity::Low,
        }
    }

    /// Get error category for grouping and filtering
    pub fn category(&self) -> ErrorCategory {
        match self {
            SprayError::Transport { .. } => ErrorCategory::Infrastructure,
            SprayError::Io { .. } => ErrorCategory::Infrastructure,

            SprayError::Configuration { .. } => ErrorCategory::Configuration,

            SprayError::Throttled { .. } => ErrorCategory::Provider,
            SprayError::Lockout { .. } => ErrorCategory::Provider,
            SprayError::Protocol { .. } => ErrorCategory::Provider,

            SprayError::SchedulingDeadlock { .. } => ErrorCategory::Runtime,
            SprayError::ModuleFailure { .. } => ErrorCategory::Runtime,
            SprayError::Serialization { .. } => ErrorCategory::Runtime,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Error categories for grouping and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Infrastructure,
    Configuration,
    Provider,
    Runtime,
}

impl From<serde_json::Error> for SprayError {
    fn from(error: serde_json::Error) -> Self {
        SprayError::Serialization {
            error: error.to_string(),
        }
    }
}

impl From<std::io::Error> for SprayError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => SprayError::Configuration {
                component: "File system".to_string(),
                reason: format!("File not found: {}", error),
            },
            _ => SprayError::Io {
                details: error.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for SprayError {
    fn from(error: reqwest::Error) -> Self {
        SprayError::Transport {
            details: error.to_string(),
        }
    }
}

/// Result type for spray engine operations
pub type SprayResult<T> = Result<T, SprayError>;

/// Bounded retry policy consumed by every probe invocation path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// In-task retries for transport errors
    pub max_retries: u32,
    /// Delay between in-task transport retries
    pub backoff: BackoffStrategy,
    /// Extra inter-pass delay after a pass that saw throttling
    pub throttle_backoff: BackoffStrategy,
    /// How many later passes a throttled task may be requeued to
    pub max_throttle_requeues: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffStrategy::Exponential {
                initial_delay_ms: 500,
                multiplier: 2.0,
                max_delay_ms: 5_000,
            },
            throttle_backoff: BackoffStrategy::Exponential {
                initial_delay_ms: 5_000,
                multiplier: 2.0,
                max_delay_ms: 60_000,
            },
            max_throttle_requeues: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy with no retries and no backoff
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::Fixed { delay_ms: 0 },
            throttle_backoff: BackoffStrategy::Fixed { delay_ms: 0 },
            max_throttle_requeues: 0,
        }
    }

    /// Delay before transport retry `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff.calculate_delay(attempt))
    }

    /// Extra delay after `streak` consecutive throttled passes (1-based)
    pub fn throttle_delay(&self, streak: u32) -> std::time::Duration {
        if streak == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_millis(self.throttle_backoff.calculate_delay(streak - 1))
    }
}

/// Backoff strategy for retry logic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Fixed { delay_ms: u64 },
    Exponential {
        initial_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
    Linear {
        initial_delay_ms: u64,
        increment_ms: u64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for the given attempt number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        match self {
            BackoffStrategy::Fixed { delay_ms } => *delay_ms,
            BackoffStrategy::Exponential {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                (delay as u64).min(*max_delay_ms)
            }
            BackoffStrategy::Linear {
                initial_delay_ms,
                increment_ms,
            } => initial_delay_ms + (increment_ms * attempt as u64),
        }
    }
}
