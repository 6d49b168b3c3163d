//! Spray Engine - Concurrent probing core for tenant enumeration and password spraying
//!
//! This crate provides the scheduler, lockout accounting, throttling, proxy
//! rotation, result classification and the built-in protocol modules used by
//! the spray CLI.

pub mod types;
pub mod traits;
pub mod error;
pub mod classifier;
pub mod counters;
pub mod lockout;
pub mod throttle;
pub mod proxy;
pub mod sink;
pub mod sources;
pub mod modules;
pub mod scheduler;
pub mod config;
pub mod runner;

#[cfg(test)]
mod tests;

pub use types::{
    Credential, Identity, LockoutPolicy, ModuleFamily, ProxyConfig, RawOutcome, TenantKind,
    Verdict,
};

pub use traits::{Enumerator, Sprayer, Validator};

pub use error::{
    BackoffStrategy, ErrorCategory, ErrorSeverity, RetryPolicy, SprayError, SprayResult,
};

pub use classifier::classify;

pub use counters::{CounterSnapshot, RunCounters};

pub use lockout::{AttemptState, Eligibility, LockoutGuard};

pub use throttle::ThrottleController;

pub use proxy::{ProxyRotator, Transport};

pub use sink::{ResultsSink, ResultsSnapshot, Subject};

pub use sources::{CredentialSource, ListSource};

pub use modules::{EnumModule, ModuleContext, SprayModule, ValidateModule};

pub use scheduler::{PhaseOutcome, RunStatus, Scheduler, SchedulerSettings};

pub use config::{ModuleSelection, Phases, RunConfig};

pub use runner::{RunReport, Runner};
