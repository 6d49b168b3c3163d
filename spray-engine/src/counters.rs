//! Run-wide counters, the lockout breaker and the interrupt flag

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// Counters shared by every worker for the duration of one run
#[derive(Debug)]
pub struct RunCounters {
    lockouts: AtomicU32,
    requests: AtomicU64,
    breaker_tripped: AtomicBool,
    interrupted: AtomicBool,
    stop: Notify,
    safe_threshold: u32,
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub lockouts: u32,
    pub requests: u64,
    pub breaker_tripped: bool,
}

impl RunCounters {
    /// Counters whose breaker trips once `safe_threshold` lockouts are seen
    pub fn new(safe_threshold: u32) -> Self {
        Self {
            lockouts: AtomicU32::new(0),
            requests: AtomicU64::new(0),
            breaker_tripped: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            stop: Notify::new(),
            safe_threshold,
        }
    }

    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one observed lockout and evaluate the breaker
    pub fn record_lockout(&self) -> u32 {
        let total = self.lockouts.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_breaker();
        total
    }

    /// Trip the breaker if the lockout count reached the threshold
    pub fn check_breaker(&self) -> bool {
        if self.breaker_tripped.load(Ordering::SeqCst) {
            return true;
        }
        let lockouts = self.lockouts.load(Ordering::SeqCst);
        if self.safe_threshold > 0 && lockouts >= self.safe_threshold {
            if !self.breaker_tripped.swap(true, Ordering::SeqCst) {
                warn!(
                    "Lockout breaker tripped: {} locked account(s) observed (threshold {})",
                    lockouts, self.safe_threshold
                );
                self.stop.notify_waiters();
            }
            return true;
        }
        false
    }

    pub fn breaker_tripped(&self) -> bool {
        self.breaker_tripped.load(Ordering::SeqCst)
    }

    /// Ask the run to stop dispatching; in-flight probes still finish
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            warn!("Run interrupted; no new probes will be dispatched");
            self.stop.notify_waiters();
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Breaker tripped or run interrupted
    pub fn should_stop(&self) -> bool {
        self.breaker_tripped() || self.interrupted()
    }

    /// Resolves once the run should stop
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop.notified();
            if self.should_stop() {
                return;
            }
            notified.await;
        }
    }

    pub fn lockouts(&self) -> u32 {
        self.lockouts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn safe_threshold(&self) -> u32 {
        self.safe_threshold
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lockouts: self.lockouts(),
            requests: self.requests(),
            breaker_tripped: self.breaker_tripped(),
        }
    }
}
