//! Per-identity lockout accounting
//!
//! Attempts are reserved when a task is scheduled, not when it completes, so
//! concurrent workers can never push an identity past the policy. A provider
//! lockout removes the identity for the rest of the run.

use crate::counters::RunCounters;
use crate::error::SprayError;
use crate::types::{Identity, LockoutPolicy};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Attempt bookkeeping for one identity inside its current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts: u32,
    pub window_start: Instant,
}

/// Result of asking whether an identity may be attempted now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// An attempt was reserved for this identity
    Eligible,
    /// Window budget used up until the given instant
    Cooling { until: Instant },
    /// Locked out; never schedule again this run
    Removed,
    /// The policy allows no attempts at all
    Blocked,
}

pub struct LockoutGuard {
    policy: LockoutPolicy,
    states: DashMap<Identity, AttemptState>,
    locked: DashSet<Identity>,
    counters: Arc<RunCounters>,
}

impl LockoutGuard {
    pub fn new(policy: LockoutPolicy, counters: Arc<RunCounters>) -> Self {
        Self {
            policy,
            states: DashMap::new(),
            locked: DashSet::new(),
            counters,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Check eligibility and, when eligible, reserve one attempt
    pub fn try_reserve(&self, identity: &Identity, now: Instant) -> Eligibility {
        if self.locked.contains(identity) {
            return Eligibility::Removed;
        }
        if self.policy.max_attempts_per_window == 0 {
            return Eligibility::Blocked;
        }

        let mut state = self
            .states
            .entry(identity.clone())
            .or_insert(AttemptState {
                attempts: 0,
                window_start: now,
            });

        if now.saturating_duration_since(state.window_start) >= self.policy.window {
            debug!("Lockout window reset for {}", identity);
            state.attempts = 0;
            state.window_start = now;
        }

        if state.attempts < self.policy.max_attempts_per_window {
            state.attempts += 1;
            Eligibility::Eligible
        } else {
            Eligibility::Cooling {
                until: state.window_start + self.policy.window,
            }
        }
    }

    /// Give back a reserved attempt the provider never evaluated
    pub fn refund(&self, identity: &Identity) {
        if let Some(mut state) = self.states.get_mut(identity) {
            state.attempts = state.attempts.saturating_sub(1);
        }
    }

    /// Record an authoritative lockout. Returns true the first time per identity.
    pub fn record_lockout(&self, identity: &Identity) -> bool {
        if !self.locked.insert(identity.clone()) {
            return false;
        }
        let total = self.counters.record_lockout();
        let locked = SprayError::Lockout {
            identity: identity.to_string(),
        };
        warn!("{} ({} lockout(s) this run)", locked, total);
        true
    }

    pub fn is_locked(&self, identity: &Identity) -> bool {
        self.locked.contains(identity)
    }

    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    /// Attempts counted against `identity` in its window as of `now`
    pub fn attempts_in_window(&self, identity: &Identity, now: Instant) -> u32 {
        match self.states.get(identity) {
            Some(state) if now.saturating_duration_since(state.window_start) < self.policy.window => {
                state.attempts
            }
            _ => 0,
        }
    }

    pub fn state(&self, identity: &Identity) -> Option<AttemptState> {
        self.states.get(identity).map(|state| *state)
    }

    /// Earliest instant any of `identities` can be attempted again.
    ///
    /// `None` means none of them will ever become eligible.
    pub fn next_reset<'a, I>(&self, identities: I, now: Instant) -> Option<Instant>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        if self.policy.max_attempts_per_window == 0 {
            return None;
        }

        identities
            .into_iter()
            .filter(|identity| !self.locked.contains(*identity))
            .map(|identity| match self.states.get(identity) {
                Some(state) if state.attempts >= self.policy.max_attempts_per_window => {
                    (state.window_start + self.policy.window).max(now)
                }
                _ => now,
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn guard(count: u32, minutes: f64) -> LockoutGuard {
        LockoutGuard::new(
            LockoutPolicy::from_minutes(count, minutes),
            Arc::new(RunCounters::new(10)),
        )
    }

    #[test]
    fn test_reserve_until_budget_exhausted() {
        let guard = guard(2, 15.0);
        let alice = Identity::new("alice@corp.com");
        let now = Instant::now();

        assert_eq!(guard.try_reserve(&alice, now), Eligibility::Eligible);
        assert_eq!(guard.try_reserve(&alice, now), Eligibility::Eligible);
        assert_eq!(
            guard.try_reserve(&alice, now),
            Eligibility::Cooling {
                until: now + Duration::from_secs(900)
            }
        );
        assert_eq!(guard.attempts_in_window(&alice, now), 2);
    }

    #[test]
    fn test_window_resets_after_duration() {
        let guard = guard(1, 15.0);
        let alice = Identity::new("alice@corp.com");
        let start = Instant::now();

        assert_eq!(guard.try_reserve(&alice, start), Eligibility::Eligible);
        let almost = start + Duration::from_secs(899);
        assert!(matches!(guard.try_reserve(&alice, almost), Eligibility::Cooling { .. }));

        let later = start + Duration::from_secs(900);
        assert_eq!(guard.try_reserve(&alice, later), Eligibility::Eligible);
        assert_eq!(guard.state(&alice).unwrap().window_start, later);
    }

    #[test]
    fn test_lockout_removes_identity_and_counts_once() {
        let counters = Arc::new(RunCounters::new(10));
        let guard = LockoutGuard::new(LockoutPolicy::default(), counters.clone());
        let bob = Identity::new("bob@corp.com");

        assert!(guard.record_lockout(&bob));
        assert!(!guard.record_lockout(&bob));
        assert_eq!(counters.lockouts(), 1);
        assert_eq!(guard.locked_count(), 1);

        let far_future = Instant::now() + Duration::from_secs(86_400);
        assert_eq!(guard.try_reserve(&bob, far_future), Eligibility::Removed);
    }

    #[test]
    fn test_refund_returns_budget() {
        let guard = guard(1, 15.0);
        let carol = Identity::new("carol@corp.com");
        let now = Instant::now();

        assert_eq!(guard.try_reserve(&carol, now), Eligibility::Eligible);
        guard.refund(&carol);
        assert_eq!(guard.try_reserve(&carol, now), Eligibility::Eligible);
    }

    #[test]
    fn test_next_reset() {
        let guard = guard(1, 10.0);
        let alice = Identity::new("alice@corp.com");
        let bob = Identity::new("bob@corp.com");
        let now = Instant::now();

        guard.try_reserve(&alice, now);
        assert_eq!(
            guard.next_reset([&alice], now),
            Some(now + Duration::from_secs(600))
        );
        assert_eq!(guard.next_reset([&alice, &bob], now), Some(now));

        guard.record_lockout(&alice);
        assert_eq!(guard.next_reset([&alice], now), None);
    }

    #[test]
    fn test_zero_budget_is_blocked() {
        let guard = guard(0, 15.0);
        let dave = Identity::new("dave@corp.com");
        let now = Instant::now();
        assert_eq!(guard.try_reserve(&dave, now), Eligibility::Blocked);
        assert_eq!(guard.next_reset([&dave], now), None);
    }
}
