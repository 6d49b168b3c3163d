//! Property-based and scenario tests for the spray engine core

#[cfg(test)]
mod tests {
    use crate::classifier::classify;
    use crate::counters::RunCounters;
    use crate::error::RetryPolicy;
    use crate::lockout::{Eligibility, LockoutGuard};
    use crate::proxy::{ProxyRotator, Transport};
    use crate::scheduler::{RunStatus, Scheduler, SchedulerSettings};
    use crate::sink::ResultsSink;
    use crate::sources::cross_product;
    use crate::throttle::ThrottleController;
    use crate::traits::{Enumerator, Sprayer};
    use crate::types::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    // Property test generators
    fn arb_raw_outcome() -> impl Strategy<Value = RawOutcome> {
        prop_oneof![
            prop::option::of("[a-zA-Z ]{0,20}").prop_map(RawOutcome::Success),
            Just(RawOutcome::AuthFailure),
            Just(RawOutcome::UserNotFound),
            Just(RawOutcome::AccountLocked),
            Just(RawOutcome::Throttled),
            ".{0,30}".prop_map(RawOutcome::TransportError),
            ".{0,30}".prop_map(RawOutcome::Unrecognized),
        ]
    }

    fn arb_family() -> impl Strategy<Value = ModuleFamily> {
        prop_oneof![Just(ModuleFamily::Enumerate), Just(ModuleFamily::Spray)]
    }

    prop_compose! {
        fn arb_reservations()
            (steps in prop::collection::vec((0usize..4, 0u64..400), 1..80))
        -> Vec<(usize, u64)> {
            steps
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every outcome maps to exactly one verdict, the same one every time
        #[test]
        fn property_classification_total_and_deterministic(
            family in arb_family(),
            outcome in arb_raw_outcome()
        ) {
            let first = classify(family, &outcome);
            let second = classify(family, &outcome.clone());
            prop_assert_eq!(first, second);

            match family {
                ModuleFamily::Spray => prop_assert!(!matches!(
                    first,
                    Verdict::Exists | Verdict::NotExists
                )),
                _ => prop_assert!(!matches!(
                    first,
                    Verdict::ValidCredential | Verdict::InvalidCredential | Verdict::LockedOut
                )),
            }
        }

        /// Throttle delays always fall within [sleep, sleep * (1 + jitter/100)]
        #[test]
        fn property_throttle_delay_within_bounds(sleep in 0u64..=120, jitter in 0u8..=100) {
            let throttle = ThrottleController::new(sleep, jitter);
            let lower = Duration::from_secs(sleep);
            let upper = Duration::from_secs_f64(sleep as f64 * (1.0 + f64::from(jitter) / 100.0));
            for _ in 0..10 {
                let delay = throttle.delay();
                prop_assert!(delay >= lower);
                prop_assert!(delay <= upper + Duration::from_millis(1));
            }
        }

        /// No identity is granted more than the policy allows in one window
        #[test]
        fn property_guard_never_exceeds_window_budget(
            max in 1u32..4,
            window_secs in 1u64..600,
            steps in arb_reservations()
        ) {
            let policy = LockoutPolicy::new(max, Duration::from_secs(window_secs));
            let guard = LockoutGuard::new(policy, Arc::new(RunCounters::new(10)));
            let identities: Vec<Identity> = (0..4)
                .map(|i| Identity::new(format!("user{}@corp.com", i)))
                .collect();
            let base = Instant::now();
            let mut clock = 0u64;
            let mut grants: Vec<Vec<u64>> = vec![Vec::new(); identities.len()];

            for (index, advance) in steps {
                clock += advance;
                let now = base + Duration::from_secs(clock);
                if guard.try_reserve(&identities[index], now) == Eligibility::Eligible {
                    grants[index].push(clock);
                }
                prop_assert!(guard.attempts_in_window(&identities[index], now) <= max);
            }

            // Reference model: a window opens at the first grant after the previous one closed
            for times in grants {
                let mut window_start: Option<u64> = None;
                let mut in_window = 0u32;
                for time in times {
                    match window_start {
                        Some(start) if time < start + window_secs => in_window += 1,
                        _ => {
                            window_start = Some(time);
                            in_window = 1;
                        }
                    }
                    prop_assert!(in_window <= max);
                }
            }
        }
    }

    // Scenario fixtures

    type Script = dyn Fn(&str) -> RawOutcome + Send + Sync;

    /// Probe module answering from a script and recording every call
    struct MockModule {
        script: Box<Script>,
        calls: Mutex<Vec<(String, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
    }

    impl MockModule {
        fn new(script: impl Fn(&str) -> RawOutcome + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                latency: Duration::ZERO,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }

        async fn answer(&self, key: String) -> RawOutcome {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.calls.lock().unwrap().push((key.clone(), Instant::now()));

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.script)(&key)
        }
    }

    #[async_trait]
    impl Enumerator for MockModule {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn probe(&self, identity: &Identity, _transport: &Transport) -> RawOutcome {
            self.answer(identity.to_string()).await
        }
    }

    #[async_trait]
    impl Sprayer for MockModule {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn probe(&self, credential: &Credential, _transport: &Transport) -> RawOutcome {
            self.answer(credential.to_string()).await
        }
    }

    fn scheduler(rate: usize, policy: LockoutPolicy, safe: u32, wait: bool) -> Scheduler {
        let rotator = ProxyRotator::new(&ProxyConfig::Direct, Duration::from_secs(5)).unwrap();
        Scheduler::new(
            SchedulerSettings {
                rate,
                timeout: Duration::from_secs(5),
                throttle: ThrottleController::disabled(),
                retry: RetryPolicy::none(),
                wait_for_lockout_reset: wait,
            },
            policy,
            safe,
            Arc::new(rotator),
        )
    }

    fn ids(names: &[&str]) -> Vec<Identity> {
        names.iter().map(|name| Identity::new(*name)).collect()
    }

    fn pair(user: &str, password: &str) -> Credential {
        Credential::new(Identity::new(user), password)
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_alice_exists_bob_does_not() {
        let module = Arc::new(MockModule::new(|key| {
            if key.starts_with("alice") {
                RawOutcome::AuthFailure
            } else {
                RawOutcome::UserNotFound
            }
        }));
        let scheduler = scheduler(10, LockoutPolicy::default(), 10, true);
        let sink = ResultsSink::new();

        let outcome = scheduler
            .enumerate(module, ids(&["alice@corp.com", "bob@corp.com"]), &sink)
            .await;

        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(outcome.snapshot.existing, vec!["alice@corp.com"]);
        assert_eq!(outcome.snapshot.nonexisting, vec!["bob@corp.com"]);
        assert_eq!(outcome.snapshot.tested.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paired_second_attempt_waits_for_next_window() {
        let module = Arc::new(MockModule::new(|_| RawOutcome::AuthFailure));
        let scheduler = scheduler(10, LockoutPolicy::from_minutes(1, 15.0), 10, true);
        let sink = ResultsSink::new();

        let outcome = scheduler
            .spray(
                module.clone(),
                vec![pair("alice@corp.com", "Winter2024"), pair("alice@corp.com", "Spring2024")],
                &sink,
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(outcome.snapshot.invalid.len(), 2);

        let calls = module.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "alice@corp.com:Winter2024");
        assert_eq!(calls[1].0, "alice@corp.com:Spring2024");
        assert!(calls[1].1.duration_since(calls[0].1) >= Duration::from_secs(15 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooling_without_wait_reports_deadlock() {
        let module = Arc::new(MockModule::new(|_| RawOutcome::AuthFailure));
        let scheduler = scheduler(10, LockoutPolicy::from_minutes(1, 15.0), 10, false);
        let sink = ResultsSink::new();

        let outcome = scheduler
            .spray(
                module.clone(),
                vec![pair("alice@corp.com", "Winter2024"), pair("alice@corp.com", "Spring2024")],
                &sink,
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Deadlocked { remaining: 1 });
        assert_eq!(outcome.snapshot.invalid, vec!["alice@corp.com:Winter2024"]);
        assert_eq!(module.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_trips_on_concurrent_lockouts_with_safe_one() {
        let module = Arc::new(
            MockModule::new(|_| RawOutcome::AccountLocked).with_latency(Duration::from_millis(50)),
        );
        let scheduler = scheduler(5, LockoutPolicy::from_minutes(5, 15.0), 1, true);
        let sink = ResultsSink::new();

        let identities = ids(&["a@corp.com", "b@corp.com", "c@corp.com", "d@corp.com", "e@corp.com"]);
        let passwords = vec!["Winter2024".to_string(), "Spring2024".to_string()];
        let credentials = cross_product(&identities, &passwords);

        let outcome = scheduler.spray(module.clone(), credentials, &sink).await;

        assert_eq!(outcome.status, RunStatus::BreakerTripped);
        assert_eq!(outcome.passes, 1);
        // The whole first pass was in flight and finished
        assert_eq!(module.calls().len(), 5);
        assert_eq!(outcome.snapshot.locked_out.len(), 5);
        assert!(module.calls().iter().all(|(key, _)| key.ends_with(":Winter2024")));
        assert!(scheduler.counters().breaker_tripped());
        assert_eq!(scheduler.counters().lockouts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_rate() {
        let module = Arc::new(
            MockModule::new(|_| RawOutcome::UserNotFound).with_latency(Duration::from_millis(100)),
        );
        let scheduler = scheduler(3, LockoutPolicy::default(), 10, true);
        let sink = ResultsSink::new();

        let identities: Vec<Identity> = (0..20)
            .map(|i| Identity::new(format!("user{}@corp.com", i)))
            .collect();
        let outcome = scheduler.enumerate(module.clone(), identities, &sink).await;

        assert_eq!(outcome.snapshot.nonexisting.len(), 20);
        // One pass; the rate bounds concurrency inside it
        assert_eq!(outcome.passes, 1);
        let max = module.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "observed {} concurrent probes", max);
        assert_eq!(max, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_attempts_after_locked_out() {
        let module = Arc::new(MockModule::new(|key| {
            if key.starts_with("alice") {
                RawOutcome::AccountLocked
            } else {
                RawOutcome::AuthFailure
            }
        }));
        let scheduler = scheduler(1, LockoutPolicy::from_minutes(3, 15.0), 10, true);
        let sink = ResultsSink::new();

        let identities = ids(&["alice@corp.com", "bob@corp.com"]);
        let passwords: Vec<String> = ["p1", "p2", "p3"].iter().map(|p| p.to_string()).collect();
        let credentials = cross_product(&identities, &passwords);

        let outcome = scheduler.spray(module.clone(), credentials, &sink).await;

        let alice_calls = module
            .calls()
            .iter()
            .filter(|(key, _)| key.starts_with("alice"))
            .count();
        assert_eq!(alice_calls, 1);
        assert_eq!(outcome.snapshot.locked_out, vec!["alice@corp.com"]);
        assert_eq!(outcome.snapshot.invalid.len(), 3);
        assert_eq!(outcome.status, RunStatus::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_credential_stops_spraying_that_identity() {
        let module = Arc::new(MockModule::new(|key| {
            if key == "alice@corp.com:p1" {
                RawOutcome::Success(Some("MFA required".into()))
            } else {
                RawOutcome::AuthFailure
            }
        }));
        let scheduler = scheduler(1, LockoutPolicy::from_minutes(5, 15.0), 10, true);
        let sink = ResultsSink::new();

        let identities = ids(&["alice@corp.com", "bob@corp.com"]);
        let passwords: Vec<String> = ["p1", "p2"].iter().map(|p| p.to_string()).collect();
        let credentials = cross_product(&identities, &passwords);

        let outcome = scheduler.spray(module.clone(), credentials, &sink).await;

        assert_eq!(outcome.snapshot.valid, vec!["alice@corp.com:p1"]);
        assert_eq!(
            outcome.snapshot.notes,
            vec![("alice@corp.com:p1".to_string(), "MFA required".to_string())]
        );
        assert!(!module
            .calls()
            .iter()
            .any(|(key, _)| key == "alice@corp.com:p2"));
        assert_eq!(outcome.snapshot.invalid, vec!["bob@corp.com:p1", "bob@corp.com:p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_is_idempotent() {
        let script = |key: &str| {
            if key.contains("admin") {
                RawOutcome::Success(None)
            } else {
                RawOutcome::UserNotFound
            }
        };
        let identities = ids(&["admin@corp.com", "ghost@corp.com", "sysadmin@corp.com"]);

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            let scheduler = scheduler(2, LockoutPolicy::default(), 10, true);
            let sink = ResultsSink::new();
            let outcome = scheduler
                .enumerate(Arc::new(MockModule::new(script)), identities.clone(), &sink)
                .await;
            snapshots.push(outcome.snapshot);
        }

        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[0].existing, vec!["admin@corp.com", "sysadmin@corp.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_paces_passes_not_requests() {
        let throttled_once = AtomicBool::new(false);
        let module = Arc::new(MockModule::new(move |key| {
            if key.starts_with("a@") && !throttled_once.swap(true, Ordering::SeqCst) {
                RawOutcome::Throttled
            } else {
                RawOutcome::UserNotFound
            }
        }));
        let rotator = ProxyRotator::new(&ProxyConfig::Direct, Duration::from_secs(5)).unwrap();
        let scheduler = Scheduler::new(
            SchedulerSettings {
                rate: 2,
                timeout: Duration::from_secs(5),
                throttle: ThrottleController::new(10, 0),
                retry: RetryPolicy {
                    max_throttle_requeues: 1,
                    ..RetryPolicy::none()
                },
                wait_for_lockout_reset: true,
            },
            LockoutPolicy::default(),
            10,
            Arc::new(rotator),
        );
        let sink = ResultsSink::new();

        let identities = ids(&[
            "a@corp.com",
            "b@corp.com",
            "c@corp.com",
            "d@corp.com",
            "e@corp.com",
            "f@corp.com",
        ]);
        let outcome = scheduler.enumerate(module.clone(), identities, &sink).await;

        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.snapshot.nonexisting.len(), 6);

        let calls = module.calls();
        assert_eq!(calls.len(), 7);
        let first = calls[0].1;
        // The first pass goes out without any inter-request delay
        assert!(calls[..6]
            .iter()
            .all(|(_, at)| at.duration_since(first) < Duration::from_secs(10)));
        assert_eq!(calls[6].0, "a@corp.com");
        assert!(calls[6].1.duration_since(first) >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_module_panic_aborts_phase_and_keeps_results() {
        let module = Arc::new(MockModule::new(|key| {
            if key.starts_with("bob") {
                panic!("malformed provider response");
            }
            RawOutcome::AuthFailure
        }));
        let scheduler = scheduler(10, LockoutPolicy::default(), 10, true);
        let sink = ResultsSink::new();

        let outcome = scheduler
            .enumerate(module, ids(&["alice@corp.com", "bob@corp.com"]), &sink)
            .await;

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.passes, 1);
        let error = outcome.error.expect("abort reason recorded");
        assert!(error.contains("Module failure in mock"), "{}", error);
        assert_eq!(outcome.snapshot.existing, vec!["alice@corp.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_waiting_for_lockout_window() {
        let module = Arc::new(MockModule::new(|_| RawOutcome::AuthFailure));
        let scheduler = scheduler(10, LockoutPolicy::from_minutes(1, 15.0), 10, true);
        let sink = ResultsSink::new();
        let started = Instant::now();

        let counters = scheduler.counters().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            counters.interrupt();
        });

        let outcome = scheduler
            .spray(
                module.clone(),
                vec![pair("alice@corp.com", "Winter2024"), pair("alice@corp.com", "Spring2024")],
                &sink,
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Interrupted);
        assert_eq!(outcome.snapshot.invalid, vec!["alice@corp.com:Winter2024"]);
        assert_eq!(module.calls().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(15 * 60));
    }
}
