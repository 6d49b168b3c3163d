//! Pass-based scheduler and bounded worker pool
//!
//! A work list is drained in passes. Each pass takes every task the lockout
//! guard lets through at that moment, in work-list order, and runs them with
//! at most `rate` in flight. Every verdict is recorded before the next pass
//! starts. Passes are paced by the throttle controller and stop early once
//! the lockout breaker trips or the run is interrupted.

use crate::classifier::classify;
use crate::counters::RunCounters;
use crate::error::{RetryPolicy, SprayError, SprayResult};
use crate::lockout::{Eligibility, LockoutGuard};
use crate::proxy::{ProxyRotator, Transport};
use crate::sink::{ResultsSink, ResultsSnapshot, Subject};
use crate::throttle::ThrottleController;
use crate::traits::{Enumerator, Sprayer};
use crate::types::{Credential, Identity, LockoutPolicy, ModuleFamily, RawOutcome, Verdict};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a phase stopped draining its work list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task received a final verdict or was dropped
    Exhausted,
    /// Too many lockouts; remaining work was abandoned
    BreakerTripped,
    /// Remaining work can never become eligible
    Deadlocked { remaining: usize },
    /// Stopped on request after in-flight probes finished
    Interrupted,
    /// A module failed; verdicts gathered before the failure are kept
    Aborted,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Exhausted)
    }

    /// Deadlock expressed as an error, for callers that treat it as one
    pub fn as_error(&self) -> Option<SprayError> {
        match self {
            RunStatus::Deadlocked { remaining } => Some(SprayError::SchedulingDeadlock {
                remaining: *remaining,
            }),
            _ => None,
        }
    }

    /// Rank used to pick the status of a multi-phase run
    pub fn precedence(&self) -> u8 {
        match self {
            RunStatus::Exhausted => 0,
            RunStatus::Deadlocked { .. } => 1,
            RunStatus::BreakerTripped => 2,
            RunStatus::Interrupted => 3,
            RunStatus::Aborted => 4,
        }
    }
}

/// Result of draining one work list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub family: ModuleFamily,
    pub module: String,
    pub status: RunStatus,
    pub passes: u32,
    pub snapshot: ResultsSnapshot,
    /// Why the phase aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Knobs that shape scheduling, independent of what is probed
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub rate: usize,
    pub timeout: Duration,
    pub throttle: ThrottleController,
    pub retry: RetryPolicy,
    pub wait_for_lockout_reset: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            rate: 10,
            timeout: Duration::from_secs(25),
            throttle: ThrottleController::disabled(),
            retry: RetryPolicy::default(),
            wait_for_lockout_reset: true,
        }
    }
}

/// Module a phase dispatches to
#[derive(Clone)]
enum Probe {
    Enumerate(Arc<dyn Enumerator>),
    Spray(Arc<dyn Sprayer>),
}

impl Probe {
    fn family(&self) -> ModuleFamily {
        match self {
            Probe::Enumerate(_) => ModuleFamily::Enumerate,
            Probe::Spray(_) => ModuleFamily::Spray,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Probe::Enumerate(module) => module.name(),
            Probe::Spray(module) => module.name(),
        }
    }

    async fn call(&self, subject: &Subject, transport: &Transport) -> RawOutcome {
        match (self, subject) {
            (Probe::Enumerate(module), subject) => module.probe(subject.identity(), transport).await,
            (Probe::Spray(module), Subject::Credential(credential)) => {
                module.probe(credential, transport).await
            }
            (Probe::Spray(module), Subject::Identity(identity)) => RawOutcome::Unrecognized(
                format!("{} cannot spray {} without a password", module.name(), identity),
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct Task {
    subject: Subject,
    requeues: u32,
}

impl Task {
    fn new(subject: Subject) -> Self {
        Self {
            subject,
            requeues: 0,
        }
    }

    fn identity(&self) -> &Identity {
        self.subject.identity()
    }
}

#[derive(Debug)]
struct TaskReport {
    task: Task,
    verdict: Verdict,
    requeue: bool,
}

#[derive(Debug, Default)]
struct PassReport {
    completed: Vec<TaskReport>,
    undispatched: Vec<Task>,
}

/// Shared state handed to every worker of a phase
#[derive(Clone)]
struct WorkerContext {
    probe: Probe,
    rotator: Arc<ProxyRotator>,
    guard: Arc<LockoutGuard>,
    counters: Arc<RunCounters>,
    sink: ResultsSink,
    retry: RetryPolicy,
    timeout: Duration,
    /// Identities with a valid credential; never sprayed again
    solved: Arc<DashSet<Identity>>,
}

/// Drains enumeration and spray work lists against one lockout guard
pub struct Scheduler {
    settings: SchedulerSettings,
    rotator: Arc<ProxyRotator>,
    guard: Arc<LockoutGuard>,
    counters: Arc<RunCounters>,
}

impl Scheduler {
    /// Create a scheduler with fresh run counters and lockout state
    pub fn new(
        settings: SchedulerSettings,
        policy: LockoutPolicy,
        safe_threshold: u32,
        rotator: Arc<ProxyRotator>,
    ) -> Self {
        Self::with_counters(
            settings,
            policy,
            Arc::new(RunCounters::new(safe_threshold)),
            rotator,
        )
    }

    /// Create a scheduler reporting into existing run counters
    pub fn with_counters(
        mut settings: SchedulerSettings,
        policy: LockoutPolicy,
        counters: Arc<RunCounters>,
        rotator: Arc<ProxyRotator>,
    ) -> Self {
        if settings.rate == 0 {
            warn!("Scheduler rate must be at least 1; using 1");
            settings.rate = 1;
        }
        let guard = Arc::new(LockoutGuard::new(policy, counters.clone()));
        Self {
            settings,
            rotator,
            guard,
            counters,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    pub fn guard(&self) -> &Arc<LockoutGuard> {
        &self.guard
    }

    /// Classify every identity as existing or not
    pub async fn enumerate(
        &self,
        module: Arc<dyn Enumerator>,
        identities: Vec<Identity>,
        sink: &ResultsSink,
    ) -> PhaseOutcome {
        let work = identities.into_iter().map(Subject::Identity).collect();
        self.drain(Probe::Enumerate(module), work, sink).await
    }

    /// Attempt every credential within the lockout policy
    pub async fn spray(
        &self,
        module: Arc<dyn Sprayer>,
        credentials: Vec<Credential>,
        sink: &ResultsSink,
    ) -> PhaseOutcome {
        let work = credentials.into_iter().map(Subject::Credential).collect();
        self.drain(Probe::Spray(module), work, sink).await
    }

    async fn drain(&self, probe: Probe, work: Vec<Subject>, sink: &ResultsSink) -> PhaseOutcome {
        let family = probe.family();
        let mut pending: VecDeque<Task> = work.into_iter().map(Task::new).collect();
        let mut passes = 0u32;
        let mut throttle_streak = 0u32;
        let mut failure: Option<SprayError> = None;

        info!(
            "Starting {} phase with module '{}': {} task(s), rate {}",
            family,
            probe.name(),
            pending.len(),
            self.settings.rate
        );

        let context = WorkerContext {
            probe: probe.clone(),
            rotator: self.rotator.clone(),
            guard: self.guard.clone(),
            counters: self.counters.clone(),
            sink: sink.clone(),
            retry: self.settings.retry.clone(),
            timeout: self.settings.timeout,
            solved: Arc::new(DashSet::new()),
        };

        let status = loop {
            if let Some(status) = self.stop_status() {
                break status;
            }

            let now = Instant::now();
            let pass = self.select(family, &mut pending, &context.solved, now);

            if pass.is_empty() {
                if pending.is_empty() {
                    break RunStatus::Exhausted;
                }
                match self.guard.next_reset(pending.iter().map(Task::identity), now) {
                    Some(at) if self.settings.wait_for_lockout_reset => {
                        info!(
                            "{} task(s) cooling; waiting {:.0}s for the next lockout window",
                            pending.len(),
                            at.saturating_duration_since(now).as_secs_f64()
                        );
                        tokio::select! {
                            _ = tokio::time::sleep_until(at) => {}
                            _ = self.counters.stopped() => {}
                        }
                        continue;
                    }
                    _ => {
                        break RunStatus::Deadlocked {
                            remaining: pending.len(),
                        }
                    }
                }
            }

            passes += 1;
            debug!(
                "Pass {}: {} eligible task(s), {} deferred",
                passes,
                pass.len(),
                pending.len()
            );
            let report = match self.run_pass(&context, pass).await {
                Ok(report) => report,
                Err(e) => {
                    error!("{} phase aborted: {}", family, e);
                    failure = Some(e);
                    break RunStatus::Aborted;
                }
            };

            let mut saw_throttle = false;
            for completed in report.completed {
                if completed.verdict == Verdict::Throttled {
                    saw_throttle = true;
                }
                if completed.requeue {
                    let mut task = completed.task;
                    task.requeues += 1;
                    pending.push_back(task);
                }
            }
            for task in report.undispatched.into_iter().rev() {
                pending.push_front(task);
            }

            self.counters.check_breaker();
            if let Some(status) = self.stop_status() {
                break status;
            }
            if pending.is_empty() {
                break RunStatus::Exhausted;
            }

            throttle_streak = if saw_throttle { throttle_streak + 1 } else { 0 };
            tokio::select! {
                _ = self.settings.throttle.pause(self.settings.retry.throttle_delay(throttle_streak)) => {}
                _ = self.counters.stopped() => {}
            }
        };

        match status {
            RunStatus::Exhausted => {
                info!("{} phase finished after {} pass(es)", family, passes)
            }
            RunStatus::BreakerTripped => error!(
                "Lockout threshold reached ({} lockouts); {} phase halted with {} task(s) left",
                self.counters.lockouts(),
                family,
                pending.len()
            ),
            RunStatus::Deadlocked { .. } => {
                if let Some(e) = status.as_error() {
                    warn!("{} phase stopped: {}", family, e);
                }
            }
            RunStatus::Interrupted => warn!(
                "{} phase interrupted after {} pass(es) with {} task(s) left",
                family,
                passes,
                pending.len()
            ),
            RunStatus::Aborted => {}
        }

        PhaseOutcome {
            family,
            module: probe.name().to_string(),
            status,
            passes,
            snapshot: sink.snapshot().await,
            error: failure.map(|e| e.to_string()),
        }
    }

    fn stop_status(&self) -> Option<RunStatus> {
        if self.counters.breaker_tripped() {
            Some(RunStatus::BreakerTripped)
        } else if self.counters.interrupted() {
            Some(RunStatus::Interrupted)
        } else {
            None
        }
    }

    /// Take every task that may run now off the work list, in order.
    ///
    /// Spray tasks reserve a lockout attempt here. Tasks for locked or
    /// solved identities are dropped; cooling tasks keep their place.
    fn select(
        &self,
        family: ModuleFamily,
        pending: &mut VecDeque<Task>,
        solved: &DashSet<Identity>,
        now: Instant,
    ) -> Vec<Task> {
        let mut pass = Vec::new();
        let mut kept = VecDeque::with_capacity(pending.len());

        while let Some(task) = pending.pop_front() {
            if self.guard.is_locked(task.identity()) {
                debug!("Dropping {}: identity is locked out", task.subject.key());
                continue;
            }

            if family == ModuleFamily::Enumerate {
                pass.push(task);
                continue;
            }

            if solved.contains(task.identity()) {
                debug!("Dropping {}: valid credential already found", task.subject.key());
                continue;
            }

            match self.guard.try_reserve(task.identity(), now) {
                Eligibility::Eligible => pass.push(task),
                Eligibility::Cooling { .. } | Eligibility::Blocked => kept.push_back(task),
                Eligibility::Removed => {}
            }
        }

        *pending = kept;
        pass
    }

    /// Run one pass with at most `rate` probes in flight.
    ///
    /// The stop flags are checked before every dispatch, so a breaker trip
    /// leaves the rest of the pass undispatched.
    async fn run_pass(&self, context: &WorkerContext, pass: Vec<Task>) -> SprayResult<PassReport> {
        let family = context.probe.family();
        let semaphore = Arc::new(Semaphore::new(self.settings.rate));
        let mut workers = JoinSet::new();
        let mut report = PassReport::default();
        let mut queue = pass.into_iter();

        while let Some(task) = queue.next() {
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        if let Err(e) = Self::reap(context, joined, &mut report) {
                            workers.abort_all();
                            return Err(e);
                        }
                    }
                    permit = semaphore.clone().acquire_owned() => {
                        break permit
                            .map_err(|e| SprayError::module_failure("scheduler", e.to_string()))?;
                    }
                }
            };

            if self.counters.should_stop() {
                self.return_undispatched(family, task, &mut report);
                for task in queue.by_ref() {
                    self.return_undispatched(family, task, &mut report);
                }
                break;
            }

            if context.guard.is_locked(task.identity()) || context.solved.contains(task.identity()) {
                debug!("Skipping {}: settled earlier in this pass", task.subject.key());
                if family == ModuleFamily::Spray {
                    self.guard.refund(task.identity());
                }
                continue;
            }

            let context = context.clone();
            workers.spawn(async move {
                let _permit = permit;
                context.execute(task).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = Self::reap(context, joined, &mut report) {
                workers.abort_all();
                return Err(e);
            }
        }

        Ok(report)
    }

    fn reap(
        context: &WorkerContext,
        joined: Result<TaskReport, JoinError>,
        report: &mut PassReport,
    ) -> SprayResult<()> {
        match joined {
            Ok(completed) => report.completed.push(completed),
            Err(e) if e.is_panic() => {
                return Err(SprayError::module_failure(
                    context.probe.name(),
                    format!("task panicked: {}", e),
                ))
            }
            Err(e) => warn!("Probe task cancelled: {}", e),
        }
        Ok(())
    }

    fn return_undispatched(&self, family: ModuleFamily, task: Task, report: &mut PassReport) {
        if family == ModuleFamily::Spray {
            self.guard.refund(task.identity());
        }
        report.undispatched.push(task);
    }
}

impl WorkerContext {
    async fn execute(&self, task: Task) -> TaskReport {
        let outcome = self.probe_with_retry(&task.subject).await;
        let family = self.probe.family();
        let mut verdict = classify(family, &outcome);
        let mut requeue = false;
        let detail = outcome.detail().map(str::to_string);

        if !verdict.is_final() {
            if family == ModuleFamily::Spray {
                self.guard.refund(task.identity());
            }
            if task.requeues < self.retry.max_throttle_requeues {
                debug!("Throttled on {}; requeued", task.subject.key());
                requeue = true;
            } else {
                let throttled = SprayError::Throttled {
                    details: format!("{} after {} requeue(s)", task.subject.key(), task.requeues),
                };
                warn!("{}; giving up", throttled);
                self.sink
                    .record(task.subject.clone(), Verdict::Throttled, None)
                    .await;
                verdict = Verdict::Indeterminate;
            }
        }

        match verdict {
            Verdict::Throttled => {}
            Verdict::LockedOut => {
                self.guard.record_lockout(task.identity());
            }
            Verdict::ValidCredential => {
                self.solved.insert(task.identity().clone());
                match &detail {
                    Some(note) => info!("[VALID] {} ({})", task.subject.key(), note),
                    None => info!("[VALID] {}", task.subject.key()),
                }
            }
            Verdict::Exists => info!("[VALID] {}", task.identity()),
            Verdict::Indeterminate => match &outcome {
                RawOutcome::Unrecognized(reason) => warn!(
                    "{}",
                    SprayError::protocol(self.probe.name(), format!("{}: {}", task.subject.key(), reason))
                ),
                RawOutcome::TransportError(reason) => {
                    warn!("Giving up on {}: {}", task.subject.key(), reason)
                }
                _ => {}
            },
            Verdict::NotExists | Verdict::InvalidCredential => {
                debug!("[{}] {}", verdict.label(), task.subject.key())
            }
        }

        let detail = if verdict == Verdict::ValidCredential { detail } else { None };
        self.sink.record(task.subject.clone(), verdict, detail).await;
        self.counters.check_breaker();

        TaskReport {
            task,
            verdict,
            requeue,
        }
    }

    /// One probe, retried on transport errors with backoff
    async fn probe_with_retry(&self, subject: &Subject) -> RawOutcome {
        let mut attempt = 0u32;
        loop {
            let transport = self.rotator.acquire();
            self.counters.record_request();

            let outcome = match tokio::time::timeout(self.timeout, self.probe.call(subject, &transport)).await {
                Ok(outcome) => outcome,
                Err(_) => RawOutcome::TransportError(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                )),
            };

            if outcome.is_transport_error() && attempt < self.retry.max_retries {
                let delay = self.retry.retry_delay(attempt);
                attempt += 1;
                debug!(
                    "Transport error on {} (retry {}/{} in {}ms): {}",
                    subject.key(),
                    attempt,
                    self.retry.max_retries,
                    delay.as_millis(),
                    outcome.detail().unwrap_or_default()
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return outcome;
        }
    }
}
