//! Resolved run configuration

use crate::error::{RetryPolicy, SprayError, SprayResult};
use crate::modules::{EnumModule, ModuleContext, SprayModule, ValidateModule};
use crate::sources::{CredentialSource, ListSource};
use crate::throttle::ThrottleController;
use crate::types::{LockoutPolicy, ProxyConfig};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Upper bound of the `--sleep` range and of a randomized sleep
pub const MAX_SLEEP_SECONDS: i64 = 120;

/// Which phases a run performs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phases {
    pub validate: bool,
    pub enumerate: bool,
    pub spray: bool,
}

/// Everything a run needs, as handed over by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub domain: String,
    pub phases: Phases,
    pub validate_module: String,
    pub enum_module: String,
    pub spray_module: String,
    pub identities: Option<ListSource>,
    pub credentials: Option<CredentialSource>,
    pub lockout: LockoutPolicy,
    /// Worker pool width
    pub rate: usize,
    /// Seconds between passes; -1 picks a random value once
    pub sleep: i64,
    /// Percentage the sleep may be extended by
    pub jitter: u8,
    /// Lockouts tolerated before the breaker trips
    pub safe: u32,
    #[serde(with = "crate::types::duration_secs")]
    pub timeout: Duration,
    pub proxy: ProxyConfig,
    pub adfs_url: Option<Url>,
    pub retry: RetryPolicy,
    /// Sleep until the next lockout window instead of reporting a deadlock
    pub wait_for_lockout_reset: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            phases: Phases::default(),
            validate_module: "getuserrealm".to_string(),
            enum_module: "oauth2".to_string(),
            spray_module: "oauth2".to_string(),
            identities: None,
            credentials: None,
            lockout: LockoutPolicy::default(),
            rate: 10,
            sleep: 0,
            jitter: 0,
            safe: 10,
            timeout: Duration::from_secs(25),
            proxy: ProxyConfig::Direct,
            adfs_url: None,
            retry: RetryPolicy::default(),
            wait_for_lockout_reset: true,
        }
    }
}

/// Module selection after name resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSelection {
    pub validate: ValidateModule,
    pub enumerate: EnumModule,
    pub spray: SprayModule,
}

impl RunConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Reject invalid or conflicting settings before anything is scheduled
    pub fn validate(&self) -> SprayResult<()> {
        let domain = self.domain.trim();
        if domain.is_empty() || domain.contains(char::is_whitespace) || !domain.contains('.') {
            return Err(SprayError::configuration(
                "domain",
                format!("'{}' is not a valid domain", self.domain),
            ));
        }

        if !(self.phases.validate || self.phases.enumerate || self.phases.spray) {
            return Err(SprayError::configuration(
                "phases",
                "select at least one of validate, enum or spray",
            ));
        }

        if self.phases.enumerate && self.identities.is_none() {
            return Err(SprayError::configuration(
                "username",
                "a username list or username file is required for enumeration",
            ));
        }

        if self.phases.spray {
            match &self.credentials {
                None => {
                    return Err(SprayError::configuration(
                        "password",
                        "spraying requires passwords (with usernames) or a paired credential file",
                    ))
                }
                Some(CredentialSource::Passwords(_)) if self.identities.is_none() => {
                    return Err(SprayError::configuration(
                        "username",
                        "spraying with a password list requires usernames",
                    ))
                }
                _ => {}
            }
        }

        if self.rate == 0 {
            return Err(SprayError::configuration("rate", "must be at least 1"));
        }
        if self.lockout.max_attempts_per_window == 0 {
            return Err(SprayError::configuration("count", "must be at least 1"));
        }
        if self.lockout.window.is_zero() {
            return Err(SprayError::configuration("lockout", "reset time must be positive"));
        }
        if self.sleep < -1 || self.sleep > MAX_SLEEP_SECONDS {
            return Err(SprayError::configuration(
                "sleep",
                format!("must be -1 or between 0 and {}", MAX_SLEEP_SECONDS),
            ));
        }
        if self.jitter > 100 {
            return Err(SprayError::configuration("jitter", "must be between 0 and 100"));
        }
        if self.safe == 0 {
            return Err(SprayError::configuration("safe", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(SprayError::configuration("timeout", "must be positive"));
        }
        if let ProxyConfig::Rotating(gateways) = &self.proxy {
            if gateways.is_empty() {
                return Err(SprayError::configuration(
                    "proxy_url",
                    "at least one gateway URL is required",
                ));
            }
        }

        self.modules()?;
        Ok(())
    }

    /// Resolve module names, applying the ADFS override
    pub fn modules(&self) -> SprayResult<ModuleSelection> {
        let mut selection = ModuleSelection {
            validate: self.validate_module.parse()?,
            enumerate: self.enum_module.parse()?,
            spray: self.spray_module.parse()?,
        };

        if self.adfs_url.is_some() {
            selection.enumerate = EnumModule::OAuth2;
            selection.spray = SprayModule::Adfs;
        }

        Ok(selection)
    }

    pub fn module_context(&self) -> ModuleContext {
        ModuleContext::new(self.domain.trim()).with_adfs_url(self.adfs_url.clone())
    }

    /// Sleep seconds with the random setting resolved
    pub fn resolved_sleep(&self) -> u64 {
        if self.sleep == -1 {
            rand::thread_rng().gen_range(1..=MAX_SLEEP_SECONDS) as u64
        } else {
            self.sleep.max(0) as u64
        }
    }

    pub fn throttle(&self) -> ThrottleController {
        ThrottleController::new(self.resolved_sleep(), self.jitter)
    }
}
