//! Built-in probe modules and the name registry
//!
//! Module names coming from configuration are resolved once, at run start,
//! into closed sets of tagged variants. An unknown name is a configuration
//! error, never a runtime dispatch failure.

pub mod aadsts;
pub mod activesync;
pub mod adfs;
pub mod autologon;
pub mod oauth2;
pub mod office;
pub mod onedrive;
pub mod realm;

use crate::error::{SprayError, SprayResult};
use crate::traits::{Enumerator, Sprayer, Validator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Host serving the token, realm and credential-type endpoints
pub const LOGIN_HOST: &str = "https://login.microsoftonline.com";

/// Inputs shared by module constructors
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    pub domain: String,
    pub adfs_url: Option<Url>,
}

impl ModuleContext {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            adfs_url: None,
        }
    }

    pub fn with_adfs_url(mut self, adfs_url: Option<Url>) -> Self {
        self.adfs_url = adfs_url;
        self
    }
}

/// Validation modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidateModule {
    GetUserRealm,
}

/// Enumeration modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumModule {
    OAuth2,
    Office,
    OneDrive,
    Autologon,
}

/// Password spraying modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SprayModule {
    OAuth2,
    Adfs,
    Autologon,
    ActiveSync,
}

impl ValidateModule {
    pub const ALL: &'static [ValidateModule] = &[ValidateModule::GetUserRealm];

    pub fn name(&self) -> &'static str {
        match self {
            ValidateModule::GetUserRealm => "getuserrealm",
        }
    }

    pub fn build(&self, _context: &ModuleContext) -> SprayResult<Arc<dyn Validator>> {
        match self {
            ValidateModule::GetUserRealm => Ok(Arc::new(realm::GetUserRealm)),
        }
    }
}

impl EnumModule {
    pub const ALL: &'static [EnumModule] = &[
        EnumModule::OAuth2,
        EnumModule::Office,
        EnumModule::OneDrive,
        EnumModule::Autologon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EnumModule::OAuth2 => "oauth2",
            EnumModule::Office => "office",
            EnumModule::OneDrive => "onedrive",
            EnumModule::Autologon => "autologon",
        }
    }

    pub fn build(&self, context: &ModuleContext) -> SprayResult<Arc<dyn Enumerator>> {
        match self {
            EnumModule::OAuth2 => Ok(Arc::new(oauth2::OAuth2)),
            EnumModule::Office => Ok(Arc::new(office::Office)),
            EnumModule::OneDrive => Ok(Arc::new(onedrive::OneDrive::for_domain(&context.domain)?)),
            EnumModule::Autologon => Ok(Arc::new(autologon::Autologon::new(&context.domain))),
        }
    }
}

impl SprayModule {
    pub const ALL: &'static [SprayModule] = &[
        SprayModule::OAuth2,
        SprayModule::Adfs,
        SprayModule::Autologon,
        SprayModule::ActiveSync,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SprayModule::OAuth2 => "oauth2",
            SprayModule::Adfs => "adfs",
            SprayModule::Autologon => "autologon",
            SprayModule::ActiveSync => "activesync",
        }
    }

    pub fn build(&self, context: &ModuleContext) -> SprayResult<Arc<dyn Sprayer>> {
        match self {
            SprayModule::OAuth2 => Ok(Arc::new(oauth2::OAuth2)),
            SprayModule::Adfs => {
                let auth_url = context.adfs_url.clone().ok_or_else(|| {
                    SprayError::configuration(
                        "spray_module",
                        "the adfs module requires an ADFS AuthURL",
                    )
                })?;
                Ok(Arc::new(adfs::Adfs::new(auth_url)))
            }
            SprayModule::Autologon => Ok(Arc::new(autologon::Autologon::new(&context.domain))),
            SprayModule::ActiveSync => Ok(Arc::new(activesync::ActiveSync)),
        }
    }
}

macro_rules! named_module {
    ($ty:ty, $component:literal) => {
        impl FromStr for $ty {
            type Err = SprayError;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                let wanted = name.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|module| module.name() == wanted)
                    .ok_or_else(|| {
                        let known: Vec<&str> = Self::ALL.iter().map(|m| m.name()).collect();
                        SprayError::configuration(
                            $component,
                            format!("unknown module '{}' (expected one of: {})", name, known.join(", ")),
                        )
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_module!(ValidateModule, "validate_module");
named_module!(EnumModule, "enum_module");
named_module!(SprayModule, "spray_module");

/// Map a transport failure into a raw outcome
pub(crate) fn transport_error(error: impl fmt::Display) -> crate::types::RawOutcome {
    crate::types::RawOutcome::TransportError(error.to_string())
}

/// Truncate a response body for log and detail messages
pub(crate) fn snippet(body: &str) -> String {
    const LIMIT: usize = 160;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
