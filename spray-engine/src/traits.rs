//! Capability traits implemented by probe modules
//!
//! Each call performs exactly one network exchange. Retries, classification
//! and bookkeeping belong to the scheduler; a module only turns a response
//! into a [`RawOutcome`].

use crate::error::SprayResult;
use crate::proxy::Transport;
use crate::types::{Credential, Identity, RawOutcome, TenantKind};
use async_trait::async_trait;

/// Classifies the target tenant before any enumeration or spraying
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(&self, domain: &str, transport: &Transport) -> SprayResult<TenantKind>;
}

/// Reveals whether an identity exists without a valid password
#[async_trait]
pub trait Enumerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, identity: &Identity, transport: &Transport) -> RawOutcome;
}

/// Performs a real authentication attempt
#[async_trait]
pub trait Sprayer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, credential: &Credential, transport: &Transport) -> RawOutcome;
}
