//! Enumeration through personal OneDrive site URLs
//!
//! A provisioned user has a `/personal/<upn>` site; requesting it answers
//! with an auth challenge or redirect instead of a 404.

use super::{snippet, transport_error};
use crate::error::{SprayError, SprayResult};
use crate::proxy::Transport;
use crate::traits::Enumerator;
use crate::types::{Identity, RawOutcome};
use async_trait::async_trait;
use reqwest::Method;

pub struct OneDrive {
    tenant: String,
}

impl OneDrive {
    /// Derive the SharePoint tenant name from the domain's first label
    pub fn for_domain(domain: &str) -> SprayResult<Self> {
        let tenant = domain
            .split('.')
            .next()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .ok_or_else(|| SprayError::configuration("domain", "cannot derive OneDrive tenant"))?;
        Ok(Self::new(tenant))
    }

    pub fn new(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_ascii_lowercase(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Personal site URL for `identity`
    pub fn site_url(&self, identity: &Identity) -> String {
        let upn = identity.as_str().replace(['.', '@'], "_");
        format!(
            "https://{}-my.sharepoint.com/personal/{}/_layouts/15/onedrive.aspx",
            self.tenant, upn
        )
    }
}

/// Map a personal-site response status to a raw outcome
pub fn interpret_status(status: u16, body: &str) -> RawOutcome {
    match status {
        200 | 301 | 302 | 401 | 403 => RawOutcome::Success(None),
        404 => RawOutcome::UserNotFound,
        429 | 503 => RawOutcome::Throttled,
        other => RawOutcome::Unrecognized(format!("HTTP {}: {}", other, snippet(body))),
    }
}

#[async_trait]
impl Enumerator for OneDrive {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    async fn probe(&self, identity: &Identity, transport: &Transport) -> RawOutcome {
        let builder = match transport.request(Method::GET, &self.site_url(identity)) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return transport_error(e),
        };
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return transport_error(e),
        };
        interpret_status(status, &body)
    }
}
