//! Forms-based login against a federated tenant's ADFS server

use super::{snippet, transport_error};
use crate::proxy::Transport;
use crate::traits::Sprayer;
use crate::types::{Credential, RawOutcome};
use async_trait::async_trait;
use reqwest::Method;
use url::Url;

pub struct Adfs {
    auth_url: Url,
}

impl Adfs {
    pub fn new(auth_url: Url) -> Self {
        Self { auth_url }
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }
}

/// Map an ADFS form post response to a raw outcome.
///
/// A successful login redirects; a failed one re-renders the form.
pub fn interpret_response(status: u16, body: &str) -> RawOutcome {
    match status {
        302 => RawOutcome::Success(None),
        200 => {
            if body.contains("account is locked") || body.contains("has been locked") {
                RawOutcome::AccountLocked
            } else {
                RawOutcome::AuthFailure
            }
        }
        429 | 503 => RawOutcome::Throttled,
        other => RawOutcome::Unrecognized(format!("HTTP {}: {}", other, snippet(body))),
    }
}

#[async_trait]
impl Sprayer for Adfs {
    fn name(&self) -> &'static str {
        "adfs"
    }

    async fn probe(&self, credential: &Credential, transport: &Transport) -> RawOutcome {
        let builder = match transport.request(Method::POST, self.auth_url.as_str()) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };

        let form = [
            ("UserName", credential.identity.as_str()),
            ("Password", credential.password.as_str()),
            ("AuthMethod", "FormsAuthentication"),
        ];

        let response = match builder.form(&form).send().await {
            Ok(response) => response,
            Err(e) => return transport_error(e),
        };
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return transport_error(e),
        };
        interpret_response(status, &body)
    }
}
