//! Basic-auth probe against the Exchange ActiveSync endpoint

use super::{snippet, transport_error};
use crate::proxy::Transport;
use crate::traits::Sprayer;
use crate::types::{Credential, RawOutcome};
use async_trait::async_trait;
use reqwest::Method;

const ACTIVESYNC_URL: &str = "https://outlook.office365.com/Microsoft-Server-ActiveSync";

pub struct ActiveSync;

/// Map an ActiveSync `OPTIONS` response to a raw outcome
pub fn interpret_status(status: u16, body: &str) -> RawOutcome {
    match status {
        200 => RawOutcome::Success(None),
        // Authenticated, but the mailbox or protocol is blocked
        403 => RawOutcome::Success(Some("ActiveSync access denied".to_string())),
        401 => RawOutcome::AuthFailure,
        404 => RawOutcome::UserNotFound,
        429 | 503 => RawOutcome::Throttled,
        456 => RawOutcome::Success(Some("MFA required".to_string())),
        other => RawOutcome::Unrecognized(format!("HTTP {}: {}", other, snippet(body))),
    }
}

#[async_trait]
impl Sprayer for ActiveSync {
    fn name(&self) -> &'static str {
        "activesync"
    }

    async fn probe(&self, credential: &Credential, transport: &Transport) -> RawOutcome {
        let builder = match transport.request(Method::OPTIONS, ACTIVESYNC_URL) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };

        let response = match builder
            .basic_auth(credential.identity.as_str(), Some(&credential.password))
            .header("MS-ASProtocolVersion", "14.0")
            .send()
            .await
        {
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
