//! Enumeration through the login page's credential-type lookup

use super::{snippet, transport_error, LOGIN_HOST};
use crate::proxy::Transport;
use crate::traits::Enumerator;
use crate::types::{Identity, RawOutcome};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

const CREDENTIAL_TYPE_PATH: &str = "/common/GetCredentialType";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialTypeResponse {
    if_exists_result: Option<i64>,
    throttle_status: Option<i64>,
}

pub struct Office;

/// Map a credential-type response to a raw outcome
pub fn interpret_response(status: u16, body: &str) -> RawOutcome {
    if status == 429 {
        return RawOutcome::Throttled;
    }
    if status != 200 {
        return RawOutcome::Unrecognized(format!("HTTP {}: {}", status, snippet(body)));
    }

    let parsed: CredentialTypeResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return RawOutcome::Unrecognized(format!("invalid JSON: {}", e)),
    };

    if parsed.throttle_status == Some(1) {
        return RawOutcome::Throttled;
    }

    match parsed.if_exists_result {
        Some(0) | Some(5) | Some(6) => RawOutcome::Success(None),
        Some(1) => RawOutcome::UserNotFound,
        Some(other) => RawOutcome::Unrecognized(format!("IfExistsResult {}", other)),
        None => RawOutcome::Unrecognized("missing IfExistsResult".to_string()),
    }
}

#[async_trait]
impl Enumerator for Office {
    fn name(&self) -> &'static str {
        "office"
    }

    async fn probe(&self, identity: &Identity, transport: &Transport) -> RawOutcome {
        let upstream = format!("{}{}", LOGIN_HOST, CREDENTIAL_TYPE_PATH);
        let builder = match transport.request(Method::POST, &upstream) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };

        let payload = json!({
            "username": identity.as_str(),
            "isOtherIdpSupported": true,
            "checkPhones": false,
            "isRemoteNGCSupported": true,
            "isCookieBannerShown": false,
            "isFidoSupported": true,
            "forceotclogin": false,
            "isExternalFederationDisallowed": false,
            "isRemoteConnectSupported": false,
            "federationFlags": 0,
            "isSignup": false,
            "isAccessPassSupported": true,
        });

        let response = match builder.json(&payload).send().await {
            Ok(response) => response,
            Err(e) => return transport_error(e),
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => interpret_response(status, &body),
            Err(e) => transport_error(e),
        }
    }
}
