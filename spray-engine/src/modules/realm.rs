//! Tenant validation through the user realm lookup

use super::{snippet, LOGIN_HOST};
use crate::error::{SprayError, SprayResult};
use crate::proxy::Transport;
use crate::traits::Validator;
use crate::types::TenantKind;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct RealmResponse {
    #[serde(rename = "NameSpaceType")]
    namespace_type: Option<String>,
    #[serde(rename = "AuthURL")]
    auth_url: Option<String>,
}

pub struct GetUserRealm;

/// Interpret a realm lookup body
pub fn interpret_response(status: u16, body: &str) -> SprayResult<TenantKind> {
    if status != 200 {
        return Err(SprayError::protocol(
            "getuserrealm",
            format!("HTTP {}: {}", status, snippet(body)),
        ));
    }

    let realm: RealmResponse = serde_json::from_str(body)
        .map_err(|e| SprayError::protocol("getuserrealm", format!("invalid JSON: {}", e)))?;

    let kind = match realm.namespace_type.as_deref() {
        Some("Managed") => TenantKind::Managed,
        Some("Federated") => TenantKind::Federated {
            auth_url: realm.auth_url.as_deref().and_then(|url| Url::parse(url).ok()),
        },
        _ => TenantKind::Unknown,
    };
    Ok(kind)
}

#[async_trait]
impl Validator for GetUserRealm {
    fn name(&self) -> &'static str {
        "getuserrealm"
    }

    async fn validate(&self, domain: &str, transport: &Transport) -> SprayResult<TenantKind> {
        let upstream = format!(
            "{}/getuserrealm.srf?login=user@{}&json=1",
            LOGIN_HOST, domain
        );
        let response = transport.request(Method::GET, &upstream)?.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("getuserrealm {} -> {}", domain, status);
        interpret_response(status, &body)
    }
}
