//! Transport selection for outbound probes
//!
//! The rotator owns the HTTP client for a run and hands out a [`Transport`]
//! per probe. A rotating configuration rewrites every upstream URL onto one
//! of the gateway base URLs (round-robin) and stamps a random client address
//! header that the gateway forwards upstream.

use crate::error::{SprayError, SprayResult};
use crate::types::ProxyConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{Client, Method, RequestBuilder};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Header consumed by API gateways to set `X-Forwarded-For` upstream
pub const FORWARDED_FOR_HEADER: &str = "X-My-X-Forwarded-For";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

/// Endpoint handed to a single probe
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    gateway: Option<Url>,
    forwarded_for: Option<IpAddr>,
}

impl Transport {
    /// Direct transport over the given client
    pub fn direct(client: Client) -> Self {
        Self {
            client,
            gateway: None,
            forwarded_for: None,
        }
    }

    /// Transport that rewrites upstream URLs onto `gateway`
    pub fn via_gateway(client: Client, gateway: Url, forwarded_for: Option<IpAddr>) -> Self {
        Self {
            client,
            gateway: Some(gateway),
            forwarded_for,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn gateway(&self) -> Option<&Url> {
        self.gateway.as_ref()
    }

    /// Resolve the effective URL for an upstream provider URL
    pub fn endpoint(&self, upstream: &str) -> SprayResult<Url> {
        let upstream = Url::parse(upstream)
            .map_err(|e| SprayError::configuration("endpoint", format!("{}: {}", upstream, e)))?;

        let Some(gateway) = &self.gateway else {
            return Ok(upstream);
        };

        let mut url = gateway.clone();
        let base_path = gateway.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base_path, upstream.path()));
        url.set_query(upstream.query());
        Ok(url)
    }

    /// Start a request with the per-request headers applied
    pub fn request(&self, method: Method, upstream: &str) -> SprayResult<RequestBuilder> {
        let url = self.endpoint(upstream)?;
        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .header(reqwest::header::ACCEPT, "application/json, text/html, */*");

        if let Some(ip) = self.forwarded_for {
            builder = builder.header(FORWARDED_FOR_HEADER, ip.to_string());
        }

        Ok(builder)
    }
}

/// Supplies transports according to the run's proxy configuration
#[derive(Debug)]
pub struct ProxyRotator {
    config: ProxyConfig,
    client: Client,
    next: AtomicUsize,
}

impl ProxyRotator {
    /// Build the run's HTTP client for `config`
    pub fn new(config: &ProxyConfig, timeout: Duration) -> SprayResult<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none());

        match config {
            ProxyConfig::Direct => {}
            ProxyConfig::Fixed(proxy_url) => {
                let proxy = reqwest::Proxy::all(proxy_url.as_str())
                    .map_err(|e| SprayError::configuration("proxy", e.to_string()))?;
                // Intercepting proxies present their own certificates
                builder = builder.proxy(proxy).danger_accept_invalid_certs(true);
            }
            ProxyConfig::Rotating(gateways) => {
                if gateways.is_empty() {
                    return Err(SprayError::configuration(
                        "proxy",
                        "rotating proxy requires at least one gateway URL",
                    ));
                }
            }
        }

        let client = builder
            .build()
            .map_err(|e| SprayError::module_failure("transport", e.to_string()))?;

        Ok(Self::with_client(config.clone(), client))
    }

    /// Use a pre-built client
    pub fn with_client(config: ProxyConfig, client: Client) -> Self {
        Self {
            config,
            client,
            next: AtomicUsize::new(0),
        }
    }

    /// Select the transport for the next outbound probe
    pub fn acquire(&self) -> Transport {
        match &self.config {
            ProxyConfig::Direct | ProxyConfig::Fixed(_) => Transport::direct(self.client.clone()),
            ProxyConfig::Rotating(gateways) => {
                let index = self.next.fetch_add(1, Ordering::Relaxed) % gateways.len();
                let gateway = gateways[index].clone();
                let forwarded_for = random_client_address();
                debug!("Routing probe through gateway {} as {}", gateway, forwarded_for);
                Transport::via_gateway(self.client.clone(), gateway, Some(forwarded_for))
            }
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn random_client_address() -> IpAddr {
    let mut rng = rand::thread_rng();
    IpAddr::V4(Ipv4Addr::new(
        rng.gen_range(1..=223),
        rng.gen(),
        rng.gen(),
        rng.gen_range(1..=254),
    ))
}
