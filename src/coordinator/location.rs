//! Validator location lookup from the peer IP address

use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

pub const LOCALHOST: &str = "localhost";
pub const UNKNOWN: &str = "unknown";

const DEFAULT_ENDPOINT: &str = "https://ipapi.co";

#[derive(Debug, Deserialize)]
struct GeoResponse {
    region: Option<String>,
    #[serde(default)]
    error: bool,
}

/// Resolves a peer IP to a human-readable region.
///
/// Never fails: loopback peers are `localhost`, and any lookup problem
/// (disabled, network, bad payload) yields `unknown`.
#[derive(Clone)]
pub struct LocationResolver {
    client: Option<Client>,
    endpoint: String,
}

impl LocationResolver {
    /// Resolver that performs HTTP lookups against ipapi.co
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, timeout_secs)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("uptime-hub/0.1 (location lookup)")
            .build();

        let client = match client {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Failed to build location lookup client, lookups disabled: {}", e);
                None
            }
        };

        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolver that never leaves the process
    pub fn disabled() -> Self {
        Self {
            client: None,
            endpoint: String::new(),
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> String {
        if is_loopback(ip) {
            return LOCALHOST.to_string();
        }

        let Some(client) = &self.client else {
            return UNKNOWN.to_string();
        };

        let url = format!("{}/{}/json/", self.endpoint, ip);
        let response = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(ip = %ip, status = %response.status(), "Location lookup rejected");
                return UNKNOWN.to_string();
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "Location lookup failed");
                return UNKNOWN.to_string();
            }
        };

        match response.json::<GeoResponse>().await {
            Ok(GeoResponse {
                region: Some(region),
                error: false,
            }) if !region.is_empty() => region,
            _ => UNKNOWN.to_string(),
        }
    }
}

/// Loopback, including IPv4-mapped IPv6 loopback (`::ffff:127.0.0.1`)
fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_is_localhost() {
        let resolver = LocationResolver::disabled();
        assert_eq!(resolver.resolve("127.0.0.1".parse().unwrap()).await, LOCALHOST);
        assert_eq!(resolver.resolve("::1".parse().unwrap()).await, LOCALHOST);
        assert_eq!(
            resolver.resolve("::ffff:127.0.0.1".parse().unwrap()).await,
            LOCALHOST
        );
    }

    #[tokio::test]
    async fn test_disabled_lookup_is_unknown() {
        let resolver = LocationResolver::disabled();
        assert_eq!(resolver.resolve("203.0.113.9".parse().unwrap()).await, UNKNOWN);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unknown() {
        let resolver = LocationResolver::with_endpoint("http://127.0.0.1:9", 1);
        assert_eq!(resolver.resolve("203.0.113.9".parse().unwrap()).await, UNKNOWN);
    }
}
