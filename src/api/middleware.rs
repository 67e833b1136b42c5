//! HTTP middleware for the hub
//!
//! Provides:
//! - API key authentication for management routes
//! - Request body size limits
//! - Security headers
//! - Request logging with sanitization
//! - Client IP extraction behind reverse proxies

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Security configuration for middleware
#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    /// Enable API key authentication
    pub enable_auth: bool,
    /// Valid API keys
    pub api_keys: Vec<String>,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Enable request logging
    pub log_requests: bool,
    /// Sanitize sensitive data in logs
    pub sanitize_logs: bool,
    /// Path prefixes that require an API key; everything else is public
    pub protected_paths: Vec<String>,
    /// Honour `X-Forwarded-For` / `X-Real-IP` (only behind a trusted proxy)
    pub trust_proxy_headers: bool,
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: Vec::new(),
            max_request_size: 64 * 1024,
            log_requests: true,
            sanitize_logs: true,
            protected_paths: vec!["/targets".to_string(), "/coordinator".to_string()],
            trust_proxy_headers: false,
        }
    }
}

/// Shared state for security middleware
#[derive(Clone)]
pub struct SecurityState {
    pub config: SecurityMiddlewareConfig,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        Self { config }
    }
}

/// Client IP from proxy headers when they are trusted, otherwise the socket peer
pub fn client_ip(
    headers: &HeaderMap,
    addr: Option<&SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    let peer = addr.map(|a| a.ip());
    if !trust_proxy_headers {
        return peer;
    }

    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    let real_ip = || -> Option<IpAddr> {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    };

    forwarded.or_else(real_ip).or(peer)
}

/// Sanitize value for logging (mask sensitive data)
pub fn sanitize_for_log(value: &str) -> String {
    if value.len() <= 8 {
        return "*".repeat(value.len());
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

fn is_protected_path(path: &str, protected_paths: &[String]) -> bool {
    protected_paths.iter().any(|p| path.starts_with(p))
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();

    if !state.config.enable_auth || !is_protected_path(path, &state.config.protected_paths) {
        return Ok(next.run(request).await);
    }

    let api_key = headers
        .get("x-api-key")
        .or_else(|| headers.get("authorization"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").to_string());

    match api_key {
        Some(key) if state.config.api_keys.contains(&key) => {
            debug!("API key authenticated for path: {}", path);
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!("Invalid API key attempt for path: {}", path);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing API key for path: {}", path);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // Balances and challenges must never be cached
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.remove("Server");

    response
}

/// Request logging middleware with sanitization
pub async fn logging_middleware(
    State(state): State<SecurityState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.log_requests {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(&headers, Some(&addr), state.config.trust_proxy_headers)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let log_ip = if state.config.sanitize_logs {
        sanitize_for_log(&client)
    } else {
        client
    };

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Client error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Request completed"
        );
    }

    response
}

/// Request body size validation middleware
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let declared = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared
        && length > state.config.max_request_size
    {
        warn!(
            "Request body too large: {} bytes (max: {})",
            length, state.config.max_request_size
        );
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    Ok(next.run(request).await)
}
