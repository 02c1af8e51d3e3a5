//! Per-client rate limiting.
//!
//! Two backends behind one middleware: a process-local keyed limiter
//! (`governor`) and a shared fixed-window counter in Redis for multi-replica
//! deployments. The shared backend fails open on store outage — a Redis
//! incident must not turn into a site-wide 429.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderValue, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use redis::AsyncCommands;
use serde::Serialize;
use std::{net::IpAddr, net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};
use tracing::warn;

use crate::netutil::{any_contains, Cidr};
use crate::telemetry::metrics::record_rate_limit_fail_open;

pub type KeyedRateLimiter =
    RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub enabled: bool,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 120,
            window_secs: 60,
            enabled: true,
            burst_size: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_window: u32, window_secs: u64) -> Self {
        Self {
            requests_per_window,
            window_secs,
            enabled: true,
            burst_size: (requests_per_window / 2).max(1),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn create_limiter(&self) -> Option<Arc<KeyedRateLimiter>> {
        if !self.enabled {
            return None;
        }

        // Replenish interval: e.g. 120 req / 60s = 1 token every 500ms
        let replenish_interval_ns =
            (self.window_secs as u128 * 1_000_000_000) / self.requests_per_window.max(1) as u128;
        let replenish_interval = Duration::from_nanos(replenish_interval_ns as u64);

        let quota = Quota::with_period(replenish_interval)
            .expect("Replenish interval should be valid")
            .allow_burst(
                NonZeroU32::new(self.burst_size.max(1)).expect("Burst size should be non-zero"),
            );

        Some(Arc::new(RateLimiter::dashmap(quota)))
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    pub global_limiter: Option<Arc<KeyedRateLimiter>>,
    pub auth_limiter: Option<Arc<KeyedRateLimiter>>,
    pub global_config: RateLimitConfig,
    pub auth_config: RateLimitConfig,
    /// When set, the Redis-backed fixed window is consulted instead of the
    /// in-process limiter.
    pub shared_pool: Option<deadpool_redis::Pool>,
    pub trusted_proxies: Arc<Vec<Cidr>>,
}

impl RateLimitState {
    pub fn with_config(
        global_config: RateLimitConfig,
        auth_config: RateLimitConfig,
        shared_pool: Option<deadpool_redis::Pool>,
        trusted_proxy_cidrs: &[String],
    ) -> Self {
        Self {
            global_limiter: global_config.create_limiter(),
            auth_limiter: auth_config.create_limiter(),
            global_config,
            auth_config,
            shared_pool,
            trusted_proxies: Arc::new(Cidr::parse_list(trusted_proxy_cidrs)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            global_limiter: None,
            auth_limiter: None,
            global_config: RateLimitConfig::disabled(),
            auth_config: RateLimitConfig::disabled(),
            shared_pool: None,
            trusted_proxies: Arc::new(Vec::new()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    pub error: String,
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "type": "https://errors.maidflow.dev/rate-limited",
            "title": "Too many requests",
            "status": 429,
            "detail": self.error,
        })
        .to_string();

        let mut response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("Content-Type", "application/problem+json")
            .header("Retry-After", self.retry_after_secs.to_string())
            .body(Body::from(body))
            .unwrap();

        if let Ok(value) = HeaderValue::from_str(&self.retry_after_secs.to_string()) {
            response.headers_mut().insert("X-RateLimit-Reset", value);
        }

        response
    }
}

/// Resolves the client address. The forwarded-for chain is only honored when
/// the direct peer is a trusted proxy; otherwise header spoofing would let
/// clients rotate identities at will.
pub fn client_ip(req: &Request, trusted_proxies: &[Cidr]) -> IpAddr {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

    if !trusted_proxies.is_empty() && any_contains(trusted_proxies, peer) {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }

    peer
}

async fn check_shared_window(
    pool: &deadpool_redis::Pool,
    group: &str,
    ip: IpAddr,
    limit: u32,
    window_secs: u64,
) -> Option<bool> {
    let window = chrono::Utc::now().timestamp() / window_secs.max(1) as i64;
    let key = format!("rl:{}:{}:{}", group, ip, window);

    let mut conn = pool.get().await.ok()?;
    let count: u32 = conn.incr(&key, 1).await.ok()?;
    if count == 1 {
        let _: Result<(), _> = conn.expire(&key, window_secs as i64).await;
    }
    Some(count <= limit)
}

async fn enforce(
    state: &RateLimitState,
    limiter: &Option<Arc<KeyedRateLimiter>>,
    config: &RateLimitConfig,
    group: &str,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, RateLimitExceeded> {
    let Some(limiter) = limiter else {
        return Ok(next.run(request).await);
    };

    let ip = client_ip(&request, &state.trusted_proxies);

    if let Some(pool) = &state.shared_pool {
        match check_shared_window(pool, group, ip, config.requests_per_window, config.window_secs)
            .await
        {
            Some(true) => {
                let mut response = next.run(request).await;
                add_rate_limit_headers(&mut response, config);
                return Ok(response);
            }
            Some(false) => {
                warn!(ip = %ip, group = group, "Rate limit exceeded (shared)");
                return Err(RateLimitExceeded {
                    error: "Too many requests".to_string(),
                    retry_after_secs: config.window_secs,
                });
            }
            None => {
                // Shared store is down: let the request through and count it.
                record_rate_limit_fail_open(group);
            }
        }
        return Ok(next.run(request).await);
    }

    match limiter.check_key(&ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(&mut response, config);
            Ok(response)
        }
        Err(not_until) => {
            let wait_duration = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait_duration.as_secs().max(1);

            warn!(ip = %ip, group = group, retry_after_secs = retry_after, "Rate limit exceeded");

            Err(RateLimitExceeded {
                error: "Too many requests".to_string(),
                retry_after_secs: retry_after,
            })
        }
    }
}

pub async fn rate_limit_middleware(
    rate_limit_state: Option<axum::extract::Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, RateLimitExceeded> {
    let state = match rate_limit_state {
        Some(axum::extract::Extension(state)) => state,
        None => return Ok(next.run(request).await),
    };

    let limiter = state.global_limiter.clone();
    let config = state.global_config.clone();
    enforce(&state, &limiter, &config, "global", request, next).await
}

/// Stricter budget for credential endpoints.
pub async fn auth_rate_limit_middleware(
    rate_limit_state: Option<axum::extract::Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, RateLimitExceeded> {
    let state = match rate_limit_state {
        Some(axum::extract::Extension(state)) => state,
        None => return Ok(next.run(request).await),
    };

    let limiter = state.auth_limiter.clone();
    let config = state.auth_config.clone();
    enforce(&state, &limiter, &config, "auth", request, next).await
}

fn add_rate_limit_headers(response: &mut axum::response::Response, config: &RateLimitConfig) {
    if let Ok(value) = HeaderValue::from_str(&config.requests_per_window.to_string()) {
        response.headers_mut().insert("X-RateLimit-Limit", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_window, 120);
        assert!(config.enabled);
    }

    #[test]
    fn test_rate_limit_config_disabled() {
        let config = RateLimitConfig::disabled();
        assert!(!config.enabled);
        assert!(config.create_limiter().is_none());
    }

    #[test]
    fn test_per_ip_keyed_limiter() {
        let config = RateLimitConfig {
            requests_per_window: 2,
            window_secs: 60,
            enabled: true,
            burst_size: 2,
        };
        let limiter = config.create_limiter().unwrap();

        let ip1: IpAddr = "1.2.3.4".parse().unwrap();
        let ip2: IpAddr = "5.6.7.8".parse().unwrap();

        assert!(limiter.check_key(&ip1).is_ok());
        assert!(limiter.check_key(&ip1).is_ok());
        assert!(limiter.check_key(&ip1).is_err());

        assert!(limiter.check_key(&ip2).is_ok());
        assert!(limiter.check_key(&ip2).is_ok());
        assert!(limiter.check_key(&ip2).is_err());
    }

    #[test]
    fn test_forwarded_for_ignored_from_untrusted_peer() {
        let mut request = Request::new(Body::empty());
        request.extensions_mut().insert(ConnectInfo(SocketAddr::from((
            [203, 0, 113, 9],
            44000,
        ))));
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));

        let trusted = Cidr::parse_list(&["10.0.0.0/8".to_string()]);
        let ip = client_ip(&request, &trusted);
        assert_eq!(ip, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_for_honored_from_trusted_peer() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 44000))));
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 10.0.0.2"),
        );

        let trusted = Cidr::parse_list(&["10.0.0.0/8".to_string()]);
        let ip = client_ip(&request, &trusted);
        assert_eq!(ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_rate_limit_exceeded_response() {
        let exceeded = RateLimitExceeded {
            error: "Too many requests".to_string(),
            retry_after_secs: 60,
        };
        let response = exceeded.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/problem+json"
        );
    }
}
