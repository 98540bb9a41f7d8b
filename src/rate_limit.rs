//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and signup spam.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(10).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Rate limiting configuration for credential endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Password and external login: 1 per second, bursts of 10
    pub login: Arc<IpLimiter>,
    /// Account creation: 5 per minute
    pub register: Arc<IpLimiter>,
    /// Take the client IP from `X-Forwarded-For`
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    pub fn new(trust_proxy: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            )),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN))),
            trust_proxy,
        }
    }

    /// Limits high enough that tests never hit them, unless they mean to.
    pub fn with_quotas(login: Quota, register: Quota, trust_proxy: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(login)),
            register: Arc::new(RateLimiter::keyed(register)),
            trust_proxy,
        }
    }
}

async fn check(
    limiter: &IpLimiter,
    trust_proxy: bool,
    request: Request,
    next: Next,
    message: &'static str,
) -> Response {
    let ip = match extract_client_ip(&request, trust_proxy) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Unable to determine client IP");
            return ApiError::bad_request("Unable to determine client IP").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            debug!(ip = %ip, path = %request.uri().path(), "Rate limited");
            ApiError::too_many_requests(message).into_response()
        }
    }
}

/// Middleware for rate limiting login endpoints.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.login,
        config.trust_proxy,
        request,
        next,
        "Too many authentication attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting account creation.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.register,
        config.trust_proxy,
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}
