#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use governor::Quota;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use tokenkeeper::{
    ServerConfig, create_app, credentials::hash_password, db::Database, jwt::TokenSettings,
    rate_limit::RateLimitConfig,
};
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"access-secret-for-tests-0123456789";
pub const REFRESH_SECRET: &[u8] = b"refresh-secret-for-tests-987654321";

pub fn token_settings(access_ttl_secs: u64) -> TokenSettings {
    TokenSettings {
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        access_ttl_secs,
        refresh_ttl_secs: 3600,
    }
}

/// Limits no test hits by accident.
pub fn relaxed_rate_limits() -> RateLimitConfig {
    let generous = Quota::per_second(NonZeroU32::new(10_000).unwrap());
    RateLimitConfig::with_quotas(generous, generous, false)
}

pub fn test_config(db: Database, access_ttl_secs: u64) -> ServerConfig {
    ServerConfig {
        db,
        tokens: token_settings(access_ttl_secs),
        secure_cookies: false,
        cors_origins: Vec::new(),
        external_providers: vec!["google".to_string()],
        rate_limit: relaxed_rate_limits(),
    }
}

pub async fn create_test_app() -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone(), 900)).expect("Invalid test config");
    (app, db)
}

/// Insert a password principal directly, bypassing registration rules.
pub async fn seed_principal(db: &Database, email: &str, password: &str) -> i64 {
    let hash = hash_password(password).unwrap();
    db.principals()
        .create(&uuid::Uuid::new_v4().to_string(), email, None, &hash)
        .await
        .unwrap()
}

/// Build a request that looks like it came over a socket (rate limiting needs an IP).
pub fn request(
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    headers: &[(header::HeaderName, String)],
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

pub fn cookie(refresh_token: &str) -> (header::HeaderName, String) {
    (header::COOKIE, format!("refresh_token={}", refresh_token))
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Raw Set-Cookie header of the response, if any.
pub fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

/// Refresh token value carried by the response's Set-Cookie header.
pub fn refresh_token_from(response: &Response<Body>) -> Option<String> {
    let cookie = set_cookie(response)?;
    let value = cookie
        .split(';')
        .next()?
        .trim()
        .strip_prefix("refresh_token=")?;
    (!value.is_empty()).then(|| value.to_string())
}

/// Login and return `(access_token, refresh_token)`.
pub async fn login(app: &Router, email: &str, password: &str) -> (String, String) {
    let response = send(
        app,
        request(
            "POST",
            "/auth/login",
            Some(serde_json::json!({ "email": email, "password": password })),
            &[],
        ),
    )
    .await;
    assert_eq!(response.status(), 200);
    let refresh = refresh_token_from(&response).expect("login sets refresh cookie");
    let json = body_json(response).await;
    (json["accessToken"].as_str().unwrap().to_string(), refresh)
}
