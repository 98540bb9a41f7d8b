pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod credentials;
pub mod db;
pub mod jwt;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use db::Database;
use jwt::{JwtConfig, JwtError, TokenSettings};
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Signing secrets and lifetimes for access and refresh tokens
    pub tokens: TokenSettings,
    /// Whether to set Secure and SameSite=Strict on the refresh cookie
    pub secure_cookies: bool,
    /// Browser origins allowed to call the API with credentials
    pub cors_origins: Vec<String>,
    /// External identity providers accepted by `/auth/external-login`
    pub external_providers: Vec<String>,
    /// Per-IP limits for login and registration
    pub rate_limit: RateLimitConfig,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Credentialed CORS cannot use wildcards
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Create the application router with the given configuration.
/// Fails if the token settings are unusable.
pub fn create_app(config: &ServerConfig) -> Result<Router, JwtError> {
    let jwt = Arc::new(JwtConfig::new(&config.tokens)?);

    let api_router = create_api_router(
        config.db.clone(),
        jwt,
        config.secure_cookies,
        config.external_providers.clone(),
        Arc::new(config.rate_limit.clone()),
    );

    let router = if config.cors_origins.is_empty() {
        api_router
    } else {
        api_router.layer(cors_layer(&config.cors_origins))
    };

    Ok(router.layer(TraceLayer::new_for_http()))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    // Run cleanup tasks on startup
    init_cleanup(&config.db).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
