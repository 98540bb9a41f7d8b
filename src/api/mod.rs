mod auth;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;

pub use auth::{AuthState, PrincipalView, SessionResponse};
pub use error::{ApiError, ResultExt, validate_email};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    secure_cookies: bool,
    external_providers: Vec<String>,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = AuthState {
        sessions: SessionManager::new(db.clone(), jwt.clone()),
        db,
        jwt,
        secure_cookies,
        external_providers: Arc::new(external_providers),
        rate_limit_config,
    };

    Router::new().nest("/auth", auth::router(auth_state))
}
