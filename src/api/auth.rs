//! Credential and session endpoints, nested under `/auth`.
//!
//! - POST `/login` - Password login
//! - POST `/external-login` - Login with an already-verified external identity
//! - POST `/register` - Create a password principal and log it in
//! - POST `/refresh` - Rotate the refresh cookie into a new token pair
//! - POST `/logout` - Revoke the stored refresh credential
//! - GET `/me` - Current principal (access token required)
//! - GET `/session` - Current principal or anonymous

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ApiError, ResultExt, validate_email};
use crate::auth::{
    Auth, AuthErrorKind, OptionalAuth, REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie,
    refresh_cookie,
};
use crate::credentials::{hash_password, verify_password_or_dummy};
use crate::db::{Database, Principal, is_unique_violation, normalize_email};
use crate::impl_has_auth_backend;
use crate::jwt::{JwtConfig, TokenPair};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};
use crate::session::SessionManager;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 1024;
const MAX_DISPLAY_NAME_LENGTH: usize = 64;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub sessions: SessionManager,
    pub secure_cookies: bool,
    /// Providers whose identity assertions are accepted
    pub external_providers: Arc<Vec<String>>,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .route("/external-login", post(external_login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_register,
        ));

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/session", get(session))
        .with_state(state)
        .merge(login_router)
        .merge(register_router)
}

/// Public view of a principal. Never carries credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub external: bool,
}

impl From<&Principal> for PrincipalView {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.uuid.clone(),
            email: p.email.clone(),
            display_name: p.display_name.clone(),
            external: p.is_external(),
        }
    }
}

/// Body of every response that grants a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub principal: PrincipalView,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct ExternalIdentityAssertion {
    pub provider: String,
    pub subject: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalLoginRequest {
    email: String,
    external_identity_assertion: ExternalIdentityAssertion,
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    password: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct MeResponse {
    principal: PrincipalView,
}

#[derive(Serialize)]
struct SessionStatusResponse {
    authenticated: bool,
    principal: Option<PrincipalView>,
}

fn session_response(
    state: &AuthState,
    status: StatusCode,
    principal: &Principal,
    tokens: &TokenPair,
) -> Response {
    let cookie = refresh_cookie(
        &tokens.refresh.token,
        tokens.refresh.duration,
        state.secure_cookies,
    );
    (
        status,
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            access_token: tokens.access.token.clone(),
            principal: PrincipalView::from(principal),
        }),
    )
        .into_response()
}

/// Establish a session for the principal and build the response.
async fn grant(
    state: &AuthState,
    principal: &Principal,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let tokens = state.sessions.establish(principal).await?;
    Ok(session_response(state, status, principal, &tokens))
}

fn reject(kind: AuthErrorKind, what: &str) -> ApiError {
    debug!(reason = %kind, "{} rejected", what);
    kind.into()
}

fn clean_display_name(name: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Display name cannot be longer than {} characters",
            MAX_DISPLAY_NAME_LENGTH
        )));
    }
    Ok(Some(name.to_string()))
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = normalize_email(&payload.email);

    let principal = state
        .db
        .principals()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up principal")?;

    // Unknown email, external-only principal and wrong password all look
    // alike, in body and in time spent hashing
    let stored = principal.as_ref().and_then(|p| p.password_hash.as_deref());
    let verified = verify_password_or_dummy(&payload.password, stored);
    let principal = principal
        .filter(|_| verified)
        .ok_or_else(|| reject(AuthErrorKind::InvalidCredentials, "Login"))?;

    info!(principal = %principal.uuid, "Password login");
    grant(&state, &principal, StatusCode::OK).await
}

async fn external_login(
    State(state): State<AuthState>,
    Json(payload): Json<ExternalLoginRequest>,
) -> Result<Response, ApiError> {
    let ExternalIdentityAssertion { provider, subject } = payload.external_identity_assertion;
    let provider = provider.trim();
    let subject = subject.trim();

    if subject.is_empty() {
        return Err(ApiError::bad_request("External subject cannot be empty"));
    }

    if !state.external_providers.iter().any(|p| p == provider) {
        debug!(provider, "External provider not allowed");
        return Err(reject(AuthErrorKind::InvalidCredentials, "External login"));
    }

    let email = normalize_email(&payload.email);
    validate_email(&email)?;
    let display_name = clean_display_name(payload.display_name)?;

    let store = state.db.principals();

    if let Some(principal) = store
        .get_by_external(provider, subject)
        .await
        .db_err("Failed to look up external identity")?
    {
        info!(principal = %principal.uuid, provider, "External login");
        return grant(&state, &principal, StatusCode::OK).await;
    }

    let principal = match store
        .get_by_email(&email)
        .await
        .db_err("Failed to look up principal")?
    {
        // A password account with the same email: attach the identity to it
        Some(existing) if !existing.is_external() => {
            let linked = store
                .link_external(existing.id, provider, subject)
                .await
                .db_err("Failed to link external identity")?;
            if !linked {
                return Err(reject(AuthErrorKind::InvalidCredentials, "External login"));
            }
            info!(principal = %existing.uuid, provider, "Linked external identity");
            store
                .get_by_id(existing.id)
                .await
                .db_err("Failed to reload principal")?
                .ok_or_else(|| ApiError::from(AuthErrorKind::PrincipalNotFound))?
        }
        // Email belongs to a different external identity
        Some(_) => return Err(reject(AuthErrorKind::InvalidCredentials, "External login")),
        None => {
            let uuid = uuid::Uuid::new_v4().to_string();
            let id = match store
                .create_external(&uuid, &email, display_name.as_deref(), provider, subject)
                .await
            {
                Ok(id) => id,
                Err(e) if is_unique_violation(&e) => {
                    return Err(ApiError::conflict("Account already exists"));
                }
                Err(e) => return Err(ApiError::db_error("Failed to create principal", e)),
            };
            info!(principal = %uuid, provider, "Created principal from external identity");
            store
                .get_by_id(id)
                .await
                .db_err("Failed to load new principal")?
                .ok_or_else(|| ApiError::internal("Principal vanished after creation"))?
        }
    };

    grant(&state, &principal, StatusCode::OK).await
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let email = normalize_email(&payload.email);
    validate_email(&email)?;

    let password_length = payload.password.chars().count();
    if password_length < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password_length > MAX_PASSWORD_LENGTH {
        return Err(ApiError::bad_request("Password is too long"));
    }

    let display_name = clean_display_name(payload.display_name)?;
    let store = state.db.principals();

    let available = store
        .is_email_available(&email)
        .await
        .db_err("Failed to check email availability")?;
    if !available {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let password_hash = hash_password(&payload.password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to create account")
    })?;

    let uuid = uuid::Uuid::new_v4().to_string();
    let id = match store
        .create(&uuid, &email, display_name.as_deref(), &password_hash)
        .await
    {
        Ok(id) => id,
        // Lost a race with a concurrent registration
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict("Email is already registered"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create principal", e)),
    };

    let principal = store
        .get_by_id(id)
        .await
        .db_err("Failed to load new principal")?
        .ok_or_else(|| ApiError::internal("Principal vanished after creation"))?;

    info!(principal = %principal.uuid, "Registered principal");
    grant(&state, &principal, StatusCode::CREATED).await
}

/// Exchange the refresh cookie for a new pair.
/// Every credential failure clears the cookie so the client stops retrying it.
async fn refresh(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let result = match get_cookie(&headers, REFRESH_COOKIE_NAME) {
        Some(token) if !token.is_empty() => state.sessions.rotate(token).await,
        _ => Err(AuthErrorKind::NotAuthenticated),
    };

    match result {
        Ok(rotation) => session_response(
            &state,
            StatusCode::OK,
            &rotation.principal,
            &rotation.tokens,
        ),
        // Store trouble says nothing about the cookie, keep it
        Err(kind) if kind.is_server_fault() => ApiError::from(kind).into_response(),
        Err(kind) => (
            [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
            reject(kind, "Refresh"),
        )
            .into_response(),
    }
}

async fn logout(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.revoke(&auth.principal).await?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "success": true })),
    ))
}

async fn me(Auth(auth): Auth) -> Json<MeResponse> {
    Json(MeResponse {
        principal: PrincipalView::from(&auth.principal),
    })
}

async fn session(OptionalAuth(auth): OptionalAuth) -> Json<SessionStatusResponse> {
    let principal = auth.map(|a| PrincipalView::from(&a.principal));
    Json(SessionStatusResponse {
        authenticated: principal.is_some(),
        principal,
    })
}
