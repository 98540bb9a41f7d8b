//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedPrincipal;
use crate::jwt::JwtError;

/// Read the bearer token from the Authorization header.
///
/// `Ok(None)` when the header is absent. A header that is present but not a
/// well-formed `Bearer <token>` is an error, never anonymous.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthErrorKind> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthErrorKind::TokenMalformed)?;
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthErrorKind::TokenMalformed)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthErrorKind::TokenMalformed);
    }
    Ok(Some(token))
}

/// Resolve the principal for a request.
///
/// Returns `Ok(None)` for anonymous requests (no Authorization header).
pub async fn authenticate<S>(
    headers: &HeaderMap,
    state: &S,
) -> Result<Option<AuthenticatedPrincipal>, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    let Some(token) = bearer_token(headers)? else {
        return Ok(None);
    };

    let claims = state
        .jwt()
        .validate_access_token(token)
        .map_err(|e| match e {
            JwtError::Expired => AuthErrorKind::TokenExpired,
            _ => AuthErrorKind::TokenMalformed,
        })?;

    let principal = state
        .db()
        .principals()
        .get_by_uuid(&claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load principal");
            AuthErrorKind::DatabaseError
        })?
        .ok_or(AuthErrorKind::PrincipalNotFound)?;

    Ok(Some(AuthenticatedPrincipal { principal, claims }))
}

fn log_rejection(parts: &Parts, kind: AuthErrorKind) {
    if kind.is_server_fault() {
        tracing::warn!(path = %parts.uri.path(), reason = %kind, "Authentication failed");
    } else {
        tracing::debug!(path = %parts.uri.path(), reason = %kind, "Authentication rejected");
    }
}

/// Extractor for endpoints that require a principal.
/// Anonymous requests are rejected like any other credential failure.
pub struct Auth(pub AuthenticatedPrincipal);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match authenticate(&parts.headers, state).await {
            Ok(Some(principal)) => Ok(Auth(principal)),
            Ok(None) => {
                log_rejection(parts, AuthErrorKind::NotAuthenticated);
                Err(AuthErrorKind::NotAuthenticated.into())
            }
            Err(kind) => {
                log_rejection(parts, kind);
                Err(kind.into())
            }
        }
    }
}

/// Extractor for endpoints open to anonymous callers.
/// A missing token yields `None`; a present but invalid token is still rejected.
pub struct OptionalAuth(pub Option<AuthenticatedPrincipal>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state)
            .await
            .map(OptionalAuth)
            .map_err(|kind| {
                log_rejection(parts, kind);
                kind.into()
            })
    }
}
