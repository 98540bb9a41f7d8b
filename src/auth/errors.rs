//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Internal failure taxonomy. Logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Unknown email, wrong password, or unaccepted external identity
    InvalidCredentials,
    /// Request needs a principal but carried no access token
    NotAuthenticated,
    /// Signature valid, `exp` passed
    TokenExpired,
    /// Bad header shape, bad signature, wrong token type
    TokenMalformed,
    /// Refresh token valid but no longer the stored one; session terminated
    RefreshReuseDetected,
    /// Token names a principal that no longer exists
    PrincipalNotFound,
    /// No refresh credential stored (logged out or already terminated)
    NoActiveSession,
    DatabaseError,
    Internal,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::NotAuthenticated => "not_authenticated",
            Self::TokenExpired => "token_expired",
            Self::TokenMalformed => "token_malformed",
            Self::RefreshReuseDetected => "refresh_reuse_detected",
            Self::PrincipalNotFound => "principal_not_found",
            Self::NoActiveSession => "no_active_session",
            Self::DatabaseError => "database_error",
            Self::Internal => "internal",
        }
    }

    /// Whether this is a server fault rather than a rejected credential.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, Self::DatabaseError | Self::Internal)
    }
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for AuthErrorKind {}

/// Rejection for authenticated API routes.
///
/// Every credential problem renders as the same 401 body so the response
/// does not tell a caller which part of its credential was wrong.
#[derive(Debug)]
pub struct ApiAuthError {
    kind: AuthErrorKind,
}

impl From<AuthErrorKind> for ApiAuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self { kind }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let (status, message) = if self.kind.is_server_fault() {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        } else {
            (StatusCode::UNAUTHORIZED, "Not authenticated")
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_credential_failures_look_the_same() {
        for kind in [
            AuthErrorKind::NotAuthenticated,
            AuthErrorKind::TokenExpired,
            AuthErrorKind::TokenMalformed,
            AuthErrorKind::PrincipalNotFound,
            AuthErrorKind::RefreshReuseDetected,
        ] {
            let response = ApiAuthError::from(kind).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", kind);
        }
    }

    #[test]
    fn test_server_faults_are_500() {
        let response = ApiAuthError::from(AuthErrorKind::DatabaseError).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
