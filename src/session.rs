//! Server-side refresh coordinator: login, rotation and revocation of the
//! single refresh credential stored on each principal.
//!
//! Rotation is a compare-and-swap on the stored hash, so two concurrent
//! refreshes presenting the same token cannot both succeed: the loser sees
//! zero affected rows and is handled as token reuse.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::auth::AuthErrorKind;
use crate::credentials::{hash_refresh_token, refresh_token_matches};
use crate::db::{Database, Principal};
use crate::jwt::{JwtConfig, JwtError, TokenPair};

/// Outcome of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub principal: Principal,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    jwt: Arc<JwtConfig>,
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AuthErrorKind {
    move |e| {
        error!(error = %e, "{}", context);
        AuthErrorKind::DatabaseError
    }
}

fn issue_error(e: JwtError) -> AuthErrorKind {
    error!(error = %e, "Failed to issue tokens");
    AuthErrorKind::Internal
}

impl SessionManager {
    pub fn new(db: Database, jwt: Arc<JwtConfig>) -> Self {
        Self { db, jwt }
    }

    /// Start a session: issue a pair and overwrite whatever refresh
    /// credential the principal had (single active session).
    pub async fn establish(&self, principal: &Principal) -> Result<TokenPair, AuthErrorKind> {
        let tokens = self.jwt.issue(principal).map_err(issue_error)?;

        let stored = self
            .db
            .principals()
            .set_refresh_hash(
                principal.id,
                &hash_refresh_token(&tokens.refresh.token),
                tokens.refresh.expires_at,
            )
            .await
            .map_err(db_error("Failed to store refresh credential"))?;

        if !stored {
            return Err(AuthErrorKind::PrincipalNotFound);
        }

        info!(principal = %principal.uuid, "Session established");
        Ok(tokens)
    }

    /// Exchange a refresh token for a new pair, invalidating the one presented.
    pub async fn rotate(&self, candidate: &str) -> Result<Rotation, AuthErrorKind> {
        let claims = self
            .jwt
            .validate_refresh_token(candidate)
            .map_err(|e| match e {
                JwtError::Expired => AuthErrorKind::TokenExpired,
                _ => AuthErrorKind::TokenMalformed,
            })?;

        let store = self.db.principals();

        let principal = store
            .get_by_uuid(&claims.sub)
            .await
            .map_err(db_error("Failed to load principal"))?
            .ok_or(AuthErrorKind::PrincipalNotFound)?;

        let stored_hash = store
            .refresh_hash(principal.id)
            .await
            .map_err(db_error("Failed to load refresh credential"))?
            .ok_or(AuthErrorKind::NoActiveSession)?;

        if !refresh_token_matches(candidate, &stored_hash) {
            self.terminate(&principal, "stale refresh token presented")
                .await?;
            return Err(AuthErrorKind::RefreshReuseDetected);
        }

        let tokens = self.jwt.issue(&principal).map_err(issue_error)?;

        let swapped = store
            .swap_refresh_hash(
                principal.id,
                &stored_hash,
                &hash_refresh_token(&tokens.refresh.token),
                tokens.refresh.expires_at,
            )
            .await
            .map_err(db_error("Failed to rotate refresh credential"))?;

        if !swapped {
            // Another request rotated (or revoked) this exact token between
            // our read and our write.
            self.terminate(&principal, "concurrent reuse of refresh token")
                .await?;
            return Err(AuthErrorKind::RefreshReuseDetected);
        }

        debug!(principal = %principal.uuid, "Refresh token rotated");
        Ok(Rotation { principal, tokens })
    }

    /// Drop the principal's refresh credential. Access tokens already issued
    /// stay valid until they expire.
    pub async fn revoke(&self, principal: &Principal) -> Result<bool, AuthErrorKind> {
        let cleared = self
            .db
            .principals()
            .clear_refresh_hash(principal.id)
            .await
            .map_err(db_error("Failed to clear refresh credential"))?;
        info!(principal = %principal.uuid, cleared, "Session revoked");
        Ok(cleared)
    }

    async fn terminate(&self, principal: &Principal, reason: &str) -> Result<(), AuthErrorKind> {
        warn!(
            principal = %principal.uuid,
            reason,
            "Refresh token reuse detected, terminating session"
        );
        self.db
            .principals()
            .clear_refresh_hash(principal.id)
            .await
            .map_err(db_error("Failed to clear refresh credential"))?;
        Ok(())
    }
}
