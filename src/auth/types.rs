//! Request-scoped authentication results.

use crate::db::Principal;
use crate::jwt::AccessClaims;

/// A request's resolved principal.
///
/// `principal` is re-read from the store on every request; use it (not the
/// claims) for anything security-sensitive.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal: Principal,
    /// Claims of the access token that authenticated the request
    pub claims: AccessClaims,
}
