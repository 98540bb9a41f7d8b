//! Session guard: bearer access-token authentication.
//!
//! A missing `Authorization` header means anonymous; a present header must
//! carry a valid, unexpired access token for a principal that still exists.
//! The principal is always re-read from the store.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use cookie::{
    REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH, clear_refresh_cookie, get_cookie, refresh_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{Auth, OptionalAuth, authenticate, bearer_token};
pub use ip::extract_client_ip;
pub use state::HasAuthBackend;
pub use types::AuthenticatedPrincipal;
