//! Client side of the session: a coordinator that keeps concurrent requests
//! from racing each other into the single-use refresh endpoint.
//!
//! ```ignore
//! let transport = HttpTransport::new(Url::parse("https://api.example.com/")?)?;
//! let grant = transport.login("a@x.com", "secret12").await?;
//! let coordinator = RefreshCoordinator::new(transport);
//! coordinator.begin_session(grant.access_token);
//! let me = coordinator.schedule_request(ApiRequest::get("/auth/me")).await?;
//! ```

mod coordinator;
mod error;
mod transport;

pub use coordinator::{DEFAULT_REFRESH_TIMEOUT, RefreshCoordinator, SessionStatus};
pub use error::ClientError;
pub use transport::{ApiRequest, ApiResponse, AuthTransport, HttpTransport, SessionGrant};
