//! Client-side error type.

/// Failure of a scheduled request or a credential call.
///
/// `Clone` so a single refresh outcome can be handed to every queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network or protocol failure talking to the server
    Transport(String),
    /// Server rejected the request even with a freshly refreshed token,
    /// or rejected the credentials outright
    Unauthenticated,
    /// Refresh endpoint refused the refresh cookie; the session is over
    RefreshRejected,
    /// Refresh call did not settle within the configured timeout
    RefreshInFlightTimeout,
    /// Session was ended locally while the request waited on a refresh
    Cancelled,
    /// Response body did not have the expected shape
    Decode(String),
    /// Non-authentication error status from a credential endpoint
    Http { status: u16, message: String },
}

impl ClientError {
    /// Whether the application must send the user back to sign in.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::RefreshRejected | Self::RefreshInFlightTimeout
        )
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ClientError::Unauthenticated => write!(f, "Not authenticated"),
            ClientError::RefreshRejected => write!(f, "Session refresh rejected"),
            ClientError::RefreshInFlightTimeout => write!(f, "Session refresh timed out"),
            ClientError::Cancelled => write!(f, "Request cancelled by logout"),
            ClientError::Decode(msg) => write!(f, "Invalid response body: {}", msg),
            ClientError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}
