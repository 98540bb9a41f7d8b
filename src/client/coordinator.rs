//! Single-flight access token refresh for concurrent requests.
//!
//! Every request goes through [`RefreshCoordinator::schedule_request`]. When
//! one comes back 401, the first such request becomes the leader and calls
//! the refresh endpoint; requests that hit 401 while that call is in flight
//! queue a oneshot and wait for its outcome instead of refreshing again.
//! Each request is retried at most once.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::{Notify, oneshot, watch};
use tracing::{debug, info, warn};

use super::error::ClientError;
use super::transport::{ApiRequest, ApiResponse, AuthTransport};

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the application should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session was ever started
    Anonymous,
    Active,
    /// Refresh failed or the user logged out; send them to sign in
    LoggedOut,
}

type Waiter = oneshot::Sender<Result<String, ClientError>>;

#[derive(Default)]
struct CoordinatorState {
    access_token: Option<String>,
    refresh_in_flight: bool,
    waiters: Vec<Waiter>,
    /// Bumped on login, logout and failed refresh; a leader whose generation
    /// is stale must not write its outcome back.
    generation: u64,
}

enum Role<'a> {
    /// Someone already refreshed past the token this request used
    Current(String),
    Leader(u64, tokio::sync::futures::Notified<'a>),
    Follower(oneshot::Receiver<Result<String, ClientError>>),
}

pub struct RefreshCoordinator<T> {
    transport: T,
    state: Mutex<CoordinatorState>,
    status: watch::Sender<SessionStatus>,
    cancel: Notify,
    refresh_timeout: Duration,
}

/// Resets the in-flight flag if the leader's future is dropped mid-refresh,
/// so queued requests are released instead of waiting forever.
struct LeaderGuard<'a, T> {
    coordinator: &'a RefreshCoordinator<T>,
    generation: u64,
    armed: bool,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = {
            let mut state = self.coordinator.lock();
            if state.generation != self.generation {
                return;
            }
            state.refresh_in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), "Refresh abandoned");
        for waiter in waiters {
            let _ = waiter.send(Err(ClientError::Cancelled));
        }
    }
}

impl<T> RefreshCoordinator<T> {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: AuthTransport> RefreshCoordinator<T> {
    pub fn new(transport: T) -> Self {
        let (status, _) = watch::channel(SessionStatus::Anonymous);
        Self {
            transport,
            state: Mutex::new(CoordinatorState::default()),
            status,
            cancel: Notify::new(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Install the access token returned by a login.
    ///
    /// A refresh still running for an earlier session is abandoned and the
    /// requests waiting on it retry with this token.
    pub fn begin_session(&self, access_token: String) {
        let waiters = {
            let mut state = self.lock();
            state.generation += 1;
            state.refresh_in_flight = false;
            state.access_token = Some(access_token.clone());
            std::mem::take(&mut state.waiters)
        };
        self.cancel.notify_waiters();
        self.status.send_replace(SessionStatus::Active);

        for waiter in waiters {
            let _ = waiter.send(Ok(access_token.clone()));
        }
    }

    /// Send a request, refreshing the access token at most once on 401.
    pub async fn schedule_request(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let sent_with = self.access_token();
        let response = self.transport.send(&request, sent_with.as_deref()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let token = self.fresh_token(sent_with.as_deref()).await?;
        let retried = self.transport.send(&request, Some(&token)).await?;
        if retried.status == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Request rejected again after refresh");
            return Err(ClientError::Unauthenticated);
        }
        Ok(retried)
    }

    /// End the session locally and on the server.
    /// Requests waiting on a refresh fail with `Cancelled`.
    ///
    /// The local session ends even when the server cannot be reached; that
    /// failure is only logged.
    pub async fn logout(&self) {
        let (token, waiters) = {
            let mut state = self.lock();
            state.generation += 1;
            state.refresh_in_flight = false;
            (state.access_token.take(), std::mem::take(&mut state.waiters))
        };
        self.cancel.notify_waiters();

        for waiter in waiters {
            let _ = waiter.send(Err(ClientError::Cancelled));
        }
        self.status.send_replace(SessionStatus::LoggedOut);

        match self.server_logout(token).await {
            Ok(()) => info!("Logged out"),
            Err(ClientError::RefreshRejected) => info!("Logged out, no server session left"),
            Err(e) => warn!(error = %e, "Logged out locally, server logout failed"),
        }
    }

    /// Revoke the refresh credential on the server. An expired (or missing)
    /// access token cannot authorize that, so the refresh credential is
    /// spent once for a token that can.
    async fn server_logout(&self, token: Option<String>) -> Result<(), ClientError> {
        if let Some(token) = token {
            match self.transport.logout(&token).await {
                Err(ClientError::Unauthenticated) => {
                    debug!("Access token refused by logout, refreshing to revoke")
                }
                other => return other,
            }
        }

        // Not published to state or followers: this pair only lives to be revoked
        let grant = tokio::time::timeout(self.refresh_timeout, self.transport.refresh())
            .await
            .map_err(|_| ClientError::RefreshInFlightTimeout)??;
        self.transport.logout(&grant.access_token).await
    }

    /// Token to retry with after a 401 on a request sent with `stale`.
    async fn fresh_token(&self, stale: Option<&str>) -> Result<String, ClientError> {
        let role = {
            let mut state = self.lock();
            if state.refresh_in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Follower(rx)
            } else {
                match state.access_token.as_deref() {
                    Some(current) if Some(current) != stale => Role::Current(current.to_string()),
                    _ => {
                        state.refresh_in_flight = true;
                        // Registered under the lock so a logout cannot slip in unseen
                        Role::Leader(state.generation, self.cancel.notified())
                    }
                }
            }
        };

        match role {
            Role::Current(token) => Ok(token),
            Role::Follower(rx) => rx.await.unwrap_or(Err(ClientError::Cancelled)),
            Role::Leader(generation, cancelled) => self.lead_refresh(generation, cancelled).await,
        }
    }

    async fn lead_refresh(
        &self,
        generation: u64,
        cancelled: tokio::sync::futures::Notified<'_>,
    ) -> Result<String, ClientError> {
        let mut guard = LeaderGuard {
            coordinator: self,
            generation,
            armed: true,
        };

        debug!("Refreshing access token");
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.refresh_timeout, self.transport.refresh()) => {
                match result {
                    Ok(Ok(grant)) => Ok(grant.access_token),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ClientError::RefreshInFlightTimeout),
                }
            }
            _ = cancelled => Err(ClientError::Cancelled),
        };
        guard.armed = false;

        self.settle(generation, outcome)
    }

    /// Publish the leader's outcome to the state and every queued follower.
    fn settle(
        &self,
        generation: u64,
        outcome: Result<String, ClientError>,
    ) -> Result<String, ClientError> {
        let waiters = {
            let mut state = self.lock();
            if state.generation != generation {
                // Logged in or out while refreshing; followers were already
                // released and the new session wins
                return state.access_token.clone().ok_or(ClientError::Cancelled);
            }
            state.refresh_in_flight = false;
            match &outcome {
                Ok(token) => state.access_token = Some(token.clone()),
                Err(_) => {
                    state.access_token = None;
                    state.generation += 1;
                }
            }
            std::mem::take(&mut state.waiters)
        };

        match &outcome {
            Ok(_) => {
                debug!(waiters = waiters.len(), "Access token refreshed");
                self.status.send_replace(SessionStatus::Active);
            }
            Err(e) => {
                warn!(error = %e, waiters = waiters.len(), "Refresh failed, session ended");
                self.status.send_replace(SessionStatus::LoggedOut);
            }
        }

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}
