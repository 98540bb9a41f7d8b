mod common;

use common::test_config;
use futures::future::join_all;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokenkeeper::client::{
    ApiRequest, ApiResponse, AuthTransport, ClientError, HttpTransport, RefreshCoordinator,
    SessionGrant, SessionStatus,
};
use tokenkeeper::{db::Database, start_server};
use url::Url;

/// Counts refresh calls that actually reach the server.
struct CountingTransport {
    inner: HttpTransport,
    refreshes: AtomicUsize,
}

impl CountingTransport {
    fn new(inner: HttpTransport) -> Self {
        Self {
            inner,
            refreshes: AtomicUsize::new(0),
        }
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl AuthTransport for CountingTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        self.inner.send(request, access_token).await
    }

    async fn refresh(&self) -> Result<SessionGrant, ClientError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh().await
    }

    async fn logout(&self, access_token: &str) -> Result<(), ClientError> {
        self.inner.logout(access_token).await
    }
}

async fn start(access_ttl_secs: u64) -> SocketAddr {
    let db = Database::open(":memory:").await.unwrap();
    let (_handle, addr) = start_server(test_config(db, access_ttl_secs), 0)
        .await
        .unwrap();
    addr
}

fn transport(addr: SocketAddr) -> HttpTransport {
    HttpTransport::new(Url::parse(&format!("http://{}/", addr)).unwrap()).unwrap()
}

/// Register a fresh principal and hand the session to a coordinator.
async fn signed_in(addr: SocketAddr, email: &str) -> RefreshCoordinator<CountingTransport> {
    let transport = transport(addr);
    let grant = transport
        .register(email, "correct horse", Some("Tester"))
        .await
        .unwrap();
    assert_eq!(grant.principal.email, email);

    let coordinator = RefreshCoordinator::new(CountingTransport::new(transport));
    coordinator.begin_session(grant.access_token);
    coordinator
}

#[tokio::test]
async fn test_parallel_calls_after_expiry_refresh_once() {
    let addr = start(1).await;
    let coordinator = signed_in(addr, "a@x.com").await;
    let before = coordinator.access_token().unwrap();

    let response = coordinator
        .schedule_request(ApiRequest::get("/auth/me"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let results = join_all(
        (0..5).map(|_| coordinator.schedule_request(ApiRequest::get("/auth/me"))),
    )
    .await;

    for result in results {
        let response = result.unwrap();
        assert_eq!(response.status, 200);
        let json: Value = response.json().unwrap();
        assert_eq!(json["principal"]["email"], "a@x.com");
    }
    assert_eq!(coordinator.transport().refreshes(), 1);
    assert_ne!(coordinator.access_token().unwrap(), before);
    assert_eq!(*coordinator.subscribe().borrow(), SessionStatus::Active);
}

#[tokio::test]
async fn test_lost_access_token_recovers_from_cookie() {
    let addr = start(900).await;
    let coordinator = signed_in(addr, "b@x.com").await;

    // As after a page reload: the cookie survives, the in-memory token does not
    coordinator.begin_session("garbage".into());

    let response = coordinator
        .schedule_request(ApiRequest::get("/auth/me"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(coordinator.transport().refreshes(), 1);
}

#[tokio::test]
async fn test_logout_ends_session_everywhere() {
    let addr = start(900).await;
    let coordinator = signed_in(addr, "c@x.com").await;
    let status = coordinator.subscribe();

    coordinator.logout().await;
    assert_eq!(*status.borrow(), SessionStatus::LoggedOut);
    assert_eq!(coordinator.access_token(), None);

    // No token, and the refresh cookie was revoked and cleared
    let err = coordinator
        .schedule_request(ApiRequest::get("/auth/me"))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::RefreshRejected);
    assert!(err.requires_reauthentication());
}

#[tokio::test]
async fn test_logout_after_access_token_expired() {
    let addr = start(1).await;
    let coordinator = signed_in(addr, "f@x.com").await;

    tokio::time::sleep(Duration::from_millis(2100)).await;
    coordinator.logout().await;
    assert_eq!(*coordinator.subscribe().borrow(), SessionStatus::LoggedOut);

    // The refresh credential is gone, so nothing can quietly sign back in
    let err = coordinator
        .schedule_request(ApiRequest::get("/auth/me"))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::RefreshRejected);
    assert_eq!(coordinator.access_token(), None);
    assert_eq!(*coordinator.subscribe().borrow(), SessionStatus::LoggedOut);
}

#[tokio::test]
async fn test_credential_errors() {
    let addr = start(900).await;
    let transport = transport(addr);

    transport
        .register("d@x.com", "correct horse", None)
        .await
        .unwrap();

    let err = transport.login("d@x.com", "wrong horse").await.unwrap_err();
    assert_eq!(err, ClientError::Unauthenticated);

    let err = transport
        .register("d@x.com", "correct horse", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 409, .. }));

    let grant = transport
        .external_login("e@x.com", "google", "sub-e", None)
        .await
        .unwrap();
    assert!(grant.principal.external);
}
