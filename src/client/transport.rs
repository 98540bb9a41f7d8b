//! Network seam of the client coordinator, and its reqwest implementation.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::error::ClientError;
use crate::api::SessionResponse;

/// Tokens and principal handed out by login, registration and refresh.
pub type SessionGrant = SessionResponse;

/// An application request, replayable as many times as the coordinator needs.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the server base URL, e.g. `/auth/me`
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Everything the coordinator needs from the network.
pub trait AuthTransport: Send + Sync {
    /// Send a request, with `Authorization: Bearer` when a token is given.
    /// Any HTTP status is a successful send; only network failures are errors.
    fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> impl Future<Output = Result<ApiResponse, ClientError>> + Send;

    /// Exchange the refresh credential for a new grant.
    /// A refusal by the server is `ClientError::RefreshRejected`.
    fn refresh(&self) -> impl Future<Output = Result<SessionGrant, ClientError>> + Send;

    /// Tell the server to drop the refresh credential.
    /// A rejected access token is `ClientError::Unauthenticated`.
    fn logout(&self, access_token: &str) -> impl Future<Output = Result<(), ClientError>> + Send;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP transport. The refresh cookie lives in reqwest's cookie store and is
/// only ever sent to `/auth/refresh`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured client. It must have a cookie store for refresh to work.
    pub fn with_client(client: reqwest::Client, mut base_url: Url) -> Self {
        // Url::join drops the last segment of a base without a trailing slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Transport(format!("Invalid path '{}': {}", path, e)))
    }

    /// Password login.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionGrant, ClientError> {
        self.credential_call(
            "auth/login",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Login with an identity the caller already verified with `provider`.
    pub async fn external_login(
        &self,
        email: &str,
        provider: &str,
        subject: &str,
        display_name: Option<&str>,
    ) -> Result<SessionGrant, ClientError> {
        self.credential_call(
            "auth/external-login",
            json!({
                "email": email,
                "externalIdentityAssertion": { "provider": provider, "subject": subject },
                "displayName": display_name,
            }),
        )
        .await
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<SessionGrant, ClientError> {
        self.credential_call(
            "auth/register",
            json!({ "email": email, "password": password, "displayName": display_name }),
        )
        .await
    }

    async fn credential_call(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<SessionGrant, ClientError> {
        let response = self.client.post(self.url(path)?).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<SessionGrant>().await?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_default();
        Err(ClientError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

impl AuthTransport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path)?);
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(ApiResponse { status, body })
    }

    async fn refresh(&self) -> Result<SessionGrant, ClientError> {
        let response = self.client.post(self.url("auth/refresh")?).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json::<SessionGrant>().await?),
            StatusCode::UNAUTHORIZED => Err(ClientError::RefreshRejected),
            status => Err(ClientError::Transport(format!(
                "Unexpected refresh status {}",
                status
            ))),
        }
    }

    async fn logout(&self, access_token: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("auth/logout")?)
            .bearer_auth(access_token)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthenticated),
            status => Err(ClientError::Http {
                status: status.as_u16(),
                message: "Logout failed".into(),
            }),
        }
    }
}
