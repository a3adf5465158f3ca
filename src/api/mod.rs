//! HTTP client for the trip planning service

pub mod error;
pub mod retry;
pub mod types;

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::store::Storage;
use crate::stream::{self, SessionController, StreamEvent, TripPlan};

pub use error::{ClientError, Result};
pub use retry::RetryPolicy;
pub use types::{SaveResponse, TokenResponse, TripFormData, TripPlanResponse, UserInfo, UserResponse};

pub const STREAM_PLAN_PATH: &str = "/api/trip/plan/stream";
pub const PLAN_PATH: &str = "/api/trip/plan";
pub const SAVE_PLAN_PATH: &str = "/api/history/trips/save";
pub const HEALTH_PATH: &str = "/health";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const CURRENT_USER_PATH: &str = "/api/auth/me";

const PROFILE_FETCH_FAILED: &str = "Logged in, but the user profile could not be fetched";

/// Client for the planning backend.
///
/// Plan requests share one [`SessionController`], so starting a plan (either
/// flavour) cancels the one already in flight.
pub struct TripClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    storage: Option<Storage>,
    sessions: SessionController,
}

impl TripClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
            retry: config.retry_policy(),
            storage: None,
            sessions: SessionController::new(),
        })
    }

    /// Attach credential storage; its token is sent as a bearer header.
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stream a plan, reporting every event to `on_event` as it arrives.
    ///
    /// Settles exactly once: with the synthesized response when a plan
    /// arrives, or with the reason the session failed or was cancelled.
    pub async fn plan_trip_stream<F>(
        &self,
        form: &TripFormData,
        on_event: F,
    ) -> Result<TripPlanResponse>
    where
        F: FnMut(&StreamEvent),
    {
        let session = self.sessions.begin();
        tracing::info!("Starting plan stream {} for {}", session.id(), form.city);

        let request = self
            .authorized(self.http.post(self.url(STREAM_PLAN_PATH)))
            .header(ACCEPT, "text/event-stream")
            .json(form);

        let response = send_cancellable(request, session.token()).await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Plan stream {} rejected with {}", session.id(), status);
            return Err(ClientError::Http {
                status: status.as_u16(),
                detail: None,
            });
        }
        if response.content_length() == Some(0) {
            return Err(ClientError::EmptyBody);
        }

        let result = stream::drive(response.bytes_stream(), session.token(), on_event).await;
        match &result {
            Ok(_) => tracing::info!("Plan stream {} resolved", session.id()),
            Err(e) if e.is_cancelled() => tracing::info!("Plan stream {} cancelled", session.id()),
            Err(e) => tracing::warn!("Plan stream {} failed: {}", session.id(), e),
        }
        result
    }

    /// Request a plan in one shot, retrying failures with backoff.
    pub async fn plan_trip(&self, form: &TripFormData) -> Result<TripPlanResponse> {
        let session = self.sessions.begin();
        let token = session.token();
        tracing::info!("Requesting plan {} for {}", session.id(), form.city);

        let result = retry::with_backoff(&self.retry, token, || async move {
            let request = self
                .authorized(self.http.post(self.url(PLAN_PATH)))
                .timeout(self.timeout)
                .json(form);
            let response = send_cancellable(request, token).await?;
            self.read_json(response).await
        })
        .await;

        if let Err(e) = &result {
            if !e.is_cancelled() {
                tracing::warn!("Plan request {} failed: {}", session.id(), e);
            }
        }
        result
    }

    pub async fn save_trip_plan(
        &self,
        form: &TripFormData,
        plan: &TripPlan,
    ) -> Result<SaveResponse> {
        let request = self
            .authorized(self.http.post(self.url(SAVE_PLAN_PATH)))
            .timeout(self.timeout)
            .json(&types::SavePlanRequest {
                request: form,
                plan,
            });
        let response = request.send().await?;
        self.read_json(response).await
    }

    pub async fn health_check(&self) -> Result<Value> {
        let request = self.http.get(self.url(HEALTH_PATH)).timeout(self.timeout);
        let response = request.send().await?;
        self.read_json(response).await
    }

    /// Log in and cache the user's profile alongside the token.
    ///
    /// The token is only kept when the profile can be fetched with it;
    /// otherwise it is removed again and the login fails.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserInfo> {
        let storage = self.credential_storage()?;
        let request = self
            .http
            .post(self.url(LOGIN_PATH))
            .timeout(self.timeout)
            .json(&types::LoginRequest { username, password });
        let response = request.send().await?;
        let token: TokenResponse = decode_json(response).await?;
        storage.set_token(&token.access_token)?;

        match self.current_user().await {
            Ok(Some(user)) => {
                tracing::info!("Logged in as {}", user.username);
                Ok(user)
            }
            outcome => {
                if let Err(e) = storage.clear_token() {
                    tracing::warn!("Failed to discard token after login: {}", e);
                }
                match outcome {
                    Err(e) => Err(e),
                    Ok(_) => Err(ClientError::Backend(PROFILE_FETCH_FAILED.to_string())),
                }
            }
        }
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserResponse> {
        let request = self
            .http
            .post(self.url(REGISTER_PATH))
            .timeout(self.timeout)
            .json(&types::RegisterRequest {
                username,
                email,
                password,
            });
        let response = request.send().await?;
        decode_json(response).await
    }

    /// Fetch the logged-in user's profile and refresh the cached copy.
    ///
    /// `Ok(None)` when no token is stored or the service declines. A
    /// rejected token clears the stored credentials.
    pub async fn current_user(&self) -> Result<Option<UserInfo>> {
        let storage = self.credential_storage()?;
        if storage.token().is_none() {
            return Ok(None);
        }

        let request = self
            .authorized(self.http.get(self.url(CURRENT_USER_PATH)))
            .timeout(self.timeout);
        let response = request.send().await?;
        match self.read_json::<UserResponse>(response).await? {
            UserResponse {
                success: true,
                data: Some(user),
                ..
            } => {
                storage.set_user(&user)?;
                Ok(Some(user))
            }
            UserResponse { message, .. } => {
                tracing::warn!("Service declined profile request: {}", message);
                Ok(None)
            }
        }
    }

    /// Cancel whichever plan request is in flight.
    pub fn cancel_current_request(&self) -> bool {
        self.sessions.cancel_current()
    }

    pub fn has_active_request(&self) -> bool {
        self.sessions.is_active()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.storage.as_ref().and_then(Storage::token) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn credential_storage(&self) -> Result<&Storage> {
        self.storage
            .as_ref()
            .ok_or_else(|| ClientError::Storage("no credential storage attached".to_string()))
    }

    /// Decode a response to an authenticated request. A 401 means the
    /// stored token is no good, so the credentials are dropped.
    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(storage) = &self.storage {
                tracing::info!("Token rejected, clearing stored credentials");
                if let Err(e) = storage.clear_credentials() {
                    tracing::warn!("Failed to clear credentials: {}", e);
                }
            }
        }
        decode_json(response).await
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()));
    }

    let detail = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("detail").and_then(Value::as_str).map(str::to_string));
    Err(ClientError::Http {
        status: status.as_u16(),
        detail,
    })
}

async fn send_cancellable(request: RequestBuilder, token: &CancellationToken) -> Result<Response> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClientError::Cancelled),
        response = request.send() => response.map_err(|e| {
            if e.is_timeout() {
                ClientError::Network(format!("request timed out: {}", e))
            } else {
                ClientError::Network(e.to_string())
            }
        }),
    }
}
