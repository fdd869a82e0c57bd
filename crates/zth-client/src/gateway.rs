//! HTTP gateway to the tutor backend.
//!
//! Every request carries the current access token. When a protected call
//! answers 401, the gateway exchanges the refresh token for a new access
//! token and re-issues the call once. If that is impossible or the retry is
//! rejected too, the credentials are cleared and
//! [`GatewayError::Unauthenticated`] is returned.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use zth_store::TokenStore;

use crate::config::Config;
use crate::error::GatewayError;
use crate::protocol::{
    AuthResponse, ChangePasswordRequest, ChatRequest, ChatResponse, CompletionRequest,
    DeleteAccountRequest, ErrorBody, EvaluateRequest, EvaluateResponse, Filters,
    LoadCodeResponse, LoginRequest, ProblemPage, ProblemQuery, ProfileResponse, RefreshRequest,
    RefreshResponse, RegisterRequest, ResetRequest, SaveCodeRequest, SelectProblemResponse,
    SettingRequest, SettingsResponse, StatusResponse, UpdateProfileRequest, User,
};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Result type for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Whether a 401 may be answered with a token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Protected endpoint: refresh once, then log out.
    Refresh,
    /// Credential endpoint: a 401 is an ordinary failure.
    Public,
}

/// Typed client for the backend's HTTP API.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
}

impl Gateway {
    /// Creates a gateway rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tokens: TokenStore,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| GatewayError::Transport {
                path: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Creates a gateway from the client configuration.
    pub fn from_config(config: &Config, tokens: TokenStore) -> GatewayResult<Self> {
        Self::new(&config.api_base_url, config.request_timeout(), tokens)
    }

    /// The shared credential store.
    #[must_use]
    pub const fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// The API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Request Core
    // ========================================================================

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&B>,
        auth: Auth,
    ) -> GatewayResult<reqwest::Response>
    where
        B: Serialize + ?Sized + Sync,
    {
        let mut retried = false;
        loop {
            let mut request = self
                .client
                .request(method.clone(), format!("{}{path}", self.base_url));
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(token) = self.tokens.access_token() {
                request = request.bearer_auth(token);
            }

            debug!(%method, path, retried, "Sending request");
            let response = request
                .send()
                .await
                .map_err(|source| GatewayError::Transport {
                    path: path.to_string(),
                    source,
                })?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && auth == Auth::Refresh {
                let message = error_message(response).await;
                if !retried && self.refresh().await {
                    retried = true;
                    continue;
                }
                warn!(path, retried, "Authorization failed; clearing credentials");
                self.clear_tokens();
                return Err(GatewayError::Unauthenticated { message });
            }

            if !status.is_success() {
                let message = error_message(response).await;
                debug!(path, status = status.as_u16(), %message, "Request failed");
                return Err(GatewayError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }
    }

    /// Exchanges the refresh token for a new access token.
    async fn refresh(&self) -> bool {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            debug!("No refresh token available");
            return false;
        };

        let path = "/auth/refresh";
        let body = RefreshRequest { refresh_token };
        let response = match self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                decode::<RefreshResponse>(path, response).await
            }
            Ok(response) => {
                let status = response.status().as_u16();
                Err(GatewayError::Status {
                    path: path.to_string(),
                    status,
                    message: error_message(response).await,
                })
            }
            Err(source) => Err(GatewayError::Transport {
                path: path.to_string(),
                source,
            }),
        };
        match response {
            Ok(RefreshResponse { access_token }) => {
                if let Err(e) = self.tokens.set_access_token(access_token) {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }
                info!("Access token refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                false
            }
        }
    }

    fn clear_tokens(&self) {
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to persist cleared credentials");
        }
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> GatewayResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, &[], body, auth).await?;
        decode(path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        self.call::<(), T>(Method::GET, path, None, Auth::Refresh)
            .await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> GatewayResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.call(Method::POST, path, Some(body), Auth::Refresh)
            .await
    }

    /// Sends a request whose response body is not needed.
    async fn execute<B>(&self, method: Method, path: &str, body: Option<&B>) -> GatewayResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        self.send(method, path, &[], body, Auth::Refresh).await?;
        Ok(())
    }

    // ========================================================================
    // Conversation
    // ========================================================================

    /// `GET /status`
    pub async fn status(&self) -> GatewayResult<StatusResponse> {
        self.get("/status").await
    }

    /// `POST /chat`
    pub async fn chat(&self, request: &ChatRequest) -> GatewayResult<ChatResponse> {
        self.post("/chat", request).await
    }

    /// `POST /evaluate-code`
    pub async fn evaluate_code(&self, request: &EvaluateRequest) -> GatewayResult<EvaluateResponse> {
        self.post("/evaluate-code", request).await
    }

    /// `POST /clear-session`
    pub async fn clear_session(&self) -> GatewayResult<()> {
        self.execute(Method::POST, "/clear-session", Some(&serde_json::json!({})))
            .await
    }

    // ========================================================================
    // Code
    // ========================================================================

    /// `GET /code/load/:id`. Returns `None` when nothing was saved.
    pub async fn load_code(&self, problem_id: u64) -> GatewayResult<Option<String>> {
        let response: LoadCodeResponse = self.get(&format!("/code/load/{problem_id}")).await?;
        Ok(response.code)
    }

    /// `POST /code/save`
    pub async fn save_code(&self, request: &SaveCodeRequest) -> GatewayResult<()> {
        self.execute(Method::POST, "/code/save", Some(request)).await
    }

    // ========================================================================
    // Problems
    // ========================================================================

    /// `GET /problems`
    pub async fn problems(&self, query: &ProblemQuery) -> GatewayResult<ProblemPage> {
        let path = "/problems";
        let response = self
            .send::<()>(Method::GET, path, &query.to_pairs(), None, Auth::Refresh)
            .await?;
        decode(path, response).await
    }

    /// `GET /filters`
    pub async fn filters(&self) -> GatewayResult<Filters> {
        self.get("/filters").await
    }

    /// `POST /problems/:id`
    pub async fn select_problem(&self, problem_id: u64) -> GatewayResult<SelectProblemResponse> {
        self.post(&format!("/problems/{problem_id}"), &serde_json::json!({}))
            .await
    }

    /// `POST /problems/:id/completion`
    pub async fn set_completion(&self, problem_id: u64, completed: bool) -> GatewayResult<()> {
        self.execute(
            Method::POST,
            &format!("/problems/{problem_id}/completion"),
            Some(&CompletionRequest { completed }),
        )
        .await
    }

    /// `POST /problem/reset`
    pub async fn reset_problem(&self, problem_id: u64) -> GatewayResult<()> {
        self.execute(
            Method::POST,
            "/problem/reset",
            Some(&ResetRequest { problem_id }),
        )
        .await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// `GET /settings`
    pub async fn settings(&self) -> GatewayResult<SettingsResponse> {
        self.get("/settings").await
    }

    /// `POST /settings/:key`
    pub async fn update_setting(&self, key: &str, value: serde_json::Value) -> GatewayResult<()> {
        self.execute(
            Method::POST,
            &settings_path(key),
            Some(&SettingRequest { value }),
        )
        .await
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// `POST /auth/login`. Stores the returned tokens.
    pub async fn login(&self, username: &str, password: &str) -> GatewayResult<User> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .call(Method::POST, "/auth/login", Some(&body), Auth::Public)
            .await?;
        Ok(self.store_session(response))
    }

    /// `POST /auth/register`. Stores the returned tokens.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> GatewayResult<User> {
        let body = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .call(Method::POST, "/auth/register", Some(&body), Auth::Public)
            .await?;
        Ok(self.store_session(response))
    }

    fn store_session(&self, response: AuthResponse) -> User {
        if let Err(e) = self
            .tokens
            .set_tokens(response.access_token, response.refresh_token)
        {
            warn!(error = %e, "Failed to persist credentials");
        }
        info!(username = %response.user.username, "Authenticated");
        response.user
    }

    /// Forgets the stored credentials.
    pub fn logout(&self) {
        self.clear_tokens();
        info!("Logged out");
    }

    /// `GET /auth/profile`
    pub async fn profile(&self) -> GatewayResult<User> {
        let response: ProfileResponse = self.get("/auth/profile").await?;
        Ok(response.user)
    }

    /// `PUT /auth/profile`
    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> GatewayResult<User> {
        let response: ProfileResponse = self
            .call(Method::PUT, "/auth/profile", Some(request), Auth::Refresh)
            .await?;
        Ok(response.user)
    }

    /// `POST /auth/change-password`
    pub async fn change_password(&self, current: &str, new: &str) -> GatewayResult<()> {
        let body = ChangePasswordRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        self.execute(Method::POST, "/auth/change-password", Some(&body))
            .await
    }

    /// `DELETE /auth/delete-account`. Clears credentials on success.
    pub async fn delete_account(&self, password: &str) -> GatewayResult<()> {
        let body = DeleteAccountRequest {
            password: password.to_string(),
        };
        self.execute(Method::DELETE, "/auth/delete-account", Some(&body))
            .await?;
        self.clear_tokens();
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> GatewayResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|source| GatewayError::Decode {
            path: path.to_string(),
            source,
        })
}

/// Extracts the backend's `{error}` text, falling back to the status reason.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or(fallback)
}

/// Path of a single setting, with the key escaped as one segment.
fn settings_path(key: &str) -> String {
    format!("/settings/{}", utf8_percent_encode(key, SEGMENT))
}
