//! Supabase Auth (GoTrue) REST client.
//!
//! Covers the handful of endpoints the sign-in flow needs: password sign-in,
//! sign-up, user metadata updates, user lookup, token refresh and sign-out.
//! Every request carries the project's anon key in the `apikey` header.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard User-Agent header for zuauth API requests.
pub const USER_AGENT: &str = concat!("zuauth/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Config resolution helpers
// ============================================================================

/// Resolves the anon key with precedence: config > env.
///
/// # Errors
/// Returns an error if neither source has a non-empty key.
pub fn resolve_anon_key(config_anon_key: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = config_anon_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::env::var(env_var)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .with_context(|| {
            format!("No anon key available. Set {env_var} or anon_key in [backend].")
        })
}

/// Resolves the backend URL with precedence: env > config.
///
/// # Errors
/// Returns an error if no URL is configured or the URL is malformed.
pub fn resolve_base_url(config_base_url: Option<&str>, env_var: &str) -> Result<String> {
    if let Ok(env_url) = std::env::var(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed)?;
            return Ok(trimmed.to_string());
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed)?;
            return Ok(trimmed.to_string());
        }
    }

    anyhow::bail!("No backend URL configured. Set {env_var} or url in [backend].")
}

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid backend URL: {url}"))?;
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

/// Categories of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The API answered with a non-success status.
    HttpStatus,
    /// Connection failure or timeout.
    Transport,
    /// The response body did not have the expected shape.
    Parse,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::HttpStatus => write!(f, "http_status"),
            BackendErrorKind::Transport => write!(f, "transport"),
            BackendErrorKind::Parse => write!(f, "parse"),
        }
    }
}

/// Structured error from the auth backend.
#[derive(Debug, Clone)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// HTTP status, for [`BackendErrorKind::HttpStatus`].
    pub status: Option<u16>,
    /// One-line summary suitable for display.
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Creates an HTTP status error, pulling the message out of the GoTrue
    /// error body when there is one.
    pub fn http_status(status: u16, body: &str) -> Self {
        let message = match api_error_message(body) {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None if body.trim().is_empty() => format!("HTTP {status}"),
            None => format!("HTTP {status}: {}", body.trim()),
        };
        Self {
            kind: BackendErrorKind::HttpStatus,
            status: Some(status),
            message,
        }
    }

    fn transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(BackendErrorKind::Transport, "Request timed out")
        } else {
            Self::new(
                BackendErrorKind::Transport,
                format!("Request failed: {err}"),
            )
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// GoTrue has used several error shapes over time; take the first that fits.
fn api_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

// ============================================================================
// Wire types
// ============================================================================

/// A backend user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_sign_in_at: Option<String>,
}

/// A signed-in session.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    /// Unix seconds; older servers omit it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: AuthUser,
}

/// Sign-up answers with a session when email confirmation is off, and with
/// the bare user when it is on.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(AuthSession),
    User(AuthUser),
}

#[derive(Debug, Serialize)]
struct PasswordGrantRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrantRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a Value,
}

#[derive(Debug, Serialize)]
struct UpdateUserRequest<'a> {
    data: &'a Value,
}

// ============================================================================
// Client
// ============================================================================

/// Supabase Auth API client.
pub struct SupabaseAuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuthClient {
    /// Creates a client for a project URL (e.g. `https://xyz.supabase.co`).
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the credentials are rejected or the request fails.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthSession> {
        let request = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .json(&PasswordGrantRequest { email, password });
        self.send(request).await
    }

    /// Creates an account, storing `data` as user metadata.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the account cannot be created.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: &Value,
    ) -> BackendResult<SignUpResponse> {
        let request = self.http.post(self.endpoint("signup")).json(&SignUpRequest {
            email,
            password,
            data,
        });
        self.send(request).await
    }

    /// Merges `data` into the signed-in user's metadata.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the token is rejected or the request fails.
    pub async fn update_user(&self, access_token: &str, data: &Value) -> BackendResult<AuthUser> {
        let request = self
            .http
            .put(self.endpoint("user"))
            .bearer_auth(access_token)
            .json(&UpdateUserRequest { data });
        self.send(request).await
    }

    /// Fetches the user behind an access token.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the token is rejected or the request fails.
    pub async fn get_user(&self, access_token: &str) -> BackendResult<AuthUser> {
        let request = self.http.get(self.endpoint("user")).bearer_auth(access_token);
        self.send(request).await
    }

    /// Exchanges a refresh token for a new session.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the refresh token is rejected or the request fails.
    pub async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        let request = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshGrantRequest { refresh_token });
        self.send(request).await
    }

    /// Revokes the session behind an access token.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the request fails.
    pub async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let response = self
            .with_headers(self.http.post(self.endpoint("logout")))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| BackendError::transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::http_status(status.as_u16(), &body));
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("User-Agent", USER_AGENT)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BackendResult<T> {
        let response = self
            .with_headers(builder)
            .send()
            .await
            .map_err(|e| BackendError::transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::transport(&e))?;

        if !status.is_success() {
            return Err(BackendError::http_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            BackendError::new(
                BackendErrorKind::Parse,
                format!("Failed to decode auth response: {e}"),
            )
        })
    }
}
