//! Login and session payloads.

use fleetlink_client::SessionTokens;
use serde::{Deserialize, Serialize};

/// Credentials submitted to the login endpoint.
///
/// The password is redacted in Debug output.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    /// Login name or e-mail.
    pub login: String,
    password: String,
    /// Database to log into, for multi-database deployments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

impl LoginRequest {
    /// Create a login request.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            database: None,
        }
    }

    /// Select the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Identity of the logged-in user as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default, alias = "uid", alias = "id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company_id: Option<i64>,
    /// Any further fields the backend includes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response from the login endpoint.
///
/// Both tokens are redacted in Debug output.
#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds, if reported.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(flatten)]
    pub session: SessionInfo,
}

impl std::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("session", &self.session)
            .finish()
    }
}

impl LoginResponse {
    /// The token pair to persist.
    pub fn tokens(&self) -> SessionTokens {
        SessionTokens::new(self.access_token.clone(), self.refresh_token.clone())
    }
}
