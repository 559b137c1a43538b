//! Authentication service built on the request pipeline.

use fleetlink_client::{ApiClient, ApiRequest, Result};
use tracing::{info, instrument, warn};

use crate::types::{LoginRequest, LoginResponse, SessionInfo};

/// Endpoints used by [`AuthService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    pub login: String,
    pub logout: String,
    pub me: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            logout: "/auth/logout".to_string(),
            me: "/auth/me".to_string(),
        }
    }
}

/// Login, logout and session management.
///
/// Tokens are persisted in the [`ApiClient`]'s token store, so every other
/// service sharing that client is authenticated by a successful login.
#[derive(Debug, Clone)]
pub struct AuthService {
    client: ApiClient,
    paths: AuthPaths,
}

impl AuthService {
    /// Create a service using the default endpoints.
    pub fn new(client: ApiClient) -> Self {
        Self::with_paths(client, AuthPaths::default())
    }

    /// Create a service using custom endpoints.
    pub fn with_paths(client: ApiClient, paths: AuthPaths) -> Self {
        Self { client, paths }
    }

    /// The underlying client.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Log in and persist the returned token pair.
    #[instrument(skip(self, request), fields(login = %request.login))]
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let api_request = ApiRequest::post(self.paths.login.as_str())
            .unauthenticated()
            .json(request)?;

        let response: LoginResponse = self.client.send_json(api_request).await?;
        self.client.store_session(&response.tokens()).await?;

        info!(user_id = ?response.session.user_id, "Logged in");
        Ok(response)
    }

    /// Log out.
    ///
    /// The remote call is best effort; local tokens are cleared regardless
    /// of its outcome.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        if self.client.is_authenticated().await {
            let request = ApiRequest::post(self.paths.logout.as_str());
            if let Err(err) = self.client.send(request).await {
                warn!(error = %err, "Remote logout failed, clearing local session anyway");
            }
        }

        self.client.clear_session().await?;
        info!("Logged out");
        Ok(())
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<String> {
        self.client.refresh_session().await
    }

    /// Fetch the logged-in user.
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> Result<SessionInfo> {
        self.client.get_json(&self.paths.me).await
    }

    /// Returns true if a session is stored locally.
    pub async fn is_authenticated(&self) -> bool {
        self.client.is_authenticated().await
    }
}
