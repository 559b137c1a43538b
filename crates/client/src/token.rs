//! Session tokens and the store that holds them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// An access/refresh token pair.
///
/// The pair is always saved and cleared together. Both tokens are redacted
/// in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Longer-lived credential used to mint a new access token.
    pub refresh_token: String,
}

impl SessionTokens {
    /// Create a new token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Replace the access token, keeping the refresh token unless a new one
    /// was issued.
    pub fn rotated(&self, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
        }
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Trait for token storage implementations.
///
/// Applications back this with whatever secure storage the platform offers;
/// the pipeline only ever loads, saves or clears the whole pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the current pair, if any.
    async fn load(&self) -> Result<Option<SessionTokens>>;

    /// Replace the current pair.
    async fn save(&self, tokens: &SessionTokens) -> Result<()>;

    /// Forget the current pair.
    async fn clear(&self) -> Result<()>;
}

/// In-memory token store. Tokens live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<SessionTokens>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a pair.
    pub fn with_tokens(tokens: SessionTokens) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<SessionTokens>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn save(&self, tokens: &SessionTokens) -> Result<()> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
