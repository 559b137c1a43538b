//! # fleetlink
//!
//! Client SDK for a fleet-management backend.
//!
//! ## Security
//!
//! - Tokens are redacted in `Debug` output
//! - Tracing spans skip credential parameters
//! - Server messages are scrubbed of bearer tokens before landing in errors
//!
//! ## Crates
//!
//! - **fleetlink-client** - Request pipeline: retry, single-flight token refresh, error classification, metrics, response cache
//! - **fleetlink-auth** - Login, logout, refresh and current user
//! - **fleetlink-records** - Model records over `call_kw`, webhook subscriptions
//! - **fleetlink-live** - WebSocket live tracking with reconnection and correlated location requests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetlink::{ApiClient, AuthService, ClientConfig, LoginRequest, RecordsClient, Domain};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::with_memory_store(
//!         ClientConfig::builder()
//!             .with_base_url("https://fleet.example.com")
//!             .build(),
//!     )?;
//!
//!     let auth = AuthService::new(client.clone());
//!     let session = auth.login(&LoginRequest::new("dispatcher", "secret")).await?;
//!
//!     let records = RecordsClient::new(client.clone());
//!     let active = records
//!         .search_count("fleet.vehicle", &Domain::new().eq("active", true))
//!         .await?;
//!     println!("{active} active vehicles");
//!
//!     auth.logout().await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "auth")]
pub use fleetlink_auth as auth;
#[cfg(feature = "client")]
pub use fleetlink_client as client;
#[cfg(feature = "live")]
pub use fleetlink_live as live;
#[cfg(feature = "records")]
pub use fleetlink_records as records;

// Re-export commonly used types at the top level
#[cfg(feature = "auth")]
pub use fleetlink_auth::{AuthService, LoginRequest, SessionInfo};
#[cfg(feature = "client")]
pub use fleetlink_client::{ApiClient, ApiRequest, ClientConfig, SessionTokens, TokenStore};
#[cfg(feature = "live")]
pub use fleetlink_live::{EventBus, LiveChannel, LiveConfig};
#[cfg(feature = "records")]
pub use fleetlink_records::{Domain, RecordsClient, SearchOptions};
