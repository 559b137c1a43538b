//! # fleetlink-auth
//!
//! Authentication for the fleet backend.
//!
//! ## Security
//!
//! - Passwords and tokens are redacted in Debug output
//! - Tracing skips credential parameters
//! - Tokens are only ever held by the client's [`TokenStore`](fleetlink_client::TokenStore)
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleetlink_auth::{AuthService, LoginRequest};
//! use fleetlink_client::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fleetlink_client::Error> {
//!     let client = ApiClient::with_memory_store(ClientConfig::default())?;
//!     let auth = AuthService::new(client);
//!
//!     let session = auth.login(&LoginRequest::new("dispatcher", "secret")).await?;
//!     println!("logged in as {:?}", session.session.name);
//!
//!     auth.logout().await?;
//!     Ok(())
//! }
//! ```

mod service;
mod types;

pub use service::{AuthPaths, AuthService};
pub use types::{LoginRequest, LoginResponse, SessionInfo};
