//! # fleetlink-client
//!
//! Core HTTP pipeline for the fleet backend.
//!
//! This crate provides the foundational client with:
//! - Bearer authentication from a pluggable [`TokenStore`]
//! - Automatic retry of transient failures with linear backoff
//! - Single-flight token refresh and replay on HTTP 401
//! - Classification of every failure into one [`ErrorKind`]
//! - Per-request metrics and an optional TTL response cache
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (fleetlink-auth, fleetlink-records, fleetlink-live)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ApiClient                            │
//! │  - Attaches the bearer token, refreshes it once on 401      │
//! │  - Retries 5xx / network failures                           │
//! │  - Response cache and request metrics                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TokenStore                           │
//! │  - load / save / clear the access+refresh pair              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleetlink_client::{ApiClient, ApiRequest, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fleetlink_client::Error> {
//!     let client = ApiClient::with_memory_store(
//!         ClientConfig::builder()
//!             .with_base_url("https://fleet.example.com")
//!             .build(),
//!     )?;
//!
//!     let me: serde_json::Value = client.get_json("/auth/me").await?;
//!     println!("{me}");
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod error;
mod metrics;
mod request;
mod response;
mod retry;
mod token;

pub use cache::ResponseCache;
pub use client::ApiClient;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_REFRESH_PATH};
pub use error::{Error, ErrorKind, Result};
pub use metrics::{MetricsSummary, RequestMetric, RequestMetrics};
pub use request::{ApiRequest, CachePolicy, RequestMethod};
pub use response::sanitize_error_message;
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use token::{MemoryTokenStore, SessionTokens, TokenStore};

/// Default User-Agent string.
pub const USER_AGENT: &str = concat!("fleetlink/", env!("CARGO_PKG_VERSION"));
