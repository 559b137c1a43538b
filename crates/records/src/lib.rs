//! # fleetlink-records
//!
//! Generic record operations for the fleet backend.
//!
//! Every model (vehicles, trips, drivers, ...) is reached through the same
//! `call_kw` RPC endpoint, so this crate is a thin typed layer over the
//! request pipeline in `fleetlink-client`:
//!
//! - **Search** - [`Domain`] filters with paging and ordering
//! - **CRUD** - `read`, `create`, `write`, `unlink`
//! - **Raw RPC** - `call_kw` for any other model method
//! - **Webhooks** - list, register and remove webhook subscriptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleetlink_records::{Domain, RecordsClient, SearchOptions};
//!
//! let records = RecordsClient::new(client.clone());
//! let late = records
//!     .search_count("vehicle.trip", &Domain::new().eq("state", "late"))
//!     .await?;
//! ```

mod client;
mod domain;
mod webhooks;

pub use client::{RecordsClient, RecordsPaths, SearchOptions};
pub use domain::Domain;
pub use webhooks::{NewWebhook, Webhook};

// Errors are shared with the request pipeline.
pub use fleetlink_client::{Error, ErrorKind, Result};
