//! # fleetlink-live
//!
//! Live GPS tracking over a persistent WebSocket.
//!
//! - One socket per [`LiveChannel`], routed by user id
//! - Automatic reconnection with linear backoff and an attempt ceiling
//! - `request_driver_location` correlated by id, with timeout
//! - Typed broadcast streams for positions, trips, location traffic and
//!   driver status
//! - Lifecycle notifications on a shared [`EventBus`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetlink_live::{events, EventBus, LiveChannel, LiveConfig};
//!
//! let bus = Arc::new(EventBus::new());
//! bus.subscribe(events::DISCONNECTED, |event| eprintln!("lost: {}", event.data));
//!
//! let channel = LiveChannel::new(
//!     LiveConfig::builder().with_base_url("https://fleet.example.com").build(),
//!     Arc::clone(&bus),
//! );
//! channel.connect(user_id).await?;
//!
//! if let Some(location) = channel.request_driver_location(driver_id, None).await? {
//!     println!("driver at {},{}", location.latitude, location.longitude);
//! }
//! ```

mod channel;
mod config;
mod error;
mod event_bus;
mod protocol;

pub use channel::{events, ConnectionState, LiveChannel};
pub use config::{
    LiveConfig, LiveConfigBuilder, DEFAULT_TRIP_MODEL, DEFAULT_VEHICLE_POSITION_MODEL,
    DEFAULT_WS_PATH,
};
pub use error::{Error, ErrorKind, Result};
pub use event_bus::{BusEvent, EventBus, ListenerId, WILDCARD};
pub use protocol::{
    DriverLocation, DriverStatus, InboundMessage, LocationRequest, LocationResponse,
    OutboundCommand, TripUpdate, VehiclePosition, WebhookEvent,
};
