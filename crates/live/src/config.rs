//! Live channel configuration.

use std::time::Duration;

use fleetlink_client::{BackoffStrategy, RetryConfig};
use url::Url;

use crate::error::{Error, ErrorKind, Result};

/// Default WebSocket path; the user id is appended to it.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Model whose webhook events carry vehicle positions.
pub const DEFAULT_VEHICLE_POSITION_MODEL: &str = "vehicle.position";

/// Model whose webhook events carry trip updates.
pub const DEFAULT_TRIP_MODEL: &str = "vehicle.trip";

/// Configuration for a [`LiveChannel`](crate::LiveChannel).
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// HTTP(S) or WS(S) base URL of the backend.
    pub base_url: String,
    /// Path the user id is appended to.
    pub ws_path: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Reconnect policy. `max_retries` is the attempt ceiling.
    pub reconnect: RetryConfig,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Default wait for a driver location response.
    pub location_timeout: Duration,
    /// Webhook model routed to the vehicle-position stream.
    pub vehicle_position_model: String,
    /// Webhook model routed to the trip-update stream.
    pub trip_model: String,
    /// Buffer size of each broadcast stream.
    pub stream_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8069".to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect: RetryConfig::default()
                .with_max_retries(5)
                .with_base_delay(Duration::from_secs(2))
                .with_backoff(BackoffStrategy::Linear),
            ping_interval: Duration::from_secs(30),
            location_timeout: Duration::from_secs(10),
            vehicle_position_model: DEFAULT_VEHICLE_POSITION_MODEL.to_string(),
            trip_model: DEFAULT_TRIP_MODEL.to_string(),
            stream_capacity: 64,
        }
    }
}

impl LiveConfig {
    /// Create a new config builder.
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::default()
    }

    /// WebSocket URL for a user: `<ws|wss>://host[:port]/<ws_path>/<user_id>`.
    ///
    /// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` are kept.
    pub fn socket_url(&self, user_id: i64) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::new(ErrorKind::InvalidUrl(format!(
                    "Unsupported scheme '{}'",
                    other
                ))))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            Error::new(ErrorKind::InvalidUrl(format!(
                "Cannot use scheme '{}' for {}",
                scheme, self.base_url
            )))
        })?;

        let ws_path = self.ws_path.trim_matches('/');
        if ws_path.is_empty() {
            url.set_path(&format!("/{}", user_id));
        } else {
            url.set_path(&format!("/{}/{}", ws_path, user_id));
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(url)
    }
}

/// Builder for LiveConfig.
#[derive(Debug, Default)]
pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl LiveConfigBuilder {
    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set the WebSocket path.
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.config.ws_path = path.into();
        self
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Set the reconnect attempt ceiling.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_retries = attempts;
        self
    }

    /// Set the keep-alive ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the default location request timeout.
    pub fn with_location_timeout(mut self, timeout: Duration) -> Self {
        self.config.location_timeout = timeout;
        self
    }

    /// Set the webhook model names routed to the position and trip streams.
    pub fn with_models(
        mut self,
        vehicle_position_model: impl Into<String>,
        trip_model: impl Into<String>,
    ) -> Self {
        self.config.vehicle_position_model = vehicle_position_model.into();
        self.config.trip_model = trip_model.into();
        self
    }

    /// Set the broadcast stream buffer size.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.config.stream_capacity = capacity.max(1);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> LiveConfig {
        self.config
    }
}
