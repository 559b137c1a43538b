//! # Live Channel
//!
//! WebSocket client with automatic reconnection, request/response
//! correlation and typed inbound streams.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌────────────┐   connect()    ┌────────────┐   open    ┌────────────┐
//! │Disconnected│ ─────────────► │ Connecting │ ────────► │ Connected  │
//! └────────────┘                └────────────┘           └─────┬──────┘
//!    ▲      ▲                       ▲    │ failure             │
//!    │      │   timer expired       │    │            close/error
//!    │      └───────────────────────┼────┴─────────────────────┤
//!    │        (base × attempt)      │                          │
//!    │                              └──── schedule reconnect ◄─┘
//!    │
//!    └── ceiling reached: stays Disconnected until connect()
//! ```
//!
//! `disconnect()` forces `Disconnected` from any state, cancels a pending
//! reconnect timer and is idempotent.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use fleetlink_client::RetryPolicy;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::event_bus::EventBus;
use crate::protocol::{
    DriverLocation, DriverStatus, InboundMessage, LocationRequest, LocationResponse,
    OutboundCommand, TripUpdate, VehiclePosition, WebhookEvent,
};

const OUTBOUND_CAPACITY: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Event bus topics emitted by the channel.
pub mod events {
    /// Socket opened. Data: `{user_id, url}`.
    pub const CONNECTED: &str = "live.connected";
    /// Socket closed or connection dropped. Data: `{user_id, reason}`.
    pub const DISCONNECTED: &str = "live.disconnected";
    /// Connection attempt or socket failed. Data: `{user_id, error}`.
    pub const ERROR: &str = "live.error";
    /// Reconnect timer armed. Data: `{user_id, attempt, delay_ms}`.
    pub const RECONNECT_SCHEDULED: &str = "live.reconnect_scheduled";
    /// Attempt ceiling reached. Data: `{user_id, attempts}`.
    pub const RECONNECT_EXHAUSTED: &str = "live.reconnect_exhausted";
}

// =============================================================================
// State
// =============================================================================

/// Connection state of a [`LiveChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, possibly waiting for a reconnect timer.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Channels the caller subscribed to; replayed on every open.
#[derive(Debug, Default)]
struct Subscriptions {
    live_tracking: bool,
    models: BTreeSet<String>,
}

impl Subscriptions {
    fn commands(&self) -> Vec<OutboundCommand> {
        let mut commands = Vec::with_capacity(self.models.len() + 1);
        if self.live_tracking {
            commands.push(OutboundCommand::SubscribeLiveTracking);
        }
        commands.extend(
            self.models
                .iter()
                .map(|model| OutboundCommand::SubscribeModelChannel {
                    model: model.clone(),
                }),
        );
        commands
    }
}

struct ChannelState {
    connection: ConnectionState,
    user_id: Option<i64>,
    reconnect: RetryPolicy,
    outgoing: Option<mpsc::Sender<OutboundCommand>>,
    session: Option<SessionHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Bumped whenever the current socket or timer is superseded; tasks
    /// carrying an older epoch have no further effect.
    epoch: u64,
    subscriptions: Subscriptions,
    disposed: bool,
}

impl ChannelState {
    fn cancel_tasks(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.outgoing = None;
    }
}

/// The task driving one socket and its shutdown signal.
///
/// Callers may still hold clones of the outbound sender, so shutdown is
/// signalled separately from the command queue.
struct SessionHandle {
    task: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl SessionHandle {
    /// Ask the session to send a close frame and stop dispatching.
    fn close(self) {
        let _ = self.shutdown.send(());
    }
}

struct Streams {
    vehicle_positions: broadcast::Sender<VehiclePosition>,
    trip_updates: broadcast::Sender<TripUpdate>,
    location_requests: broadcast::Sender<LocationRequest>,
    location_responses: broadcast::Sender<LocationResponse>,
    driver_statuses: broadcast::Sender<DriverStatus>,
}

impl Streams {
    fn new(capacity: usize) -> Self {
        Self {
            vehicle_positions: broadcast::channel(capacity).0,
            trip_updates: broadcast::channel(capacity).0,
            location_requests: broadcast::channel(capacity).0,
            location_responses: broadcast::channel(capacity).0,
            driver_statuses: broadcast::channel(capacity).0,
        }
    }
}

type PendingTable = Mutex<HashMap<String, oneshot::Sender<Option<DriverLocation>>>>;

struct Inner {
    config: LiveConfig,
    bus: Arc<EventBus>,
    state: Mutex<ChannelState>,
    pending: PendingTable,
    streams: Streams,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(session) = state.session.take() {
            session.task.abort();
        }
    }
}

/// Removes a pending entry when the waiting call finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}

// =============================================================================
// Live Channel
// =============================================================================

/// Persistent WebSocket connection for one user.
///
/// Cloning is cheap; clones share the socket, the pending-request table and
/// the streams.
///
/// ## Usage
/// ```rust,ignore
/// let bus = Arc::new(EventBus::new());
/// let channel = LiveChannel::new(
///     LiveConfig::builder().with_base_url("https://fleet.example.com").build(),
///     bus,
/// );
///
/// let mut positions = channel.vehicle_positions();
/// channel.subscribe_live_tracking().await?;
/// channel.connect(user_id).await?;
///
/// while let Ok(position) = positions.recv().await {
///     println!("{} at {},{}", position.vehicle_id, position.latitude, position.longitude);
/// }
/// ```
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("LiveChannel")
            .field("state", &state.connection)
            .field("user_id", &state.user_id)
            .field("reconnect_attempts", &state.reconnect.attempt())
            .finish_non_exhaustive()
    }
}

impl LiveChannel {
    /// Create a channel. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: LiveConfig, bus: Arc<EventBus>) -> Self {
        let state = ChannelState {
            connection: ConnectionState::Disconnected,
            user_id: None,
            reconnect: RetryPolicy::new(config.reconnect.clone()),
            outgoing: None,
            session: None,
            reconnect_timer: None,
            epoch: 0,
            subscriptions: Subscriptions::default(),
            disposed: false,
        };

        Self {
            inner: Arc::new(Inner {
                streams: Streams::new(config.stream_capacity),
                config,
                bus,
                state: Mutex::new(state),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    /// Returns true if the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Identity the channel connects as.
    pub fn user_id(&self) -> Option<i64> {
        self.lock_state().user_id
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock_state().reconnect.attempt()
    }

    /// Location requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The shared event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Vehicle positions from `webhook_event`s of the position model.
    pub fn vehicle_positions(&self) -> broadcast::Receiver<VehiclePosition> {
        self.inner.streams.vehicle_positions.subscribe()
    }

    /// Trip changes from `webhook_event`s of the trip model.
    pub fn trip_updates(&self) -> broadcast::Receiver<TripUpdate> {
        self.inner.streams.trip_updates.subscribe()
    }

    /// Requests for this client's location.
    pub fn location_requests(&self) -> broadcast::Receiver<LocationRequest> {
        self.inner.streams.location_requests.subscribe()
    }

    /// Every `location_response` received.
    pub fn location_responses(&self) -> broadcast::Receiver<LocationResponse> {
        self.inner.streams.location_responses.subscribe()
    }

    /// Driver status broadcasts.
    pub fn driver_statuses(&self) -> broadcast::Receiver<DriverStatus> {
        self.inner.streams.driver_statuses.subscribe()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the socket for `user_id`.
    ///
    /// A no-op while connecting or connected as the same user. Connecting as
    /// another user replaces the current socket. On failure the error is
    /// returned and a reconnect is scheduled.
    #[instrument(skip(self))]
    pub async fn connect(&self, user_id: i64) -> Result<()> {
        let epoch = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(Error::new(ErrorKind::Disposed));
            }
            if state.user_id == Some(user_id)
                && state.connection != ConnectionState::Disconnected
            {
                debug!(state = %state.connection, "Already connecting or connected");
                return Ok(());
            }

            state.cancel_tasks();
            state.user_id = Some(user_id);
            state.reconnect.reset();
            state.epoch += 1;
            state.connection = ConnectionState::Connecting;
            state.epoch
        };

        self.open(user_id, epoch).await
    }

    /// Close the socket and cancel any pending reconnect.
    pub fn disconnect(&self) {
        let (previous, user_id) = {
            let mut state = self.lock_state();
            state.cancel_tasks();
            state.epoch += 1;
            state.reconnect.reset();
            let previous =
                std::mem::replace(&mut state.connection, ConnectionState::Disconnected);
            (previous, state.user_id)
        };

        if previous != ConnectionState::Disconnected {
            info!(?user_id, "Live channel disconnected");
            self.inner.bus.emit(
                events::DISCONNECTED,
                json!({"user_id": user_id, "reason": "disconnect requested"}),
            );
        }
    }

    /// Disconnect for good. Pending location requests fail with
    /// [`ErrorKind::Disposed`]; later calls to `connect` are rejected.
    pub fn dispose(&self) {
        self.disconnect();
        self.lock_state().disposed = true;

        let waiters: Vec<_> = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if !waiters.is_empty() {
            debug!(count = waiters.len(), "Rejecting pending location requests");
        }
        // Dropping the senders wakes every waiter with a receive error.
        drop(waiters);
    }

    async fn open(&self, user_id: i64, epoch: u64) -> Result<()> {
        let url = match self.inner.config.socket_url(user_id) {
            Ok(url) => url,
            Err(err) => {
                self.connection_failed(epoch, &err);
                return Err(err);
            }
        };

        debug!(url = %url, "Opening WebSocket");
        let ws = match tokio::time::timeout(
            self.inner.config.connect_timeout,
            connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                ws
            }
            Ok(Err(err)) => {
                let err = Error::from(err);
                self.connection_failed(epoch, &err);
                return Err(err);
            }
            Err(_) => {
                let err = Error::new(ErrorKind::Timeout(format!(
                    "Handshake did not complete within {:?}",
                    self.inner.config.connect_timeout
                )));
                self.connection_failed(epoch, &err);
                return Err(err);
            }
        };

        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if state.epoch != epoch || state.disposed {
                debug!("Connection superseded during handshake, dropping socket");
                return Ok(());
            }

            // Written by the session ahead of anything queued on `outgoing`.
            let replay = state.subscriptions.commands();
            if !replay.is_empty() {
                debug!(count = replay.len(), "Replaying subscriptions");
            }

            state.connection = ConnectionState::Connected;
            state.reconnect.reset();
            state.outgoing = Some(outgoing_tx);
            let task = tokio::spawn(run_session(
                Arc::downgrade(&self.inner),
                ws,
                Session {
                    replay,
                    outgoing_rx,
                    shutdown_rx,
                    epoch,
                    ping_interval: self.inner.config.ping_interval,
                },
            ));
            state.session = Some(SessionHandle {
                task,
                shutdown: shutdown_tx,
            });
        }

        info!(user_id, "Live channel connected");
        self.inner.bus.emit(
            events::CONNECTED,
            json!({"user_id": user_id, "url": url.as_str()}),
        );
        Ok(())
    }

    fn connection_failed(&self, epoch: u64, err: &Error) {
        warn!(error = %err, "Live channel connection failed");
        self.handle_drop(epoch, Some(err.to_string()), false);
    }

    fn connection_lost(&self, epoch: u64, reason: Option<Error>) {
        match &reason {
            Some(err) => warn!(error = %err, "Live channel connection lost"),
            None => info!("Live channel closed by server"),
        }
        self.handle_drop(epoch, reason.map(|e| e.to_string()), true);
    }

    /// Move to `Disconnected` and arm the reconnect timer, unless the
    /// socket or timer that failed has already been superseded.
    fn handle_drop(&self, epoch: u64, error: Option<String>, was_open: bool) {
        let (user_id, plan) = {
            let mut state = self.lock_state();
            if state.epoch != epoch || state.disposed {
                return;
            }
            state.connection = ConnectionState::Disconnected;
            state.outgoing = None;
            state.session = None;
            let plan = self.schedule_reconnect(&mut state);
            (state.user_id, plan)
        };

        if was_open {
            self.inner.bus.emit(
                events::DISCONNECTED,
                json!({"user_id": user_id, "reason": error.as_deref().unwrap_or("closed")}),
            );
        }
        if let Some(error) = error {
            self.inner
                .bus
                .emit(events::ERROR, json!({"user_id": user_id, "error": error}));
        }

        match plan {
            ReconnectPlan::Scheduled { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                self.inner.bus.emit(
                    events::RECONNECT_SCHEDULED,
                    json!({
                        "user_id": user_id,
                        "attempt": attempt,
                        "delay_ms": delay.as_millis() as u64,
                    }),
                );
            }
            ReconnectPlan::Exhausted { attempts } => {
                error!(attempts, "Max reconnection attempts reached");
                self.inner.bus.emit(
                    events::RECONNECT_EXHAUSTED,
                    json!({"user_id": user_id, "attempts": attempts}),
                );
            }
        }
    }

    fn schedule_reconnect(&self, state: &mut ChannelState) -> ReconnectPlan {
        let Some(delay) = state.reconnect.next_delay() else {
            return ReconnectPlan::Exhausted {
                attempts: state.reconnect.attempt(),
            };
        };

        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.inner);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                LiveChannel { inner }.reconnect(epoch).await;
            }
        }));

        ReconnectPlan::Scheduled {
            attempt: state.reconnect.attempt(),
            delay,
        }
    }

    async fn reconnect(&self, epoch: u64) {
        let user_id = {
            let mut state = self.lock_state();
            if state.epoch != epoch
                || state.disposed
                || state.connection != ConnectionState::Disconnected
            {
                return;
            }
            let Some(user_id) = state.user_id else {
                return;
            };
            state.reconnect_timer = None;
            state.connection = ConnectionState::Connecting;
            user_id
        };

        if let Err(err) = self.open(user_id, epoch).await {
            debug!(error = %err, "Reconnect attempt failed");
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn outgoing(&self) -> Result<mpsc::Sender<OutboundCommand>> {
        let state = self.lock_state();
        if state.disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }
        match (&state.outgoing, state.connection) {
            (Some(tx), ConnectionState::Connected) => Ok(tx.clone()),
            _ => Err(Error::new(ErrorKind::NotConnected)),
        }
    }

    /// Queue a command on the open socket.
    pub async fn send_command(&self, command: OutboundCommand) -> Result<()> {
        let tx = self.outgoing()?;
        tx.send(command)
            .await
            .map_err(|_| Error::new(ErrorKind::NotConnected))
    }

    /// Send `command` now if connected; otherwise it goes out with the
    /// subscription replay on the next open.
    async fn send_subscription(&self, command: OutboundCommand) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.send_command(command).await
    }

    /// Subscribe to the live-tracking broadcast.
    pub async fn subscribe_live_tracking(&self) -> Result<()> {
        self.lock_state().subscriptions.live_tracking = true;
        self.send_subscription(OutboundCommand::SubscribeLiveTracking)
            .await
    }

    /// Subscribe to a model's change channel.
    pub async fn subscribe_model_channel(&self, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        self.lock_state().subscriptions.models.insert(model.clone());
        self.send_subscription(OutboundCommand::SubscribeModelChannel { model })
            .await
    }

    /// Unsubscribe from a model's change channel.
    pub async fn unsubscribe_model_channel(&self, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        self.lock_state().subscriptions.models.remove(&model);
        self.send_subscription(OutboundCommand::UnsubscribeModelChannel { model })
            .await
    }

    /// Send a keep-alive ping.
    pub async fn ping(&self) -> Result<()> {
        self.send_command(OutboundCommand::Ping).await
    }

    /// Broadcast a driver's availability.
    pub async fn send_driver_status(
        &self,
        driver_id: i64,
        status: impl Into<String>,
    ) -> Result<()> {
        self.send_command(OutboundCommand::DriverStatusUpdate {
            driver_id,
            status: status.into(),
        })
        .await
    }

    /// Answer a [`LocationRequest`], echoing its correlation id.
    pub async fn send_location_response(
        &self,
        request_id: impl Into<String>,
        location: Option<DriverLocation>,
    ) -> Result<()> {
        self.send_command(OutboundCommand::LocationResponse {
            request_id: request_id.into(),
            location,
        })
        .await
    }

    /// Ask for a driver's location and wait for the matching response.
    ///
    /// Returns `Ok(None)` if nothing arrives within `timeout` (the config
    /// default when `None`); a later response for the same id is ignored.
    #[instrument(skip(self))]
    pub async fn request_driver_location(
        &self,
        driver_id: i64,
        timeout: Option<Duration>,
    ) -> Result<Option<DriverLocation>> {
        let tx = self.outgoing()?;
        let timeout = timeout.unwrap_or(self.inner.config.location_timeout);

        let request_id = Uuid::new_v4().to_string();
        let (done_tx, done_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), done_tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            request_id: request_id.clone(),
        };

        tx.send(OutboundCommand::RequestDriverLocation {
            request_id: request_id.clone(),
            driver_id,
        })
        .await
        .map_err(|_| Error::new(ErrorKind::NotConnected))?;
        drop(tx);

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(location)) => Ok(location),
            Ok(Err(_)) => Err(Error::new(ErrorKind::Disposed)),
            Err(_) => {
                debug!(%request_id, "Location request timed out");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn dispatch(&self, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Dropping malformed message");
                return;
            }
        };

        debug!(msg_type = %message.type_name(), "Received message");
        let streams = &self.inner.streams;

        match message {
            InboundMessage::Pong => debug!("Received pong"),
            InboundMessage::Status(payload) => info!(%payload, "Server status"),
            InboundMessage::Error { message } => warn!(%message, "Server reported an error"),
            InboundMessage::WebhookEvent(event) => self.route_webhook(event),
            InboundMessage::RequestLocation(request) => {
                let _ = streams.location_requests.send(request);
            }
            InboundMessage::LocationResponse(response) => {
                let waiter = self
                    .inner
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.request_id);

                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response.location.clone());
                    }
                    None => debug!(
                        request_id = %response.request_id,
                        "No pending request for response"
                    ),
                }
                let _ = streams.location_responses.send(response);
            }
            InboundMessage::DriverStatus(status) => {
                let _ = streams.driver_statuses.send(status);
            }
            InboundMessage::Unknown { kind, .. } => {
                warn!(msg_type = %kind, "Dropping message of unknown type")
            }
        }
    }

    fn route_webhook(&self, event: WebhookEvent) {
        let config = &self.inner.config;
        let streams = &self.inner.streams;

        if event.model == config.vehicle_position_model {
            match serde_json::from_value::<VehiclePosition>(event.data) {
                Ok(position) => {
                    let _ = streams.vehicle_positions.send(position);
                }
                Err(err) => warn!(error = %err, "Dropping malformed vehicle position"),
            }
        } else if event.model == config.trip_model {
            match serde_json::from_value::<TripUpdate>(event.data) {
                Ok(trip) => {
                    let _ = streams.trip_updates.send(trip);
                }
                Err(err) => warn!(error = %err, "Dropping malformed trip update"),
            }
        } else {
            warn!(model = %event.model, "Dropping webhook event for unrouted model");
        }
    }
}

enum ReconnectPlan {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Everything a session task needs besides the socket.
struct Session {
    /// Subscription commands written before the outbound queue is drained.
    replay: Vec<OutboundCommand>,
    outgoing_rx: mpsc::Receiver<OutboundCommand>,
    shutdown_rx: oneshot::Receiver<()>,
    epoch: u64,
    ping_interval: Duration,
}

async fn write_command(write: &mut WsSink, command: &OutboundCommand) -> Result<()> {
    let frame = command.to_json()?;
    debug!(msg_type = %command.type_name(), "Sending message");
    write.send(WsMessage::Text(frame.into())).await?;
    Ok(())
}

/// Drive one socket: replay subscriptions, drain the outbound queue,
/// dispatch inbound frames in arrival order and send keep-alive pings.
async fn run_session(channel: Weak<Inner>, ws: WsStream, session: Session) {
    let Session {
        replay,
        mut outgoing_rx,
        mut shutdown_rx,
        epoch,
        ping_interval,
    } = session;
    let (mut write, mut read) = ws.split();

    let start = tokio::time::Instant::now() + ping_interval;
    let mut ping = tokio::time::interval_at(start, ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut replay_error = None;
    for command in &replay {
        if let Err(err) = write_command(&mut write, command).await {
            replay_error = Some(err);
            break;
        }
    }

    let reason: Option<Error> = match replay_error {
        Some(err) => Some(err),
        None => loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    debug!("Session shut down, closing socket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return;
                }

                command = outgoing_rx.recv() => {
                    let Some(command) = command else {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    };
                    if let Err(err) = write_command(&mut write, &command).await {
                        break Some(err);
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let Some(inner) = channel.upgrade() else {
                                return;
                            };
                            LiveChannel { inner }.dispatch(&text);
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(err) = write.send(WsMessage::Pong(data)).await {
                                break Some(err.into());
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            break None;
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!("Received unexpected binary message");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break Some(err.into()),
                        None => break None,
                    }
                }

                _ = ping.tick() => {
                    if let Err(err) = write_command(&mut write, &OutboundCommand::Ping).await {
                        break Some(err);
                    }
                    debug!("Sent ping");
                }
            }
        },
    };

    if let Some(inner) = channel.upgrade() {
        LiveChannel { inner }.connection_lost(epoch, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> LiveChannel {
        LiveChannel::new(LiveConfig::default(), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_subscription_replay_order() {
        let mut subscriptions = Subscriptions::default();
        subscriptions.models.insert("vehicle.trip".into());
        subscriptions.models.insert("fleet.vehicle".into());
        assert_eq!(subscriptions.commands().len(), 2);

        subscriptions.live_tracking = true;
        let commands = subscriptions.commands();
        assert_eq!(commands[0], OutboundCommand::SubscribeLiveTracking);
        assert_eq!(
            commands[1],
            OutboundCommand::SubscribeModelChannel {
                model: "fleet.vehicle".into()
            }
        );
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let channel = channel();
        assert!(channel.ping().await.unwrap_err().is_not_connected());
        assert!(channel
            .request_driver_location(1, None)
            .await
            .unwrap_err()
            .is_not_connected());
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_subscriptions_are_recorded_while_disconnected() {
        let channel = channel();
        channel.subscribe_live_tracking().await.unwrap();
        channel.subscribe_model_channel("fleet.vehicle").await.unwrap();
        channel.subscribe_model_channel("vehicle.trip").await.unwrap();
        channel.unsubscribe_model_channel("vehicle.trip").await.unwrap();

        let state = channel.lock_state();
        assert!(state.subscriptions.live_tracking);
        assert_eq!(state.subscriptions.models.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_emits_nothing() {
        let channel = channel();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        channel
            .event_bus()
            .subscribe(crate::event_bus::WILDCARD, move |_| *counter.lock().unwrap() += 1);

        channel.disconnect();
        channel.disconnect();
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disposed_channel_rejects_connect() {
        let channel = channel();
        channel.dispose();
        assert!(channel.connect(1).await.unwrap_err().is_disposed());
        assert!(channel.ping().await.unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn test_dispatch_resolves_pending_request() {
        let channel = channel();
        let (tx, rx) = oneshot::channel();
        channel
            .inner
            .pending
            .lock()
            .unwrap()
            .insert("r1".to_string(), tx);
        let mut responses = channel.location_responses();

        channel.dispatch(
            r#"{"type":"location_response","request_id":"r1","location":{"driver_id":2,"latitude":1.0,"longitude":2.0}}"#,
        );

        assert_eq!(rx.await.unwrap(), Some(DriverLocation::new(2, 1.0, 2.0)));
        assert_eq!(responses.recv().await.unwrap().request_id, "r1");
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_garbage() {
        let channel = channel();
        let mut statuses = channel.driver_statuses();

        channel.dispatch("{{{");
        channel.dispatch(r#"{"type":"mystery"}"#);
        channel.dispatch(r#"{"type":"location_response","request_id":"nobody"}"#);
        channel.dispatch(r#"{"type":"driver_status","driver_id":5,"status":"busy"}"#);

        let status = statuses.recv().await.unwrap();
        assert_eq!(status.driver_id, 5);
        assert_eq!(status.status, "busy");
    }
}
