//! Serial link to the deej board
//!
//! The [`LinkManager`] owns the connection lifecycle:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      └────────── error ───────┘   read error / stop
//!      ◀───────────────────────────────────────────┘
//! ```
//!
//! Every received line is handed to its own task, which decodes it, feeds
//! slider frames through the [`SliderTracker`] and publishes the resulting
//! moves on the [`EventBus`]. An unexpected disconnect starts a reconnect
//! loop with a fixed backoff that only ends on success or shutdown.
//!
//! Misconfiguration errors (missing port, no permission) are final only
//! when connecting on request ([`LinkManager::connect_with_retries`],
//! [`LinkManager::restart`]). Inside the reconnect loop they are retried
//! like any other failure, since unplugging the board removes its device
//! node too.

pub mod reader;
pub mod serial;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::ConnectionInfo;
use crate::events::EventBus;
use crate::notify::Notifier;
use crate::protocol::{Command, CommandResponse, LinkHealth, Message};
use crate::slider::SliderTracker;

pub use reader::LineReader;
pub use serial::{Connection, Connector, SerialConnector};

/// Delay between reconnect attempts
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

const LINK_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serial port {0} does not exist")]
    PortNotFound(String),

    #[error("permission denied opening serial port {0}")]
    PermissionDenied(String),

    #[error("no deej board found on any serial port")]
    NoDeviceFound,

    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial link closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Errors retrying cannot fix without a config change
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, LinkError::PortNotFound(_) | LinkError::PermissionDenied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Non-slider traffic and lifecycle notices from the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { port: String },
    Disconnected { reason: String },
    Health(LinkHealth),
    Startup { version: String, capabilities: String },
    Response(CommandResponse),
}

/// Owns the serial connection and its reconnect loop
pub struct LinkManager {
    connector: Arc<dyn Connector>,
    tracker: Arc<SliderTracker>,
    bus: Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    params: RwLock<ConnectionInfo>,

    state_tx: watch::Sender<LinkState>,
    events_tx: broadcast::Sender<LinkEvent>,

    writer: tokio::sync::Mutex<Option<serial::LinkWriter>>,
    /// Stops the current connection's reader task
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    /// Bumped on every connect/stop so stale readers can tell they are stale
    generation: AtomicU64,

    reconnecting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl LinkManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        params: ConnectionInfo,
        tracker: Arc<SliderTracker>,
        bus: Arc<EventBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (events_tx, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            connector,
            tracker,
            bus,
            notifier,
            params: RwLock::new(params),
            state_tx,
            events_tx,
            writer: tokio::sync::Mutex::new(None),
            stop_tx: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    pub fn params(&self) -> ConnectionInfo {
        self.params.read().clone()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: LinkEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    /// Open the link and start reading
    pub async fn connect(self: &Arc<Self>) -> Result<(), LinkError> {
        if self.state() == LinkState::Connected {
            return Ok(());
        }

        self.set_state(LinkState::Connecting);
        let params = self.params();

        let connection = match self.connector.connect(&params).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);
        *self.writer.lock().await = Some(connection.writer);

        let manager = Arc::clone(self);
        let reader = LineReader::new(connection.reader);
        tokio::spawn(async move {
            manager.read_loop(reader, stop_rx, generation).await;
        });

        self.set_state(LinkState::Connected);
        info!("✅ Connected to {} at {} baud", connection.port_name, params.baud_rate);
        self.emit(LinkEvent::Connected {
            port: connection.port_name,
        });

        Ok(())
    }

    /// Connect, retrying a fixed number of times
    ///
    /// Misconfiguration errors are returned immediately.
    pub async fn connect_with_retries(self: &Arc<Self>, attempts: usize, delay: Duration) -> Result<(), LinkError> {
        let mut attempt = 1;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_misconfiguration() || attempt >= attempts => return Err(e),
                Err(e) => {
                    debug!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: LineReader<serial::LinkReader>,
        mut stop_rx: watch::Receiver<bool>,
        generation: u64,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    debug!("Serial reader stopped");
                    return;
                }
                line = reader.next_line() => match line {
                    Ok(line) => {
                        let manager = Arc::clone(&self);
                        tokio::spawn(async move { manager.handle_line(&line) });
                    }
                    Err(e) => {
                        self.handle_disconnect(generation, e).await;
                        return;
                    }
                },
            }
        }
    }

    fn handle_line(&self, line: &str) {
        let Some(message) = Message::parse(line) else {
            debug!(line, "Discarding unrecognized line");
            return;
        };

        match message {
            Message::Sliders(frame) => {
                let moves = self.tracker.process(frame.readings());
                if !moves.is_empty() {
                    self.bus.publish(&moves);
                }
            }
            Message::Heartbeat => self.emit(LinkEvent::Health(LinkHealth::Healthy)),
            Message::Status(health) => {
                if health == LinkHealth::Unhealthy {
                    warn!("Board reported an unhealthy status");
                }
                self.emit(LinkEvent::Health(health));
            }
            Message::Startup { version, capabilities } => {
                info!(%version, %capabilities, "Board started");
                self.emit(LinkEvent::Startup { version, capabilities });
            }
            Message::Response(CommandResponse::Unknown { subtype, args }) => {
                debug!(%subtype, ?args, "Ignoring unknown command response");
            }
            Message::Response(response) => {
                debug!(?response, "Command response");
                self.emit(LinkEvent::Response(response));
            }
        }
    }

    async fn handle_disconnect(self: &Arc<Self>, generation: u64, err: LinkError) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        warn!("Serial link lost: {}", err);
        self.close().await;
        self.emit(LinkEvent::Disconnected {
            reason: err.to_string(),
        });

        if !self.is_shutting_down() {
            self.spawn_reconnect();
        }
    }

    /// Start the reconnect loop unless one is already running
    pub fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect loop already running");
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.reconnect_loop().await;
            manager.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut attempt = 0usize;
        let mut notified = false;

        loop {
            if self.is_shutting_down() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
                _ = shutdown_rx.changed() => return,
            }

            attempt += 1;
            debug!("⏳ Reconnect attempt #{}", attempt);

            match self.connect().await {
                Ok(()) => {
                    info!("✅ Reconnected after {} attempt(s)", attempt);
                    return;
                }
                // An unplugged board looks exactly like a wrong port; keep trying
                Err(e) if e.is_misconfiguration() => {
                    if !notified {
                        self.notifier.notify("Can't reach your deej board", &e.to_string());
                        notified = true;
                    }
                    warn!("Reconnect attempt #{} failed: {}", attempt, e);
                }
                Err(e) => debug!("Reconnect attempt #{} failed: {}", attempt, e),
            }
        }
    }

    /// Write a command to the board
    pub async fn send_command(&self, command: Command) -> Result<(), LinkError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(LinkError::NotConnected)?;

        writer.write_all(&command.encode()).await?;
        writer.flush().await?;
        debug!(%command, "Sent command");
        Ok(())
    }

    async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.set_state(LinkState::Disconnected);
    }

    /// Close the link without triggering a reconnect
    pub async fn stop(&self) {
        debug!("Stopping serial link");
        self.close().await;
    }

    /// Swap connection parameters and reopen the link
    pub async fn restart(self: &Arc<Self>, params: ConnectionInfo) -> Result<(), LinkError> {
        info!(port = %params.com_port, baud = params.baud_rate, "Restarting serial link");
        *self.params.write() = params;
        self.stop().await;

        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_misconfiguration() => {
                self.notifier.notify("Can't connect to your deej board", &e.to_string());
                Err(e)
            }
            Err(e) => {
                self.spawn_reconnect();
                Err(e)
            }
        }
    }

    /// Stop for good: no more reconnects
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.stop().await;
        info!("Serial link shut down");
    }
}
