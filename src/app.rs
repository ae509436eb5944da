//! Wiring: config → tracker → event bus → session map, plus the serial link

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CanonicalConfig;
use crate::events::EventBus;
use crate::link::{Connector, LinkManager};
use crate::notify::Notifier;
use crate::session::{SessionFinder, SessionMap, TargetResolver};
use crate::slider::SliderTracker;

/// Connection attempts made at startup before giving up
pub const INITIAL_CONNECT_ATTEMPTS: usize = 5;
pub const INITIAL_CONNECT_DELAY: Duration = Duration::from_secs(2);

/// Wait after a config reload before forcing every slider to re-sync
const TRACKER_RESET_DELAY: Duration = Duration::from_millis(50);

/// Platform capabilities the app is built from
pub struct Backends {
    pub finder: Arc<dyn SessionFinder>,
    pub connector: Arc<dyn Connector>,
    pub resolver: TargetResolver,
    pub notifier: Arc<dyn Notifier>,
}

/// A running deej instance
pub struct App {
    config: RwLock<Arc<CanonicalConfig>>,
    tracker: Arc<SliderTracker>,
    bus: Arc<EventBus>,
    sessions: Arc<SessionMap>,
    link: Arc<LinkManager>,
    session_task: JoinHandle<()>,
}

impl App {
    /// Bring everything up
    ///
    /// Fails if the audio backend can't be enumerated or the board can't be
    /// reached within [`INITIAL_CONNECT_ATTEMPTS`].
    pub async fn start(config: Arc<CanonicalConfig>, backends: Backends) -> Result<Self> {
        let Backends {
            finder,
            connector,
            resolver,
            notifier,
        } = backends;

        let tracker = Arc::new(SliderTracker::new(config.tracker_settings()));
        let bus = Arc::new(EventBus::new());

        let sessions = Arc::new(SessionMap::new(finder, resolver, Arc::clone(&config.slider_mapping)));
        sessions
            .initialize()
            .await
            .context("Failed to enumerate audio sessions")?;
        info!("Session map ready: {}", sessions);

        let session_task = tokio::spawn(Arc::clone(&sessions).run(bus.subscribe()));

        let link = LinkManager::new(
            connector,
            config.connection.clone(),
            Arc::clone(&tracker),
            Arc::clone(&bus),
            Arc::clone(&notifier),
        );

        if let Err(e) = link
            .connect_with_retries(INITIAL_CONNECT_ATTEMPTS, INITIAL_CONNECT_DELAY)
            .await
        {
            let port = &config.connection.com_port;
            notifier.notify(&format!("Can't connect to {}!", port), &e.to_string());

            session_task.abort();
            if let Err(release_err) = sessions.release().await {
                warn!("Failed to release audio sessions: {}", release_err);
            }
            return Err(e).with_context(|| format!("Failed to connect to deej board on {}", port));
        }

        Ok(Self {
            config: RwLock::new(config),
            tracker,
            bus,
            sessions,
            link,
            session_task,
        })
    }

    pub fn config(&self) -> Arc<CanonicalConfig> {
        Arc::clone(&self.config.read())
    }

    pub fn link(&self) -> &Arc<LinkManager> {
        &self.link
    }

    pub fn sessions(&self) -> &Arc<SessionMap> {
        &self.sessions
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<SliderTracker> {
        &self.tracker
    }

    /// Apply a reloaded configuration
    ///
    /// The mapping and tracker settings swap immediately. Sliders re-sync
    /// shortly after, and the serial link is reopened only if its
    /// parameters changed.
    pub async fn apply_config(&self, config: CanonicalConfig) {
        let previous = self.config();

        self.sessions.set_mapping(Arc::clone(&config.slider_mapping));
        self.sessions.refresh(false).await;

        self.tracker.update_settings(config.tracker_settings());
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            tokio::time::sleep(TRACKER_RESET_DELAY).await;
            tracker.reset();
        });

        if config.connection != previous.connection {
            info!(
                port = %config.connection.com_port,
                baud = config.connection.baud_rate,
                "Connection settings changed, reconnecting"
            );
            if let Err(e) = self.link.restart(config.connection.clone()).await {
                warn!("Failed to reconnect with new settings: {}", e);
            }
        }

        *self.config.write() = Arc::new(config);
    }

    /// Stop the link and release every session
    pub async fn shutdown(self) -> Result<()> {
        self.link.shutdown().await;
        self.session_task.abort();
        self.sessions
            .release()
            .await
            .context("Failed to release audio sessions")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionInfo, SliderMapping};
    use crate::link::{Connection, LinkError, LinkState};
    use crate::notify::RecordingNotifier;
    use crate::session::testing::{FakeFinder, FakeSession};
    use crate::session::SessionKind;
    use crate::slider::NoiseReductionLevel;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct QueueConnector(Mutex<Vec<DuplexStream>>);

    #[async_trait]
    impl Connector for QueueConnector {
        async fn connect(&self, _params: &ConnectionInfo) -> Result<Connection, LinkError> {
            self.0
                .lock()
                .pop()
                .map(|s| Connection::new("duplex", s))
                .ok_or(LinkError::Closed)
        }
    }

    fn config(invert: bool, com_port: &str) -> CanonicalConfig {
        let mapping: SliderMapping = vec![(0, vec!["master".to_string()])].into_iter().collect();
        CanonicalConfig {
            slider_mapping: Arc::new(mapping),
            invert_sliders: invert,
            noise_reduction: NoiseReductionLevel::Default,
            connection: ConnectionInfo {
                com_port: com_port.to_string(),
                baud_rate: 9600,
            },
        }
    }

    fn backends(finder: Arc<FakeFinder>, streams: Vec<DuplexStream>) -> (Backends, Arc<RecordingNotifier>) {
        let notifier = RecordingNotifier::new();
        let backends = Backends {
            finder,
            connector: Arc::new(QueueConnector(Mutex::new(streams))),
            resolver: TargetResolver::default(),
            notifier: notifier.clone(),
        };
        (backends, notifier)
    }

    async fn wait_for_volume(session: &FakeSession, expected: f32) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.volume() != Some(expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("volume never applied");
    }

    #[tokio::test]
    async fn test_frame_reaches_session() {
        let master = FakeSession::new("master", SessionKind::MasterOutput);
        let (device, host) = tokio::io::duplex(256);
        let (backends, _) = backends(FakeFinder::with_sessions(vec![master.clone()]), vec![host]);

        let app = App::start(Arc::new(config(false, "/dev/ttyUSB0")), backends).await.unwrap();
        assert_eq!(app.link().state(), LinkState::Connected);

        let mut device = device;
        device.write_all(b"256\r\n").await.unwrap();
        wait_for_volume(&master, 0.25).await;

        app.shutdown().await.unwrap();
        assert!(master.release_count() >= 1);
    }

    #[tokio::test]
    async fn test_reload_inverts_and_resyncs() {
        let master = FakeSession::new("master", SessionKind::MasterOutput);
        let (mut device, host) = tokio::io::duplex(256);
        let (backends, _) = backends(FakeFinder::with_sessions(vec![master.clone()]), vec![host]);

        let app = App::start(Arc::new(config(false, "/dev/ttyUSB0")), backends).await.unwrap();
        device.write_all(b"deej:v2.0:sliders:256\r\n").await.unwrap();
        wait_for_volume(&master, 0.25).await;

        app.apply_config(config(true, "/dev/ttyUSB0")).await;
        assert!(app.config().invert_sliders);
        tokio::time::sleep(TRACKER_RESET_DELAY * 2).await;

        // Same reading, now inverted, and emitted because the tracker reset
        device.write_all(b"deej:v2.0:sliders:256\r\n").await.unwrap();
        wait_for_volume(&master, 0.75).await;
        assert_eq!(app.link().state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal() {
        let finder = FakeFinder::with_sessions(Vec::new());
        finder.fail.store(true, Ordering::SeqCst);
        let (_device, host) = tokio::io::duplex(256);
        let (backends, _) = backends(finder, vec![host]);

        assert!(App::start(Arc::new(config(false, "auto")), backends).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_board_is_fatal() {
        let (backends, notifier) = backends(FakeFinder::with_sessions(Vec::new()), Vec::new());

        let err = App::start(Arc::new(config(false, "/dev/ttyUSB3")), backends)
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("/dev/ttyUSB3"));
        assert_eq!(notifier.messages().len(), 1);
    }
}
