//! Audio sessions and the slider → session routing
//!
//! A [`Session`] is anything with a stable key and a volume we can set:
//! the master output, the default input, a single application stream or a
//! whole device. Platform backends implement [`SessionFinder`] to enumerate
//! them; the [`SessionMap`] owns the enumerated handles and routes slider
//! moves to them through the [`TargetResolver`].

pub mod map;
pub mod pulse;
pub mod resolver;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use map::SessionMap;
pub use resolver::{ForegroundProcess, NoForegroundProcess, TargetResolver};

/// Key of the master output session
pub const MASTER_SESSION_KEY: &str = "master";
/// Key of the system sounds session
pub const SYSTEM_SESSION_KEY: &str = "system";
/// Key of the default input (microphone) session
pub const INPUT_SESSION_KEY: &str = "mic";

/// Audio backend failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio backend unavailable: {0}")]
    Unavailable(String),

    #[error("audio backend command failed: {0}")]
    Backend(String),

    #[error("session '{0}' no longer exists")]
    Gone(String),

    #[error("failed to parse backend output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a session controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    MasterOutput,
    MasterInput,
    System,
    Process,
    Device,
}

impl SessionKind {
    /// Sessions that are never swept into "unmapped" handling
    pub fn is_structural(&self) -> bool {
        !matches!(self, SessionKind::Process)
    }
}

/// A controllable audio stream endpoint
///
/// Implementations use interior mutability; every method takes `&self` so
/// handles can be shared as `Arc<dyn Session>` across volume tasks.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Lowercase, stable identifier (`master`, `mic`, a process or device name)
    fn key(&self) -> &str;

    fn kind(&self) -> SessionKind;

    /// Set the volume scalar, `0.0..=1.0`
    async fn set_volume(&self, volume: f32) -> Result<(), SessionError>;

    /// Free backend resources; called exactly once before the handle is dropped
    fn release(&self);
}

/// Shared handle type stored in the session map
pub type SessionHandle = Arc<dyn Session>;

/// Platform capability: enumerate the current audio sessions
#[async_trait]
pub trait SessionFinder: Send + Sync {
    async fn get_all_sessions(&self) -> Result<Vec<SessionHandle>, SessionError>;

    /// Disconnect from the audio backend
    async fn release(&self) -> Result<(), SessionError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sessions and finder shared by the session tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    pub struct FakeSession {
        pub key: String,
        pub kind: SessionKind,
        pub volume: Mutex<Option<f32>>,
        pub fail: AtomicBool,
        pub released: AtomicUsize,
    }

    impl FakeSession {
        pub fn new(key: &str, kind: SessionKind) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_lowercase(),
                kind,
                volume: Mutex::new(None),
                fail: AtomicBool::new(false),
                released: AtomicUsize::new(0),
            })
        }

        pub fn process(key: &str) -> Arc<Self> {
            Self::new(key, SessionKind::Process)
        }

        pub fn volume(&self) -> Option<f32> {
            *self.volume.lock()
        }

        pub fn release_count(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        fn key(&self) -> &str {
            &self.key
        }

        fn kind(&self) -> SessionKind {
            self.kind
        }

        async fn set_volume(&self, volume: f32) -> Result<(), SessionError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::Gone(self.key.clone()));
            }
            *self.volume.lock() = Some(volume);
            Ok(())
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Finder returning whatever sessions the test put in it
    #[derive(Default)]
    pub struct FakeFinder {
        pub sessions: Mutex<Vec<Arc<FakeSession>>>,
        pub enumerations: AtomicUsize,
        pub released: AtomicBool,
        pub fail: AtomicBool,
        /// Enumeration never completes
        pub hang: AtomicBool,
    }

    impl FakeFinder {
        pub fn with_sessions(sessions: Vec<Arc<FakeSession>>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions),
                ..Default::default()
            })
        }

        pub fn enumeration_count(&self) -> usize {
            self.enumerations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionFinder for FakeFinder {
        async fn get_all_sessions(&self) -> Result<Vec<SessionHandle>, SessionError> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::Unavailable("fake backend down".to_string()));
            }
            Ok(self
                .sessions
                .lock()
                .iter()
                .map(|s| Arc::clone(s) as SessionHandle)
                .collect())
        }

        async fn release(&self) -> Result<(), SessionError> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
