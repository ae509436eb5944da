//! Session map
//!
//! Owns every enumerated [`Session`](super::Session) handle, keyed by
//! lowercase session key, and applies slider moves to them.
//!
//! ## Locking
//!
//! The session table and the unmapped snapshot live behind one async
//! mutex. A refresh holds it for the whole release → enumerate → populate
//! sequence, so nobody ever observes a half-cleared table. Volume changes
//! only hold it long enough to clone the matching handles; the backend
//! calls themselves run as independent tasks.
//!
//! ## Refresh rate limiting
//!
//! Enumeration is assumed to be expensive, so a non-forced refresh within
//! [`MIN_TIME_BETWEEN_REFRESHES`] of the previous one is skipped. A single
//! enumeration is cut off after [`ENUMERATION_TIMEOUT`] so a wedged backend
//! can't hold the table lock forever.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::resolver::{is_session_mapped, TargetResolver};
use super::{SessionError, SessionFinder, SessionHandle};
use crate::config::SliderMapping;
use crate::slider::SliderMoveEvent;

/// Minimum interval between two non-forced refreshes
pub const MIN_TIME_BETWEEN_REFRESHES: Duration = Duration::from_secs(5);

/// Delay before the forced refresh that follows a failed volume change
pub const STALE_SESSION_REFRESH_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on one enumeration; the table lock is held throughout
pub const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, Vec<SessionHandle>>,
    unmapped: Vec<String>,
    last_refresh: Option<Instant>,
}

impl SessionTable {
    /// Release every held session and empty the table
    fn clear(&mut self) {
        for (_, sessions) in self.sessions.drain() {
            for session in sessions {
                session.release();
            }
        }
        self.unmapped.clear();
    }

    fn add(&mut self, session: SessionHandle) {
        let key = session.key().to_lowercase();
        self.sessions.entry(key).or_default().push(session);
    }

    fn session_count(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }
}

/// Live session key → session handles table
pub struct SessionMap {
    finder: Arc<dyn SessionFinder>,
    resolver: TargetResolver,
    mapping: RwLock<Arc<SliderMapping>>,
    table: Mutex<SessionTable>,
    refresh_pending: AtomicBool,
    /// Mirror of the table size, readable without the async lock
    held_sessions: AtomicUsize,
}

impl SessionMap {
    pub fn new(finder: Arc<dyn SessionFinder>, resolver: TargetResolver, mapping: Arc<SliderMapping>) -> Self {
        debug!("Created session map instance");

        Self {
            finder,
            resolver,
            mapping: RwLock::new(mapping),
            table: Mutex::new(SessionTable::default()),
            refresh_pending: AtomicBool::new(false),
            held_sessions: AtomicUsize::new(0),
        }
    }

    /// Enumerate sessions for the first time
    ///
    /// Unlike [`refresh`](Self::refresh), an enumeration failure here is
    /// returned: not reaching the audio backend at startup is fatal.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        info!("Initializing session map");
        self.refresh_locked(true).await.map(|_| ())
    }

    /// Current slider mapping snapshot
    pub fn mapping(&self) -> Arc<SliderMapping> {
        Arc::clone(&self.mapping.read())
    }

    /// Swap in a new slider mapping
    ///
    /// The unmapped snapshot is only recomputed on the next refresh.
    pub fn set_mapping(&self, mapping: Arc<SliderMapping>) {
        debug!(%mapping, "Replacing slider mapping");
        *self.mapping.write() = mapping;
    }

    /// Re-enumerate all sessions
    ///
    /// Skipped when the last refresh was less than five seconds ago, unless
    /// `force` is set. Returns whether an enumeration took place.
    pub async fn refresh(&self, force: bool) -> bool {
        match self.refresh_locked(force).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!("Failed to re-acquire all audio sessions: {}", e);
                true
            }
        }
    }

    async fn refresh_locked(&self, force: bool) -> Result<bool, SessionError> {
        let mut table = self.table.lock().await;

        if !force {
            if let Some(last) = table.last_refresh {
                if last.elapsed() < MIN_TIME_BETWEEN_REFRESHES {
                    debug!("Skipping session refresh, last one was too recent");
                    return Ok(false);
                }
            }
        }

        table.last_refresh = Some(Instant::now());

        debug!("Releasing and clearing all audio sessions");
        table.clear();
        self.held_sessions.store(0, Ordering::SeqCst);

        let sessions = tokio::time::timeout(ENUMERATION_TIMEOUT, self.finder.get_all_sessions())
            .await
            .map_err(|_| {
                SessionError::Unavailable(format!(
                    "session enumeration timed out after {:?}",
                    ENUMERATION_TIMEOUT
                ))
            })??;
        let mapping = self.mapping();

        for session in sessions {
            let key = session.key().to_lowercase();
            if !is_session_mapped(&key, session.kind(), &mapping) && !table.unmapped.contains(&key) {
                table.unmapped.push(key);
            }
            table.add(session);
        }
        self.held_sessions.store(table.session_count(), Ordering::SeqCst);

        info!(
            count = table.session_count(),
            unmapped = table.unmapped.len(),
            "Discovered audio sessions"
        );

        Ok(true)
    }

    /// Apply a slider move to every session its targets resolve to
    ///
    /// Each session gets its own task, so one slow or failing backend call
    /// never holds up the others. A failure schedules a forced refresh
    /// (the session most likely vanished) and is otherwise swallowed.
    ///
    /// Returns the spawned tasks; callers are free to ignore them.
    pub async fn apply_volume(self: &Arc<Self>, event: SliderMoveEvent) -> Vec<JoinHandle<()>> {
        let mapping = self.mapping();
        let Some(targets) = mapping.get(event.slider_id) else {
            debug!(slider_id = event.slider_id, "No targets mapped for slider");
            return Vec::new();
        };

        let matched: Vec<(String, SessionHandle)> = {
            let table = self.table.lock().await;
            let mut matched: Vec<(String, SessionHandle)> = Vec::new();

            for target in targets {
                for key in self.resolver.resolve(target, &table.unmapped) {
                    let Some(sessions) = table.sessions.get(&key) else {
                        debug!(target = %key, "No sessions found for target");
                        continue;
                    };

                    for session in sessions {
                        if !matched.iter().any(|(_, s)| Arc::ptr_eq(s, session)) {
                            matched.push((key.clone(), Arc::clone(session)));
                        }
                    }
                }
            }

            matched
        };

        matched
            .into_iter()
            .map(|(key, session)| {
                let map = Arc::clone(self);
                let volume = event.percent_value;

                tokio::spawn(async move {
                    match session.set_volume(volume).await {
                        Ok(()) => debug!(target = %key, volume, "Set session volume"),
                        Err(e) => {
                            warn!(target = %key, "Failed to set session volume: {}", e);
                            map.schedule_forced_refresh();
                        }
                    }
                })
            })
            .collect()
    }

    /// Force a refresh shortly, coalescing bursts of failures into one
    fn schedule_forced_refresh(self: &Arc<Self>) {
        if self.refresh_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let map = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(STALE_SESSION_REFRESH_DELAY).await;
            map.refresh_pending.store(false, Ordering::SeqCst);
            map.refresh(true).await;
        });
    }

    /// Consume a slider event subscription until it closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SliderMoveEvent>) {
        debug!("Starting slider event processing loop");
        while let Some(event) = events.recv().await {
            self.apply_volume(event).await;
        }
        debug!("Slider event processing loop ended");
    }

    /// Final clear plus backend disconnect
    pub async fn release(&self) -> Result<(), SessionError> {
        self.table.lock().await.clear();
        self.held_sessions.store(0, Ordering::SeqCst);
        self.finder.release().await?;
        debug!("Released session map");
        Ok(())
    }

    pub async fn session_count(&self) -> usize {
        self.table.lock().await.session_count()
    }

    /// Keys in the last unmapped snapshot
    pub async fn unmapped_keys(&self) -> Vec<String> {
        self.table.lock().await.unmapped.clone()
    }

    /// Resolve a target against the current table
    pub async fn resolve(&self, target: &str) -> Vec<String> {
        let table = self.table.lock().await;
        self.resolver.resolve(target, &table.unmapped)
    }
}

impl fmt::Display for SessionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} audio sessions>", self.held_sessions.load(Ordering::SeqCst))
    }
}
