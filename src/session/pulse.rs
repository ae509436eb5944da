//! PulseAudio (and pipewire-pulse) backend
//!
//! Talks to the sound server through the `pactl` CLI rather than linking
//! libpulse. Enumeration uses `pactl -f json`, volume changes shell out
//! once per call.
//!
//! Sessions produced:
//! - `master`: the default sink
//! - `mic`: the default source
//! - one session per sink input, keyed by the owning process binary

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, trace};

use super::{
    Session, SessionError, SessionFinder, SessionHandle, SessionKind, INPUT_SESSION_KEY, MASTER_SESSION_KEY,
};

const DEFAULT_SINK: &str = "@DEFAULT_SINK@";
const DEFAULT_SOURCE: &str = "@DEFAULT_SOURCE@";

/// Runs a `pactl` invocation and returns its stdout
#[async_trait]
pub trait Pactl: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<String, SessionError>;
}

/// The real `pactl` binary
#[derive(Debug, Clone)]
pub struct PactlCommand {
    program: String,
}

impl Default for PactlCommand {
    fn default() -> Self {
        Self {
            program: "pactl".to_string(),
        }
    }
}

#[async_trait]
impl Pactl for PactlCommand {
    async fn run(&self, args: &[String]) -> Result<String, SessionError> {
        trace!(?args, "Running pactl");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SessionError::Unavailable(format!("{} not found in PATH", self.program)),
                _ => SessionError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SessionError::Backend(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One entry of `pactl -f json list sink-inputs`
#[derive(Debug, Deserialize)]
struct SinkInput {
    index: u32,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

impl SinkInput {
    fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    /// Process binary, falling back to the application name
    fn session_key(&self) -> Option<String> {
        self.property("application.process.binary")
            .or_else(|| self.property("application.name"))
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone)]
enum VolumeTarget {
    Sink(String),
    Source(String),
    SinkInput(u32),
}

impl VolumeTarget {
    fn volume_args(&self, volume: f32) -> Vec<String> {
        let percent = format!("{}%", (volume.clamp(0.0, 1.0) * 100.0).round() as u32);
        match self {
            VolumeTarget::Sink(name) => vec!["set-sink-volume".into(), name.clone(), percent],
            VolumeTarget::Source(name) => vec!["set-source-volume".into(), name.clone(), percent],
            VolumeTarget::SinkInput(index) => vec!["set-sink-input-volume".into(), index.to_string(), percent],
        }
    }
}

/// A PulseAudio sink, source or sink input
pub struct PulseSession {
    key: String,
    kind: SessionKind,
    target: VolumeTarget,
    pactl: Arc<dyn Pactl>,
}

impl fmt::Debug for PulseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseSession")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
impl Session for PulseSession {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> SessionKind {
        self.kind
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SessionError> {
        match self.pactl.run(&self.target.volume_args(volume)).await {
            Ok(_) => Ok(()),
            Err(SessionError::Backend(msg)) if msg.contains("No such entity") => {
                Err(SessionError::Gone(self.key.clone()))
            }
            Err(e) => Err(e),
        }
    }

    fn release(&self) {
        // Nothing is held open per session
        trace!(key = %self.key, "Released pulse session");
    }
}

/// Enumerates sessions through `pactl`
pub struct PulseSessionFinder {
    pactl: Arc<dyn Pactl>,
}

impl PulseSessionFinder {
    /// Verify the sound server is reachable
    pub async fn connect(pactl: Arc<dyn Pactl>) -> Result<Self, SessionError> {
        let info = pactl.run(&["info".to_string()]).await.map_err(|e| match e {
            SessionError::Backend(msg) => SessionError::Unavailable(msg),
            other => other,
        })?;

        let server = info
            .lines()
            .find_map(|l| l.strip_prefix("Server Name:"))
            .map(str::trim)
            .unwrap_or("unknown");
        info!(server, "Connected to PulseAudio");

        Ok(Self { pactl })
    }

    fn session(&self, key: &str, kind: SessionKind, target: VolumeTarget) -> SessionHandle {
        Arc::new(PulseSession {
            key: key.to_string(),
            kind,
            target,
            pactl: Arc::clone(&self.pactl),
        })
    }
}

#[async_trait]
impl SessionFinder for PulseSessionFinder {
    async fn get_all_sessions(&self) -> Result<Vec<SessionHandle>, SessionError> {
        let mut sessions = vec![
            self.session(
                MASTER_SESSION_KEY,
                SessionKind::MasterOutput,
                VolumeTarget::Sink(DEFAULT_SINK.to_string()),
            ),
            self.session(
                INPUT_SESSION_KEY,
                SessionKind::MasterInput,
                VolumeTarget::Source(DEFAULT_SOURCE.to_string()),
            ),
        ];

        let args = ["-f", "json", "list", "sink-inputs"].map(String::from);
        let raw = self.pactl.run(&args).await?;
        let inputs: Vec<SinkInput> = serde_json::from_str(&raw)?;

        for input in inputs {
            match input.session_key() {
                Some(key) => sessions.push(self.session(&key, SessionKind::Process, VolumeTarget::SinkInput(input.index))),
                None => debug!(index = input.index, "Skipping sink input without an application name"),
            }
        }

        Ok(sessions)
    }

    async fn release(&self) -> Result<(), SessionError> {
        debug!("Released pulse session finder");
        Ok(())
    }
}
