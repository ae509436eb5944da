//! Target resolution
//!
//! Expands a configured slider target into the session keys it refers to.
//! Plain targets are literal (lowercased) session keys. Targets starting
//! with `deej.` are special and expand through platform queries or the
//! session map's unmapped snapshot:
//!
//! | target          | expands to                                   |
//! |-----------------|----------------------------------------------|
//! | `deej.current`  | process name(s) owning the foreground window |
//! | `deej.unmapped` | every session no slider targets explicitly   |
//!
//! Unknown special targets expand to nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::{SessionError, SessionKind, INPUT_SESSION_KEY, MASTER_SESSION_KEY, SYSTEM_SESSION_KEY};
use crate::config::SliderMapping;

/// Prefix that marks a special target
pub const SPECIAL_TARGET_PREFIX: &str = "deej.";
/// `deej.current`: the active window's process
pub const SPECIAL_TARGET_CURRENT_WINDOW: &str = "current";
/// `deej.unmapped`: every unmapped session
pub const SPECIAL_TARGET_ALL_UNMAPPED: &str = "unmapped";

/// Friendly device names, e.g. "Headphones (Realtek Audio)"
///
/// This is a heuristic over display strings: a process whose name happens
/// to look like `foo (bar)` is classified as a device too.
static DEVICE_SESSION_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.+ \(.+\)$").expect("static regex"));

/// Platform capability: which process owns the foreground window
pub trait ForegroundProcess: Send + Sync {
    fn foreground_process_names(&self) -> Result<Vec<String>, SessionError>;
}

/// For platforms without a foreground-window query
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForegroundProcess;

impl ForegroundProcess for NoForegroundProcess {
    fn foreground_process_names(&self) -> Result<Vec<String>, SessionError> {
        Err(SessionError::Unavailable(
            "foreground window lookup is not supported on this platform".to_string(),
        ))
    }
}

/// Resolves slider targets to session keys
#[derive(Clone)]
pub struct TargetResolver {
    foreground: Arc<dyn ForegroundProcess>,
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoForegroundProcess))
    }
}

impl TargetResolver {
    pub fn new(foreground: Arc<dyn ForegroundProcess>) -> Self {
        Self { foreground }
    }

    /// Whether a target needs expansion instead of being a literal key
    pub fn is_special(target: &str) -> bool {
        target.to_lowercase().starts_with(SPECIAL_TARGET_PREFIX)
    }

    /// Expand a target into lowercase session keys
    ///
    /// `unmapped` is the session map's snapshot of unmapped keys. Never
    /// fails: this runs on every slider move.
    pub fn resolve(&self, target: &str, unmapped: &[String]) -> Vec<String> {
        let target = target.to_lowercase();

        match target.strip_prefix(SPECIAL_TARGET_PREFIX) {
            Some(special) => self.expand_special(special, unmapped),
            None => vec![target],
        }
    }

    fn expand_special(&self, name: &str, unmapped: &[String]) -> Vec<String> {
        match name {
            SPECIAL_TARGET_CURRENT_WINDOW => {
                // Errors are expected here (e.g. unsupported platform); stay quiet
                let Ok(names) = self.foreground.foreground_process_names() else {
                    return Vec::new();
                };

                let mut keys: Vec<String> = Vec::with_capacity(names.len());
                for name in names {
                    let name = name.to_lowercase();
                    if !keys.contains(&name) {
                        keys.push(name);
                    }
                }
                keys
            }
            SPECIAL_TARGET_ALL_UNMAPPED => unmapped.to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Whether a key is one of the well-known master/system/mic keys
pub fn is_well_known_key(key: &str) -> bool {
    matches!(key, MASTER_SESSION_KEY | SYSTEM_SESSION_KEY | INPUT_SESSION_KEY)
}

/// Whether a key looks like a device's friendly name
pub fn looks_like_device_key(key: &str) -> bool {
    DEVICE_SESSION_KEY.is_match(key)
}

/// Whether a session counts as mapped for `deej.unmapped` purposes
///
/// Master, system, mic and device sessions always count as mapped, even
/// when no slider targets them. The kind tag decides first; the key
/// patterns cover backends that report everything as a process.
pub fn is_session_mapped(key: &str, kind: SessionKind, mapping: &SliderMapping) -> bool {
    if kind.is_structural() || is_well_known_key(key) || looks_like_device_key(key) {
        return true;
    }

    mapping
        .targets()
        .filter(|target| !TargetResolver::is_special(target))
        .any(|target| target.to_lowercase() == key)
}
