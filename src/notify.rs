//! User-facing notifications
//!
//! The desktop build would surface these as toasts; here they go to the log.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Sink for messages the user should see without reading the log
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications as warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        warn!(title, "🔔 {}", message);
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.messages.lock().push((title.to_string(), message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify("Can't connect", "COM4 is busy");
        LogNotifier.notify("ignored", "only logged");

        assert_eq!(
            notifier.messages(),
            vec![("Can't connect".to_string(), "COM4 is busy".to_string())]
        );
    }
}
