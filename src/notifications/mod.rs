//! Listener notification collaborator.

use bytes::Bytes;
use parking_lot::Mutex;

/// Receives entry change events.
pub trait CacheNotifier: Send + Sync {
    /// `value` is `None` for a removal. Pre-events fire before the change is
    /// committed, post-events after.
    fn notify_changed(&self, key: &[u8], value: Option<&Bytes>, is_pre: bool);
}

/// One recorded change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: Bytes,
    pub value: Option<Bytes>,
    pub is_pre: bool,
}

/// Notifier that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Events received for `key`.
    pub fn events_for(&self, key: &[u8]) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.key.as_ref() == key)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CacheNotifier for RecordingNotifier {
    fn notify_changed(&self, key: &[u8], value: Option<&Bytes>, is_pre: bool) {
        tracing::trace!(key = ?key, is_pre, "entry changed");
        self.events.lock().push(ChangeEvent {
            key: Bytes::copy_from_slice(key),
            value: value.cloned(),
            is_pre,
        });
    }
}
