//! Session lifecycle events

use tokio::sync::mpsc;

/// Where to report a session that timed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutData {
    /// Notification socket or URL of the signaling side
    pub notify_target: String,
    /// Opaque tag echoed back in the notification
    pub notify_tag: String,
}

impl TimeoutData {
    pub fn new(notify_target: impl Into<String>, notify_tag: impl Into<String>) -> Self {
        Self {
            notify_target: notify_target.into(),
            notify_tag: notify_tag.into(),
        }
    }
}

/// Events emitted by the session core
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session constructed and registered
    SessionCreated {
        seuid: u64,
        call_id: String,
    },
    /// Session expired by the TTL sweep
    SessionTimeout {
        seuid: u64,
        call_id: String,
        notify: Option<TimeoutData>,
    },
    /// Session destroyed
    SessionDestroyed {
        seuid: u64,
        /// Lifetime in seconds
        duration: f64,
    },
}

/// Sending half used by the core
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half handed to the application
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create an event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
