use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Session-level lifecycle. `Left` is terminal: events arriving after it
/// are dropped, not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Joining,
    Active,
    Leaving,
    Left,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Joining => write!(f, "Joining"),
            SessionPhase::Active => write!(f, "Active"),
            SessionPhase::Leaving => write!(f, "Leaving"),
            SessionPhase::Left => write!(f, "Left"),
        }
    }
}

/// Snapshot of session health, published for the UI layer. The UI reads
/// this view; it never owns coordinator state.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub transport_connected: bool,
    pub media_ready: bool,
    pub screen_sharing: bool,
    pub participant_count: usize,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Joining,
            transport_connected: false,
            media_ready: false,
            screen_sharing: false,
            participant_count: 0,
            last_error: None,
        }
    }
}

/// Fan-out of `SessionStatus` over a watch channel; any number of
/// observers may subscribe.
#[derive(Clone)]
pub struct SessionMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    receiver: watch::Receiver<SessionStatus>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(SessionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.status.send_modify(|status| {
            status.phase = phase;
        });
    }

    pub fn set_transport(&self, connected: bool) {
        self.status.send_modify(|status| {
            status.transport_connected = connected;
        });
    }

    pub fn set_media_ready(&self, ready: bool) {
        self.status.send_modify(|status| {
            status.media_ready = ready;
        });
    }

    pub fn set_screen_sharing(&self, active: bool) {
        self.status.send_modify(|status| {
            status.screen_sharing = active;
        });
    }

    pub fn set_participant_count(&self, count: usize) {
        self.status.send_modify(|status| {
            status.participant_count = count;
        });
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.receiver.clone()
    }

    pub fn current(&self) -> SessionStatus {
        self.receiver.borrow().clone()
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_updates() {
        let monitor = SessionMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.set_phase(SessionPhase::Active);
        monitor.set_participant_count(2);
        rx.changed().await.unwrap();

        let status = rx.borrow().clone();
        assert_eq!(status.phase, SessionPhase::Active);
        assert_eq!(status.participant_count, 2);
        assert!(status.last_error.is_none());
    }
}
