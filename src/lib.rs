//! Session-coordination core for live multi-party classrooms: one WebRTC
//! peer connection per remote participant, signaling over a WebSocket
//! channel, local media control, and session-scoped chat and hand-raise
//! state.
//!
//! The UI layer drives a [`SessionCoordinator`] and reads its watch-based
//! status projection; it never owns coordinator state. Capture devices and
//! the signaling server sit behind the [`MediaSource`] and
//! [`SignalingTransport`] traits, so sessions are fully testable without a
//! browser, a device or a server.

mod audio;
mod config;
mod connection;
mod error;
mod media;
mod registry;
mod room;
mod session;
mod signaling;
mod webrtc;

#[cfg(test)]
mod testutil;

pub use audio::DeviceMediaSource;
pub use config::{default_ice_servers, Role, SessionConfig};
pub use connection::{SessionMonitor, SessionPhase, SessionStatus};
pub use error::{Error, Result};
pub use media::{CaptureHandle, CaptureStream, LocalTracks, MediaControls, MediaSource};
pub use registry::{PeerEvent, PeerPhase, PeerRegistry};
pub use room::{ChatMessage, Participant, Room};
pub use session::SessionCoordinator;
pub use signaling::{CandidatePayload, SignalingEvent, SignalingTransport, WebSocketSignaling};
