use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::config::{Role, SessionConfig};
use crate::connection::{SessionMonitor, SessionPhase, SessionStatus};
use crate::error::{Error, Result};
use crate::media::{MediaControls, MediaSource};
use crate::registry::{PeerEvent, PeerRegistry};
use crate::room::{ChatMessage, Participant, Room};
use crate::signaling::{CandidatePayload, SignalingEvent, SignalingTransport};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY_MS: u64 = 1000;
const PEER_EVENT_BUFFER: usize = 64;

enum Step {
    Signal(Option<SignalingEvent>),
    Peer(Option<PeerEvent>),
    ScreenEnded,
}

/// Orchestrates the signaling transport, the peer-connection registry and
/// the local media controls into one session: participant lifecycle, chat,
/// hand-raise and screen-share.
///
/// Single-threaded and event-driven: every handler runs on the caller's
/// task, interleaved by `run()`'s select loop.
pub struct SessionCoordinator<T: SignalingTransport> {
    config: SessionConfig,
    phase: SessionPhase,
    transport: T,
    source: Arc<dyn MediaSource>,
    media: MediaControls,
    registry: PeerRegistry,
    room: Room,
    monitor: SessionMonitor,
    peer_rx: mpsc::Receiver<PeerEvent>,
    hand_raised: bool,
    reconnect_attempts: u32,
}

impl<T: SignalingTransport> SessionCoordinator<T> {
    pub fn new(config: SessionConfig, transport: T, source: Arc<dyn MediaSource>) -> Self {
        let (peer_tx, peer_rx) = mpsc::channel(PEER_EVENT_BUFFER);
        let registry = PeerRegistry::new(config.ice_servers.clone(), peer_tx);
        Self {
            config,
            phase: SessionPhase::Joining,
            transport,
            source,
            media: MediaControls::new(),
            registry,
            room: Room::new(),
            monitor: SessionMonitor::new(),
            peer_rx,
            hand_raised: false,
            reconnect_attempts: 0,
        }
    }

    /// Announce the join and acquire local media. Neither failure aborts
    /// the session: a dead transport is retried by `run()`, and a media
    /// failure degrades to receive-only.
    pub async fn join(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Joining {
            return Err(Error::Session(
                "join is only valid once, from the joining state".to_owned(),
            ));
        }

        let announce = self.join_event();
        match self.transport.send(announce).await {
            Ok(()) => self.monitor.set_transport(true),
            Err(e) => {
                warn!("could not announce join: {}", e);
                self.monitor.set_error(e.to_string());
                self.monitor.set_transport(false);
            }
        }

        let source = Arc::clone(&self.source);
        match self.media.acquire_camera(source.as_ref()).await {
            Ok(()) => self.monitor.set_media_ready(true),
            Err(e) => {
                warn!("media acquisition failed, joining receive-only: {}", e);
                self.monitor.set_error(e.to_string());
            }
        }

        self.set_phase(SessionPhase::Active);
        Ok(())
    }

    /// Drive the session: inbound signaling, peer-connection callbacks and
    /// the screen-share end signal, until the session leaves or the
    /// signaling channel is lost for good.
    pub async fn run(&mut self) {
        loop {
            if let Some(ended) = self.media.screen_ended() {
                if *ended.borrow() {
                    self.handle_screen_capture_ended().await;
                    continue;
                }
            }

            let step = match self.media.screen_ended() {
                Some(mut ended) => {
                    tokio::select! {
                        event = self.transport.receive() => Step::Signal(event),
                        event = self.peer_rx.recv() => Step::Peer(event),
                        _ = ended.changed() => Step::ScreenEnded,
                    }
                }
                None => {
                    tokio::select! {
                        event = self.transport.receive() => Step::Signal(event),
                        event = self.peer_rx.recv() => Step::Peer(event),
                    }
                }
            };

            match step {
                Step::Signal(Some(event)) => self.handle_event(event).await,
                Step::Signal(None) => {
                    if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Left) {
                        break;
                    }
                    if self.reconnect().await.is_err() {
                        // keep the session alive with a stale roster; only
                        // the signaling channel is gone
                        warn!("signaling channel lost, continuing with a stale roster");
                        self.monitor.set_transport(false);
                        break;
                    }
                }
                Step::Peer(Some(event)) => self.handle_peer_event(event).await,
                Step::Peer(None) => break,
                Step::ScreenEnded => self.handle_screen_capture_ended().await,
            }

            if self.phase == SessionPhase::Left {
                break;
            }
        }
    }

    /// Dispatch one inbound signaling event. Events arriving once the
    /// session is leaving are dropped, not queued.
    pub async fn handle_event(&mut self, event: SignalingEvent) {
        if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Left) {
            debug!("dropping signaling event after leave: {:?}", event);
            return;
        }
        match event {
            SignalingEvent::ParticipantJoined {
                user_id,
                user_name,
                role,
                socket_id,
            } => {
                self.handle_participant_joined(socket_id, user_id, user_name, role)
                    .await;
            }
            SignalingEvent::ParticipantLeft { socket_id } => {
                self.handle_participant_left(&socket_id).await;
            }
            SignalingEvent::Offer {
                sdp,
                from_socket_id,
                user_id,
                user_name,
                role,
                ..
            } => {
                self.handle_offer(from_socket_id, sdp, user_id, user_name, role)
                    .await;
            }
            SignalingEvent::Answer {
                sdp, from_socket_id, ..
            } => match from_socket_id {
                Some(socket_id) => self.registry.apply_answer(&socket_id, &sdp).await,
                None => warn!("answer without sender id, ignoring"),
            },
            SignalingEvent::IceCandidate {
                candidate,
                from_socket_id,
                ..
            } => match from_socket_id {
                Some(socket_id) => self.registry.apply_ice_candidate(&socket_id, candidate).await,
                None => warn!("ICE candidate without sender id, ignoring"),
            },
            SignalingEvent::NewChatMessage {
                message,
                user_id,
                user_name,
                timestamp,
            } => {
                // chat is appended only here, on the server echo, so every
                // participant sees the same order (no optimistic append)
                self.room.push_message(user_id, user_name, message, timestamp);
            }
            SignalingEvent::HandRaised { socket_id, .. } => {
                self.room.set_hand_raised(&socket_id, true);
            }
            SignalingEvent::HandLowered { socket_id, .. } => {
                self.room.set_hand_raised(&socket_id, false);
            }
            SignalingEvent::ScreenShareStarted { socket_id, .. } => {
                self.room.set_screen_sharing(&socket_id, true);
            }
            SignalingEvent::ScreenShareStopped { socket_id, .. } => {
                self.room.set_screen_sharing(&socket_id, false);
            }
            SignalingEvent::MediaStateChanged {
                socket_id,
                video,
                audio,
            } => {
                self.room.set_media_state(&socket_id, video, audio);
            }
            SignalingEvent::JoinLiveSession { .. }
            | SignalingEvent::LeaveLiveSession { .. }
            | SignalingEvent::SessionChatMessage { .. }
            | SignalingEvent::StartScreenShare { .. }
            | SignalingEvent::StopScreenShare { .. }
            | SignalingEvent::RaiseHand { .. }
            | SignalingEvent::LowerHand { .. }
            | SignalingEvent::MediaState { .. } => {
                debug!("ignoring client-originated event on the inbound path");
            }
        }
    }

    /// Idempotent: a duplicate join for a known socket id changes nothing
    /// and never creates a second peer connection.
    async fn handle_participant_joined(
        &mut self,
        socket_id: String,
        user_id: String,
        user_name: String,
        role: Role,
    ) {
        if self.room.contains(&socket_id) || self.registry.contains(&socket_id) {
            debug!("duplicate join for {}, ignoring", socket_id);
            return;
        }
        info!("participant {} joined as {}", user_id, role);
        self.room.add_participant(Participant::new(
            socket_id.clone(),
            user_id,
            user_name,
            role,
        ));
        self.monitor.set_participant_count(self.room.len());

        let tracks = self.media.local_tracks();
        match self.registry.create_for_participant(&socket_id, &tracks).await {
            Ok(offer) => {
                let event = SignalingEvent::Offer {
                    session_id: self.config.session_id.clone(),
                    sdp: offer,
                    from_socket_id: None,
                    to_socket_id: socket_id,
                    user_id: self.config.user_id.clone(),
                    user_name: self.config.user_name.clone(),
                    role: self.config.role,
                };
                self.send_best_effort(event).await;
            }
            Err(e) => warn!("could not negotiate with {}: {}", socket_id, e),
        }
    }

    /// Close the connection before dropping the roster entry, so no
    /// orphaned connection ever outlives its participant. Unknown ids are
    /// a no-op.
    async fn handle_participant_left(&mut self, socket_id: &str) {
        let closed = self.registry.close(socket_id).await;
        let removed = self.room.remove_participant(socket_id);
        if removed.is_none() && !closed {
            debug!("leave for unknown participant {}", socket_id);
            return;
        }
        self.monitor.set_participant_count(self.room.len());
    }

    async fn handle_offer(
        &mut self,
        from_socket_id: Option<String>,
        sdp: String,
        user_id: String,
        user_name: String,
        role: Role,
    ) {
        let Some(socket_id) = from_socket_id else {
            warn!("offer without sender id, ignoring");
            return;
        };
        // the offer carries the initiator's identity: roster them even if
        // their join event never reached us
        if self.room.add_participant(Participant::new(
            socket_id.clone(),
            user_id,
            user_name,
            role,
        )) {
            self.monitor.set_participant_count(self.room.len());
        }
        let tracks = self.media.local_tracks();
        match self.registry.accept_offer(&socket_id, &sdp, &tracks).await {
            Ok(answer) => {
                let event = SignalingEvent::Answer {
                    session_id: self.config.session_id.clone(),
                    sdp: answer,
                    from_socket_id: None,
                    to_socket_id: socket_id,
                };
                self.send_best_effort(event).await;
            }
            Err(e) => warn!("could not accept offer from {}: {}", socket_id, e),
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Left) {
            return;
        }
        match event {
            PeerEvent::LocalCandidate {
                socket_id,
                candidate,
            } => {
                let event = SignalingEvent::IceCandidate {
                    session_id: self.config.session_id.clone(),
                    candidate: CandidatePayload {
                        candidate: candidate.candidate,
                        sdp_mid: candidate.sdp_mid,
                        sdp_mline_index: candidate.sdp_mline_index,
                    },
                    from_socket_id: None,
                    to_socket_id: socket_id,
                };
                self.send_best_effort(event).await;
            }
            PeerEvent::RemoteTrack { socket_id, track } => {
                debug!("remote {:?} track from {}", track.kind(), socket_id);
                self.registry.note_remote_track(&socket_id, track);
            }
            PeerEvent::ConnectionState { socket_id, state } => {
                // cleanup happens on the explicit leave event, not on
                // transport flaps
                debug!("peer connection state for {}: {}", socket_id, state);
            }
        }
    }

    /// Whitespace-only text is rejected. The message shows up in the local
    /// log only once the server echoes it back (see `handle_event`).
    pub async fn send_chat_message(&mut self, text: &str) -> Result<()> {
        if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Left) {
            return Err(Error::Session("session has ended".to_owned()));
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Session("chat message is empty".to_owned()));
        }
        self.transport
            .send(SignalingEvent::SessionChatMessage {
                session_id: self.config.session_id.clone(),
                message: trimmed.to_owned(),
                user_id: self.config.user_id.clone(),
                user_name: self.config.user_name.clone(),
            })
            .await
    }

    /// Flip the outgoing video flag. Mute is a flag on the existing track
    /// plus an out-of-band `media-state` event; it never renegotiates.
    pub async fn toggle_video(&mut self) -> bool {
        let enabled = self.media.toggle_video();
        self.send_media_state().await;
        enabled
    }

    pub async fn toggle_audio(&mut self) -> bool {
        let enabled = self.media.toggle_audio();
        self.send_media_state().await;
        enabled
    }

    async fn send_media_state(&mut self) {
        let event = SignalingEvent::MediaState {
            session_id: self.config.session_id.clone(),
            user_id: self.config.user_id.clone(),
            video: self.media.video_enabled(),
            audio: self.media.audio_enabled(),
        };
        self.send_best_effort(event).await;
    }

    /// Optimistic: the local flag flips immediately, no acknowledgment
    /// needed.
    pub async fn toggle_hand_raise(&mut self) -> bool {
        self.hand_raised = !self.hand_raised;
        let event = if self.hand_raised {
            SignalingEvent::RaiseHand {
                session_id: self.config.session_id.clone(),
                user_id: self.config.user_id.clone(),
                user_name: self.config.user_name.clone(),
            }
        } else {
            SignalingEvent::LowerHand {
                session_id: self.config.session_id.clone(),
                user_id: self.config.user_id.clone(),
                user_name: self.config.user_name.clone(),
            }
        };
        self.send_best_effort(event).await;
        self.hand_raised
    }

    /// Acquire the screen capture and swap it into every entry's video
    /// sender. A cancelled picker surfaces as a recoverable error with no
    /// state change.
    pub async fn start_screen_share(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Active {
            return Err(Error::Session("session is not active".to_owned()));
        }
        if self.media.screen_active() {
            return Ok(());
        }
        let source = Arc::clone(&self.source);
        let track = self.media.start_screen_share(source.as_ref()).await?;
        self.registry.replace_outgoing_video_track(track).await;
        self.monitor.set_screen_sharing(true);
        let event = SignalingEvent::StartScreenShare {
            session_id: self.config.session_id.clone(),
            user_id: self.config.user_id.clone(),
        };
        self.send_best_effort(event).await;
        Ok(())
    }

    /// Release the screen capture (all its tracks stop) and point every
    /// video sender back at the camera track. No-op when not sharing.
    pub async fn stop_screen_share(&mut self) {
        if !self.media.stop_screen_share() {
            return;
        }
        if let Some(camera) = self.media.camera_video_track() {
            self.registry.replace_outgoing_video_track(camera).await;
        }
        self.monitor.set_screen_sharing(false);
        let event = SignalingEvent::StopScreenShare {
            session_id: self.config.session_id.clone(),
            user_id: self.config.user_id.clone(),
        };
        self.send_best_effort(event).await;
    }

    /// The OS ended the capture underneath us (user closed the native
    /// share surface): revert to the camera automatically.
    pub async fn handle_screen_capture_ended(&mut self) {
        if !self.media.screen_active() {
            return;
        }
        info!("screen capture ended, reverting to camera");
        self.stop_screen_share().await;
    }

    /// End the session: tear down every peer connection, release capture,
    /// announce the leave and close the transport. Safe from any state,
    /// including mid-join; calling it again is a no-op.
    pub async fn leave(&mut self) {
        if matches!(self.phase, SessionPhase::Leaving | SessionPhase::Left) {
            return;
        }
        self.set_phase(SessionPhase::Leaving);
        self.registry.close_all().await;
        self.media.release_all();
        let _ = self
            .transport
            .send(SignalingEvent::LeaveLiveSession {
                session_id: self.config.session_id.clone(),
                user_id: self.config.user_id.clone(),
            })
            .await;
        if let Err(e) = self.transport.disconnect().await {
            debug!("error closing signaling transport: {}", e);
        }
        self.set_phase(SessionPhase::Left);
    }

    async fn reconnect(&mut self) -> Result<()> {
        while self.reconnect_attempts < MAX_RECONNECT_ATTEMPTS {
            self.reconnect_attempts += 1;
            sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
            match self.transport.reconnect().await {
                Ok(()) => {
                    info!(
                        "signaling reconnected after {} attempt(s)",
                        self.reconnect_attempts
                    );
                    self.reconnect_attempts = 0;
                    self.monitor.set_transport(true);
                    let event = self.join_event();
                    self.send_best_effort(event).await;
                    return Ok(());
                }
                Err(e) => warn!("reconnect attempt failed: {}", e),
            }
        }
        Err(Error::Signaling(
            "max reconnection attempts reached".to_owned(),
        ))
    }

    fn join_event(&self) -> SignalingEvent {
        SignalingEvent::JoinLiveSession {
            session_id: self.config.session_id.clone(),
            batch_id: self.config.batch_id.clone(),
            user_id: self.config.user_id.clone(),
            user_name: self.config.user_name.clone(),
            role: self.config.role,
        }
    }

    async fn send_best_effort(&mut self, event: SignalingEvent) {
        if let Err(e) = self.transport.send(event).await {
            warn!("signaling send failed: {}", e);
            self.monitor.set_error(e.to_string());
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.monitor.set_phase(phase);
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.room.participants()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.room.messages()
    }

    pub fn hand_raised(&self) -> bool {
        self.hand_raised
    }

    pub fn video_enabled(&self) -> bool {
        self.media.video_enabled()
    }

    pub fn audio_enabled(&self) -> bool {
        self.media.audio_enabled()
    }

    pub fn screen_sharing(&self) -> bool {
        self.media.screen_active()
    }

    pub fn status(&self) -> SessionStatus {
        self.monitor.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.monitor.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &PeerRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        fake_signaling, sample_offer, FakeMediaSource, FakeSignaling, SignalingProbe,
    };
    use webrtc::track::track_local::TrackLocal;

    fn config() -> SessionConfig {
        let mut config = SessionConfig::new(
            "ws://signaling.invalid",
            "session-1",
            "batch-1",
            "user-1",
            "Asha",
            Role::Student,
        );
        // no STUN: tests negotiate descriptions locally, never gather
        config.ice_servers.clear();
        config
    }

    async fn active_session() -> (
        SessionCoordinator<FakeSignaling>,
        SignalingProbe,
        Arc<FakeMediaSource>,
    ) {
        let (transport, probe) = fake_signaling();
        let source = Arc::new(FakeMediaSource::new());
        let mut session = SessionCoordinator::new(config(), transport, source.clone());
        session.join().await.unwrap();
        (session, probe, source)
    }

    fn joined(socket_id: &str) -> SignalingEvent {
        SignalingEvent::ParticipantJoined {
            user_id: format!("user-{}", socket_id),
            user_name: "Ravi".to_owned(),
            role: Role::Student,
            socket_id: socket_id.to_owned(),
        }
    }

    fn offers(probe: &SignalingProbe) -> usize {
        probe
            .sent()
            .iter()
            .filter(|event| matches!(event, SignalingEvent::Offer { .. }))
            .count()
    }

    #[tokio::test]
    async fn join_without_media_degrades_to_receive_only() {
        let (transport, probe) = fake_signaling();
        let source = Arc::new(FakeMediaSource::without_camera());
        let mut session = SessionCoordinator::new(config(), transport, source);

        session.join().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        let status = session.status();
        assert!(status.transport_connected);
        assert!(!status.media_ready);
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::JoinLiveSession { .. })));
    }

    #[tokio::test]
    async fn second_join_is_refused() {
        let (mut session, _probe, _source) = active_session().await;
        assert!(session.join().await.is_err());
    }

    #[tokio::test]
    async fn duplicate_participant_join_creates_one_connection() {
        let (mut session, probe, _source) = active_session().await;

        session.handle_event(joined("sock-2")).await;
        session.handle_event(joined("sock-2")).await;

        assert_eq!(session.participants().len(), 1);
        assert_eq!(session.registry().len(), 1);
        assert_eq!(offers(&probe), 1);
    }

    #[tokio::test]
    async fn participant_left_closes_the_connection_and_repeats_are_noops() {
        let (mut session, _probe, _source) = active_session().await;
        session.handle_event(joined("sock-2")).await;

        session
            .handle_event(SignalingEvent::ParticipantLeft {
                socket_id: "sock-2".to_owned(),
            })
            .await;
        assert!(session.participants().is_empty());
        assert!(session.registry().is_empty());

        session
            .handle_event(SignalingEvent::ParticipantLeft {
                socket_id: "sock-2".to_owned(),
            })
            .await;
        assert!(session.participants().is_empty());
    }

    #[tokio::test]
    async fn mute_signals_media_state_but_never_renegotiates() {
        let (mut session, probe, _source) = active_session().await;
        session.handle_event(joined("sock-2")).await;
        let offers_before = offers(&probe);

        assert!(!session.toggle_video().await);
        assert!(!session.toggle_audio().await);

        assert_eq!(offers(&probe), offers_before);
        let last = probe.sent().pop().unwrap();
        assert_eq!(
            last,
            SignalingEvent::MediaState {
                session_id: "session-1".to_owned(),
                user_id: "user-1".to_owned(),
                video: false,
                audio: false,
            }
        );
    }

    #[tokio::test]
    async fn screen_share_round_trip_restores_the_camera_track() {
        let (mut session, probe, source) = active_session().await;
        session.handle_event(joined("sock-2")).await;

        session.start_screen_share().await.unwrap();
        assert!(session.screen_sharing());
        let sender = session.registry().video_sender("sock-2").unwrap();
        assert_eq!(sender.track().await.unwrap().id(), "screen-video");
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::StartScreenShare { .. })));

        session.stop_screen_share().await;
        assert!(!session.screen_sharing());
        assert_eq!(sender.track().await.unwrap().id(), "camera-video");
        assert!(source.last_screen().unwrap().is_stopped());
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::StopScreenShare { .. })));
    }

    #[tokio::test]
    async fn cancelled_screen_picker_changes_nothing() {
        let (transport, probe) = fake_signaling();
        let source = Arc::new(FakeMediaSource::without_screen());
        let mut session = SessionCoordinator::new(config(), transport, source);
        session.join().await.unwrap();

        assert!(session.start_screen_share().await.is_err());
        assert!(!session.screen_sharing());
        assert!(!probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::StartScreenShare { .. })));
    }

    #[tokio::test]
    async fn dying_screen_capture_reverts_to_the_camera() {
        let (mut session, probe, source) = active_session().await;
        session.handle_event(joined("sock-2")).await;
        session.start_screen_share().await.unwrap();

        source.end_screen_capture();
        session.handle_screen_capture_ended().await;

        assert!(!session.screen_sharing());
        let sender = session.registry().video_sender("sock-2").unwrap();
        assert_eq!(sender.track().await.unwrap().id(), "camera-video");
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::StopScreenShare { .. })));
    }

    #[tokio::test]
    async fn blank_chat_is_rejected() {
        let (mut session, probe, _source) = active_session().await;
        assert!(session.send_chat_message("   \t").await.is_err());
        assert!(!probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::SessionChatMessage { .. })));
    }

    #[tokio::test]
    async fn chat_appends_only_on_the_server_echo_in_order() {
        let (mut session, probe, _source) = active_session().await;

        session.send_chat_message("first").await.unwrap();
        assert!(session.messages().is_empty());
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::SessionChatMessage { .. })));

        for text in ["first", "second"] {
            session
                .handle_event(SignalingEvent::NewChatMessage {
                    message: text.to_owned(),
                    user_id: "user-1".to_owned(),
                    user_name: "Asha".to_owned(),
                    timestamp: None,
                })
                .await;
        }
        let texts: Vec<&str> = session.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn answer_for_an_unknown_target_leaves_the_registry_unchanged() {
        let (mut session, _probe, _source) = active_session().await;
        session
            .handle_event(SignalingEvent::Answer {
                session_id: "session-1".to_owned(),
                sdp: "{\"type\":\"answer\",\"sdp\":\"\"}".to_owned(),
                from_socket_id: Some("ghost".to_owned()),
                to_socket_id: "self".to_owned(),
            })
            .await;
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn inbound_offer_rosters_the_initiator_and_answers() {
        let (mut session, probe, _source) = active_session().await;
        let offer = sample_offer().await;

        session
            .handle_event(SignalingEvent::Offer {
                session_id: "session-1".to_owned(),
                sdp: offer,
                from_socket_id: Some("sock-9".to_owned()),
                to_socket_id: "self".to_owned(),
                user_id: "user-9".to_owned(),
                user_name: "Mina".to_owned(),
                role: Role::Teacher,
            })
            .await;

        let roster = session.participants();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].role, Role::Teacher);
        assert!(session.registry().contains("sock-9"));
        assert!(probe.sent().iter().any(|event| matches!(
            event,
            SignalingEvent::Answer { to_socket_id, .. } if to_socket_id == "sock-9"
        )));
    }

    #[tokio::test]
    async fn hand_raise_is_optimistic() {
        let (mut session, probe, _source) = active_session().await;

        assert!(session.toggle_hand_raise().await);
        assert!(session.hand_raised());
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::RaiseHand { .. })));

        assert!(!session.toggle_hand_raise().await);
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::LowerHand { .. })));
    }

    #[tokio::test]
    async fn roster_reflects_remote_badges_and_departures() {
        let (mut session, _probe, _source) = active_session().await;
        session.handle_event(joined("sock-1")).await;
        session.handle_event(joined("sock-2")).await;

        session
            .handle_event(SignalingEvent::MediaStateChanged {
                socket_id: "sock-1".to_owned(),
                video: false,
                audio: true,
            })
            .await;
        session
            .handle_event(SignalingEvent::HandRaised {
                user_id: "user-sock-2".to_owned(),
                user_name: "Ravi".to_owned(),
                socket_id: "sock-2".to_owned(),
            })
            .await;

        let roster = session.participants();
        assert!(!roster[0].video_enabled);
        assert!(roster[0].audio_enabled);
        assert!(roster[1].hand_raised);

        session
            .handle_event(SignalingEvent::ParticipantLeft {
                socket_id: "sock-1".to_owned(),
            })
            .await;
        let roster = session.participants();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].socket_id, "sock-2");
        assert!(!session.registry().contains("sock-1"));
    }

    #[tokio::test]
    async fn leave_is_safe_mid_join_and_terminal() {
        let (transport, _probe) = fake_signaling();
        let source = Arc::new(FakeMediaSource::new());
        let mut session = SessionCoordinator::new(config(), transport, source);
        assert_eq!(session.phase(), SessionPhase::Joining);

        session.leave().await;
        assert_eq!(session.phase(), SessionPhase::Left);

        // late events are dropped, not queued
        session.handle_event(joined("sock-2")).await;
        assert!(session.participants().is_empty());
        assert!(session.send_chat_message("hello").await.is_err());

        session.leave().await;
        assert_eq!(session.phase(), SessionPhase::Left);
    }

    #[tokio::test]
    async fn leave_tears_down_connections_and_capture() {
        let (mut session, probe, source) = active_session().await;
        session.handle_event(joined("sock-2")).await;

        session.leave().await;
        assert!(session.registry().is_empty());
        assert!(source.last_camera().unwrap().is_stopped());
        assert!(probe
            .sent()
            .iter()
            .any(|event| matches!(event, SignalingEvent::LeaveLiveSession { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_events_and_survives_channel_loss() {
        let (transport, probe) = fake_signaling();
        let source = Arc::new(FakeMediaSource::new());
        let mut session = SessionCoordinator::new(config(), transport, source);
        session.join().await.unwrap();

        probe.inbound.send(joined("sock-2")).await.unwrap();
        let SignalingProbe { sent: _sent, inbound } = probe;
        drop(inbound);

        // processes the join, then loses the channel; reconnects fail, so
        // the loop gives up and returns with the roster intact
        session.run().await;
        assert_eq!(session.participants().len(), 1);
        assert!(!session.status().transport_connected);
        assert_eq!(session.phase(), SessionPhase::Active);
    }
}
