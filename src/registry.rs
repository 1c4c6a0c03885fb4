use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Error, Result};
use crate::media::LocalTracks;
use crate::signaling::CandidatePayload;
use crate::webrtc::{build_peer_connection, PeerHandles};

/// Peer-connection callbacks, forwarded into the coordinator's event loop.
pub enum PeerEvent {
    LocalCandidate {
        socket_id: String,
        candidate: RTCIceCandidateInit,
    },
    RemoteTrack {
        socket_id: String,
        track: Arc<TrackRemote>,
    },
    ConnectionState {
        socket_id: String,
        state: RTCPeerConnectionState,
    },
}

/// Negotiation progress of one entry. An absent entry is uninitialized;
/// closed entries are removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Negotiating,
    Connected,
}

struct PeerEntry {
    pc: Arc<RTCPeerConnection>,
    phase: PeerPhase,
    video_sender: Option<Arc<RTCRtpSender>>,
    /// Candidates that arrived before the remote description was set.
    pending_candidates: Vec<CandidatePayload>,
    remote_track: Option<Arc<TrackRemote>>,
}

impl PeerEntry {
    fn new(handles: PeerHandles) -> Self {
        Self {
            pc: handles.pc,
            phase: PeerPhase::Negotiating,
            video_sender: handles.video_sender,
            pending_candidates: Vec::new(),
            remote_track: None,
        }
    }

    async fn add_candidate(&self, candidate: CandidatePayload) {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        if let Err(e) = self.pc.add_ice_candidate(init).await {
            // remote peers are untrusted; a bad candidate never ends the call
            warn!("failed to add ICE candidate: {}", e);
        }
    }

    async fn drain_pending(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            debug!("applying buffered candidate");
            self.add_candidate(candidate).await;
        }
    }

    async fn shutdown(self) {
        if let Err(e) = self.pc.close().await {
            debug!("error closing peer connection: {}", e);
        }
    }
}

/// One peer connection per remote participant, keyed by the participant's
/// transport-assigned socket id.
pub struct PeerRegistry {
    entries: HashMap<String, PeerEntry>,
    ice_servers: Vec<String>,
    events: mpsc::Sender<PeerEvent>,
}

impl PeerRegistry {
    pub fn new(ice_servers: Vec<String>, events: mpsc::Sender<PeerEvent>) -> Self {
        Self {
            entries: HashMap::new(),
            ice_servers,
            events,
        }
    }

    /// Initiator path: build a connection, attach current local tracks and
    /// return the offer SDP for the signaling layer to deliver.
    pub async fn create_for_participant(
        &mut self,
        socket_id: &str,
        tracks: &LocalTracks,
    ) -> Result<String> {
        if self.entries.contains_key(socket_id) {
            return Err(Error::Session(format!(
                "peer connection already exists for {}",
                socket_id
            )));
        }
        let handles =
            build_peer_connection(&self.ice_servers, socket_id, self.events.clone(), tracks)
                .await?;
        let offer = handles.pc.create_offer(None).await?;
        handles.pc.set_local_description(offer.clone()).await?;
        self.entries
            .insert(socket_id.to_owned(), PeerEntry::new(handles));
        info!("negotiating with {}", socket_id);
        Ok(serde_json::to_string(&offer)?)
    }

    /// Responder path: build a connection (or reuse the existing one on
    /// renegotiation), apply the offer and return the answer SDP.
    pub async fn accept_offer(
        &mut self,
        socket_id: &str,
        sdp: &str,
        tracks: &LocalTracks,
    ) -> Result<String> {
        let offer: RTCSessionDescription = serde_json::from_str(sdp)
            .map_err(|e| Error::Signaling(format!("malformed offer: {}", e)))?;
        if !self.entries.contains_key(socket_id) {
            let handles =
                build_peer_connection(&self.ice_servers, socket_id, self.events.clone(), tracks)
                    .await?;
            self.entries
                .insert(socket_id.to_owned(), PeerEntry::new(handles));
        } else {
            debug!("renegotiation offer from {}", socket_id);
        }
        let Some(entry) = self.entries.get_mut(socket_id) else {
            return Err(Error::Session("registry entry vanished".to_owned()));
        };
        entry.pc.set_remote_description(offer).await?;
        let answer = entry.pc.create_answer(None).await?;
        entry.pc.set_local_description(answer.clone()).await?;
        entry.drain_pending().await;
        Ok(serde_json::to_string(&answer)?)
    }

    /// Advance an existing entry with the remote answer. An answer for an
    /// unknown or already-closed participant is a protocol violation from
    /// an untrusted peer: logged, ignored, never an error.
    pub async fn apply_answer(&mut self, socket_id: &str, sdp: &str) {
        let Some(entry) = self.entries.get_mut(socket_id) else {
            warn!("answer for unknown peer {}, ignoring", socket_id);
            return;
        };
        let answer: RTCSessionDescription = match serde_json::from_str(sdp) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("malformed answer from {}, ignoring: {}", socket_id, e);
                return;
            }
        };
        if let Err(e) = entry.pc.set_remote_description(answer).await {
            warn!("could not apply answer from {}: {}", socket_id, e);
            return;
        }
        entry.drain_pending().await;
    }

    /// Apply a remote candidate, buffering it if the remote description is
    /// not set yet. Unknown participants are ignored.
    pub async fn apply_ice_candidate(&mut self, socket_id: &str, candidate: CandidatePayload) {
        let Some(entry) = self.entries.get_mut(socket_id) else {
            warn!("ICE candidate for unknown peer {}, ignoring", socket_id);
            return;
        };
        if entry.pc.remote_description().await.is_none() {
            debug!("remote description for {} not set yet, buffering candidate", socket_id);
            entry.pending_candidates.push(candidate);
            return;
        }
        entry.add_candidate(candidate).await;
    }

    /// Swap the outgoing video track on every entry, e.g. when a screen
    /// share starts or stops. One entry failing must not abort the rest.
    pub async fn replace_outgoing_video_track(&mut self, track: Arc<TrackLocalStaticSample>) {
        for (socket_id, entry) in &self.entries {
            let Some(sender) = &entry.video_sender else {
                debug!("no video sender for {}, skipping", socket_id);
                continue;
            };
            if let Err(e) = sender
                .replace_track(Some(track.clone() as Arc<dyn TrackLocal + Send + Sync>))
                .await
            {
                warn!("failed to replace video track for {}: {}", socket_id, e);
            }
        }
    }

    /// Record the first remote track for an entry and mark it connected.
    pub fn note_remote_track(&mut self, socket_id: &str, track: Arc<TrackRemote>) {
        if let Some(entry) = self.entries.get_mut(socket_id) {
            entry.phase = PeerPhase::Connected;
            entry.remote_track.get_or_insert(track);
        }
    }

    /// Tear down one entry. Returns whether it existed. Closing releases
    /// the connection but never stops the shared local capture tracks.
    pub async fn close(&mut self, socket_id: &str) -> bool {
        match self.entries.remove(socket_id) {
            Some(entry) => {
                entry.shutdown().await;
                info!("closed peer connection for {}", socket_id);
                true
            }
            None => false,
        }
    }

    /// Tear down every entry, at session end.
    pub async fn close_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.shutdown().await;
        }
    }

    pub fn contains(&self, socket_id: &str) -> bool {
        self.entries.contains_key(socket_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn phase(&self, socket_id: &str) -> Option<PeerPhase> {
        self.entries.get(socket_id).map(|entry| entry.phase)
    }

    pub fn remote_track(&self, socket_id: &str) -> Option<Arc<TrackRemote>> {
        self.entries
            .get(socket_id)
            .and_then(|entry| entry.remote_track.clone())
    }

    #[cfg(test)]
    pub(crate) fn pending_candidates(&self, socket_id: &str) -> usize {
        self.entries
            .get(socket_id)
            .map(|entry| entry.pending_candidates.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn video_sender(&self, socket_id: &str) -> Option<Arc<RTCRtpSender>> {
        self.entries
            .get(socket_id)
            .and_then(|entry| entry.video_sender.clone())
    }
}
