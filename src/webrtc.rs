use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::media::LocalTracks;
use crate::registry::PeerEvent;

pub(crate) struct PeerHandles {
    pub pc: Arc<RTCPeerConnection>,
    pub video_sender: Option<Arc<RTCRtpSender>>,
}

/// Builds one peer connection for a remote participant: STUN configuration,
/// callback wiring into the coordinator's event channel, and the current
/// local tracks (or recv-only media sections when capture is unavailable).
pub(crate) async fn build_peer_connection(
    ice_servers: &[String],
    socket_id: &str,
    events: mpsc::Sender<PeerEvent>,
    tracks: &LocalTracks,
) -> Result<PeerHandles> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let config = if ice_servers.is_empty() {
        RTCConfiguration::default()
    } else {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        }
    };

    let pc = Arc::new(api.new_peer_connection(config).await?);

    // local candidates go back out through the signaling channel
    let id = socket_id.to_owned();
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let id = id.clone();
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(PeerEvent::LocalCandidate {
                                socket_id: id,
                                candidate: init,
                            })
                            .await;
                    }
                    Err(e) => debug!("could not serialize local candidate: {}", e),
                }
            }
        })
    }));

    let id = socket_id.to_owned();
    let tx = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            let id = id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx
                    .send(PeerEvent::RemoteTrack {
                        socket_id: id,
                        track,
                    })
                    .await;
            })
        },
    ));

    let id = socket_id.to_owned();
    let tx = events;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let id = id.clone();
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx
                .send(PeerEvent::ConnectionState {
                    socket_id: id,
                    state,
                })
                .await;
        })
    }));

    match &tracks.audio {
        Some(track) => {
            pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
        }
        None => {
            pc.add_transceiver_from_kind(RTPCodecType::Audio, Some(recv_only())).await?;
        }
    }
    // only the video sender is kept: screen share swaps it in place
    let video_sender = match &tracks.video {
        Some(track) => Some(
            pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await?,
        ),
        None => {
            pc.add_transceiver_from_kind(RTPCodecType::Video, Some(recv_only())).await?;
            None
        }
    };

    Ok(PeerHandles { pc, video_sender })
}

fn recv_only() -> RTCRtpTransceiverInit {
    RTCRtpTransceiverInit {
        direction: RTCRtpTransceiverDirection::Recvonly,
        send_encodings: vec![],
    }
}
