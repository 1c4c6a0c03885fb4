use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};
use crate::media::{CaptureHandle, CaptureStream, LocalTracks, MediaSource};
use crate::registry::PeerRegistry;
use crate::signaling::{CandidatePayload, SignalingEvent, SignalingTransport};

/// In-memory transport: records everything sent, replays whatever the test
/// pushes through the probe.
pub(crate) struct FakeSignaling {
    sent: Arc<Mutex<Vec<SignalingEvent>>>,
    rx: mpsc::Receiver<SignalingEvent>,
    connected: bool,
}

pub(crate) struct SignalingProbe {
    pub sent: Arc<Mutex<Vec<SignalingEvent>>>,
    pub inbound: mpsc::Sender<SignalingEvent>,
}

impl SignalingProbe {
    pub fn sent(&self) -> Vec<SignalingEvent> {
        self.sent.lock().unwrap().clone()
    }
}

pub(crate) fn fake_signaling() -> (FakeSignaling, SignalingProbe) {
    let (inbound, rx) = mpsc::channel(64);
    let sent = Arc::new(Mutex::new(Vec::new()));
    (
        FakeSignaling {
            sent: sent.clone(),
            rx,
            connected: true,
        },
        SignalingProbe { sent, inbound },
    )
}

#[async_trait]
impl SignalingTransport for FakeSignaling {
    async fn send(&mut self, event: SignalingEvent) -> Result<()> {
        if !self.connected {
            return Err(Error::Signaling("transport is disconnected".to_owned()));
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn receive(&mut self) -> Option<SignalingEvent> {
        if !self.connected {
            return None;
        }
        self.rx.recv().await
    }

    async fn reconnect(&mut self) -> Result<()> {
        Err(Error::Signaling("no server to reconnect to".to_owned()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

/// Capture provider with no devices behind it; tracks are real webrtc
/// track objects, so sender plumbing is exercised for real.
pub(crate) struct FakeMediaSource {
    fail_camera: bool,
    fail_screen: bool,
    last_camera: Mutex<Option<CaptureStream>>,
    last_screen: Mutex<Option<CaptureStream>>,
    camera_handles: Mutex<Vec<CaptureHandle>>,
    screen_handles: Mutex<Vec<CaptureHandle>>,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self {
            fail_camera: false,
            fail_screen: false,
            last_camera: Mutex::new(None),
            last_screen: Mutex::new(None),
            camera_handles: Mutex::new(Vec::new()),
            screen_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn without_camera() -> Self {
        Self {
            fail_camera: true,
            ..Self::new()
        }
    }

    pub fn without_screen() -> Self {
        Self {
            fail_screen: true,
            ..Self::new()
        }
    }

    pub fn last_camera(&self) -> Option<CaptureStream> {
        self.last_camera.lock().unwrap().clone()
    }

    pub fn last_screen(&self) -> Option<CaptureStream> {
        self.last_screen.lock().unwrap().clone()
    }

    /// Simulate the OS tearing the share down (user closed the native
    /// surface).
    pub fn end_screen_capture(&self) {
        for handle in self.screen_handles.lock().unwrap().iter() {
            handle.mark_ended();
        }
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire_camera(&self) -> Result<CaptureStream> {
        if self.fail_camera {
            return Err(Error::Media("camera permission denied".to_owned()));
        }
        let (stream, handle) = CaptureStream::new(
            Some(audio_track("camera-audio")),
            Some(video_track("camera-video")),
        );
        self.camera_handles.lock().unwrap().push(handle);
        *self.last_camera.lock().unwrap() = Some(stream.clone());
        Ok(stream)
    }

    async fn acquire_screen(&self) -> Result<CaptureStream> {
        if self.fail_screen {
            return Err(Error::Media("screen picker cancelled".to_owned()));
        }
        let (stream, handle) = CaptureStream::new(None, Some(video_track("screen-video")));
        self.screen_handles.lock().unwrap().push(handle);
        *self.last_screen.lock().unwrap() = Some(stream.clone());
        Ok(stream)
    }
}

pub(crate) fn audio_track(id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "test".to_owned(),
    ))
}

pub(crate) fn video_track(id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "test".to_owned(),
    ))
}

pub(crate) fn local_tracks() -> LocalTracks {
    LocalTracks {
        audio: Some(audio_track("camera-audio")),
        video: Some(video_track("camera-video")),
    }
}

pub(crate) fn host_candidate() -> CandidatePayload {
    CandidatePayload {
        candidate: "candidate:1 1 udp 2122252543 192.0.2.7 50000 typ host".to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_mline_index: Some(0),
    }
}

/// A real offer SDP, produced by a throwaway registry.
pub(crate) async fn sample_offer() -> String {
    let (tx, _rx) = mpsc::channel(8);
    let mut registry = PeerRegistry::new(Vec::new(), tx);
    registry
        .create_for_participant("remote", &local_tracks())
        .await
        .expect("offer creation")
}
