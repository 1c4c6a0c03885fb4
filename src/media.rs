use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};

/// Capture provider capability. The coordinator only ever talks to this
/// trait, so sessions are testable without real devices.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// One camera + microphone acquisition per session.
    async fn acquire_camera(&self) -> Result<CaptureStream>;

    /// A second, separate capture stream, exclusively owned while a screen
    /// share is active.
    async fn acquire_screen(&self) -> Result<CaptureStream>;
}

/// A live capture: up to one audio and one video track plus the shared
/// control flags. Cloning shares the underlying capture.
#[derive(Clone)]
pub struct CaptureStream {
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    ended: watch::Receiver<bool>,
}

impl CaptureStream {
    /// Builds a stream plus the provider-side handle that feeds it.
    pub fn new(
        audio: Option<Arc<TrackLocalStaticSample>>,
        video: Option<Arc<TrackLocalStaticSample>>,
    ) -> (Self, CaptureHandle) {
        let audio_enabled = Arc::new(AtomicBool::new(true));
        let video_enabled = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(AtomicBool::new(false));
        let (ended_tx, ended_rx) = watch::channel(false);
        let stream = Self {
            audio,
            video,
            audio_enabled: audio_enabled.clone(),
            video_enabled: video_enabled.clone(),
            stopped: stopped.clone(),
            ended: ended_rx,
        };
        let handle = CaptureHandle {
            audio_enabled,
            video_enabled,
            stopped,
            ended: ended_tx,
        };
        (stream, handle)
    }

    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Halt the underlying capture. The provider observes the flag and
    /// releases its device resources.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Fires when the capture dies underneath us, e.g. the user closes the
    /// OS screen-share surface.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended.clone()
    }
}

/// Provider-side handle for one capture: the feeding loop consults the
/// enabled/stop flags and reports an unexpected end of stream.
pub struct CaptureHandle {
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    ended: watch::Sender<bool>,
}

impl CaptureHandle {
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn audio_flag(&self) -> Arc<AtomicBool> {
        self.audio_enabled.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Signal that the capture ended without a `stop()` call.
    pub fn mark_ended(&self) {
        let _ = self.ended.send(true);
    }
}

/// The local tracks currently offered to every peer connection.
#[derive(Clone, Default)]
pub struct LocalTracks {
    pub audio: Option<Arc<TrackLocalStaticSample>>,
    pub video: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTracks {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Local media-control state: the camera/microphone capture, the optional
/// screen capture, and the mute flags.
///
/// Toggling flips flags on the existing capture; it never stops the device
/// and never triggers renegotiation.
pub struct MediaControls {
    camera: Option<CaptureStream>,
    screen: Option<CaptureStream>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl MediaControls {
    pub fn new() -> Self {
        Self {
            camera: None,
            screen: None,
            video_enabled: true,
            audio_enabled: true,
        }
    }

    /// Acquire camera + microphone once, at session entry. Failure leaves
    /// the session in receive-only mode; the caller decides how to surface
    /// it.
    pub async fn acquire_camera(&mut self, source: &dyn MediaSource) -> Result<()> {
        if self.camera.is_some() {
            return Err(Error::Media("camera already acquired".to_owned()));
        }
        let stream = source.acquire_camera().await?;
        stream.set_audio_enabled(self.audio_enabled);
        stream.set_video_enabled(self.video_enabled);
        self.camera = Some(stream);
        Ok(())
    }

    pub fn has_media(&self) -> bool {
        self.camera.is_some()
    }

    pub fn local_tracks(&self) -> LocalTracks {
        match &self.camera {
            Some(camera) => LocalTracks {
                audio: camera.audio_track(),
                video: camera.video_track(),
            },
            None => LocalTracks::default(),
        }
    }

    pub fn camera_video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.camera.as_ref().and_then(|camera| camera.video_track())
    }

    pub fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        if let Some(camera) = &self.camera {
            camera.set_video_enabled(self.video_enabled);
        }
        self.video_enabled
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.audio_enabled = !self.audio_enabled;
        if let Some(camera) = &self.camera {
            camera.set_audio_enabled(self.audio_enabled);
        }
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// Acquire the screen capture and hand back its video track for sender
    /// replacement. The camera capture is untouched.
    pub async fn start_screen_share(
        &mut self,
        source: &dyn MediaSource,
    ) -> Result<Arc<TrackLocalStaticSample>> {
        if self.screen.is_some() {
            return Err(Error::Media("screen share already active".to_owned()));
        }
        let stream = source.acquire_screen().await?;
        let track = stream
            .video_track()
            .ok_or_else(|| Error::Media("screen capture produced no video track".to_owned()))?;
        self.screen = Some(stream);
        Ok(track)
    }

    /// Release the screen capture entirely (all tracks stopped). Returns
    /// whether a share was active.
    pub fn stop_screen_share(&mut self) -> bool {
        match self.screen.take() {
            Some(screen) => {
                screen.stop();
                true
            }
            None => false,
        }
    }

    pub fn screen_active(&self) -> bool {
        self.screen.is_some()
    }

    /// End-of-stream signal for the active share, if any.
    pub fn screen_ended(&self) -> Option<watch::Receiver<bool>> {
        self.screen.as_ref().map(|screen| screen.ended())
    }

    /// Session teardown: stop everything, including the shared camera
    /// capture this struct owns.
    pub fn release_all(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
    }
}

impl Default for MediaControls {
    fn default() -> Self {
        Self::new()
    }
}
