use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample as _, SampleFormat, SizedSample};
use log::{error, warn};
use tokio::sync::mpsc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};
use crate::media::{CaptureHandle, CaptureStream, MediaSource};

/// Capture provider backed by the host's default input device.
///
/// Audio-only: there is no portable camera or screen grabber in this stack,
/// so video acquisition reports a recoverable media error and the session
/// proceeds without an outgoing video track.
pub struct DeviceMediaSource;

#[async_trait]
impl MediaSource for DeviceMediaSource {
    async fn acquire_camera(&self) -> Result<CaptureStream> {
        // unique per acquisition so concurrent sessions never collide
        let track_id = format!("mic-{:08x}", rand::random::<u32>());
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            track_id,
            "live-classroom".to_owned(),
        ));
        let (stream, handle) = CaptureStream::new(Some(track.clone()), None);
        spawn_input_capture(track, handle).map_err(Error::from)?;
        Ok(stream)
    }

    async fn acquire_screen(&self) -> Result<CaptureStream> {
        Err(Error::Media(
            "screen capture is not available on this host".to_owned(),
        ))
    }
}

/// Runs the cpal stream on its own thread (cpal streams are not `Send`) and
/// bridges captured frames into the track via a bounded channel. The feeder
/// drops frames while audio is disabled, so mute never stops the device.
fn spawn_input_capture(track: Arc<TrackLocalStaticSample>, handle: CaptureHandle) -> AnyResult<()> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("no input device available"))?;
    let config = device.default_input_config()?;
    let sample_rate = config.sample_rate().0;

    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(64);

    let enabled = handle.audio_flag();
    let stopped = handle.stop_flag();
    tokio::spawn(async move {
        use std::sync::atomic::Ordering;
        while let Some(samples) = frame_rx.recv().await {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            if !enabled.load(Ordering::SeqCst) {
                continue;
            }
            let mut data = Vec::with_capacity(samples.len() * 4);
            for sample in &samples {
                data.extend_from_slice(&sample.to_le_bytes());
            }
            let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
            let sample = Sample {
                data: data.into(),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                warn!("failed to write capture sample: {}", e);
            }
        }
    });

    std::thread::Builder::new()
        .name("mic-capture".to_owned())
        .spawn(move || {
            let stream = match build_input_stream(&device, &config, frame_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to open input stream: {}", e);
                    handle.mark_ended();
                    return;
                }
            };
            if let Err(e) = stream.play() {
                error!("failed to start input stream: {}", e);
                handle.mark_ended();
                return;
            }
            while !handle.is_stopped() {
                std::thread::sleep(Duration::from_millis(100));
            }
            drop(stream);
        })?;

    Ok(())
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    frames: mpsc::Sender<Vec<f32>>,
) -> AnyResult<cpal::Stream> {
    match config.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(device, &config.clone().into(), frames),
        SampleFormat::I16 => build_typed::<i16>(device, &config.clone().into(), frames),
        SampleFormat::U16 => build_typed::<u16>(device, &config.clone().into(), frames),
        sample_format => Err(anyhow::anyhow!(
            "unsupported sample format: {:?}",
            sample_format
        )),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: mpsc::Sender<Vec<f32>>,
) -> AnyResult<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_fn = |err| error!("input stream error: {}", err);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|sample| f32::from_sample(*sample)).collect();
            // back-pressure: drop the frame rather than block the audio thread
            let _ = frames.try_send(samples);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
