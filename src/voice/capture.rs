//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::frame::{AudioFrame, SAMPLE_RATE, f32_to_i16};
use crate::{Error, Result};

/// How long `next_frame` waits for samples before declaring the stream stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll interval while waiting for the capture callback to fill the buffer
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A source of fixed-size audio frames
///
/// The listening and recording phases open, drain and close the source
/// independently, and may ask for different frame sizes.
#[async_trait(?Send)]
pub trait FrameSource {
    /// Open the input stream, discarding anything buffered before the call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the device cannot be opened
    fn open(&mut self) -> Result<()>;

    /// Wait until `size` samples are available and return them as a frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the device disconnects or the read fails
    async fn next_frame(&mut self, size: usize) -> Result<AudioFrame>;

    /// Discard samples buffered so far without closing the stream
    fn drain(&mut self);

    /// Stop the input stream and release the device
    fn close(&mut self);

    /// Whether the stream is currently open
    fn is_open(&self) -> bool;
}

/// Captures audio from an input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<i16>>>,
    failed: Arc<AtomicBool>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a capture on the named input device, or the default one
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::Device(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::Device(format!("input device not found: {name}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| Error::Device("no input device available".to_string()))?,
        };

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        };

        // Prefer mono, fall back to down-mixing whatever channel count is offered
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| supports_rate(c))
            })
            .ok_or_else(|| Error::Device("no 16 kHz input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            failed: Arc::new(AtomicBool::new(false)),
            stream: None,
        })
    }

    /// Name of the selected input device
    #[must_use]
    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl FrameSource for AudioCapture {
    fn open(&mut self) -> Result<()> {
        self.drain();
        if self.stream.is_some() {
            return Ok(());
        }

        self.failed.store(false, Ordering::Release);
        let buffer = Arc::clone(&self.buffer);
        let failed = Arc::clone(&self.failed);
        let channels = usize::from(self.config.channels.max(1));

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(data.chunks(channels).map(downmix));
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    async fn next_frame(&mut self, size: usize) -> Result<AudioFrame> {
        if self.stream.is_none() {
            return Err(Error::Device("capture stream is not open".to_string()));
        }

        let start = tokio::time::Instant::now();
        loop {
            if self.failed.load(Ordering::Acquire) {
                return Err(Error::Device("input stream failed".to_string()));
            }

            {
                let mut buf = self
                    .buffer
                    .lock()
                    .map_err(|_| Error::Device("capture buffer poisoned".to_string()))?;
                if buf.len() >= size {
                    let samples: Vec<i16> = buf.drain(..size).collect();
                    return Ok(AudioFrame::new(samples));
                }
            }

            if start.elapsed() > STALL_TIMEOUT {
                return Err(Error::Device(format!(
                    "no audio received for {STALL_TIMEOUT:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn drain(&mut self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
        self.drain();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Average interleaved channels into one 16-bit sample
#[allow(clippy::cast_precision_loss)]
fn downmix(frame: &[f32]) -> i16 {
    f32_to_i16(frame.iter().sum::<f32>() / frame.len().max(1) as f32)
}

/// Names of the available input and output devices
///
/// # Errors
///
/// Returns error if the audio host cannot enumerate devices
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok((inputs, outputs))
}
