//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::frame::Waveform;
use crate::{Error, Result};

/// Poll interval while waiting for the output callback to drain
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tail kept open after the last sample so the device buffer empties
const DRAIN_TAIL: Duration = Duration::from_millis(100);

/// A waveform-granularity audio output
#[async_trait(?Send)]
pub trait AudioSink {
    /// Play a waveform, returning once the device has consumed it
    ///
    /// Dropping the returned future stops playback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the output stream fails
    async fn play(&mut self, waveform: &Waveform) -> Result<()>;
}

/// Plays audio to an output device
pub struct AudioPlayback {
    device: Device,
}

impl AudioPlayback {
    /// Create a playback on the named output device, or the default one
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::Device(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::Device(format!("output device not found: {name}")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Device("no output device available".to_string()))?,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { device })
    }

    /// Pick a stream config for `sample_rate`, preferring mono then stereo
    ///
    /// Falls back to the device default (and its rate) when nothing matches.
    fn config_for(&self, sample_rate: u32) -> Result<StreamConfig> {
        let rate = SampleRate(sample_rate);
        let matching = |channels: u16| {
            self.device
                .supported_output_configs()
                .ok()?
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
                .map(|c| c.with_sample_rate(rate).config())
        };

        if let Some(config) = matching(1).or_else(|| matching(2)) {
            return Ok(config);
        }

        self.device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Playback(format!("no usable output config: {e}")))
    }
}

#[async_trait(?Send)]
impl AudioSink for AudioPlayback {
    async fn play(&mut self, waveform: &Waveform) -> Result<()> {
        if waveform.is_empty() {
            return Ok(());
        }

        let config = self.config_for(waveform.sample_rate)?;
        let waveform = if config.sample_rate.0 == waveform.sample_rate {
            waveform.clone()
        } else {
            tracing::debug!(
                from = waveform.sample_rate,
                to = config.sample_rate.0,
                "resampling for output device"
            );
            waveform.resampled(config.sample_rate.0)?
        };

        let channels = usize::from(config.channels.max(1));
        let sample_count = waveform.samples.len();
        let finished = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let finished_cb = Arc::clone(&finished);
        let failed_cb = Arc::clone(&failed);

        let samples = waveform.samples;
        let mut position = 0usize;

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if position < samples.len() {
                            position += 1;
                        } else {
                            finished_cb.store(true, Ordering::Release);
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    failed_cb.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        while !finished.load(Ordering::Acquire) {
            if failed.load(Ordering::Acquire) {
                return Err(Error::Playback("output stream failed".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tokio::time::sleep(DRAIN_TAIL).await;

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}
