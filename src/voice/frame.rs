//! Audio frames, sealed sample buffers and playable waveforms

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Input frames per resampler chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Number of samples covering `duration` at [`SAMPLE_RATE`]
///
/// Returns `None` when the duration does not map to a whole number of samples.
#[must_use]
pub fn samples_for(duration: Duration) -> Option<usize> {
    let scaled = duration.as_nanos() * u128::from(SAMPLE_RATE);
    if scaled % 1_000_000_000 != 0 {
        return None;
    }
    usize::try_from(scaled / 1_000_000_000).ok()
}

/// A fixed-duration slice of mono 16 kHz 16-bit samples
///
/// Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Box<[i16]>,
}

impl AudioFrame {
    /// Wrap captured samples
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration at [`SAMPLE_RATE`]
    #[must_use]
    pub fn duration(&self) -> Duration {
        let len = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        Duration::from_nanos(len.saturating_mul(1_000_000_000) / u64::from(SAMPLE_RATE))
    }

    /// Samples scaled to `[-1.0, 1.0]`
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }

    /// RMS energy of the frame on the `[-1.0, 1.0]` scale
    #[must_use]
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.to_f32())
    }
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert a float sample to 16-bit PCM
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode 16-bit mono samples as WAV bytes for STT engines
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// A playable mono waveform
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Waveform {
    /// Create a waveform from float samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate);
        Duration::from_secs_f64(secs)
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode WAV bytes, down-mixing multi-channel audio to mono
    ///
    /// # Errors
    ///
    /// Returns error if the data is not a readable WAV stream
    pub fn from_wav_bytes(data: &[u8]) -> Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(data))?;
        decode_wav(reader)
    }

    /// Load a WAV file from disk
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or decoded
    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        decode_wav(reader)
    }

    /// Decode MP3 bytes, down-mixing stereo to mono
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails
    pub fn from_mp3(mp3_data: &[u8]) -> Result<Self> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
        let mut samples = Vec::new();
        let mut sample_rate = 0;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                    if frame.channels == 2 {
                        samples.extend(frame.data.chunks(2).map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        }));
                    } else {
                        samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                    }
                }
                Err(minimp3::Error::Eof) => break,
                Err(e) => return Err(Error::Synthesis(format!("MP3 decode error: {e}"))),
            }
        }

        if sample_rate == 0 {
            return Err(Error::Synthesis("MP3 stream contained no frames".to_string()));
        }

        Ok(Self::new(samples, sample_rate))
    }

    /// Short two-tone acknowledgment chime
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn chime() -> Self {
        const RATE: u32 = 24000;
        let tone = |frequency: f32, millis: u32| {
            let count = RATE * millis / 1000;
            (0..count).map(move |i| {
                let t = i as f32 / RATE as f32;
                let fade = 1.0 - (i as f32 / count as f32);
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.25 * fade
            })
        };

        let samples = tone(880.0, 90).chain(tone(1320.0, 120)).collect();
        Self::new(samples, RATE)
    }

    /// Resample to `target_rate` with rubato's FFT resampler
    ///
    /// The resampler's output delay is trimmed, so the result lines up with
    /// the input and has the same duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if no resampler can be built for the rate
    /// pair or processing fails
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn resampled(&self, target_rate: u32) -> Result<Self> {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(Self::new(self.samples.clone(), target_rate));
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            target_rate as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

        let expected = (self.samples.len() as f64 * f64::from(target_rate)
            / f64::from(self.sample_rate))
        .round() as usize;
        let delay = resampler.output_delay();

        // zero padding flushes the tail and the delay line
        let mut input = self
            .samples
            .iter()
            .copied()
            .chain(std::iter::repeat(0.0));
        let mut chunk = Vec::with_capacity(RESAMPLE_CHUNK);
        let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

        while output.len() < expected + delay {
            chunk.clear();
            chunk.extend(input.by_ref().take(resampler.input_frames_next()));
            let frames = resampler
                .process(&[&chunk], None)
                .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
            output.extend_from_slice(&frames[0]);
        }

        output.drain(..delay);
        output.truncate(expected);
        Ok(Self::new(output, target_rate))
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Waveform> {
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Waveform::new(samples, spec.sample_rate))
}
