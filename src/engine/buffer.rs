//! Audio Buffer Management
//!
//! Decoded PCM as handed over by a decoder collaborator, and the
//! validated, immutable buffer the engine shares between layers, the
//! output device and the offline mixer.

use serde::{Deserialize, Serialize};

use crate::error::{LayerdeckError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default output sample rate for playback and export (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Minimum audio duration in seconds (100ms), also the minimum trim window
pub const MIN_DURATION_SECS: f64 = 0.1;

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Decoded Audio (decoder collaborator output)
// ============================================================================

/// Raw decoder output: `frames[channel][sample]`
///
/// The engine never decodes files itself; whatever produced this value
/// (a WAV reader, a network fetch, a test fixture) is an external
/// collaborator. It is validated by [`AudioBuffer::from_decoded`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedAudio {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels in `frames`
    pub channel_count: u8,
    /// Per-channel sample arrays
    pub frames: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Build decoded audio from per-channel samples
    pub fn new(sample_rate: u32, frames: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channel_count: frames.len().min(u8::MAX as usize) as u8,
            frames,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Immutable decoded PCM shared by layers, sources and the mixer
///
/// Stores audio as non-interleaved 32-bit floating point samples.
/// Each channel is a separate `Vec<f32>`. Once built it is only ever
/// shared behind an `Arc` and never mutated.
///
/// # Example
/// ```
/// use layerdeck::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// // Create a 1-second stereo buffer
/// let buffer = AudioBuffer::new(48000, ChannelLayout::Stereo, 48000);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new zeroed buffer with the specified number of frames and layout
    pub fn new(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        let num_channels = layout.num_channels();
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Validate decoder output and take ownership of its samples
    ///
    /// # Errors
    /// * `UnsupportedFormat` - more than two channels, or none
    /// * `Decode` - zero sample rate, ragged channels, or non-finite samples
    /// * `AudioTooShort` - less than 0.1 seconds of audio
    pub fn from_decoded(decoded: DecodedAudio) -> Result<Self> {
        let DecodedAudio {
            sample_rate,
            channel_count,
            frames,
        } = decoded;

        if ChannelLayout::from_count(frames.len()).is_none() {
            return Err(LayerdeckError::UnsupportedFormat {
                format: format!("{}-channel audio (only mono/stereo supported)", frames.len()),
            });
        }

        if channel_count as usize != frames.len() {
            return Err(LayerdeckError::decode(format!(
                "channel count {} does not match {} sample arrays",
                channel_count,
                frames.len()
            )));
        }

        if sample_rate == 0 {
            return Err(LayerdeckError::decode("sample rate must be positive"));
        }

        let num_samples = frames[0].len();
        if frames.iter().any(|channel| channel.len() != num_samples) {
            return Err(LayerdeckError::decode("channels have different lengths"));
        }

        if frames.iter().flatten().any(|s| !s.is_finite()) {
            return Err(LayerdeckError::decode("audio contains NaN or infinite samples"));
        }

        let duration_secs = num_samples as f64 / sample_rate as f64;
        if duration_secs < MIN_DURATION_SECS {
            return Err(LayerdeckError::AudioTooShort { duration_secs });
        }

        Ok(Self {
            samples: frames,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();

        if num_channels == 0 || num_samples == 0 {
            return Vec::new();
        }

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// Check if the buffer has no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get a channel's samples
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get a channel's samples mutably
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Read a stereo frame at a fractional source position (in frames)
    ///
    /// Linearly interpolates between the floor and ceil indices. A mono
    /// source is duplicated to both channels. Positions outside the buffer
    /// read as silence; the last frame is held when `ceil` runs off the end.
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        let len = self.len();
        if len == 0 || !position.is_finite() || position < 0.0 {
            return (0.0, 0.0);
        }

        let lower = position.floor() as usize;
        if lower >= len {
            return (0.0, 0.0);
        }
        let upper = (lower + 1).min(len - 1);
        let frac = (position - lower as f64) as f32;

        let read = |channel: &[f32]| channel[lower] + (channel[upper] - channel[lower]) * frac;

        let left = read(&self.samples[0]);
        let right = if self.channels() > 1 {
            read(&self.samples[1])
        } else {
            left
        };
        (left, right)
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Clamp all samples to the [-1.0, 1.0] range
    pub fn clamp(&mut self) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn decoded(channels: usize, frames: usize, rate: u32) -> DecodedAudio {
        DecodedAudio::new(rate, vec![vec![0.25; frames]; channels])
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(ChannelLayout::Mono.num_channels(), 1);
        assert_eq!(ChannelLayout::Stereo.num_channels(), 2);
        assert_eq!(ChannelLayout::from_count(2), Some(ChannelLayout::Stereo));
        assert_eq!(ChannelLayout::from_count(3), None);
    }

    #[test]
    fn test_from_decoded_accepts_mono_and_stereo() {
        let mono = AudioBuffer::from_decoded(decoded(1, 4800, 48000)).unwrap();
        assert_eq!(mono.channels(), 1);
        assert_relative_eq!(mono.duration_secs(), 0.1);

        let stereo = AudioBuffer::from_decoded(decoded(2, 44100, 44100)).unwrap();
        assert_eq!(stereo.channels(), 2);
        assert_relative_eq!(stereo.duration_secs(), 1.0);
    }

    #[test]
    fn test_from_decoded_rejects_multichannel() {
        let err = AudioBuffer::from_decoded(decoded(6, 48000, 48000)).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn test_from_decoded_rejects_short_audio() {
        let err = AudioBuffer::from_decoded(decoded(1, 100, 48000)).unwrap_err();
        assert_eq!(err.error_code(), "AUDIO_TOO_SHORT");
    }

    #[test]
    fn test_from_decoded_rejects_ragged_channels() {
        let audio = DecodedAudio::new(48000, vec![vec![0.0; 9600], vec![0.0; 9000]]);
        let err = AudioBuffer::from_decoded(audio).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_FAILURE");
    }

    #[test]
    fn test_from_decoded_rejects_mismatched_channel_count() {
        let mut audio = decoded(2, 9600, 48000);
        audio.channel_count = 1;
        assert!(AudioBuffer::from_decoded(audio).is_err());
    }

    #[test]
    fn test_from_decoded_rejects_nan() {
        let mut audio = decoded(1, 9600, 48000);
        audio.frames[0][10] = f32::NAN;
        assert!(AudioBuffer::from_decoded(audio).is_err());
    }

    #[test]
    fn test_frame_at_interpolates() {
        let buffer = AudioBuffer {
            samples: vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, -1.0]],
            sample_rate: 48000,
        };
        let (l, r) = buffer.frame_at(0.5);
        assert_relative_eq!(l, 0.5);
        assert_relative_eq!(r, 0.5);

        let (l, r) = buffer.frame_at(1.25);
        assert_relative_eq!(l, 0.75);
        assert_relative_eq!(r, -0.25);
    }

    #[test]
    fn test_frame_at_duplicates_mono() {
        let buffer = AudioBuffer {
            samples: vec![vec![0.2, 0.4]],
            sample_rate: 48000,
        };
        let (l, r) = buffer.frame_at(0.0);
        assert_eq!(l, r);
    }

    #[test]
    fn test_frame_at_out_of_range_is_silent() {
        let buffer = AudioBuffer {
            samples: vec![vec![0.5; 4]],
            sample_rate: 48000,
        };
        assert_eq!(buffer.frame_at(4.0), (0.0, 0.0));
        assert_eq!(buffer.frame_at(-1.0), (0.0, 0.0));
        // Last frame is held rather than interpolated against silence
        assert_eq!(buffer.frame_at(3.5), (0.5, 0.5));
    }

    #[test]
    fn test_to_interleaved() {
        let buffer = AudioBuffer {
            samples: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            sample_rate: 48000,
        };
        assert_eq!(buffer.to_interleaved(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_peak_and_clamp() {
        let mut buffer = AudioBuffer {
            samples: vec![vec![0.5, -1.5], vec![2.0, 0.0]],
            sample_rate: 48000,
        };
        assert_relative_eq!(buffer.peak(), 2.0);
        buffer.clamp();
        assert_relative_eq!(buffer.peak(), 1.0);
        assert_eq!(buffer.samples[0][1], -1.0);
    }
}
