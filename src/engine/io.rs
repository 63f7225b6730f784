//! WAV decoding collaborator
//!
//! The engine consumes [`DecodedAudio`] and never decodes by itself. This
//! module is the stock decoder for WAV files (8/16/24/32-bit integer and
//! 32-bit float) plus the checksummed [`AudioSourceRef`] a saved project
//! uses to find and verify its sources again.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::engine::buffer::DecodedAudio;
use crate::error::{LayerdeckError, Result};
use crate::layers::AudioSourceRef;

/// Decode a WAV file from disk
///
/// # Errors
/// * `Io` - the file cannot be opened
/// * `Decode` - the file is not a readable WAV stream
/// * `UnsupportedFormat` - more than two channels or an unknown bit depth
pub fn decode_wav_file(path: &Path) -> Result<DecodedAudio> {
    let reader = WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => LayerdeckError::Io(io),
        other => LayerdeckError::Decode {
            reason: format!("Failed to open WAV file {}: {}", path.display(), other),
            source: Some(Box::new(other)),
        },
    })?;
    let decoded = decode_reader(reader)?;
    debug!(
        path = %path.display(),
        sample_rate = decoded.sample_rate,
        channels = decoded.channel_count,
        "decoded WAV file"
    );
    Ok(decoded)
}

/// Decode an in-memory WAV stream
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| LayerdeckError::Decode {
        reason: format!("Failed to parse WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;
    decode_reader(reader)
}

fn decode_reader<R: Read>(reader: WavReader<R>) -> Result<DecodedAudio> {
    let spec = reader.spec();
    let channels = spec.channels as usize;

    if channels == 0 || channels > 2 {
        return Err(LayerdeckError::UnsupportedFormat {
            format: format!("{}-channel audio (only mono/stereo supported)", channels),
        });
    }

    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    Ok(DecodedAudio::new(
        spec.sample_rate,
        deinterleave(&samples, channels),
    ))
}

// ============================================================================
// Source references
// ============================================================================

/// SHA-256 of a byte slice as lowercase hex
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file as lowercase hex
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Build a checksummed reference to a file
pub fn source_ref_for_file(path: &Path) -> Result<AudioSourceRef> {
    Ok(AudioSourceRef {
        uri: path.to_string_lossy().into_owned(),
        sha256: Some(checksum_file(path)?),
    })
}

/// Resolve a reference URI against a project directory
///
/// Absolute paths are kept; relative ones are joined to `base_dir`.
/// A `file://` prefix is stripped.
pub fn resolve_uri(uri: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// Re-decode the audio a reference points at
///
/// When the reference carries a checksum the file must still match it.
pub fn decode_source(source: &AudioSourceRef, base_dir: Option<&Path>) -> Result<DecodedAudio> {
    let path = resolve_uri(&source.uri, base_dir);
    if let Some(expected) = &source.sha256 {
        let actual = checksum_file(&path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            warn!(path = %path.display(), "source checksum mismatch");
            return Err(LayerdeckError::decode(format!(
                "{} changed since it was added (checksum mismatch)",
                path.display()
            )));
        }
    }
    decode_wav_file(&path)
}

// ============================================================================
// Test signals
// ============================================================================

/// Generate a mono sine tone
///
/// Useful for previews and for testing the engine without audio files.
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> DecodedAudio {
    DecodedAudio::new(
        sample_rate,
        vec![sine(frequency, duration_secs, sample_rate)],
    )
}

/// Generate a stereo tone with a different frequency per channel
pub fn generate_stereo_test_tone(
    freq_left: f32,
    freq_right: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> DecodedAudio {
    DecodedAudio::new(
        sample_rate,
        vec![
            sine(freq_left, duration_secs, sample_rate),
            sine(freq_right, duration_secs, sample_rate),
        ],
    )
}

fn sine(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect()
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let failed = |bits: &str, e: hound::Error| LayerdeckError::Decode {
        reason: format!("Failed to read {} samples: {}", bits, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| failed("float", e)),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| failed("8-bit", e)),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| failed("16-bit", e)),
            // 24-bit stored as i32 in hound
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8388608.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| failed("24-bit", e)),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2147483648.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| failed("32-bit int", e)),
            _ => Err(LayerdeckError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits_per_sample),
            }),
        },
    }
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for (i, sample) in samples.iter().take(frames * channels).enumerate() {
        result[i % channels].push(*sample);
    }

    result
}

// ============================================================================
// Unit Tests
// ============================================================================
