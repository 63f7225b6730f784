//! WAV encoding for 16-bit PCM.
//!
//! Canonical 44-byte header: RIFF, a 16-byte `fmt ` chunk, then `data`
//! with interleaved little-endian samples.

use std::io::Write;

use crate::engine::buffer::AudioBuffer;
use crate::error::{LayerdeckError, Result};

const BITS_PER_SAMPLE: u16 = 16;
const HEADER_LEN: usize = 44;

/// Convert a float sample to 16-bit PCM
///
/// Clamps to [-1, 1] and scales negative values by 32768 and positive
/// ones by 32767, so both full-scale ends map exactly.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Size in bytes of the `data` chunk for `buffer`, if it fits a WAV file
pub fn data_size(buffer: &AudioBuffer) -> Option<u32> {
    let block_align = buffer.channels() as u64 * (BITS_PER_SAMPLE / 8) as u64;
    let size = buffer.len() as u64 * block_align;
    // chunkSize = 36 + data must also fit in 32 bits
    (size + 36 <= u32::MAX as u64).then_some(size as u32)
}

pub fn write_wav(w: &mut impl Write, buffer: &AudioBuffer) -> Result<()> {
    let num_channels = buffer.channels() as u16;
    if num_channels == 0 || num_channels > 2 {
        return Err(LayerdeckError::export(format!(
            "cannot encode {num_channels}-channel audio"
        )));
    }
    let block_align = num_channels * (BITS_PER_SAMPLE / 8);
    let data_size = data_size(buffer)
        .ok_or_else(|| LayerdeckError::export("render is too long for a WAV file"))?;

    write_riff_header(w, data_size)?;
    write_fmt_chunk(w, num_channels, buffer.sample_rate, block_align, BITS_PER_SAMPLE)?;
    write_data_chunk(w, buffer, data_size)?;
    Ok(())
}

/// Encode a buffer into a complete in-memory WAV file
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let capacity = data_size(buffer).map_or(0, |size| size as usize + HEADER_LEN);
    let mut bytes = Vec::with_capacity(capacity);
    write_wav(&mut bytes, buffer)?;
    Ok(bytes)
}

fn write_riff_header(w: &mut impl Write, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_size).to_le_bytes())?;
    w.write_all(b"WAVE")
}

fn write_fmt_chunk(
    w: &mut impl Write,
    num_channels: u16,
    sample_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
) -> std::io::Result<()> {
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?;
    w.write_all(&num_channels.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&bits_per_sample.to_le_bytes())
}

fn write_data_chunk(
    w: &mut impl Write,
    buffer: &AudioBuffer,
    data_size: u32,
) -> std::io::Result<()> {
    w.write_all(b"data")?;
    w.write_all(&data_size.to_le_bytes())?;
    for frame in 0..buffer.len() {
        for channel in &buffer.samples {
            w.write_all(&sample_to_i16(channel[frame]).to_le_bytes())?;
        }
    }
    Ok(())
}

/// Fields of a canonical WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub chunk_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavHeader {
    /// Parse the canonical 44-byte header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(LayerdeckError::decode("WAV header is truncated"));
        }
        if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(LayerdeckError::decode("missing RIFF/WAVE signature"));
        }
        if &bytes[12..16] != b"fmt " || &bytes[36..40] != b"data" {
            return Err(LayerdeckError::decode("not a canonical PCM WAV layout"));
        }

        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        Ok(Self {
            chunk_size: u32_at(4),
            audio_format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_len: u32_at(40),
        })
    }

    /// Number of frames described by the header
    pub fn frame_count(&self) -> u32 {
        if self.block_align == 0 {
            0
        } else {
            self.data_len / self.block_align as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(0.0, 0 ; "silence")]
    #[test_case(1.0, 32767 ; "positive full scale")]
    #[test_case(-1.0, -32768 ; "negative full scale")]
    #[test_case(1.7, 32767 ; "positive overs clamp")]
    #[test_case(-3.0, -32768 ; "negative overs clamp")]
    #[test_case(0.5, 16383 ; "half scale truncates")]
    fn test_sample_to_i16(input: f32, expected: i16) {
        assert_eq!(sample_to_i16(input), expected);
    }

    #[test]
    fn test_header_fields() {
        let buffer = AudioBuffer::new(100, ChannelLayout::Stereo, 44100);
        let bytes = encode_wav(&buffer).unwrap();
        assert_eq!(bytes.len(), 44 + 400);

        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(
            header,
            WavHeader {
                chunk_size: 36 + 400,
                audio_format: 1,
                channels: 2,
                sample_rate: 44100,
                byte_rate: 44100 * 4,
                block_align: 4,
                bits_per_sample: 16,
                data_len: 400,
            }
        );
        assert_eq!(header.frame_count(), 100);
    }

    #[test]
    fn test_samples_are_interleaved_le() {
        let mut buffer = AudioBuffer::new(2, ChannelLayout::Stereo, 8000);
        buffer.channel_mut(0).copy_from_slice(&[1.0, 0.0]);
        buffer.channel_mut(1).copy_from_slice(&[-1.0, 0.5]);
        let bytes = encode_wav(&buffer).unwrap();
        assert_eq!(
            &bytes[44..],
            &[0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00, 0xFF, 0x3F]
        );
    }

    #[test]
    fn test_rejects_short_or_foreign_header() {
        assert!(WavHeader::parse(b"RIFF").is_err());
        let mut bytes = encode_wav(&AudioBuffer::new(1, ChannelLayout::Mono, 8000)).unwrap();
        bytes[0] = b'X';
        assert!(WavHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_hound_reads_output() {
        let mut buffer = AudioBuffer::new(10, ChannelLayout::Stereo, 22050);
        buffer.channel_mut(0).fill(0.25);
        let bytes = encode_wav(&buffer).unwrap();

        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 20);
        assert_eq!(samples[0], sample_to_i16(0.25));
        assert_eq!(samples[1], 0);
    }
}
