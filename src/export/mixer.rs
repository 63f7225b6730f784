//! Offline mixdown
//!
//! Renders the whole timeline into one stereo buffer with the same mixing
//! rules as live playback: trim window, per-cycle fades, loop phase from
//! the loop anchor, `volume * master_volume`, linear-interpolated
//! resampling. Each layer is added then clamped to [-1, 1], so overlapping
//! loud layers clip audibly but never overflow the 16-bit container.

use tracing::{debug, instrument};

use crate::engine::buffer::{AudioBuffer, ChannelLayout, MIN_DURATION_SECS};
use crate::error::{LayerdeckError, Result};
use crate::layers::{audio_offset, fade_gain, Layer};

use super::wav;

/// Mix `layers` into a stereo buffer of `ceil(duration * sample_rate)` frames
///
/// # Errors
/// * `Export` - zero sample rate, non-positive or non-finite duration, or a
///   render too long to fit a WAV file
#[instrument(skip(layers), fields(layers = layers.len()))]
pub fn mixdown(
    layers: &[Layer],
    duration: f64,
    master_volume: f32,
    sample_rate: u32,
) -> Result<AudioBuffer> {
    if sample_rate == 0 {
        return Err(LayerdeckError::export("output sample rate must be positive"));
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(LayerdeckError::export(format!(
            "timeline duration must be positive, got {duration}"
        )));
    }

    let frames = (duration * sample_rate as f64).ceil();
    // 4 bytes per stereo frame, plus the 36-byte header remainder
    if frames * 4.0 + 36.0 > u32::MAX as f64 {
        return Err(LayerdeckError::export("render is too long for a WAV file"));
    }
    let mut output = AudioBuffer::new(frames as usize, ChannelLayout::Stereo, sample_rate);

    for layer in layers {
        mix_layer(&mut output, layer, master_volume);
    }

    debug_assert!(wav::data_size(&output).is_some());
    debug!(frames = output.len(), peak = output.peak(), "mixdown completed");
    Ok(output)
}

fn mix_layer(output: &mut AudioBuffer, layer: &Layer, master_volume: f32) {
    let source = &layer.source;
    if source.is_empty() || source.sample_rate == 0 {
        return;
    }

    let out_rate = output.sample_rate as f64;
    let src_rate = source.sample_rate as f64;
    let total_frames = output.len();

    let source_len = source.duration_secs();
    let trim_start = layer.trim_start.max(0.0).min(source_len);
    let trim_end = (trim_start + MIN_DURATION_SECS).max(layer.trim_end.max(0.0).min(source_len));
    let cycle = trim_end - trim_start;

    let clip_len = if layer.looping { layer.duration } else { cycle };
    if !(clip_len > 0.0) {
        return;
    }
    let num_cycles = if layer.looping {
        (clip_len / cycle).ceil() as usize
    } else {
        1
    };
    let clip_end = layer.start_time + clip_len;
    let clip_end_frame = ((clip_end * out_rate).ceil().max(0.0) as usize).min(total_frames);

    let gain = layer.volume * master_volume;
    let [left_out, right_out] = match output.samples.as_mut_slice() {
        [left, right] => [left, right],
        _ => return,
    };

    for c in 0..num_cycles {
        let cycle_start = layer.start_time + c as f64 * cycle;
        let first = (cycle_start * out_rate).ceil().max(0.0) as usize;
        let last = (((cycle_start + cycle) * out_rate).ceil().max(0.0) as usize).min(clip_end_frame);
        if first >= last {
            continue;
        }

        for frame in first..last {
            let time = frame as f64 / out_rate;
            let time_in_cycle = (time - cycle_start).clamp(0.0, cycle);
            let read_secs = if layer.looping {
                audio_offset(layer, time)
            } else {
                trim_start + time_in_cycle
            };
            if read_secs >= trim_end && !layer.looping {
                continue;
            }

            // Fades repeat every loop cycle here; live playback fades once across the remaining clip
            let fade = fade_gain(time_in_cycle, cycle, layer.fade_in, layer.fade_out);
            let scale = gain * fade;
            let (left, right) = source.frame_at(read_secs * src_rate);

            left_out[frame] = (left_out[frame] + left * scale).clamp(-1.0, 1.0);
            right_out[frame] = (right_out[frame] + right * scale).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LayerId, LayerSpec};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    const RATE: u32 = 1000;

    fn constant(value: f32, secs: f64, rate: u32) -> Arc<AudioBuffer> {
        let mut buffer =
            AudioBuffer::new((secs * rate as f64) as usize, ChannelLayout::Mono, rate);
        buffer.channel_mut(0).fill(value);
        Arc::new(buffer)
    }

    fn ramp(secs: f64, rate: u32) -> Arc<AudioBuffer> {
        let len = (secs * rate as f64) as usize;
        let mut buffer = AudioBuffer::new(len, ChannelLayout::Mono, rate);
        for (i, sample) in buffer.channel_mut(0).iter_mut().enumerate() {
            *sample = i as f32 / len as f32;
        }
        Arc::new(buffer)
    }

    #[test]
    fn test_output_length_is_ceil_of_duration() {
        let out = mixdown(&[], 10.0005, 1.0, RATE).unwrap();
        assert_eq!(out.len(), 10001);
        assert_eq!(out.channels(), 2);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_invalid_parameters_fail() {
        assert_eq!(
            mixdown(&[], 10.0, 1.0, 0).unwrap_err().error_code(),
            "EXPORT_FAILURE"
        );
        assert!(mixdown(&[], f64::NAN, 1.0, RATE).is_err());
        assert!(mixdown(&[], 0.0, 1.0, RATE).is_err());
        assert!(mixdown(&[], 1.0e9, 1.0, 48000).is_err());
    }

    #[test]
    fn test_scenario_a_envelope() {
        let layer = LayerSpec::new("a", constant(1.0, 5.0, RATE))
            .with_fades(1.0, 1.0)
            .build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        let left = out.channel(0);

        assert_relative_eq!(left[0], 0.0);
        assert_relative_eq!(left[500], 0.5, epsilon = 1e-4);
        assert_relative_eq!(left[1000], 1.0, epsilon = 1e-4);
        assert_relative_eq!(left[2500], 1.0, epsilon = 1e-4);
        assert_relative_eq!(left[4000], 1.0, epsilon = 1e-4);
        assert_relative_eq!(left[4500], 0.5, epsilon = 1e-4);
        assert_eq!(left[5000], 0.0);
        assert_eq!(left[7000], 0.0);
    }

    #[test]
    fn test_volume_and_master_scale() {
        let layer = LayerSpec::new("a", constant(0.5, 2.0, RATE))
            .with_volume(0.5)
            .build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 2.0, RATE).unwrap();
        assert_relative_eq!(out.channel(0)[100], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out.channel(1)[100], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_trim_and_start_offset() {
        let layer = LayerSpec::new("a", ramp(4.0, RATE))
            .trimmed(1.0, 2.0)
            .at(3.0)
            .build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        let left = out.channel(0);
        assert_eq!(left[2999], 0.0);
        assert_relative_eq!(left[3000], 0.25, epsilon = 1e-4);
        assert_relative_eq!(left[3500], 0.375, epsilon = 1e-4);
        assert_eq!(left[4000], 0.0);
    }

    #[test]
    fn test_resamples_source_rate() {
        // 2 kHz source into a 1 kHz mix keeps real time
        let layer = LayerSpec::new("a", ramp(2.0, 2000)).build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        assert_relative_eq!(out.channel(0)[1000], 0.5, epsilon = 1e-4);
        assert_eq!(out.channel(0)[2000], 0.0);
    }

    #[test]
    fn test_loop_repeats_and_stops_at_clip_end() {
        let layer = LayerSpec::new("loop", ramp(1.0, RATE))
            .looped(2.5)
            .build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        let left = out.channel(0);
        assert_relative_eq!(left[250], 0.25, epsilon = 1e-4);
        assert_relative_eq!(left[1250], 0.25, epsilon = 1e-4);
        assert_relative_eq!(left[2250], 0.25, epsilon = 1e-4);
        assert_eq!(left[2500], 0.0);
        assert_eq!(left[2750], 0.0);
    }

    #[test]
    fn test_loop_fades_each_cycle() {
        let layer = LayerSpec::new("loop", constant(1.0, 1.0, RATE))
            .looped(3.0)
            .with_fades(0.5, 0.0)
            .build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        let left = out.channel(0);
        assert_relative_eq!(left[250], 0.5, epsilon = 1e-3);
        assert_relative_eq!(left[1250], 0.5, epsilon = 1e-3);
        assert_relative_eq!(left[1750], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_overlapping_layers_clamp() {
        let layers: Vec<Layer> = (0..8)
            .map(|_| {
                LayerSpec::new("loud", constant(0.9, 2.0, RATE))
                    .with_volume(2.0)
                    .build(LayerId::new())
            })
            .collect();
        let out = mixdown(&layers, 10.0, 2.0, RATE).unwrap();
        assert!(out.peak() <= 1.0);
        assert_eq!(out.channel(0)[10], 1.0);
    }

    #[test]
    fn test_stereo_source_keeps_channels() {
        let mut buffer = AudioBuffer::new(1000, ChannelLayout::Stereo, RATE);
        buffer.channel_mut(0).fill(0.2);
        buffer.channel_mut(1).fill(-0.4);
        let layer = LayerSpec::new("st", Arc::new(buffer)).build(LayerId::new());
        let out = mixdown(&[layer], 10.0, 1.0, RATE).unwrap();
        assert_relative_eq!(out.channel(0)[10], 0.2);
        assert_relative_eq!(out.channel(1)[10], -0.4);
    }
}
