//! Loop Phase
//!
//! Maps a timeline instant to the read position inside a looping layer's
//! trim window. The phase is locked to the layer's loop anchor, so moving
//! a clip together with its anchor carries the audio along with the clip,
//! while trimming (which leaves the anchor alone) keeps the phase tied to
//! the audio content.

use super::layer::Layer;

/// Shortest loop cycle the calculator will use (seconds)
pub const MIN_LOOP_CYCLE_SECS: f64 = 0.05;

/// Length of one loop cycle for `layer`
#[inline]
pub fn loop_cycle(layer: &Layer) -> f64 {
    (layer.trim_end - layer.trim_start).max(MIN_LOOP_CYCLE_SECS)
}

/// Source read offset (seconds into the source) at `reference_time`
///
/// Always within `[trim_start, trim_end]` and periodic in
/// `reference_time` with period [`loop_cycle`].
pub fn audio_offset(layer: &Layer, reference_time: f64) -> f64 {
    let cycle = loop_cycle(layer);
    let anchor = layer.effective_anchor();
    let offset_in_cycle = ((reference_time - anchor) % cycle + cycle) % cycle;
    (layer.trim_start + offset_in_cycle)
        .clamp(layer.trim_start, layer.trim_end.max(layer.trim_start))
}
