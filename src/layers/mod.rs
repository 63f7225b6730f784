//! Layer Model Module
//!
//! The timeline's data model:
//! - Layer: one trimmed, faded, optionally looping clip
//! - Store: ordered, invariant-enforcing collection of layers
//! - Loop phase: anchor-locked read offsets for looping layers
//! - Envelope: fade shape shared by live playback and mixdown
//! - Timeline: effective duration and human time strings

pub mod envelope;
mod layer;
pub mod loop_phase;
mod store;
pub mod timeline;

pub use envelope::{envelope_breakpoints, fade_gain, Breakpoint};
pub use layer::{AudioSourceRef, Layer, LayerId, LayerSpec, LayerUpdate, MAX_VOLUME, MIN_TRIM_SECS};
pub use loop_phase::{audio_offset, loop_cycle};
pub use store::LayerStore;
pub use timeline::{
    computed_duration, effective_duration, format_time, parse_time, TimelineDuration,
    MIN_TIMELINE_SECS,
};
