//! Layer - one clip on the timeline
//!
//! A layer references shared, immutable decoded audio and carries the
//! editable placement (start, duration), trim window, fades, volume and
//! loop settings. All edits go through [`Layer::apply`], which clamps
//! values into range instead of rejecting them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::buffer::{AudioBuffer, DecodedAudio, MIN_DURATION_SECS};
use crate::error::Result;

/// Minimum trim window (seconds)
pub const MIN_TRIM_SECS: f64 = MIN_DURATION_SECS;

/// Maximum linear gain of a layer
pub const MAX_VOLUME: f32 = 2.0;

/// Unique identifier of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(Uuid);

impl LayerId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference that lets a persistence collaborator re-decode a layer's audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSourceRef {
    /// File path or URL of the encoded audio
    pub uri: String,
    /// SHA-256 of the encoded bytes, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl AudioSourceRef {
    /// Reference without a checksum
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            sha256: None,
        }
    }
}

/// Which fade a single edit touched
///
/// When both fades no longer fit in the trim window, the fade that was
/// *not* edited is the one that gives way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeEdit {
    In,
    Out,
    Neither,
}

/// One audio clip placed on the timeline
#[derive(Debug, Clone)]
pub struct Layer {
    /// Unique id
    pub id: LayerId,
    /// Display name
    pub name: String,
    /// Decoded source audio (never mutated)
    pub source: Arc<AudioBuffer>,
    /// Where the source can be re-decoded from
    pub source_ref: Option<AudioSourceRef>,
    /// Clip position on the timeline (seconds, >= 0)
    pub start_time: f64,
    /// Visible clip length (seconds, > 0)
    pub duration: f64,
    /// Trim window start within the source (seconds)
    pub trim_start: f64,
    /// Trim window end within the source (seconds)
    pub trim_end: f64,
    /// Linear gain in [0, 2]
    pub volume: f32,
    /// Fade-in length (seconds)
    pub fade_in: f64,
    /// Fade-out length (seconds)
    pub fade_out: f64,
    /// Whether the trim window repeats for the whole clip duration
    pub looping: bool,
    /// Timestamp that fixes loop phase; `None` means "use start_time"
    pub loop_anchor_time: Option<f64>,
    /// Free-form grouping used by the UI
    pub category: Option<String>,
    /// Display colour (e.g. "#ff8800")
    pub color: Option<String>,
}

impl Layer {
    /// Length of the decoded source in seconds
    pub fn source_duration(&self) -> f64 {
        self.source.duration_secs()
    }

    /// Length of the trim window
    pub fn trim_length(&self) -> f64 {
        self.trim_end - self.trim_start
    }

    /// Timeline position where the visible clip ends
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Anchor used for loop phase (falls back to start_time)
    pub fn effective_anchor(&self) -> f64 {
        self.loop_anchor_time.unwrap_or(self.start_time)
    }

    /// Apply a partial edit, clamping every field back into range
    pub fn apply(&mut self, update: &LayerUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(category) = &update.category {
            self.category = category.clone();
        }
        if let Some(color) = &update.color {
            self.color = color.clone();
        }

        if let Some(volume) = update.volume.filter(|v| v.is_finite()) {
            self.volume = volume.clamp(0.0, MAX_VOLUME);
        }
        if let Some(start) = finite(update.start_time) {
            self.start_time = start.max(0.0);
        }
        if let Some(anchor) = update.loop_anchor_time {
            self.loop_anchor_time = anchor.filter(|a| a.is_finite());
        }

        match (finite(update.trim_start), finite(update.trim_end)) {
            (Some(start), None) => {
                self.trim_start = clamp_range(start, 0.0, self.trim_end - MIN_TRIM_SECS);
            }
            (None, Some(end)) => {
                self.trim_end =
                    clamp_range(end, self.trim_start + MIN_TRIM_SECS, self.source_duration());
            }
            (Some(start), Some(end)) => {
                self.trim_start = start;
                self.trim_end = end;
            }
            (None, None) => {}
        }

        if let Some(looping) = update.looping {
            if looping && !self.looping && anchor_unset(self.loop_anchor_time) {
                self.loop_anchor_time = Some(self.start_time);
            }
            self.looping = looping;
        }

        if let Some(duration) = finite(update.duration) {
            self.duration = duration;
        }
        if let Some(fade_in) = finite(update.fade_in) {
            self.fade_in = fade_in;
        }
        if let Some(fade_out) = finite(update.fade_out) {
            self.fade_out = fade_out;
        }

        let edited = match (update.fade_in.is_some(), update.fade_out.is_some()) {
            (true, false) => FadeEdit::In,
            (false, true) => FadeEdit::Out,
            _ => FadeEdit::Neither,
        };
        self.enforce_invariants(edited);
    }

    /// Bring every field into its valid range without preferring either fade
    pub fn normalize(&mut self) {
        self.enforce_invariants(FadeEdit::Neither);
    }

    fn enforce_invariants(&mut self, edited: FadeEdit) {
        let source_len = self.source_duration().max(MIN_TRIM_SECS);

        if !self.start_time.is_finite() {
            self.start_time = 0.0;
        }
        self.start_time = self.start_time.max(0.0);
        if !self.volume.is_finite() {
            self.volume = 1.0;
        }
        self.volume = self.volume.clamp(0.0, MAX_VOLUME);

        // Trim window: 0 <= start < end <= source, end - start >= MIN_TRIM_SECS
        if !self.trim_start.is_finite() {
            self.trim_start = 0.0;
        }
        if !self.trim_end.is_finite() {
            self.trim_end = source_len;
        }
        self.trim_start = clamp_range(self.trim_start, 0.0, source_len - MIN_TRIM_SECS);
        self.trim_end = clamp_range(self.trim_end, self.trim_start + MIN_TRIM_SECS, source_len);

        let trim_len = self.trim_length();

        // Clip length follows the trim window unless the layer loops
        if self.looping {
            if !self.duration.is_finite() {
                self.duration = trim_len;
            }
            self.duration = self.duration.max(MIN_TRIM_SECS);
        } else {
            self.duration = trim_len;
        }

        // Fades must fit inside the trim window together
        self.fade_in = non_negative(self.fade_in);
        self.fade_out = non_negative(self.fade_out);
        if self.fade_in + self.fade_out > trim_len {
            match edited {
                FadeEdit::In => {
                    self.fade_in = self.fade_in.min(trim_len);
                    self.fade_out = trim_len - self.fade_in;
                }
                FadeEdit::Out => {
                    self.fade_out = self.fade_out.min(trim_len);
                    self.fade_in = trim_len - self.fade_out;
                }
                FadeEdit::Neither => {
                    let scale = trim_len / (self.fade_in + self.fade_out);
                    self.fade_in *= scale;
                    self.fade_out = trim_len - self.fade_in;
                }
            }
        }
    }
}

/// Clamp without panicking when rounding leaves `lo` a hair above `hi`
fn clamp_range(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi).max(0.0)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

// ============================================================================
// Creation and partial updates
// ============================================================================

/// Everything needed to create a layer
///
/// Unset fields default to: start 0, whole source as trim window,
/// duration = trim length, unity volume, no fades, no loop.
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub id: Option<LayerId>,
    pub name: String,
    pub source: Arc<AudioBuffer>,
    pub source_ref: Option<AudioSourceRef>,
    pub start_time: f64,
    pub duration: Option<f64>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    pub volume: f32,
    pub fade_in: f64,
    pub fade_out: f64,
    pub looping: bool,
    pub loop_anchor_time: Option<f64>,
    pub category: Option<String>,
    pub color: Option<String>,
}

impl LayerSpec {
    /// Spec for a layer playing the whole source from time 0
    pub fn new(name: impl Into<String>, source: Arc<AudioBuffer>) -> Self {
        Self {
            id: None,
            name: name.into(),
            source,
            source_ref: None,
            start_time: 0.0,
            duration: None,
            trim_start: None,
            trim_end: None,
            volume: 1.0,
            fade_in: 0.0,
            fade_out: 0.0,
            looping: false,
            loop_anchor_time: None,
            category: None,
            color: None,
        }
    }

    /// Validate decoder output and wrap it in a spec
    ///
    /// Fails with the decode error when the audio is unusable, in which
    /// case no layer should be created.
    pub fn from_decoded(name: impl Into<String>, decoded: DecodedAudio) -> Result<Self> {
        let buffer = AudioBuffer::from_decoded(decoded)?;
        Ok(Self::new(name, Arc::new(buffer)))
    }

    /// Place the clip at `start_time`
    pub fn at(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Use only `[start, end]` of the source
    pub fn trimmed(mut self, start: f64, end: f64) -> Self {
        self.trim_start = Some(start);
        self.trim_end = Some(end);
        self
    }

    /// Loop the trim window for `duration` seconds of timeline
    pub fn looped(mut self, duration: f64) -> Self {
        self.looping = true;
        self.duration = Some(duration);
        self
    }

    /// Set fade-in and fade-out lengths
    pub fn with_fades(mut self, fade_in: f64, fade_out: f64) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }

    /// Set the linear volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Attach a re-decode reference
    pub fn with_source_ref(mut self, source_ref: AudioSourceRef) -> Self {
        self.source_ref = Some(source_ref);
        self
    }

    /// Build the layer, clamping every field into range
    pub(crate) fn build(self, id: LayerId) -> Layer {
        let source_len = self.source.duration_secs();
        let trim_start = self.trim_start.unwrap_or(0.0);
        let trim_end = self.trim_end.unwrap_or(source_len);
        let mut layer = Layer {
            id,
            name: self.name,
            source: self.source,
            source_ref: self.source_ref,
            start_time: self.start_time,
            duration: self.duration.unwrap_or(trim_end - trim_start),
            trim_start,
            trim_end,
            volume: self.volume,
            fade_in: self.fade_in,
            fade_out: self.fade_out,
            looping: self.looping,
            loop_anchor_time: self.loop_anchor_time.filter(|a| a.is_finite()),
            category: self.category,
            color: self.color,
        };
        if layer.looping && anchor_unset(layer.loop_anchor_time) {
            layer.loop_anchor_time = Some(layer.start_time.max(0.0));
        }
        layer.normalize();
        layer
    }
}

/// A zero anchor counts as unset: enabling a loop re-anchors it to the clip start
fn anchor_unset(anchor: Option<f64>) -> bool {
    anchor.map_or(true, |a| a == 0.0)
}

/// A partial edit; `None` fields are left untouched
///
/// `loop_anchor_time` is doubly optional: `Some(None)` clears the anchor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    pub volume: Option<f32>,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
    pub looping: Option<bool>,
    pub loop_anchor_time: Option<Option<f64>>,
    pub category: Option<Option<String>>,
    pub color: Option<Option<String>>,
}

impl LayerUpdate {
    /// Update that only changes the volume
    pub fn volume(volume: f32) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    /// True when the edit changes what or when the layer plays
    pub fn touches_timing(&self) -> bool {
        self.start_time.is_some()
            || self.duration.is_some()
            || self.trim_start.is_some()
            || self.trim_end.is_some()
            || self.fade_in.is_some()
            || self.fade_out.is_some()
            || self.looping.is_some()
            || self.loop_anchor_time.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
