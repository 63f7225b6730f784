//! Playback Scheduler
//!
//! Turns the layer list into voices on an [`AudioOutputDevice`]. Each voice
//! is a buffer source feeding two gains in series: the envelope gain carries
//! only the fade automation, the volume gain carries the live layer volume.
//! Keeping them apart lets a volume change land mid-fade without
//! restarting the fade.
//!
//! Every `play` cancels the previous generation of voices before starting a
//! new one, so repeated play presses never stack sound.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{LayerdeckError, Result};
use crate::layers::{audio_offset, envelope_breakpoints, Layer, LayerId};

use super::device::{AudioOutputDevice, DeviceError, NodeId};
use super::transport::Transport;

/// Lifecycle of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Graph built, source not started yet
    NotStarted,
    /// Source started with a start time in the future
    Scheduled,
    /// Device clock has passed the start time
    Playing,
    /// Stopped or cancelled; nodes are released
    Stopped,
}

/// One layer's sound for the current playback pass
#[derive(Debug, Clone)]
pub struct Voice {
    pub layer_id: LayerId,
    pub source: NodeId,
    pub envelope: NodeId,
    pub volume: NodeId,
    /// Device time the source starts
    pub start_at: f64,
    /// Device time the source stops (clip end)
    pub stop_at: f64,
    /// Buffer read offset at start (seconds)
    pub offset: f64,
    pub state: VoiceState,
}

impl Voice {
    fn nodes(&self) -> [NodeId; 3] {
        [self.source, self.envelope, self.volume]
    }

    fn refresh(&mut self, now: f64) {
        if self.state == VoiceState::Scheduled && now >= self.start_at {
            self.state = VoiceState::Playing;
        }
        if matches!(self.state, VoiceState::Scheduled | VoiceState::Playing) && now >= self.stop_at
        {
            self.state = VoiceState::Stopped;
        }
    }
}

/// Outcome of one `play` pass
#[derive(Debug, Default)]
pub struct PlaybackReport {
    /// Layers that got a voice
    pub scheduled: Vec<LayerId>,
    /// Layers that already ended before the playhead
    pub skipped: Vec<LayerId>,
    /// Layers whose voice could not be started
    pub failed: Vec<(LayerId, LayerdeckError)>,
}

impl PlaybackReport {
    /// True when no layer failed to schedule
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Where a layer's voice starts relative to the playhead
#[derive(Debug, Clone, Copy, PartialEq)]
struct VoicePlan {
    /// Seconds from now until the source starts
    delay: f64,
    /// Seconds of the clip already behind the playhead
    elapsed: f64,
    /// Buffer read offset at start
    offset: f64,
    /// Seconds of clip left to play
    remaining: f64,
}

/// Classify `layer` against `position` and work out how to start it
///
/// `Ok(None)` means the clip already ended (past-end); an error means the
/// layer cannot produce a valid voice.
fn plan_voice(layer: &Layer, position: f64) -> Result<Option<VoicePlan>> {
    if position >= layer.end_time() {
        return Ok(None);
    }

    let (delay, elapsed, offset) = if position < layer.start_time {
        let offset = if layer.looping {
            audio_offset(layer, layer.start_time)
        } else {
            layer.trim_start
        };
        (layer.start_time - position, 0.0, offset)
    } else {
        let elapsed = position - layer.start_time;
        let offset = if layer.looping {
            audio_offset(layer, position)
        } else {
            layer.trim_start + elapsed
        };
        (0.0, elapsed, offset)
    };

    let failure = |reason: String| LayerdeckError::Schedule {
        layer_id: layer.id,
        reason,
    };

    let remaining = layer.duration - elapsed;
    if !(remaining > 0.0) {
        return Err(failure(format!("non-positive play span {remaining:.6}s")));
    }
    if !offset.is_finite() || offset < 0.0 {
        return Err(failure(format!("invalid read offset {offset}")));
    }
    if !layer.looping && offset >= layer.trim_end {
        return Err(failure(format!(
            "read offset {offset:.3}s is past the trim end {:.3}s",
            layer.trim_end
        )));
    }

    Ok(Some(VoicePlan {
        delay,
        elapsed,
        offset,
        remaining,
    }))
}

/// Schedules voices and drives the transport
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    transport: Transport,
    voices: HashMap<LayerId, Voice>,
}

impl PlaybackScheduler {
    /// Create a stopped scheduler with no voices
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport state and playhead
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Voice for a layer, if one is active
    pub fn voice(&self, id: LayerId) -> Option<&Voice> {
        self.voices.get(&id)
    }

    /// All active voices
    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.values()
    }

    /// Number of active voices
    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    // ========================================================================
    // Transport commands
    // ========================================================================

    /// Start playback of `layers` from the current position
    ///
    /// Cancels every existing voice first. Playing from the timeline end
    /// restarts from 0. Layers that fail to schedule are reported and
    /// skipped; only a device that cannot resume fails the whole call.
    pub fn play<D: AudioOutputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        layers: &[Layer],
        timeline_end: f64,
    ) -> Result<PlaybackReport> {
        self.cancel_all(device);

        if device.is_suspended() {
            device.resume()?;
        }

        if self.transport.current_time() >= timeline_end {
            self.transport.seek(0.0);
        }

        let now = device.current_time();
        let position = self.transport.current_time();
        let mut report = PlaybackReport::default();

        for layer in layers {
            match self.start_voice(device, layer, position, now) {
                Ok(Some(voice)) => {
                    report.scheduled.push(layer.id);
                    self.voices.insert(layer.id, voice);
                }
                Ok(None) => {
                    debug!(layer_id = %layer.id, "layer ends before playhead, skipped");
                    report.skipped.push(layer.id);
                }
                Err(err) => {
                    warn!(layer_id = %layer.id, error = %err, "layer not scheduled");
                    report.failed.push((layer.id, err));
                }
            }
        }

        self.transport.start(now);
        info!(
            position,
            scheduled = report.scheduled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "playback started"
        );
        Ok(report)
    }

    /// Cancel all voices and keep the playhead where it is
    pub fn pause<D: AudioOutputDevice + ?Sized>(&mut self, device: &mut D, timeline_end: f64) {
        if !self.transport.is_playing() {
            debug!(state = %self.transport.state(), "pause ignored");
            return;
        }
        self.transport.advance(device.current_time(), timeline_end);
        self.cancel_all(device);
        self.transport.pause();
    }

    /// Cancel all voices and return to position 0
    pub fn stop<D: AudioOutputDevice + ?Sized>(&mut self, device: &mut D) {
        self.cancel_all(device);
        self.transport.stop();
    }

    /// Move the playhead to `position`, clamped into the timeline
    ///
    /// Seeking while playing stops playback; it does not resume.
    pub fn seek<D: AudioOutputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        position: f64,
        timeline_end: f64,
    ) {
        if self.transport.is_playing() {
            self.stop(device);
        }
        let target = if position.is_finite() {
            position.clamp(0.0, timeline_end.max(0.0))
        } else {
            0.0
        };
        self.transport.seek(target);
    }

    /// Coarse poll: update the playhead and retire finished voices
    ///
    /// Reaching the timeline end stops playback. Returns the position.
    pub fn tick<D: AudioOutputDevice + ?Sized>(&mut self, device: &mut D, timeline_end: f64) -> f64 {
        let now = device.current_time();
        let reached_end = self.transport.advance(now, timeline_end);

        for voice in self.voices.values_mut() {
            voice.refresh(now);
        }
        let finished: Vec<LayerId> = self
            .voices
            .values()
            .filter(|voice| voice.state == VoiceState::Stopped)
            .map(|voice| voice.layer_id)
            .collect();
        for id in finished {
            if let Some(voice) = self.voices.remove(&id) {
                for node in voice.nodes() {
                    device.release(node);
                }
                debug!(layer_id = %id, "voice finished");
            }
        }

        if reached_end {
            info!(position = timeline_end, "reached timeline end");
            self.stop(device);
        }
        self.transport.current_time()
    }

    // ========================================================================
    // Live edits
    // ========================================================================

    /// Re-set the volume gain of a layer's voice without touching its envelope
    ///
    /// Returns `false` when the layer has no active voice.
    pub fn set_layer_volume<D: AudioOutputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        id: LayerId,
        volume: f32,
    ) -> Result<bool> {
        let Some(voice) = self.voices.get(&id) else {
            return Ok(false);
        };
        device.set_gain(voice.volume, volume)?;
        debug!(layer_id = %id, volume, "live volume");
        Ok(true)
    }

    /// Cancel one layer's voice, leaving every other voice alone
    ///
    /// Returns `true` if a voice was cancelled.
    pub fn cancel_layer<D: AudioOutputDevice + ?Sized>(&mut self, device: &mut D, id: LayerId) -> bool {
        match self.voices.remove(&id) {
            Some(mut voice) => {
                cancel_voice(device, &mut voice);
                true
            }
            None => false,
        }
    }

    /// Rebuild one layer's voice at the current playhead
    ///
    /// Used after a timing edit during playback. Does nothing unless
    /// playing. A layer that cannot be scheduled is left silent and the
    /// failure is logged, matching the per-layer isolation of `play`.
    pub fn reschedule_layer<D: AudioOutputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        layer: &Layer,
        timeline_end: f64,
    ) {
        self.cancel_layer(device, layer.id);
        if !self.transport.is_playing() {
            return;
        }

        let now = device.current_time();
        let position = self.transport.position_at(now, timeline_end);
        match self.start_voice(device, layer, position, now) {
            Ok(Some(voice)) => {
                debug!(layer_id = %layer.id, position, "layer rescheduled");
                self.voices.insert(layer.id, voice);
            }
            Ok(None) => debug!(layer_id = %layer.id, "edited layer ends before playhead"),
            Err(err) => warn!(layer_id = %layer.id, error = %err, "edited layer not rescheduled"),
        }
    }

    /// Stop and release every voice
    pub fn cancel_all<D: AudioOutputDevice + ?Sized>(&mut self, device: &mut D) {
        if self.voices.is_empty() {
            return;
        }
        let count = self.voices.len();
        for (_, mut voice) in self.voices.drain() {
            cancel_voice(device, &mut voice);
        }
        debug!(count, "cancelled all voices");
    }

    // ========================================================================
    // Voice construction
    // ========================================================================

    fn start_voice<D: AudioOutputDevice + ?Sized>(
        &mut self,
        device: &mut D,
        layer: &Layer,
        position: f64,
        now: f64,
    ) -> Result<Option<Voice>> {
        let Some(plan) = plan_voice(layer, position)? else {
            return Ok(None);
        };

        let as_schedule_failure = |err: DeviceError| LayerdeckError::Schedule {
            layer_id: layer.id,
            reason: err.to_string(),
        };

        let source = device
            .create_source(layer.source.clone())
            .map_err(as_schedule_failure)?;
        let mut created = vec![source];

        let built = build_voice(device, layer, &plan, now, source, &mut created);
        match built {
            Ok(mut voice) => {
                voice.state = if voice.start_at > now {
                    VoiceState::Scheduled
                } else {
                    VoiceState::Playing
                };
                debug!(
                    layer_id = %layer.id,
                    delay = plan.delay,
                    offset = plan.offset,
                    remaining = plan.remaining,
                    "voice scheduled"
                );
                Ok(Some(voice))
            }
            Err(err) => {
                for node in created {
                    device.release(node);
                }
                Err(as_schedule_failure(err))
            }
        }
    }
}

/// Wire source -> envelope -> volume -> destination and program it
fn build_voice<D: AudioOutputDevice + ?Sized>(
    device: &mut D,
    layer: &Layer,
    plan: &VoicePlan,
    now: f64,
    source: NodeId,
    created: &mut Vec<NodeId>,
) -> std::result::Result<Voice, DeviceError> {
    let envelope = device.create_gain()?;
    created.push(envelope);
    let volume = device.create_gain()?;
    created.push(volume);

    device.connect(source, envelope)?;
    device.connect(envelope, volume)?;
    let destination = device.destination();
    device.connect(volume, destination)?;

    if layer.looping {
        device.set_loop(source, layer.trim_start, layer.trim_end)?;
    }

    device.set_gain(volume, layer.volume)?;

    let start_at = now + plan.delay;
    let stop_at = start_at + plan.remaining;

    let points = envelope_breakpoints(plan.elapsed, layer.duration, layer.fade_in, layer.fade_out);
    if let Some((first, rest)) = points.split_first() {
        device.set_gain(envelope, first.gain)?;
        device.set_gain_at(envelope, first.gain, start_at + first.at)?;
        for point in rest {
            device.ramp_gain_to(envelope, point.gain, start_at + point.at)?;
        }
    }

    device.start_source(source, start_at, plan.offset)?;
    device.stop_source(source, stop_at)?;

    Ok(Voice {
        layer_id: layer.id,
        source,
        envelope,
        volume,
        start_at,
        stop_at,
        offset: plan.offset,
        state: VoiceState::NotStarted,
    })
}

/// Cut a voice off immediately and release its nodes
fn cancel_voice<D: AudioOutputDevice + ?Sized>(device: &mut D, voice: &mut Voice) {
    let now = device.current_time();
    if let Err(err) = device.stop_source(voice.source, now) {
        debug!(layer_id = %voice.layer_id, error = %err, "stop on cancel failed");
    }
    for node in voice.nodes() {
        device.release(node);
    }
    voice.state = VoiceState::Stopped;
}

// ============================================================================
// Unit Tests
// ============================================================================
