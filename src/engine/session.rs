//! Engine facade
//!
//! Owns the layer store, the scheduler and the output device, and exposes
//! the commands a UI or CLI drives: layer edits, transport, export and
//! project persistence. All mutation goes through these methods on one
//! thread of control; the device renders on its own clock.

use tracing::{debug, info, warn};

use crate::config::{clamp_master_volume, EngineConfig};
use crate::engine::buffer::{AudioBuffer, DecodedAudio};
use crate::error::{LayerdeckError, Result};
use crate::export::{ExportSummary, Exporter};
use crate::layers::{Layer, LayerId, LayerSpec, LayerStore, LayerUpdate, TimelineDuration};
use crate::state::persistence::PersistencePort;
use crate::state::project::{LayerRecord, ProjectDocument};

use super::device::AudioOutputDevice;
use super::scheduler::{PlaybackReport, PlaybackScheduler};
use super::transport::Transport;

use std::path::Path;
use std::sync::Arc;

/// Result of loading a project document
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Layers restored
    pub loaded: Vec<LayerId>,
    /// Layers whose audio could not be re-decoded
    pub failed: Vec<(LayerId, LayerdeckError)>,
}

/// A composition session bound to one output device
///
/// # Example
/// ```
/// use layerdeck::config::EngineConfig;
/// use layerdeck::engine::{generate_test_tone, Engine, SoftwareDevice};
/// use layerdeck::layers::LayerSpec;
///
/// let mut engine = Engine::new(SoftwareDevice::new(48000), EngineConfig::default());
/// engine.init().unwrap();
///
/// let spec = LayerSpec::from_decoded("tone", generate_test_tone(440.0, 2.0, 48000)).unwrap();
/// let id = engine.add_layer(spec.at(1.0));
///
/// let report = engine.play().unwrap();
/// assert_eq!(report.scheduled, vec![id]);
/// assert_eq!(engine.effective_duration(), 10.0);
/// ```
#[derive(Debug)]
pub struct Engine<D: AudioOutputDevice> {
    config: EngineConfig,
    device: D,
    store: LayerStore,
    scheduler: PlaybackScheduler,
    timeline: TimelineDuration,
    master_volume: f32,
    exporter: Exporter,
    initialized: bool,
}

impl<D: AudioOutputDevice> Engine<D> {
    /// Create an engine around `device`; call [`Engine::init`] before playing
    pub fn new(device: D, config: EngineConfig) -> Self {
        let config = config.validated();
        Self {
            exporter: Exporter::new(config.effective_export_rate()),
            master_volume: config.master_volume,
            config,
            device,
            store: LayerStore::new(),
            scheduler: PlaybackScheduler::new(),
            timeline: TimelineDuration::new(),
            initialized: false,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Ready the engine for playback; calling it again does nothing
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            debug!("engine already initialized");
            return Ok(());
        }
        self.initialized = true;
        info!(
            sample_rate = self.device.sample_rate(),
            export_rate = self.exporter.sample_rate(),
            "engine initialized"
        );
        Ok(())
    }

    /// Silence everything and release device nodes; idempotent
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.scheduler.stop(&mut self.device);
        self.initialized = false;
        info!("engine shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(LayerdeckError::NotInitialized)
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable device access, e.g. to render a [`super::SoftwareDevice`]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn layers(&self) -> &[Layer] {
        self.store.list()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.store.get(id)
    }

    pub fn transport(&self) -> &Transport {
        self.scheduler.transport()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Last polled playhead position
    pub fn position(&self) -> f64 {
        self.scheduler.transport().current_time()
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn duration_override(&self) -> Option<f64> {
        self.timeline.manual_override()
    }

    /// Timeline length used for transport and export
    pub fn effective_duration(&self) -> f64 {
        self.timeline.effective(self.store.list())
    }

    // ========================================================================
    // Layer commands
    // ========================================================================

    /// Add a layer; it starts sounding right away if playback is running
    pub fn add_layer(&mut self, spec: LayerSpec) -> LayerId {
        let id = self.store.add(spec);
        self.reschedule(id);
        id
    }

    /// Edit a layer
    ///
    /// During playback a volume-only edit re-sets the live volume gain,
    /// and any timing edit rebuilds only this layer's voice.
    pub fn update_layer(&mut self, id: LayerId, update: &LayerUpdate) -> Result<()> {
        let layer = self.store.update(id, update)?;
        let volume = layer.volume;

        if !self.scheduler.transport().is_playing() {
            return Ok(());
        }
        if update.touches_timing() {
            self.reschedule(id);
        } else if update.volume.is_some() {
            self.scheduler
                .set_layer_volume(&mut self.device, id, volume)?;
        }
        Ok(())
    }

    /// Drag a clip by `delta` seconds, carrying its loop anchor along
    pub fn move_layer(&mut self, id: LayerId, delta: f64) -> Result<()> {
        self.store.translate(id, delta)?;
        self.reschedule(id);
        Ok(())
    }

    /// Remove a layer, silencing its voice and no other
    pub fn delete_layer(&mut self, id: LayerId) -> Result<Layer> {
        let layer = self.store.remove(id)?;
        self.scheduler.cancel_layer(&mut self.device, id);
        debug!(layer_id = %id, "layer deleted");
        Ok(layer)
    }

    fn reschedule(&mut self, id: LayerId) {
        if !self.scheduler.transport().is_playing() {
            return;
        }
        let timeline_end = self.effective_duration();
        if let Some(layer) = self.store.get(id) {
            self.scheduler
                .reschedule_layer(&mut self.device, layer, timeline_end);
        }
    }

    // ========================================================================
    // Transport commands
    // ========================================================================

    /// Start playback from the current position
    pub fn play(&mut self) -> Result<PlaybackReport> {
        self.ensure_initialized()?;
        let timeline_end = self.effective_duration();
        self.scheduler
            .play(&mut self.device, self.store.list(), timeline_end)
    }

    pub fn pause(&mut self) {
        let timeline_end = self.effective_duration();
        self.scheduler.pause(&mut self.device, timeline_end);
    }

    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.device);
    }

    /// Move the playhead; stops playback if it was running
    pub fn seek(&mut self, position: f64) {
        let timeline_end = self.effective_duration();
        self.scheduler.seek(&mut self.device, position, timeline_end);
    }

    /// Poll the transport; returns the playhead position
    pub fn tick(&mut self) -> f64 {
        let timeline_end = self.effective_duration();
        self.scheduler.tick(&mut self.device, timeline_end)
    }

    // ========================================================================
    // Timeline and mix settings
    // ========================================================================

    /// Set the export master volume, clamped to [0, 2]; returns the value kept
    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.master_volume = clamp_master_volume(volume);
        self.master_volume
    }

    /// Set the timeline length from `"S"`, `"M:SS"` or `"H:MM:SS"`
    ///
    /// Empty clears the override; a malformed string changes nothing.
    pub fn set_duration_override(&mut self, input: &str) -> Result<()> {
        self.timeline.set_from_str(input, self.store.list())?;
        debug!(duration = self.effective_duration(), "timeline duration set");
        Ok(())
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Handle for exporting from another thread
    pub fn exporter(&self) -> Exporter {
        self.exporter.clone()
    }

    /// Render the whole timeline to WAV bytes
    pub fn export_wav(&self) -> Result<Vec<u8>> {
        self.exporter.export_wav(
            self.store.list(),
            self.effective_duration(),
            self.master_volume,
        )
    }

    /// Render the whole timeline to a WAV file
    pub fn export_to_file(&self, path: &Path) -> Result<ExportSummary> {
        self.exporter.export_to_file(
            self.store.list(),
            self.effective_duration(),
            self.master_volume,
            path,
        )
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the session as a project document
    pub fn to_document(&self) -> ProjectDocument {
        ProjectDocument::from_layers(
            self.store.list(),
            self.master_volume,
            self.timeline.manual_override(),
        )
    }

    /// Serialise the session and hand it to `port`
    ///
    /// A failing port is reported; the session is left as it was.
    pub fn save_project(&self, port: &mut dyn PersistencePort) -> Result<()> {
        let bytes = self.to_document().to_bytes()?;
        port.save(&bytes).inspect_err(|err| {
            warn!(error = %err, "project save failed");
        })?;
        info!(layers = self.store.len(), bytes = bytes.len(), "project saved");
        Ok(())
    }

    /// Replace the session with `document`
    ///
    /// `resolve` re-decodes each layer's audio. Layers that fail to decode
    /// are skipped and reported; the rest load normally.
    pub fn load_project<F>(&mut self, document: &ProjectDocument, mut resolve: F) -> LoadReport
    where
        F: FnMut(&LayerRecord) -> Result<DecodedAudio>,
    {
        self.scheduler.stop(&mut self.device);
        self.store.clear();
        let mut report = LoadReport::default();

        for record in &document.layers {
            let restored = resolve(record).and_then(AudioBuffer::from_decoded);
            match restored {
                Ok(buffer) => {
                    let id = self.store.add(record.to_spec(Arc::new(buffer)));
                    report.loaded.push(id);
                }
                Err(err) => {
                    warn!(layer_id = %record.id, name = %record.name, error = %err, "layer not restored");
                    report.failed.push((record.id, err));
                }
            }
        }

        self.master_volume = clamp_master_volume(document.master_volume);
        self.timeline
            .set(document.duration_override, self.store.list());
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "project loaded"
        );
        report
    }

    /// Read a document from `port` and load it
    ///
    /// Returns `Ok(None)` when the port holds nothing yet.
    pub fn load_from<F>(&mut self, port: &mut dyn PersistencePort, resolve: F) -> Result<Option<LoadReport>>
    where
        F: FnMut(&LayerRecord) -> Result<DecodedAudio>,
    {
        let Some(bytes) = port.load()? else {
            return Ok(None);
        };
        let document = ProjectDocument::from_bytes(&bytes)?;
        Ok(Some(self.load_project(&document, resolve)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::device::SoftwareDevice;
    use crate::engine::io::generate_test_tone;
    use crate::state::persistence::MemoryPersistence;
    use approx::assert_relative_eq;

    const RATE: u32 = 8000;

    fn engine() -> Engine<SoftwareDevice> {
        let config = EngineConfig {
            output_sample_rate: RATE,
            ..Default::default()
        };
        let mut engine = Engine::new(SoftwareDevice::new(RATE), config);
        engine.init().unwrap();
        engine
    }

    fn tone(secs: f32) -> LayerSpec {
        LayerSpec::from_decoded("tone", generate_test_tone(220.0, secs, RATE)).unwrap()
    }

    #[test]
    fn test_play_requires_init() {
        let mut engine = Engine::new(SoftwareDevice::new(RATE), EngineConfig::default());
        assert_eq!(engine.play().unwrap_err().error_code(), "NOT_INITIALIZED");
        engine.init().unwrap();
        engine.init().unwrap();
        assert!(engine.play().is_ok());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = engine();
        engine.add_layer(tone(2.0));
        engine.play().unwrap();
        engine.shutdown();
        engine.shutdown();
        assert!(!engine.is_initialized());
        assert_eq!(engine.device().source_count(), 0);
    }

    #[test]
    fn test_add_during_playback_schedules() {
        let mut engine = engine();
        engine.play().unwrap();
        let id = engine.add_layer(tone(2.0).at(1.0));
        assert!(engine.scheduler().voice(id).is_some());
    }

    #[test]
    fn test_volume_edit_during_playback() {
        let mut engine = engine();
        let id = engine.add_layer(tone(2.0).with_fades(1.0, 0.0));
        engine.play().unwrap();
        let voice_before = engine.scheduler().voice(id).unwrap().clone();

        engine.update_layer(id, &LayerUpdate::volume(0.3)).unwrap();
        let voice_after = engine.scheduler().voice(id).unwrap();
        assert_eq!(voice_after.source, voice_before.source);
        assert_eq!(
            engine.device().gain_value_at(voice_after.volume, 0.0),
            Some(0.3)
        );
    }

    #[test]
    fn test_timing_edit_during_playback_reschedules() {
        let mut engine = engine();
        let id = engine.add_layer(tone(2.0));
        engine.play().unwrap();
        let before = engine.scheduler().voice(id).unwrap().source;

        engine
            .update_layer(
                id,
                &LayerUpdate {
                    start_time: Some(3.0),
                    ..Default::default()
                },
            )
            .unwrap();
        let voice = engine.scheduler().voice(id).unwrap();
        assert_ne!(voice.source, before);
        assert_relative_eq!(voice.start_at, 3.0);
    }

    #[test]
    fn test_duration_override() {
        let mut engine = engine();
        engine.set_duration_override("1:00").unwrap();
        assert_eq!(engine.effective_duration(), 60.0);
        assert!(engine.set_duration_override("1:99").is_err());
        assert_eq!(engine.effective_duration(), 60.0);
        engine.set_duration_override("").unwrap();
        assert_eq!(engine.effective_duration(), 10.0);
    }

    #[test]
    fn test_master_volume_clamped() {
        let mut engine = engine();
        assert_eq!(engine.set_master_volume(3.0), 2.0);
        assert_eq!(engine.set_master_volume(-1.0), 0.0);
    }

    #[test]
    fn test_save_failure_keeps_session() {
        let mut engine = engine();
        engine.add_layer(tone(1.0));
        let mut port = MemoryPersistence::failing();
        let err = engine.save_project(&mut port).unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_FAILURE");
        assert_eq!(engine.layers().len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut engine = engine();
        let id = engine.add_layer(tone(2.0).at(4.0).with_volume(0.7));
        engine.set_master_volume(1.5);
        engine.set_duration_override("30").unwrap();

        let mut port = MemoryPersistence::new();
        engine.save_project(&mut port).unwrap();

        let mut restored = Engine::new(SoftwareDevice::new(RATE), EngineConfig::default());
        let report = restored
            .load_from(&mut port, |_| Ok(generate_test_tone(220.0, 2.0, RATE)))
            .unwrap()
            .unwrap();
        assert_eq!(report.loaded, vec![id]);
        assert_eq!(restored.master_volume(), 1.5);
        assert_eq!(restored.effective_duration(), 30.0);
        let layer = restored.layer(id).unwrap();
        assert_eq!(layer.start_time, 4.0);
        assert_eq!(layer.volume, 0.7);
    }

    #[test]
    fn test_load_skips_undecodable_layers() {
        let mut engine = engine();
        let good = engine.add_layer(tone(1.0));
        let bad = engine.add_layer(tone(1.0).at(2.0));
        let document = engine.to_document();

        let mut restored = Engine::new(SoftwareDevice::new(RATE), EngineConfig::default());
        let report = restored.load_project(&document, |record| {
            if record.id == bad {
                Err(LayerdeckError::decode("file missing"))
            } else {
                Ok(generate_test_tone(220.0, 1.0, RATE))
            }
        });
        assert_eq!(report.loaded, vec![good]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert_eq!(restored.layers().len(), 1);
    }

    #[test]
    fn test_load_from_empty_port() {
        let mut engine = engine();
        let mut port = MemoryPersistence::new();
        assert!(engine
            .load_from(&mut port, |_| Err(LayerdeckError::decode("unused")))
            .unwrap()
            .is_none());
    }
}
