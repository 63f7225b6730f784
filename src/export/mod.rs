//! Export Module
//!
//! Offline rendering of the timeline to a 16-bit PCM WAV file:
//! - Mixdown of every layer into one stereo buffer
//! - RIFF/WAVE encoding
//! - Re-entrancy guard so only one export runs at a time

pub mod mixer;
pub mod wav;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, instrument};

use crate::engine::buffer::{AudioBuffer, DEFAULT_SAMPLE_RATE};
use crate::error::{LayerdeckError, Result};
use crate::layers::Layer;
use crate::state::persistence::write_atomic;

pub use mixer::mixdown;
pub use wav::{encode_wav, sample_to_i16, write_wav, WavHeader};

/// What an export produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSummary {
    /// Stereo frames rendered
    pub frames: usize,
    /// Output sample rate
    pub sample_rate: u32,
    /// Size of the WAV file in bytes
    pub bytes: usize,
    /// Largest absolute sample before quantisation
    pub peak: f32,
}

impl ExportSummary {
    /// Rendered length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate.max(1) as f64
    }
}

/// Renders layer snapshots to WAV, one export at a time
///
/// Clones share the busy flag, so a second export started from any clone
/// while one is running fails with `ExportBusy` instead of queueing.
#[derive(Debug, Clone)]
pub struct Exporter {
    sample_rate: u32,
    busy: Arc<AtomicBool>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

/// Clears the busy flag when the export ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Exporter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether an export is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LayerdeckError::ExportBusy)?;
        Ok(BusyGuard(&self.busy))
    }

    /// Mix `layers` without encoding
    pub fn render(&self, layers: &[Layer], duration: f64, master_volume: f32) -> Result<AudioBuffer> {
        let _guard = self.acquire()?;
        mixdown(layers, duration, master_volume, self.sample_rate)
    }

    /// Mix and encode `layers` into complete WAV bytes
    #[instrument(skip(self, layers), fields(layers = layers.len(), sample_rate = self.sample_rate))]
    pub fn export_wav(&self, layers: &[Layer], duration: f64, master_volume: f32) -> Result<Vec<u8>> {
        let _guard = self.acquire()?;
        let (bytes, summary) = self.render_and_encode(layers, duration, master_volume)?;
        info!(frames = summary.frames, bytes = summary.bytes, "wav export completed");
        Ok(bytes)
    }

    /// Mix, encode and write to `path`
    ///
    /// The file is only created once the whole WAV is encoded, and is
    /// written through a `.part` sibling, so a failure never leaves a
    /// partial file at `path`.
    #[instrument(skip(self, layers), fields(layers = layers.len(), path = %path.display()))]
    pub fn export_to_file(
        &self,
        layers: &[Layer],
        duration: f64,
        master_volume: f32,
        path: &Path,
    ) -> Result<ExportSummary> {
        let _guard = self.acquire()?;
        let (bytes, summary) = self.render_and_encode(layers, duration, master_volume)?;
        write_atomic(path, &bytes).map_err(|e| {
            LayerdeckError::export(format!("cannot write {}: {}", path.display(), e))
        })?;
        info!(
            frames = summary.frames,
            bytes = summary.bytes,
            peak = summary.peak,
            "wav file written"
        );
        Ok(summary)
    }

    fn render_and_encode(
        &self,
        layers: &[Layer],
        duration: f64,
        master_volume: f32,
    ) -> Result<(Vec<u8>, ExportSummary)> {
        let buffer = mixdown(layers, duration, master_volume, self.sample_rate)?;
        let bytes = encode_wav(&buffer)?;
        let summary = ExportSummary {
            frames: buffer.len(),
            sample_rate: buffer.sample_rate,
            bytes: bytes.len(),
            peak: buffer.peak(),
        };
        Ok((bytes, summary))
    }
}
