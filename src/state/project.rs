//! Project document
//!
//! Serialised form of a session. Only layer metadata is stored; audio is
//! referenced through [`AudioSourceRef`] and re-decoded on load, never
//! embedded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::buffer::AudioBuffer;
use crate::error::{LayerdeckError, Result};
use crate::layers::{AudioSourceRef, Layer, LayerId, LayerSpec};

/// Current document version
pub const PROJECT_VERSION: u32 = 1;

fn default_version() -> u32 {
    PROJECT_VERSION
}

fn default_master_volume() -> f32 {
    1.0
}

fn default_volume() -> f32 {
    1.0
}

/// A saved session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    #[serde(default = "default_version")]
    pub version: u32,

    /// When the document was written
    pub saved_at: DateTime<Utc>,

    #[serde(default = "default_master_volume")]
    pub master_volume: f32,

    /// Manual timeline length, `None` for automatic
    #[serde(default)]
    pub duration_override: Option<f64>,

    #[serde(default)]
    pub layers: Vec<LayerRecord>,
}

/// Persisted fields of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    #[serde(default)]
    pub audio_source_ref: Option<AudioSourceRef>,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub fade_in: f64,
    #[serde(default)]
    pub fade_out: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    #[serde(rename = "loop", default)]
    pub looping: bool,
    #[serde(default)]
    pub loop_anchor_time: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl LayerRecord {
    /// Capture a layer's persisted fields
    pub fn from_layer(layer: &Layer) -> Self {
        Self {
            id: layer.id,
            name: layer.name.clone(),
            audio_source_ref: layer.source_ref.clone(),
            start_time: layer.start_time,
            duration: layer.duration,
            volume: layer.volume,
            fade_in: layer.fade_in,
            fade_out: layer.fade_out,
            trim_start: layer.trim_start,
            trim_end: layer.trim_end,
            looping: layer.looping,
            loop_anchor_time: layer.loop_anchor_time,
            category: layer.category.clone(),
            color: layer.color.clone(),
        }
    }

    /// Rebuild a layer spec around freshly decoded audio
    ///
    /// Values are clamped against the new source when the layer is added,
    /// so a source that got shorter cannot break the trim invariants.
    pub fn to_spec(&self, source: Arc<AudioBuffer>) -> LayerSpec {
        LayerSpec {
            id: Some(self.id),
            name: self.name.clone(),
            source,
            source_ref: self.audio_source_ref.clone(),
            start_time: self.start_time,
            duration: Some(self.duration),
            trim_start: Some(self.trim_start),
            trim_end: Some(self.trim_end),
            volume: self.volume,
            fade_in: self.fade_in,
            fade_out: self.fade_out,
            looping: self.looping,
            loop_anchor_time: self.loop_anchor_time,
            category: self.category.clone(),
            color: self.color.clone(),
        }
    }
}

impl ProjectDocument {
    /// Snapshot a session
    pub fn from_layers(layers: &[Layer], master_volume: f32, duration_override: Option<f64>) -> Self {
        Self {
            version: PROJECT_VERSION,
            saved_at: Utc::now(),
            master_volume,
            duration_override,
            layers: layers.iter().map(LayerRecord::from_layer).collect(),
        }
    }

    /// Serialise as pretty-printed JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a document, rejecting versions newer than this build knows
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let document: ProjectDocument =
            serde_json::from_slice(bytes).map_err(|e| LayerdeckError::Persistence {
                reason: format!("project document is malformed: {}", e),
            })?;
        if document.version > PROJECT_VERSION {
            return Err(LayerdeckError::Persistence {
                reason: format!(
                    "project version {} is newer than supported version {}",
                    document.version, PROJECT_VERSION
                ),
            });
        }
        Ok(document)
    }
}
