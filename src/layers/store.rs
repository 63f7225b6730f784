//! Layer Store
//!
//! Ordered collection of layers. Every insert and edit is clamped back
//! into the valid range, so readers never see a layer that breaks the
//! trim/fade invariants.

use tracing::{debug, warn};

use crate::error::{LayerdeckError, Result};

use super::layer::{Layer, LayerId, LayerSpec, LayerUpdate};

/// Ordered collection of layers, keyed by [`LayerId`]
#[derive(Debug, Clone, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
}

impl LayerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer at the end of the list and return its id
    ///
    /// A requested id that is already taken is replaced by a fresh one.
    pub fn add(&mut self, spec: LayerSpec) -> LayerId {
        let id = match spec.id {
            Some(id) if self.get(id).is_none() => id,
            Some(id) => {
                warn!(layer_id = %id, "duplicate layer id, assigning a new one");
                LayerId::new()
            }
            None => LayerId::new(),
        };
        let layer = spec.build(id);
        debug!(
            layer_id = %id,
            start = layer.start_time,
            duration = layer.duration,
            "layer added"
        );
        self.layers.push(layer);
        id
    }

    /// Apply a partial edit to a layer
    ///
    /// Out-of-range values are clamped, never rejected; the only error is
    /// an unknown id.
    pub fn update(&mut self, id: LayerId, update: &LayerUpdate) -> Result<&Layer> {
        let layer = self.get_mut(id)?;
        layer.apply(update);
        Ok(layer)
    }

    /// Move a clip by `delta` seconds, carrying its loop anchor along
    ///
    /// The start is kept at or after 0; the anchor moves by the distance
    /// the clip actually moved so loop phase is preserved.
    pub fn translate(&mut self, id: LayerId, delta: f64) -> Result<&Layer> {
        let layer = self.get_mut(id)?;
        if delta.is_finite() {
            let new_start = (layer.start_time + delta).max(0.0);
            let moved = new_start - layer.start_time;
            layer.start_time = new_start;
            layer.loop_anchor_time = layer.loop_anchor_time.map(|anchor| anchor + moved);
        }
        Ok(layer)
    }

    /// Remove a layer, returning it
    pub fn remove(&mut self, id: LayerId) -> Result<Layer> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or(LayerdeckError::LayerNotFound(id))?;
        Ok(self.layers.remove(index))
    }

    /// Get a layer by id
    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    fn get_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .ok_or(LayerdeckError::LayerNotFound(id))
    }

    /// All layers in insertion order
    pub fn list(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Check if the store has no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Owned copy of every layer (audio stays shared)
    pub fn snapshot(&self) -> Vec<Layer> {
        self.layers.clone()
    }

    /// Remove every layer
    pub fn clear(&mut self) {
        self.layers.clear();
    }
}
