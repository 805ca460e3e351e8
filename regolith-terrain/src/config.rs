use std::path::Path;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tuning knobs of the terrain engine.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Smallest mesh cell, in screen pixels, before a finer tile is loaded.
    pub cell_size: f64,
    /// Byte budget of the tile cache.
    pub max_cache_memory: usize,
    /// Background tile builders. Zero builds every tile on the requesting thread.
    pub worker_threads: usize,
    /// Composited layer slots, including the base elevation layer.
    pub num_layers: usize,
    /// Evictions between cache compaction passes.
    pub gc_interval: usize,
    /// Scene units per world unit, applied to all three axes.
    pub pixel_scale: f64,
    /// Elevation used for missing samples instead of the base layer's EdgeFillValue.
    pub fill_value: Option<f32>,
    pub surface_color: [f32; 4],
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            cell_size: 4.0,
            max_cache_memory: 400_000_000,
            worker_threads: 5,
            num_layers: 7,
            gc_interval: 100,
            pixel_scale: 1.0,
            fill_value: None,
            surface_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl TerrainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
