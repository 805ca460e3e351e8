use std::{collections::HashMap, sync::Arc};

use bevy::math::DVec3;
use parking_lot::Mutex;
use regolith_scene::EquirectangularProjection;

use crate::{
    camera::PerspectiveCamera,
    config::TerrainConfig,
    landscape::{CancelToken, Landscape},
    layer::{LayerInfo, LayerType},
    quad_key::QuadKey,
    tile_source::{property, DataType, DepthTree, MemoryTileSource, Properties, RawTile, TileSource},
};

/// Config for synthetic pyramids: default LOD tuning, every build on the
/// calling thread.
pub(crate) fn pyramid_config() -> TerrainConfig {
    TerrainConfig {
        worker_threads: 0,
        ..TerrainConfig::default()
    }
}

/// A complete pyramid of `levels` levels of `tile` x `tile` tiles sampling
/// `f(x, y)`. The finest pixel is one unit and the raster is centered on the
/// origin.
pub(crate) fn pyramid(levels: u32, tile: usize, f: impl Fn(f64, f64) -> f32) -> MemoryTileSource {
    let finest = levels.saturating_sub(1);
    let world = (tile * (1 << finest)) as f64;
    let mut source = MemoryTileSource::new();
    let mut minimum = f32::INFINITY;
    let mut maximum = f32::NEG_INFINITY;
    let mut keys = vec![QuadKey::root()];
    for level in 0..levels {
        let pixel = f64::from(1u32 << (finest - level));
        let mut next = Vec::new();
        for key in keys {
            let center = key.center(world, world);
            let half = tile as f64 * pixel / 2.0;
            let mut samples = Vec::with_capacity((tile + 1) * (tile + 1));
            for row in 0..=tile {
                for column in 0..=tile {
                    let x = center.x - half + column as f64 * pixel;
                    let y = center.y + half - row as f64 * pixel;
                    let value = f(x, y);
                    if value.is_finite() {
                        minimum = minimum.min(value);
                        maximum = maximum.max(value);
                    }
                    samples.push(value);
                }
            }
            source.insert_tile("elevation", RawTile::from_f32_samples(key.clone(), tile + 1, tile + 1, &samples));
            next.extend(key.children());
        }
        keys = next;
    }
    if minimum > maximum {
        minimum = 0.0;
        maximum = 0.0;
    }
    source.add_layer(
        "elevation",
        LayerType::Elevation,
        Properties::new()
            .with(property::TILE_WIDTH, tile)
            .with(property::TILE_LENGTH, tile)
            .with(property::NUMBER_OF_LEVELS, levels)
            .with(property::RASTER_WIDTH, world)
            .with(property::RASTER_LENGTH, world)
            .with(property::PIXEL_WIDTH, 1.0)
            .with(property::PIXEL_LENGTH, 1.0)
            .with(property::MINIMUM_VALUE, minimum)
            .with(property::MAXIMUM_VALUE, maximum),
    );
    source
}

pub(crate) fn landscape_with(source: MemoryTileSource, config: TerrainConfig) -> Landscape {
    landscape_from(source.into_shared(), config)
}

pub(crate) fn landscape_from(source: Arc<dyn TileSource>, config: TerrainConfig) -> Landscape {
    Landscape::load(
        source,
        vec![LayerInfo::new("elevation", LayerType::Elevation, 0)],
        Arc::new(EquirectangularProjection::default()),
        config,
    )
    .unwrap()
}

pub(crate) fn landscape(levels: u32, tile: usize, f: impl Fn(f64, f64) -> f32) -> Landscape {
    landscape_with(pyramid(levels, tile, f), pyramid_config())
}

pub(crate) fn flat_landscape(levels: u32, tile: usize) -> Landscape {
    landscape(levels, tile, |_, _| 0.0)
}

/// Looking straight down at the origin. A pixel at distance d covers d / 500
/// units.
pub(crate) fn top_down_camera(height: f64) -> PerspectiveCamera {
    PerspectiveCamera::new(
        DVec3::new(0.0, 0.0, height),
        DVec3::ZERO,
        std::f64::consts::FRAC_PI_2,
        1000.0,
    )
}

/// Counts the base tile reads per key and can cancel a token once a number
/// of reads has been reached.
pub(crate) struct CountingSource {
    inner: MemoryTileSource,
    reads: Mutex<HashMap<QuadKey, usize>>,
    trip: Mutex<Option<(usize, CancelToken)>>,
}

impl CountingSource {
    pub(crate) fn new(inner: MemoryTileSource) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reads: Mutex::new(HashMap::new()),
            trip: Mutex::new(None),
        })
    }

    pub(crate) fn reads_of(&self, key: &QuadKey) -> usize {
        self.reads.lock().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_reads(&self) -> usize {
        self.reads.lock().values().sum()
    }

    /// Cancels `token` once `extra` more tiles have been read.
    pub(crate) fn cancel_after(&self, extra: usize, token: CancelToken) {
        *self.trip.lock() = Some((self.total_reads() + extra, token));
    }
}

impl TileSource for CountingSource {
    fn depth_tree(&self) -> &DepthTree {
        self.inner.depth_tree()
    }

    fn get_tile(&self, layer_name: &str, key: &QuadKey, data_type: DataType) -> Option<RawTile> {
        let total = {
            let mut reads = self.reads.lock();
            *reads.entry(key.clone()).or_insert(0) += 1;
            reads.values().sum::<usize>()
        };
        if let Some((limit, token)) = self.trip.lock().as_ref() {
            if total >= *limit {
                token.cancel();
            }
        }
        self.inner.get_tile(layer_name, key, data_type)
    }

    fn get_properties(&self, layer_name: &str) -> Option<Properties> {
        self.inner.get_properties(layer_name)
    }

    fn get_layer_info(&self) -> Vec<(String, LayerType)> {
        self.inner.get_layer_info()
    }
}
