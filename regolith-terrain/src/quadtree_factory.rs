use std::{sync::Arc, time::Duration};

use bevy::math::{DVec2, DVec3};
use parking_lot::Mutex;
use regolith_jobs::{AsyncReturn, Job, JobPool};

use crate::{
    config::TerrainConfig,
    error::Result,
    layer::{Layer, LayerManager, LayerSource, Texture},
    quad_key::QuadKey,
    quadtree::QuadTree,
    quadtree_cache::QuadTreeCache,
    quadtree_mesh::{QuadTreeMesh, TileShape},
    side::NodeChildren,
    tile_source::{property, TileSource},
};

/// Outcome of asking for the children of a node.
pub enum ChildLoad {
    /// The source has no tiles below the node.
    NoDeeperTiles,
    /// Some children are still being built.
    Pending,
    Ready(NodeChildren<Arc<QuadTree>>),
}

/// Builds tile meshes and layer data from the layers of a landscape.
pub struct TileBuilder {
    layers: Arc<LayerManager>,
    scale: f32,
    fill: f32,
    surface_color: Mutex<[f32; 4]>,
    empty_texture: Arc<Texture>,
}

impl TileBuilder {
    pub fn new(layers: Arc<LayerManager>, scale: f32, fill: f32, surface_color: [f32; 4]) -> Self {
        Self {
            layers,
            scale,
            fill,
            surface_color: Mutex::new(surface_color),
            empty_texture: Arc::new(Texture::empty()),
        }
    }

    pub fn set_surface_color(&self, color: [f32; 4]) {
        *self.surface_color.lock() = color;
    }

    /// None when the base layer has no usable tile at `key`.
    pub fn build(&self, key: &QuadKey, shape: TileShape) -> Option<QuadTreeMesh> {
        let Some(tile) = self.layers.base().tile(key) else {
            bevy::log::debug!("No base tile at {}", key);
            return None;
        };
        let samples = match tile.float_samples() {
            Ok(samples) => samples,
            Err(e) => {
                bevy::log::debug!("Skipping tile {}: {}", key, e);
                return None;
            }
        };
        let elevations: Vec<f32> = samples.iter().map(|s| s * self.scale).collect();
        let color = *self.surface_color.lock();
        let mut mesh = match QuadTreeMesh::from_elevations(key.clone(), shape, &elevations, self.fill * self.scale, color) {
            Ok(mesh) => mesh,
            Err(e) => {
                bevy::log::debug!("Skipping tile {}: {}", key, e);
                return None;
            }
        };
        self.add_layers(key, &mut mesh, &samples);
        Some(mesh)
    }

    fn add_layers(&self, key: &QuadKey, mesh: &mut QuadTreeMesh, samples: &[f32]) {
        let num_layers = self.layers.num_layers();
        mesh.textures = vec![None; num_layers];
        mesh.layer_tex_coords = vec![None; num_layers];
        for (slot, layer) in self.layers.layers() {
            let textured = !matches!(layer, Layer::Elevation(_) | Layer::Footprint(_) | Layer::Viewshed(_));
            if mesh.is_empty() {
                if textured {
                    set_slot(&mut mesh.textures, slot, self.empty_texture.clone());
                }
                continue;
            }
            match layer {
                Layer::Image(image) => {
                    let texture = image.texture(key).unwrap_or_else(|| self.empty_texture.clone());
                    set_slot(&mut mesh.textures, slot, texture);
                }
                Layer::Derivative(derivative) => {
                    let coords = samples
                        .iter()
                        .zip(&mesh.normals)
                        .map(|(elevation, normal)| derivative.texture_coordinate(f64::from(*elevation), normal.as_dvec3()))
                        .collect();
                    set_slot(&mut mesh.layer_tex_coords, slot, coords);
                    if let Some(texture) = derivative.texture(key) {
                        set_slot(&mut mesh.textures, slot, texture);
                    }
                }
                Layer::Field(field) => {
                    let count = mesh.vertices.len();
                    let coords = match field.samples(key).filter(|values| values.len() == count) {
                        Some(values) => values
                            .iter()
                            .map(|value| field.texture_coordinate(f64::from(*value)))
                            .collect(),
                        None => vec![field.texture_coordinate(f64::NAN); count],
                    };
                    set_slot(&mut mesh.layer_tex_coords, slot, coords);
                    if let Some(texture) = field.texture(key) {
                        set_slot(&mut mesh.textures, slot, texture);
                    }
                }
                Layer::Elevation(_) | Layer::Footprint(_) | Layer::Viewshed(_) => {}
            }
        }
    }
}

fn set_slot<T>(slots: &mut [Option<T>], slot: usize, value: T) {
    if let Some(entry) = slots.get_mut(slot) {
        *entry = Some(value);
    }
}

pub struct TileContents {
    pub key: QuadKey,
    pub mesh: Option<QuadTreeMesh>,
}

pub struct BuildTileJob {
    key: QuadKey,
    shape: TileShape,
    builder: Arc<TileBuilder>,
}

impl Job for BuildTileJob {
    type Outcome = TileContents;

    fn name(&self) -> String {
        format!("build tile '{}'", self.key)
    }

    fn perform(self) -> AsyncReturn<TileContents> {
        Box::pin(async move {
            let mesh = self.builder.build(&self.key, self.shape);
            TileContents { key: self.key, mesh }
        })
    }
}

/// Creates the nodes of a landscape, caches them and builds their contents
/// on the worker pool or, when asked to wait, on the calling thread.
pub struct QuadTreeFactory {
    config: TerrainConfig,
    source: Arc<dyn TileSource>,
    layers: Arc<LayerManager>,
    cache: QuadTreeCache,
    jobs: Option<JobPool>,
    builder: Arc<TileBuilder>,
    world_size: DVec2,
    root_pixel_size: DVec2,
    elevation_range: (f64, f64),
    changed: Mutex<Vec<QuadKey>>,
}

impl QuadTreeFactory {
    pub fn new(source: Arc<dyn TileSource>, layers: LayerManager, config: TerrainConfig) -> Result<Self> {
        let properties = layers.base_properties();
        let tile_width = layers.tile_width();
        let tile_length = layers.tile_length();
        let pixel_width: f64 = properties.parse_or(property::PIXEL_WIDTH, 1.0)?;
        let pixel_length: f64 = properties.parse_or(property::PIXEL_LENGTH, pixel_width)?;
        let levels: usize = properties.parse_or(property::NUMBER_OF_LEVELS, source.depth_tree().depth() + 1)?;
        let span = 2f64.powi(levels.saturating_sub(1) as i32);
        let raster_width: f64 = properties.parse_or(property::RASTER_WIDTH, tile_width as f64 * span)?;
        let raster_length: f64 = properties.parse_or(property::RASTER_LENGTH, tile_length as f64 * span)?;
        let scale = config.pixel_scale;
        let world_size = DVec2::new(raster_width * pixel_width, raster_length * pixel_length) * scale;
        let root_pixel_size = world_size / DVec2::new(tile_width.max(1) as f64, tile_length.max(1) as f64);
        let elevation_range = layers.elevation_range()?;
        let fill = config
            .fill_value
            .or(layers.edge_fill_value()?)
            .unwrap_or(elevation_range.0 as f32);
        let cache = QuadTreeCache::new(config.max_cache_memory, layers.bytes_per_tile(), config.gc_interval);
        let jobs = (config.worker_threads > 0).then(|| JobPool::new("terrain tiles", config.worker_threads));
        let layers = Arc::new(layers);
        let builder = Arc::new(TileBuilder::new(layers.clone(), scale as f32, fill, config.surface_color));
        Ok(Self {
            config,
            source,
            layers,
            cache,
            jobs,
            builder,
            world_size,
            root_pixel_size,
            elevation_range,
            changed: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn cache(&self) -> &QuadTreeCache {
        &self.cache
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    /// Extent of the landscape in local units.
    pub fn world_size(&self) -> DVec2 {
        self.world_size
    }

    pub fn pixel_size(&self, level: usize) -> DVec2 {
        self.root_pixel_size / 2f64.powi(level as i32)
    }

    /// Pixel size of the deepest tiles in the source.
    pub fn finest_pixel_size(&self) -> DVec2 {
        self.pixel_size(self.source.depth_tree().depth())
    }

    pub fn elevation_range(&self) -> (f64, f64) {
        self.elevation_range
    }

    /// Scaled minimum elevation, the zero of the local z axis.
    pub fn z_offset(&self) -> f64 {
        self.elevation_range.0 * self.config.pixel_scale
    }

    fn create_node(&self, key: &QuadKey) -> QuadTree {
        let center = key.center(self.world_size.x, self.world_size.y);
        QuadTree::new(
            key.clone(),
            DVec3::new(center.x, center.y, 0.0),
            self.pixel_size(key.level()),
            self.layers.tile_width(),
            self.layers.tile_length(),
            self.z_offset(),
        )
    }

    /// The root node, built and in use.
    pub fn load_root(&self) -> Arc<QuadTree> {
        let root = self.get_quad_tree(&QuadKey::root(), true);
        root.set_in_use(true);
        root.set_enabled(true);
        root
    }

    /// Returns the node for `key`, creating it and starting its build if it
    /// is not cached. With `wait` the node is built before returning.
    pub fn get_quad_tree(&self, key: &QuadKey, wait: bool) -> Arc<QuadTree> {
        let (node, inserted) = self.cache.get_or_insert_with(key, || self.create_node(key));
        if inserted {
            let shape = node.shape();
            match &self.jobs {
                Some(jobs) => {
                    let job = BuildTileJob {
                        key: key.clone(),
                        shape,
                        builder: self.builder.clone(),
                    };
                    if wait {
                        let contents = jobs.run_blocking(job).unwrap_or_else(|| TileContents {
                            key: key.clone(),
                            mesh: None,
                        });
                        self.install(contents);
                    } else {
                        jobs.spawn(job);
                    }
                }
                None => self.install(TileContents {
                    key: key.clone(),
                    mesh: self.builder.build(key, shape),
                }),
            }
        } else if wait {
            self.wait_until_built(&node);
        }
        node
    }

    fn install(&self, contents: TileContents) {
        if let Some(node) = self.cache.peek(&contents.key) {
            node.set_build_result(contents.mesh);
        }
    }

    /// Installs every build finished by the workers. Returns how many.
    pub fn install_finished(&self) -> usize {
        let Some(jobs) = &self.jobs else {
            return 0;
        };
        let mut installed = 0;
        while let Some(contents) = jobs.take_next::<BuildTileJob>() {
            self.install(contents);
            installed += 1;
        }
        installed
    }

    pub fn wait_until_built(&self, node: &QuadTree) {
        while node.is_pending() {
            self.install_finished();
            node.wait_built(Duration::from_millis(2));
        }
    }

    /// Children of `parent` once all four are built.
    pub fn load_quad_trees(&self, parent: &QuadTree) -> ChildLoad {
        let keys = parent.key().children();
        if !keys.iter().all(|key| self.source.tile_exists(key)) {
            return ChildLoad::NoDeeperTiles;
        }
        let children = NodeChildren::from_array(keys.map(|key| self.get_quad_tree(&key, false)));
        // an evicted child is rebuilt on the next request
        if children
            .iter()
            .any(|child| child.is_pending() || !self.cache.contains(child.key()))
        {
            return ChildLoad::Pending;
        }
        if !children.iter().all(|child| child.is_built()) {
            bevy::log::debug!("Tiles below {} exist but could not be built", parent.key());
            return ChildLoad::NoDeeperTiles;
        }
        for child in children.iter() {
            child.set_enabled(true);
        }
        ChildLoad::Ready(children)
    }

    pub fn notify_changed(&self, key: QuadKey) {
        self.changed.lock().push(key);
    }

    /// Keys of subtrees changed since the last call.
    pub fn take_changed(&self) -> Vec<QuadKey> {
        std::mem::take(&mut *self.changed.lock())
    }

    pub fn pending_builds(&self) -> usize {
        self.jobs.as_ref().map_or(0, JobPool::in_flight)
    }

    pub fn set_surface_color(&self, color: [f32; 4]) {
        self.builder.set_surface_color(color);
        self.cache.update_surface_color(color);
    }
}
