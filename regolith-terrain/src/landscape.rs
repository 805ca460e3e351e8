use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bevy::math::{DVec2, DVec3};
use parking_lot::RwLock;
use regolith_scene::{slope_from_normal, triangle_area, Polygon, Projection};

use crate::{
    camera::LodCamera,
    config::TerrainConfig,
    error::{Result, TerrainError},
    layer::{LayerInfo, LayerManager},
    quad_key::QuadKey,
    quadtree::QuadTree,
    quadtree_factory::QuadTreeFactory,
    tile_source::TileSource,
};

/// Cooperative cancellation for long running region queries. Clones share
/// the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Plane `a*x + b*y + c*z + d = 0` over landscape x, y and world elevation z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneEquation {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl PlaneEquation {
    pub fn horizontal(z: f64) -> Self {
        Self {
            a: 0.0,
            b: 0.0,
            c: 1.0,
            d: -z,
        }
    }

    pub fn from_points(p0: DVec3, p1: DVec3, p2: DVec3) -> Self {
        let n = (p1 - p0).cross(p2 - p0);
        Self {
            a: n.x,
            b: n.y,
            c: n.z,
            d: -n.dot(p0),
        }
    }

    /// NaN for a vertical plane.
    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        if self.c == 0.0 {
            return f64::NAN;
        }
        -(self.a * x + self.b * y + self.d) / self.c
    }
}

/// What a volume is measured against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VolumeReference {
    Elevation(f64),
    Plane(PlaneEquation),
}

impl VolumeReference {
    fn z_at(&self, x: f64, y: f64) -> f64 {
        match self {
            VolumeReference::Elevation(z) => *z,
            VolumeReference::Plane(plane) => plane.z_at(x, y),
        }
    }
}

/// Surface minus plane at each sample of a region, row major from the lower
/// bound. Samples outside the region are NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct DifferenceGrid {
    pub rows: usize,
    pub columns: usize,
    pub values: Vec<f32>,
    pub minimum: f32,
    pub maximum: f32,
}

impl DifferenceGrid {
    pub fn get(&self, row: usize, column: usize) -> Option<f32> {
        if column >= self.columns {
            return None;
        }
        self.values.get(row * self.columns + column).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LandscapeStats {
    pub leaf_count: usize,
    pub depth: usize,
    pub cached_tiles: usize,
    pub cache_capacity: usize,
    pub pending_builds: usize,
}

/// What changes when the layers or the scale of a landscape change.
struct LandscapeState {
    infos: Vec<LayerInfo>,
    factory: Arc<QuadTreeFactory>,
    root: Arc<QuadTree>,
}

/// A loaded terrain: the tile pyramid of a source shown as a level of detail
/// quadtree.
///
/// Landscape coordinates are centered on the raster and scaled by
/// `pixel_scale`. Elevations handed out are world elevations, while
/// [`Landscape::get_z`] is relative to the minimum elevation in landscape
/// units.
pub struct Landscape {
    source: Arc<dyn TileSource>,
    projection: Arc<dyn Projection>,
    state: RwLock<LandscapeState>,
}

impl Landscape {
    pub fn load(
        source: Arc<dyn TileSource>,
        infos: Vec<LayerInfo>,
        projection: Arc<dyn Projection>,
        config: TerrainConfig,
    ) -> Result<Self> {
        let (factory, root) = Self::open(&source, &infos, config)?;
        let size = factory.world_size() / factory.config().pixel_scale;
        let (minimum, maximum) = factory.elevation_range();
        bevy::log::info!(
            "Landscape size: east/west range = {:.3}, north/south range = {:.3}, elevation range = {:.3}",
            size.x,
            size.y,
            maximum - minimum
        );
        Ok(Self {
            source,
            projection,
            state: RwLock::new(LandscapeState {
                infos,
                factory: Arc::new(factory),
                root,
            }),
        })
    }

    fn open(
        source: &Arc<dyn TileSource>,
        infos: &[LayerInfo],
        config: TerrainConfig,
    ) -> Result<(QuadTreeFactory, Arc<QuadTree>)> {
        let layers = LayerManager::open(source.clone(), infos, config.num_layers)?;
        let factory = QuadTreeFactory::new(source.clone(), layers, config)?;
        let root = factory.load_root();
        if !root.is_built() {
            return Err(TerrainError::MissingRootTile);
        }
        Ok((factory, root))
    }

    pub fn root(&self) -> Arc<QuadTree> {
        self.state.read().root.clone()
    }

    pub fn factory(&self) -> Arc<QuadTreeFactory> {
        self.state.read().factory.clone()
    }

    pub fn config(&self) -> TerrainConfig {
        self.factory().config().clone()
    }

    pub fn layer_infos(&self) -> Vec<LayerInfo> {
        self.state.read().infos.clone()
    }

    pub fn world_size(&self) -> DVec2 {
        self.factory().world_size()
    }

    fn scale(&self) -> f64 {
        self.factory().config().pixel_scale
    }

    pub fn minimum_elevation(&self) -> f64 {
        self.factory().elevation_range().0
    }

    pub fn maximum_elevation(&self) -> f64 {
        self.factory().elevation_range().1
    }

    /// Adapts the tree to the camera and stitches it when it changed.
    pub fn update(&self, camera: &dyn LodCamera) -> Result<bool> {
        let factory = self.factory();
        factory.install_finished();
        let changed = self.root().update(camera, &factory);
        if changed {
            let instant = instant::Instant::now();
            self.stitch()?;
            bevy::log::debug!("Stitched landscape in {:?}", instant.elapsed());
        }
        Ok(changed)
    }

    /// Removes seams between leaves, coarsest level first, then settles the
    /// corners where leaves meet.
    pub fn stitch(&self) -> Result<()> {
        let root = self.root();
        let factory = self.factory();
        for level in 0..=root.depth() {
            root.stitch(level, factory.cache())?;
        }
        root.stitch_corners()
    }

    /// Drops every cached tile and starts again from the root.
    pub fn reset(&self) {
        let factory = self.factory();
        factory.cache().clear();
        let root = factory.load_root();
        self.state.write().root = root;
    }

    /// Reopens the landscape with a new layer configuration.
    pub fn set_layers(&self, infos: Vec<LayerInfo>) -> Result<()> {
        self.reopen(infos, self.config())
    }

    /// Rebuilds every tile at a new scale.
    pub fn set_pixel_scale(&self, pixel_scale: f64) -> Result<()> {
        let config = TerrainConfig {
            pixel_scale,
            ..self.config()
        };
        self.reopen(self.layer_infos(), config)
    }

    fn reopen(&self, infos: Vec<LayerInfo>, config: TerrainConfig) -> Result<()> {
        let (factory, root) = Self::open(&self.source, &infos, config)?;
        let mut state = self.state.write();
        state.factory.cache().clear();
        *state = LandscapeState {
            infos,
            factory: Arc::new(factory),
            root,
        };
        Ok(())
    }

    pub fn set_surface_color(&self, color: [f32; 4]) {
        self.factory().set_surface_color(color);
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.root().contains(x, y)
    }

    /// Elevation at the current level of detail. NaN outside the landscape.
    pub fn get_elevation(&self, x: f64, y: f64) -> f64 {
        self.root().get_elevation(x, y) / self.scale()
    }

    /// Height above the minimum elevation, in landscape units.
    pub fn get_z(&self, x: f64, y: f64) -> f64 {
        self.root().get_elevation(x, y) - self.factory().z_offset()
    }

    pub fn get_normal(&self, x: f64, y: f64) -> Option<DVec3> {
        self.root().get_normal(x, y)
    }

    /// Elevation at the center of the landscape, or the minimum elevation
    /// when there is no data there.
    pub fn get_center_elevation(&self) -> f64 {
        let elevation = self.get_elevation(0.0, 0.0);
        if elevation.is_nan() {
            self.minimum_elevation()
        } else {
            elevation
        }
    }

    fn tile_at(&self, x: f64, y: f64, level: Option<usize>) -> Option<Arc<QuadTree>> {
        let size = self.factory().world_size();
        let key: QuadKey = self.source.get_key(x, y, size.x, size.y, level)?;
        Some(self.factory().get_quad_tree(&key, true))
    }

    /// Elevation from the finest tile covering (x, y), whatever the current
    /// level of detail. Loads that tile if needed.
    pub fn get_elevation_at_highest_level(&self, x: f64, y: f64) -> f64 {
        self.tile_at(x, y, None)
            .map_or(f64::NAN, |tile| tile.mesh_elevation(x, y) / self.scale())
    }

    pub fn get_elevation_at_level(&self, x: f64, y: f64, level: usize) -> f64 {
        self.tile_at(x, y, Some(level))
            .map_or(f64::NAN, |tile| tile.mesh_elevation(x, y) / self.scale())
    }

    pub fn get_normal_at_highest_level(&self, x: f64, y: f64) -> Option<DVec3> {
        self.tile_at(x, y, None)?.mesh_normal(x, y)
    }

    /// Points along p0 -> p1 one finest pixel apart, ending at p1, with
    /// their elevation. None if either end is outside the landscape.
    pub fn get_vertices(&self, p0: DVec2, p1: DVec2, highest_level: bool) -> Option<Vec<DVec3>> {
        if !self.contains(p0.x, p0.y) || !self.contains(p1.x, p1.y) {
            return None;
        }
        let elevation = |p: DVec2| {
            let z = if highest_level {
                self.get_elevation_at_highest_level(p.x, p.y)
            } else {
                self.get_elevation(p.x, p.y)
            };
            p.extend(z)
        };
        let pixel = self.factory().finest_pixel_size();
        let step = pixel.x.min(pixel.y);
        let length = p0.distance(p1);
        let steps = (length / step).ceil() as usize;
        if steps == 0 {
            return Some(vec![elevation(p0), elevation(p1)]);
        }
        let direction = (p1 - p0) / length;
        let mut vertices: Vec<DVec3> = (0..steps)
            .map(|i| elevation(p0 + direction * (i as f64 * step)))
            .collect();
        vertices.push(elevation(p1));
        Some(vertices)
    }

    pub fn local_to_world(&self, local: DVec3) -> DVec3 {
        let mut world = local / self.scale();
        world.z += self.minimum_elevation();
        self.projection.local_to_world(world)
    }

    pub fn world_to_local(&self, world: DVec3) -> DVec3 {
        let mut local = self.projection.world_to_local(world);
        local.z -= self.minimum_elevation();
        local * self.scale()
    }

    pub fn spherical_to_world(&self, spherical: DVec3) -> DVec3 {
        self.projection.project(spherical)
    }

    pub fn world_to_spherical(&self, world: DVec3) -> DVec3 {
        self.projection.un_project(world)
    }

    pub fn spherical_to_local(&self, spherical: DVec3) -> DVec3 {
        self.world_to_local(self.spherical_to_world(spherical))
    }

    pub fn local_to_spherical(&self, local: DVec3) -> DVec3 {
        self.world_to_spherical(self.local_to_world(local))
    }

    /// Visits the points of a grid over the bounds of `region` that fall
    /// inside it. Returns false if cancelled.
    fn for_each_sample(
        region: &Polygon,
        step: DVec2,
        offset: f64,
        cancel: &CancelToken,
        mut visit: impl FnMut(usize, usize, DVec2),
    ) -> bool {
        let Some((lower, upper)) = region.bounds().filter(|_| !region.is_empty()) else {
            return true;
        };
        if !(step.x > 0.0 && step.y > 0.0) {
            return true;
        }
        let columns = ((upper.x - lower.x) / step.x) as usize;
        let rows = ((upper.y - lower.y) / step.y) as usize;
        for row in 0..rows {
            for column in 0..columns {
                if cancel.is_cancelled() {
                    return false;
                }
                let point = lower + DVec2::new(column as f64 + offset, row as f64 + offset) * step;
                if region.contains(point.x, point.y) {
                    visit(row, column, point);
                }
            }
        }
        true
    }

    /// Area of one finest pixel in world units.
    fn pixel_area(&self) -> f64 {
        let pixel = self.factory().finest_pixel_size() / self.scale();
        pixel.x * pixel.y
    }

    /// Mean elevation over a region at the finest resolution. NaN when
    /// cancelled or when the region holds no data.
    pub fn sample_mean_elevation(&self, region: &Polygon, cancel: &CancelToken) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        let finished = Self::for_each_sample(region, self.factory().finest_pixel_size(), 0.0, cancel, |_, _, p| {
            let elevation = self.get_elevation_at_highest_level(p.x, p.y);
            if !elevation.is_nan() {
                sum += elevation;
                count += 1;
            }
        });
        if !finished || count == 0 {
            return f64::NAN;
        }
        sum / count as f64
    }

    /// Slope in degrees of the mean surface normal over a region.
    pub fn sample_mean_slope(&self, region: &Polygon, cancel: &CancelToken) -> f64 {
        let mut sum = DVec3::ZERO;
        let mut count = 0usize;
        let finished = Self::for_each_sample(region, self.factory().finest_pixel_size(), 0.0, cancel, |_, _, p| {
            if let Some(normal) = self.get_normal_at_highest_level(p.x, p.y) {
                sum += normal;
                count += 1;
            }
        });
        if !finished || count == 0 {
            return f64::NAN;
        }
        slope_from_normal(sum / count as f64)
    }

    /// Volume of the surface above and below a reference over a region, as
    /// `[above, below]`. None when cancelled.
    pub fn sample_volume(&self, region: &Polygon, reference: VolumeReference, cancel: &CancelToken) -> Option<[f64; 2]> {
        let mut above = 0.0;
        let mut below = 0.0;
        let finished = Self::for_each_sample(region, self.factory().finest_pixel_size(), 0.0, cancel, |_, _, p| {
            let elevation = self.get_elevation_at_highest_level(p.x, p.y);
            let reference = reference.z_at(p.x, p.y);
            if elevation.is_nan() || reference.is_nan() {
                return;
            }
            if elevation < reference {
                below += reference - elevation;
            } else {
                above += elevation - reference;
            }
        });
        if !finished {
            return None;
        }
        let area = self.pixel_area();
        Some([above * area, below * area])
    }

    /// Surface area over a region in world units. Each pixel is split into
    /// eight triangles around its center.
    pub fn sample_surface_area(&self, region: &Polygon, cancel: &CancelToken) -> f64 {
        let pixel = self.factory().finest_pixel_size();
        let mut area = 0.0;
        let finished = Self::for_each_sample(region, pixel, 0.5, cancel, |_, _, p| {
            area += self.pixel_surface_area(p, pixel / 2.0);
        });
        if finished {
            area
        } else {
            f64::NAN
        }
    }

    fn pixel_surface_area(&self, center: DVec2, half: DVec2) -> f64 {
        const FAN: [[(f64, f64); 2]; 8] = [
            [(-1.0, 1.0), (0.0, 1.0)],
            [(1.0, 1.0), (0.0, 1.0)],
            [(-1.0, 0.0), (-1.0, 1.0)],
            [(1.0, 0.0), (1.0, 1.0)],
            [(-1.0, 0.0), (-1.0, -1.0)],
            [(1.0, 0.0), (1.0, -1.0)],
            [(-1.0, -1.0), (0.0, -1.0)],
            [(1.0, -1.0), (0.0, -1.0)],
        ];
        let scale = self.scale();
        let vertex = |p: DVec2| {
            let z = self.get_elevation_at_highest_level(p.x, p.y);
            (!z.is_nan()).then(|| DVec3::new(p.x / scale, p.y / scale, z))
        };
        let Some(v0) = vertex(center) else {
            return 0.0;
        };
        FAN.iter()
            .filter_map(|[(x1, y1), (x2, y2)]| {
                let v1 = vertex(center + DVec2::new(*x1, *y1) * half)?;
                let v2 = vertex(center + DVec2::new(*x2, *y2) * half)?;
                Some(triangle_area(v0, v1, v2))
            })
            .sum()
    }

    /// Surface minus `plane` on a grid of `sample_size` spacing over a
    /// region. None when cancelled.
    pub fn sample_difference(
        &self,
        region: &Polygon,
        plane: &PlaneEquation,
        sample_size: f64,
        cancel: &CancelToken,
    ) -> Option<DifferenceGrid> {
        let (lower, upper) = region.bounds()?;
        if !(sample_size > 0.0) {
            return None;
        }
        let columns = ((upper.x - lower.x) / sample_size) as usize;
        let rows = ((upper.y - lower.y) / sample_size) as usize;
        let mut grid = DifferenceGrid {
            rows,
            columns,
            values: vec![f32::NAN; rows * columns],
            minimum: f32::MAX,
            maximum: f32::MIN,
        };
        let finished = Self::for_each_sample(region, DVec2::splat(sample_size), 0.0, cancel, |row, column, p| {
            let difference = (self.get_elevation_at_highest_level(p.x, p.y) - plane.z_at(p.x, p.y)) as f32;
            if let Some(value) = grid.values.get_mut(row * columns + column) {
                *value = difference;
            }
            if !difference.is_nan() {
                grid.minimum = grid.minimum.min(difference);
                grid.maximum = grid.maximum.max(difference);
            }
        });
        finished.then_some(grid)
    }

    /// Keys of the subtrees that split or merged since the last call.
    pub fn take_changed_keys(&self) -> Vec<QuadKey> {
        self.factory().take_changed()
    }

    pub fn stats(&self) -> LandscapeStats {
        let root = self.root();
        let factory = self.factory();
        LandscapeStats {
            leaf_count: root.leaf_count(),
            depth: root.depth(),
            cached_tiles: factory.cache().len(),
            cache_capacity: factory.cache().capacity(),
            pending_builds: factory.pending_builds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layer::LayerType,
        quadtree::NodeStatus,
        test_support::{landscape, landscape_from, landscape_with, pyramid, pyramid_config, top_down_camera, CountingSource},
    };
    use regolith_scene::{equals_epsilon, EPSILON6, EPSILON9};

    fn square(lower: f64, upper: f64) -> Polygon {
        Polygon::from_bounds(DVec2::splat(lower), DVec2::splat(upper))
    }

    #[test]
    fn elevations_are_in_world_units() {
        let config = TerrainConfig {
            pixel_scale: 2.0,
            ..pyramid_config()
        };
        let landscape = landscape_with(pyramid(3, 2, |x, y| (x + 10.0 * y) as f32), config);
        assert_eq!(landscape.world_size(), DVec2::new(16.0, 16.0));
        assert_eq!(landscape.minimum_elevation(), -44.0);
        // landscape (2, 2) is world (1, 1)
        assert_eq!(landscape.get_elevation(2.0, 2.0), 11.0);
        assert_eq!(landscape.get_z(2.0, 2.0), 22.0 + 88.0);
        assert!(landscape.get_elevation(9.0, 0.0).is_nan());
        assert!(!landscape.contains(9.0, 0.0));
    }

    #[test]
    fn highest_level_ignores_current_detail() {
        let landscape = landscape(3, 2, |_, y| (y * y) as f32);
        // the root only has samples at y = 0 and y = 4
        assert_eq!(landscape.get_elevation(0.0, 1.0), 4.0);
        assert_eq!(landscape.get_elevation_at_highest_level(0.0, 1.0), 1.0);
        // level 1 has samples at y = 0 and y = 2
        assert_eq!(landscape.get_elevation_at_level(0.0, 1.0, 1), 2.0);
        assert_eq!(landscape.root().status(), NodeStatus::Leaf);
        assert!(landscape.factory().cache().contains(&QuadKey::parse("2/3").unwrap()));
        assert!(landscape.get_elevation_at_highest_level(10.0, 0.0).is_nan());
        assert!(landscape.get_normal_at_highest_level(0.0, 1.0).unwrap().z > 0.0);
    }

    #[test]
    fn center_elevation() {
        let landscape = landscape(2, 2, |x, y| (3.0 + x + y) as f32);
        assert_eq!(landscape.get_center_elevation(), 3.0);
        let landscape = landscape_with(pyramid(2, 2, |_, _| f32::NAN), pyramid_config());
        assert_eq!(landscape.get_center_elevation(), 0.0);
    }

    #[test]
    fn local_and_world_frames() {
        let config = TerrainConfig {
            pixel_scale: 0.5,
            ..pyramid_config()
        };
        let landscape = landscape_with(pyramid(2, 2, |_, _| 100.0), config);
        let world = landscape.local_to_world(DVec3::new(1.0, -2.0, 3.0));
        assert_eq!(world, DVec3::new(2.0, -4.0, 106.0));
        assert_eq!(landscape.world_to_local(world), DVec3::new(1.0, -2.0, 3.0));
        let spherical = landscape.local_to_spherical(DVec3::new(1.0, -2.0, 3.0));
        let back = landscape.spherical_to_local(spherical);
        assert!(equals_epsilon(back.x, 1.0, Some(EPSILON9), None));
        assert!(equals_epsilon(back.y, -2.0, Some(EPSILON9), None));
        assert!(equals_epsilon(back.z, 3.0, Some(EPSILON9), None));
    }

    #[test]
    fn profile_line_steps_one_pixel() {
        let landscape = landscape(3, 2, |x, _| x as f32);
        let line = landscape
            .get_vertices(DVec2::new(0.0, 0.5), DVec2::new(3.0, 0.5), true)
            .unwrap();
        let xs: Vec<f64> = line.iter().map(|v| v.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(line.iter().all(|v| v.z == v.x));
        let short = landscape
            .get_vertices(DVec2::ZERO, DVec2::ZERO, false)
            .unwrap();
        assert_eq!(short.len(), 2);
        assert!(landscape.get_vertices(DVec2::ZERO, DVec2::new(5.0, 0.0), true).is_none());
    }

    #[test]
    fn mean_elevation_and_slope() {
        let landscape = landscape(3, 2, |x, _| (x + 3.0) as f32);
        let cancel = CancelToken::new();
        // samples at x = 0.25 and 1.25 on two rows
        let mean = landscape.sample_mean_elevation(&square(0.25, 2.25), &cancel);
        assert!(equals_epsilon(mean, 3.75, Some(EPSILON6), None));
        let slope = landscape.sample_mean_slope(&square(0.25, 2.25), &cancel);
        assert!(equals_epsilon(slope, 45.0, None, Some(1e-3)));
        assert!(landscape.sample_mean_elevation(&square(10.0, 12.0), &cancel).is_nan());
    }

    #[test]
    fn volume_against_elevation_and_plane() {
        let landscape = landscape(3, 2, |_, _| 2.0);
        let cancel = CancelToken::new();
        let region = square(0.25, 2.25);
        assert_eq!(
            landscape.sample_volume(&region, VolumeReference::Elevation(1.0), &cancel),
            Some([4.0, 0.0])
        );
        let plane = PlaneEquation::horizontal(3.0);
        assert_eq!(
            landscape.sample_volume(&region, VolumeReference::Plane(plane), &cancel),
            Some([0.0, 4.0])
        );
    }

    #[test]
    fn surface_area_of_flat_and_inclined_ground() {
        let cancel = CancelToken::new();
        let flat = landscape(3, 2, |_, _| 0.0);
        assert!(equals_epsilon(flat.sample_surface_area(&square(0.0, 2.0), &cancel), 4.0, Some(EPSILON9), None));
        let inclined = landscape(3, 2, |x, _| x as f32);
        let area = inclined.sample_surface_area(&square(0.0, 2.0), &cancel);
        assert!(equals_epsilon(area, 4.0 * 2f64.sqrt(), Some(EPSILON6), None));
    }

    #[test]
    fn difference_grid() {
        let landscape = landscape(3, 2, |_, _| 2.0);
        let plane = PlaneEquation::from_points(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(1.0, 0.0, 1.0),
            DVec3::new(0.0, 1.0, 1.0),
        );
        let grid = landscape
            .sample_difference(&square(0.25, 2.25), &plane, 1.0, &CancelToken::new())
            .unwrap();
        assert_eq!((grid.rows, grid.columns), (2, 2));
        assert!(grid.values.iter().all(|v| *v == 1.0));
        assert_eq!((grid.minimum, grid.maximum), (1.0, 1.0));
        assert_eq!(grid.get(1, 1), Some(1.0));
        assert_eq!(grid.get(0, 2), None);
    }

    #[test]
    fn cancelled_sampling_returns_sentinels() {
        let landscape = landscape(3, 2, |_, _| 2.0);
        let cancel = CancelToken::new();
        let shared = cancel.clone();
        shared.cancel();
        let region = square(-3.0, 3.0);
        assert!(cancel.is_cancelled());
        assert!(landscape.sample_mean_elevation(&region, &cancel).is_nan());
        assert!(landscape.sample_mean_slope(&region, &cancel).is_nan());
        assert!(landscape.sample_surface_area(&region, &cancel).is_nan());
        assert!(landscape
            .sample_volume(&region, VolumeReference::Elevation(0.0), &cancel)
            .is_none());
        assert!(landscape
            .sample_difference(&region, &PlaneEquation::horizontal(0.0), 1.0, &cancel)
            .is_none());
    }

    #[test]
    fn cancelling_mid_region_discards_partial_results() {
        let source = CountingSource::new(pyramid(3, 2, |_, _| 2.0));
        let landscape = landscape_from(source.clone(), pyramid_config());
        let region = square(-3.5, 3.5);

        let cancel = CancelToken::new();
        let before = source.total_reads();
        source.cancel_after(2, cancel.clone());
        assert!(landscape.sample_mean_elevation(&region, &cancel).is_nan());
        assert!(cancel.is_cancelled());
        // the first row crosses four finest tiles, sampling stopped at the second
        assert_eq!(source.total_reads() - before, 2);

        landscape.reset();
        let cancel = CancelToken::new();
        source.cancel_after(2, cancel.clone());
        assert!(landscape
            .sample_volume(&region, VolumeReference::Elevation(0.0), &cancel)
            .is_none());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn reset_returns_to_the_root() {
        let landscape = landscape(3, 2, |_, _| 0.0);
        let camera = top_down_camera(100.0);
        while landscape.update(&camera).unwrap() {}
        assert_eq!(landscape.stats().depth, 2);
        let changed = landscape.take_changed_keys();
        assert!(changed.contains(&QuadKey::root()));
        landscape.reset();
        let stats = landscape.stats();
        assert_eq!((stats.leaf_count, stats.depth, stats.cached_tiles), (1, 0, 1));
        assert!(landscape.root().is_in_use());
    }

    #[test]
    fn layers_and_scale_rebuild_tiles() {
        let landscape = landscape(2, 2, |x, _| x as f32);
        assert!(landscape.root().mesh_snapshot().unwrap().layer_tex_coords[1].is_none());
        landscape
            .set_layers(vec![
                LayerInfo::new("elevation", LayerType::Elevation, 0),
                LayerInfo::new("Slope", LayerType::Derivative, 1),
            ])
            .unwrap();
        assert!(landscape.root().mesh_snapshot().unwrap().layer_tex_coords[1].is_some());
        assert_eq!(landscape.layer_infos().len(), 2);
        landscape.set_pixel_scale(3.0).unwrap();
        assert_eq!(landscape.world_size(), DVec2::new(12.0, 12.0));
        assert_eq!(landscape.get_elevation(3.0, 0.0), 1.0);
        assert!(landscape.set_layers(Vec::new()).is_err());
    }

    #[test]
    fn missing_root_tile_is_an_error() {
        let mut source = crate::tile_source::MemoryTileSource::new();
        source.add_layer(
            "elevation",
            LayerType::Elevation,
            crate::tile_source::Properties::new().with(crate::tile_source::property::TILE_WIDTH, 2),
        );
        let result = Landscape::load(
            source.into_shared(),
            vec![LayerInfo::new("elevation", LayerType::Elevation, 0)],
            Arc::new(regolith_scene::EquirectangularProjection::default()),
            pyramid_config(),
        );
        assert!(matches!(result, Err(TerrainError::MissingRootTile)));
    }

    #[test]
    fn background_builds_reach_full_detail() {
        let config = TerrainConfig {
            worker_threads: 2,
            ..pyramid_config()
        };
        let landscape = landscape_with(pyramid(3, 2, |x, y| (x * y) as f32), config);
        let camera = top_down_camera(100.0);
        let start = std::time::Instant::now();
        while landscape.stats().leaf_count < 16 {
            landscape.update(&camera).unwrap();
            assert!(start.elapsed() < std::time::Duration::from_secs(10), "tiles never arrived");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(landscape.stats().depth, 2);
        let mut leaves = Vec::new();
        landscape.root().collect_leaves(&mut leaves);
        assert!(leaves.iter().all(|leaf| leaf.has_mesh()));
    }
}
