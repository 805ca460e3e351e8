use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bevy::math::{DVec2, DVec3, Vec3};
use parking_lot::{Condvar, Mutex};

use crate::{
    camera::LodCamera,
    error::{Result, TerrainError},
    quad_key::QuadKey,
    quadtree_cache::QuadTreeCache,
    quadtree_factory::{ChildLoad, QuadTreeFactory},
    quadtree_mesh::{QuadTreeMesh, TileShape},
    side::{NodeChildren, NodeNeighbours, Quadrant, Side},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Contents not built yet, or the build found no tile.
    Loading,
    Leaf,
    Split,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BuildState {
    Pending,
    Ready,
    Missing,
}

struct QuadTreeState {
    /// Kept while split so a merge can show it again right away.
    mesh: Option<QuadTreeMesh>,
    build: BuildState,
    children: Option<NodeChildren<Arc<QuadTree>>>,
    dirty: NodeNeighbours<bool>,
    /// Lower left, lower right, upper right, upper left, center.
    test_points: [DVec3; 5],
}

enum Lookup<T> {
    Found(T),
    Descend(Arc<QuadTree>),
}

/// One tile of the landscape and, once split, the root of its four children.
///
/// Nodes live in the [`QuadTreeCache`]. Children are held directly, while the
/// other relations (parent, neighbours) are resolved through the cache by key.
/// Only one node lock is ever held at a time.
pub struct QuadTree {
    key: QuadKey,
    translation: DVec3,
    pixel_width: f64,
    pixel_length: f64,
    tile_width: usize,
    tile_length: usize,
    z_offset: f64,
    neighbours: NodeNeighbours<Option<QuadKey>>,
    in_use: AtomicBool,
    enabled: AtomicBool,
    highest_level: AtomicBool,
    timestamp: AtomicU64,
    state: Mutex<QuadTreeState>,
    built: Condvar,
}

impl QuadTree {
    /// A node centered on `translation`. `z_offset` is subtracted from mesh
    /// elevations to place test points in the landscape frame.
    pub fn new(
        key: QuadKey,
        translation: DVec3,
        pixel_size: DVec2,
        tile_width: usize,
        tile_length: usize,
        z_offset: f64,
    ) -> Self {
        let neighbours = NodeNeighbours::from_fn(|side| {
            let sibling = key.quadrant()?.sibling(side)?;
            Some(key.parent()?.child(sibling))
        });
        let half = DVec2::new(
            tile_width as f64 * pixel_size.x,
            tile_length as f64 * pixel_size.y,
        ) / 2.0;
        let test_points = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (0.0, 0.0)]
            .map(|(sx, sy)| translation + DVec3::new(sx * half.x, sy * half.y, 0.0));
        Self {
            key,
            translation,
            pixel_width: pixel_size.x,
            pixel_length: pixel_size.y,
            tile_width,
            tile_length,
            z_offset,
            neighbours,
            in_use: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            highest_level: AtomicBool::new(false),
            timestamp: AtomicU64::new(0),
            state: Mutex::new(QuadTreeState {
                mesh: None,
                build: BuildState::Pending,
                children: None,
                dirty: NodeNeighbours::default(),
                test_points,
            }),
            built: Condvar::new(),
        }
    }

    pub fn key(&self) -> &QuadKey {
        &self.key
    }

    pub fn level(&self) -> usize {
        self.key.level()
    }

    pub fn quadrant(&self) -> Option<Quadrant> {
        self.key.quadrant()
    }

    pub fn translation(&self) -> DVec3 {
        self.translation
    }

    pub fn pixel_width(&self) -> f64 {
        self.pixel_width
    }

    pub fn pixel_length(&self) -> f64 {
        self.pixel_length
    }

    pub fn shape(&self) -> TileShape {
        TileShape {
            tile_width: self.tile_width,
            tile_length: self.tile_length,
            pixel_width: self.pixel_width as f32,
            pixel_length: self.pixel_length as f32,
        }
    }

    fn half_extent(&self) -> DVec2 {
        DVec2::new(
            self.tile_width as f64 * self.pixel_width,
            self.tile_length as f64 * self.pixel_length,
        ) / 2.0
    }

    pub fn lower_left(&self) -> DVec2 {
        self.translation.truncate() - self.half_extent()
    }

    pub fn upper_right(&self) -> DVec2 {
        self.translation.truncate() + self.half_extent()
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn set_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Set once the source has been found to have nothing below this tile.
    pub fn is_highest_level(&self) -> bool {
        self.highest_level.load(Ordering::Acquire)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub(crate) fn set_timestamp(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::Release);
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.state.lock();
        if state.children.is_some() {
            NodeStatus::Split
        } else if state.build == BuildState::Ready {
            NodeStatus::Leaf
        } else {
            NodeStatus::Loading
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().build == BuildState::Pending
    }

    /// Whether the build finished with a tile.
    pub fn is_built(&self) -> bool {
        self.state.lock().build == BuildState::Ready
    }

    /// True for a leaf showing its own mesh.
    pub fn has_mesh(&self) -> bool {
        let state = self.state.lock();
        state.children.is_none() && state.mesh.is_some()
    }

    pub fn children(&self) -> Option<NodeChildren<Arc<QuadTree>>> {
        self.state.lock().children.clone()
    }

    pub fn child(&self, quadrant: Quadrant) -> Option<Arc<QuadTree>> {
        self.state
            .lock()
            .children
            .as_ref()
            .map(|children| children[quadrant].clone())
    }

    pub fn test_points(&self) -> [DVec3; 5] {
        self.state.lock().test_points
    }

    /// Runs `f` on the mesh of a leaf.
    pub fn with_mesh<R>(&self, f: impl FnOnce(&QuadTreeMesh) -> R) -> Option<R> {
        let state = self.state.lock();
        match (&state.children, &state.mesh) {
            (None, Some(mesh)) => Some(f(mesh)),
            _ => None,
        }
    }

    pub fn mesh_snapshot(&self) -> Option<QuadTreeMesh> {
        self.with_mesh(QuadTreeMesh::clone)
    }

    pub fn is_dirty(&self, side: Side) -> bool {
        self.state.lock().dirty[side]
    }

    fn set_dirty(&self, dirty: bool) {
        self.state.lock().dirty = NodeNeighbours::from_fn(|_| dirty);
    }

    fn clear_dirty(&self, side: Side) {
        self.state.lock().dirty[side] = false;
    }

    /// Installs the outcome of a tile build. Ignored unless a build is pending.
    pub(crate) fn set_build_result(&self, mesh: Option<QuadTreeMesh>) {
        {
            let mut state = self.state.lock();
            if state.build != BuildState::Pending {
                return;
            }
            match mesh {
                Some(mesh) => {
                    state.test_points = self.test_points_of(&mesh);
                    state.mesh = Some(mesh);
                    state.build = BuildState::Ready;
                }
                None => state.build = BuildState::Missing,
            }
        }
        self.built.notify_all();
    }

    fn test_points_of(&self, mesh: &QuadTreeMesh) -> [DVec3; 5] {
        let (tw, tl) = (self.tile_width, self.tile_length);
        [(0, tl), (tw, tl), (tw, 0), (0, 0), (tw / 2, tl / 2)].map(|(column, row)| {
            let vertex = mesh.get_vertex(column, row).unwrap_or(Vec3::ZERO);
            self.translation
                + DVec3::new(
                    f64::from(vertex.x),
                    f64::from(vertex.y),
                    f64::from(vertex.z) - self.z_offset,
                )
        })
    }

    /// Blocks for at most `timeout` while a build is pending.
    pub fn wait_built(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if state.build == BuildState::Pending {
            self.built.wait_for(&mut state, timeout);
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let half = self.half_extent();
        (x - self.translation.x).abs() <= half.x && (y - self.translation.y).abs() <= half.y
    }

    fn quadrant_at(&self, x: f64, y: f64) -> Quadrant {
        match (x < self.translation.x, y >= self.translation.y) {
            (true, true) => Quadrant::Northwest,
            (true, false) => Quadrant::Southwest,
            (false, true) => Quadrant::Northeast,
            (false, false) => Quadrant::Southeast,
        }
    }

    /// Walks down to the leaf containing (x, y) and applies `f` to its mesh
    /// with the point relative to the leaf's lower left corner.
    fn query<T>(&self, x: f64, y: f64, missing: T, f: impl Fn(&QuadTreeMesh, f64, f64) -> T + Copy) -> T {
        if !self.contains(x, y) {
            return missing;
        }
        let lookup = {
            let state = self.state.lock();
            match (&state.children, &state.mesh) {
                (Some(children), _) => Lookup::Descend(children[self.quadrant_at(x, y)].clone()),
                (None, Some(mesh)) => {
                    let corner = self.lower_left();
                    Lookup::Found(f(mesh, x - corner.x, y - corner.y))
                }
                (None, None) => return missing,
            }
        };
        match lookup {
            Lookup::Found(value) => value,
            Lookup::Descend(child) => child.query(x, y, missing, f),
        }
    }

    /// Mesh elevation at the current level of detail, NaN outside the tile or
    /// over missing data.
    pub fn get_elevation(&self, x: f64, y: f64) -> f64 {
        self.query(x, y, f64::NAN, QuadTreeMesh::get_elevation_bilinear)
    }

    pub fn get_elevation_nearest_neighbor(&self, x: f64, y: f64) -> f64 {
        self.query(x, y, f64::NAN, QuadTreeMesh::get_elevation_nearest_neighbor)
    }

    pub fn get_normal(&self, x: f64, y: f64) -> Option<DVec3> {
        self.query(x, y, None, |mesh, x, y| {
            Some(mesh.get_normal_nearest_neighbor(x, y).as_dvec3())
        })
    }

    /// Elevation from this node's own mesh whether or not it is split.
    pub fn mesh_elevation(&self, x: f64, y: f64) -> f64 {
        if !self.contains(x, y) {
            return f64::NAN;
        }
        let corner = self.lower_left();
        let state = self.state.lock();
        state
            .mesh
            .as_ref()
            .map_or(f64::NAN, |mesh| mesh.get_elevation_bilinear(x - corner.x, y - corner.y))
    }

    pub fn mesh_normal(&self, x: f64, y: f64) -> Option<DVec3> {
        if !self.contains(x, y) {
            return None;
        }
        let corner = self.lower_left();
        let state = self.state.lock();
        state
            .mesh
            .as_ref()
            .filter(|mesh| !mesh.is_empty())
            .map(|mesh| mesh.get_normal_nearest_neighbor(x - corner.x, y - corner.y).as_dvec3())
    }

    /// Deepest level of any node in this subtree.
    pub fn depth(&self) -> usize {
        match self.children() {
            Some(children) => children.iter().map(|child| child.depth()).max().unwrap_or(0),
            None => self.level(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self.children() {
            Some(children) => children.iter().map(|child| child.leaf_count()).sum(),
            None => 1,
        }
    }

    /// Appends the leaves of this subtree, northwest first.
    pub fn collect_leaves(self: &Arc<Self>, leaves: &mut Vec<Arc<QuadTree>>) {
        match self.children() {
            Some(children) => {
                for child in children.iter() {
                    child.collect_leaves(leaves);
                }
            }
            None => leaves.push(self.clone()),
        }
    }

    /// Size in landscape units of a screen pixel at the point of this tile
    /// nearest the camera.
    fn nearest_pixel_size(&self, camera: &dyn LodCamera) -> f64 {
        let location = camera.location();
        let look_at = camera.look_at();
        let mut points = self.test_points().to_vec();
        if self.contains(look_at.x, look_at.y) {
            points.push(look_at);
        }
        points
            .into_iter()
            .min_by(|a, b| a.distance_squared(location).total_cmp(&b.distance_squared(location)))
            .map_or(f64::NAN, |nearest| camera.pixel_size_at(nearest))
    }

    /// Splits or merges this subtree for the camera. Returns whether the
    /// structure changed.
    pub fn update(&self, camera: &dyn LodCamera, factory: &QuadTreeFactory) -> bool {
        if !self.is_in_use() {
            return false;
        }
        let size = self.nearest_pixel_size(camera) * factory.config().cell_size;
        if size.is_nan() || size <= 0.0 {
            return false;
        }
        let status = self.status();
        if size >= self.pixel_width {
            if status == NodeStatus::Split {
                self.merge(factory);
                return true;
            }
            return false;
        }
        if size <= self.pixel_width / 2.0 && status == NodeStatus::Leaf {
            return self.split(factory);
        }
        let mut changed = false;
        if let Some(children) = self.children() {
            for child in children.iter() {
                changed |= child.update(camera, factory);
            }
        }
        changed
    }

    /// Replaces this leaf by its four children once they are all built.
    pub fn split(&self, factory: &QuadTreeFactory) -> bool {
        if self.is_highest_level() || self.status() != NodeStatus::Leaf {
            return false;
        }
        match factory.load_quad_trees(self) {
            ChildLoad::NoDeeperTiles => {
                self.highest_level.store(true, Ordering::Release);
                false
            }
            ChildLoad::Pending => false,
            ChildLoad::Ready(children) => {
                self.set_children(children);
                factory.notify_changed(self.key.clone());
                true
            }
        }
    }

    fn set_children(&self, children: NodeChildren<Arc<QuadTree>>) {
        for child in children.iter() {
            child.set_in_use(true);
            child.set_dirty(true);
        }
        self.state.lock().children = Some(children);
    }

    /// Drops the children and shows this node's mesh again.
    pub fn merge(&self, factory: &QuadTreeFactory) {
        let children = self.state.lock().children.take();
        let Some(children) = children else {
            return;
        };
        for child in children.iter() {
            child.release();
        }
        self.set_dirty(true);
        factory.notify_changed(self.key.clone());
    }

    /// Takes a subtree out of the landscape. The nodes stay cached.
    fn release(&self) {
        self.set_in_use(false);
        let children = {
            let mut state = self.state.lock();
            state.dirty = NodeNeighbours::default();
            state.children.take()
        };
        if let Some(children) = children {
            for child in children.iter() {
                child.release();
            }
        }
    }

    /// Frees the contents of an evicted node and wakes anyone waiting for it.
    pub fn dispose(&self) {
        self.set_in_use(false);
        {
            let mut state = self.state.lock();
            state.mesh = None;
            state.children = None;
            state.build = BuildState::Missing;
        }
        self.built.notify_all();
    }

    pub fn update_surface_color(&self, color: [f32; 4]) {
        if let Some(mesh) = self.state.lock().mesh.as_mut() {
            mesh.update_surface_color(color);
        }
    }

    /// Neighbour across `side` at this node's level, or the coarser leaf
    /// covering that side when the tree is not that deep there. None at the
    /// edge of the landscape.
    pub fn get_neighbour(&self, side: Side, cache: &QuadTreeCache) -> Result<Option<Arc<QuadTree>>> {
        if let Some(key) = &self.neighbours[side] {
            return Ok(cache.peek(key));
        }
        let (Some(parent_key), Some(quadrant)) = (self.key.parent(), self.quadrant()) else {
            return Ok(None);
        };
        let Some(parent) = cache.peek(&parent_key) else {
            return Ok(None);
        };
        let Some(neighbour) = parent.get_neighbour(side, cache)? else {
            return Ok(None);
        };
        let neighbour = match neighbour.children() {
            Some(children) if neighbour.level() == parent.level() => {
                let child = quadrant
                    .neighbour_child(side)
                    .ok_or(TerrainError::UnexpectedQuadrant {
                        side,
                        quadrant: Some(quadrant),
                    })?;
                children[child].clone()
            }
            _ => neighbour,
        };
        if neighbour.level() > self.level() {
            return Err(TerrainError::UnexpectedNeighbourLevel {
                key: self.key.to_string(),
                level: self.level(),
                neighbour_level: neighbour.level(),
            });
        }
        Ok(Some(neighbour))
    }

    /// Stitches every leaf of this subtree at `level` to its neighbours.
    pub fn stitch(&self, level: usize, cache: &QuadTreeCache) -> Result<()> {
        match self.children() {
            Some(children) => {
                if level > self.level() {
                    for child in children.iter() {
                        child.stitch(level, cache)?;
                    }
                }
            }
            None => {
                if level == self.level() && self.has_mesh() {
                    self.stitch_sides(cache)?;
                }
            }
        }
        Ok(())
    }

    /// Leaves of a coarser neighbour were already stitched when its level
    /// was, so only same level neighbours are visited.
    fn stitch_sides(&self, cache: &QuadTreeCache) -> Result<()> {
        for side in Side::ALL {
            if let Some(neighbour) = self.get_neighbour(side, cache)? {
                if neighbour.level() == self.level() {
                    neighbour.stitch_side(side.opposite(), self)?;
                }
            }
            self.clear_dirty(side);
        }
        Ok(())
    }

    /// Stitches the leaves along `side` of this subtree to `that`, a leaf at
    /// this node's level or above.
    fn stitch_side(&self, side: Side, that: &QuadTree) -> Result<()> {
        if let Some(children) = self.children() {
            for quadrant in side.children() {
                children[quadrant].stitch_side(side, that)?;
            }
            return Ok(());
        }
        if !(self.is_dirty(side) || that.is_dirty(side.opposite())) {
            return Ok(());
        }
        self.do_stitch(side, that)?;
        self.clear_dirty(side);
        if self.level() == that.level() {
            that.clear_dirty(side.opposite());
        }
        Ok(())
    }

    fn do_stitch(&self, side: Side, that: &QuadTree) -> Result<()> {
        let (level, that_level) = (self.level(), that.level());
        if that_level > level {
            return Err(TerrainError::UnexpectedNeighbourLevel {
                key: self.key.to_string(),
                level,
                neighbour_level: that_level,
            });
        }
        if level == that_level {
            let edge = {
                let mut state = self.state.lock();
                let Some(mesh) = state.mesh.as_mut().filter(|mesh| mesh.is_stitchable()) else {
                    return Ok(());
                };
                let Some((elevation, normals)) = mesh
                    .cached_edge(side)
                    .map(|(elevation, normals)| (elevation.to_vec(), normals.to_vec()))
                else {
                    return Ok(());
                };
                write_edge(mesh, side, &elevation, &normals)?;
                (elevation, normals)
            };
            let mut state = that.state.lock();
            if let Some(mesh) = state.mesh.as_mut().filter(|mesh| mesh.is_stitchable()) {
                write_edge(mesh, side.opposite(), &edge.0, &edge.1)?;
            }
            return Ok(());
        }
        let (coarse_elevation, coarse_normals) = {
            let state = that.state.lock();
            match state.mesh.as_ref().filter(|mesh| mesh.is_stitchable()) {
                Some(mesh) => (
                    mesh.edge_elevations(side.opposite())?,
                    mesh.edge_normals(side.opposite())?,
                ),
                None => return Ok(()),
            }
        };
        self.fill_edge(side, that_level, &coarse_elevation, &coarse_normals)
    }

    /// Writes the coarse edge of a leaf `that_level` levels up onto this
    /// finer edge, interpolating between the coarse samples.
    fn fill_edge(&self, side: Side, that_level: usize, elevation: &[f32], normals: &[Vec3]) -> Result<()> {
        let span = 2f64.powi((self.level() - that_level) as i32);
        let start = self.edge_offset(side, that_level);
        let last = elevation.len().min(normals.len()).saturating_sub(1);
        let mut state = self.state.lock();
        let Some(mesh) = state.mesh.as_mut().filter(|mesh| mesh.is_stitchable()) else {
            return Ok(());
        };
        for j in 0..mesh.edge_len(side) {
            let position = start + j as f64 / span;
            let i0 = (position.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let t = (position - i0 as f64).clamp(0.0, 1.0) as f32;
            let (Some(e0), Some(e1), Some(n0), Some(n1)) =
                (elevation.get(i0), elevation.get(i1), normals.get(i0), normals.get(i1))
            else {
                continue;
            };
            let e = if t == 0.0 { *e0 } else { e0 + (e1 - e0) * t };
            mesh.set_edge_sample(side, j, e, n0.lerp(*n1, t))?;
        }
        Ok(())
    }

    /// Index along the edge of the ancestor at `that_level` where this
    /// node's edge begins, in that ancestor's samples.
    fn edge_offset(&self, side: Side, that_level: usize) -> f64 {
        let tile = if side.is_vertical() {
            self.tile_length
        } else {
            self.tile_width
        } as f64;
        self.key
            .quadrants()
            .iter()
            .enumerate()
            .skip(that_level)
            .filter(|(_, quadrant)| quadrant.on_far_half(side))
            .map(|(i, _)| tile / 2f64.powi((i + 1 - that_level) as i32))
            .sum()
    }

    /// The leaf of this subtree containing (x, y).
    pub fn leaf_at(self: &Arc<Self>, x: f64, y: f64) -> Option<Arc<QuadTree>> {
        if !self.contains(x, y) {
            return None;
        }
        match self.child(self.quadrant_at(x, y)) {
            Some(child) => child.leaf_at(x, y),
            None => Some(self.clone()),
        }
    }

    /// Grid position and landscape position of each corner.
    fn corners(&self) -> [(usize, usize, DVec2); 4] {
        let (lower, upper) = (self.lower_left(), self.upper_right());
        let (tw, tl) = (self.tile_width, self.tile_length);
        [
            (0, 0, DVec2::new(lower.x, upper.y)),
            (tw, 0, upper),
            (0, tl, lower),
            (tw, tl, DVec2::new(upper.x, lower.y)),
        ]
    }

    fn corner_at(&self, point: DVec2, tolerance: f64) -> Option<(usize, usize)> {
        self.corners()
            .into_iter()
            .find(|(_, _, corner)| corner.distance(point) <= tolerance)
            .map(|(column, row, _)| (column, row))
    }

    fn is_stitchable_leaf(&self) -> bool {
        self.with_mesh(QuadTreeMesh::is_stitchable).unwrap_or(false)
    }

    fn corner_sample(&self, column: usize, row: usize) -> Option<(f32, Vec3)> {
        self.with_mesh(|mesh| Some((mesh.get_elevation(column, row).ok()?, mesh.get_normal(column, row).ok()?)))
            .flatten()
    }

    fn set_corner_sample(&self, column: usize, row: usize, elevation: f32, normal: Vec3) -> Result<()> {
        let mut state = self.state.lock();
        if state.children.is_some() {
            return Ok(());
        }
        if let Some(mesh) = state.mesh.as_mut().filter(|mesh| mesh.is_stitchable()) {
            mesh.set_elevation(column, row, elevation)?;
            mesh.set_normal(column, row, normal)?;
        }
        Ok(())
    }

    /// Gives every leaf meeting at a tile corner the sample of one owner, the
    /// coarsest of them with the lowest key. Corners lying on the edge of a
    /// coarser leaf were already filled from that edge and are skipped.
    pub fn stitch_corners(self: &Arc<Self>) -> Result<()> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        let Some(finest) = leaves
            .iter()
            .map(|leaf| leaf.pixel_width.min(leaf.pixel_length))
            .min_by(f64::total_cmp)
        else {
            return Ok(());
        };
        let offset = finest / 4.0;
        for leaf in leaves.iter().filter(|leaf| leaf.is_stitchable_leaf()) {
            for (column, row, corner) in leaf.corners() {
                let mut meeting: Vec<(Arc<QuadTree>, usize, usize)> = Vec::with_capacity(4);
                let mut junction = false;
                for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
                    let Some(other) = self.leaf_at(corner.x + dx * offset, corner.y + dy * offset) else {
                        continue;
                    };
                    if meeting.iter().any(|(seen, _, _)| seen.key() == other.key()) {
                        continue;
                    }
                    match other.corner_at(corner, offset) {
                        Some((c, r)) => meeting.push((other, c, r)),
                        None => junction = true,
                    }
                }
                meeting.retain(|(other, _, _)| other.is_stitchable_leaf());
                let owner = meeting
                    .iter()
                    .map(|(other, _, _)| (other.level(), other.key()))
                    .min();
                if junction || owner != Some((leaf.level(), leaf.key())) {
                    continue;
                }
                let Some((elevation, normal)) = leaf.corner_sample(column, row) else {
                    continue;
                };
                for (other, c, r) in meeting.iter().filter(|(other, _, _)| other.key() != leaf.key()) {
                    other.set_corner_sample(*c, *r, elevation, normal)?;
                }
            }
        }
        Ok(())
    }
}

/// Writes the interior of an edge. The end vertices are shared with the
/// tiles across the corners and are settled by [`QuadTree::stitch_corners`].
fn write_edge(mesh: &mut QuadTreeMesh, side: Side, elevation: &[f32], normals: &[Vec3]) -> Result<()> {
    let last = elevation.len().min(normals.len()).saturating_sub(1);
    for (j, (e, n)) in elevation.iter().zip(normals).enumerate().take(last).skip(1) {
        mesh.set_edge_sample(side, j, *e, *n)?;
    }
    Ok(())
}
