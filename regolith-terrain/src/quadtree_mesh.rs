use std::sync::Arc;

use bevy::math::Vec3;
use regolith_scene::create_normal;

use crate::{
    error::{Result, TerrainError},
    layer::Texture,
    quad_key::QuadKey,
    side::{NodeNeighbours, Side},
};

/// Grid and pixel dimensions shared by every tile of a level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileShape {
    pub tile_width: usize,
    pub tile_length: usize,
    pub pixel_width: f32,
    pub pixel_length: f32,
}

impl TileShape {
    pub fn sample_count(&self) -> usize {
        (self.tile_width + 1) * (self.tile_length + 1)
    }
}

/// Boundary samples of a tile as built, before any stitching.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshEdges {
    pub elevation: NodeNeighbours<Vec<f32>>,
    pub normals: NodeNeighbours<Vec<Vec3>>,
}

/// Geometry of one tile: a `(tile_width + 1) x (tile_length + 1)` vertex grid,
/// row major with row 0 at the top. Vertices are relative to the tile center.
/// A tile whose samples are all missing is built as a four vertex quad.
#[derive(Clone, Debug)]
pub struct QuadTreeMesh {
    pub key: QuadKey,
    tile_width: usize,
    tile_length: usize,
    pixel_width: f32,
    pixel_length: f32,
    empty: bool,
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<[f32; 4]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    /// Length of each triangle strip in `indices`, one per row of cells.
    pub index_lengths: Vec<usize>,
    /// Per layer slot, texture coordinates computed from vertex values.
    pub layer_tex_coords: Vec<Option<Vec<[f32; 2]>>>,
    pub textures: Vec<Option<Arc<Texture>>>,
    edges: Option<MeshEdges>,
}

impl QuadTreeMesh {
    /// Builds a tile from scene-unit elevations, NaN for missing samples.
    /// Missing samples are placed at `fill` and get a transparent color.
    pub fn from_elevations(
        key: QuadKey,
        shape: TileShape,
        elevations: &[f32],
        fill: f32,
        color: [f32; 4],
    ) -> Result<Self> {
        if elevations.len() != shape.sample_count() {
            return Err(TerrainError::TileDecode {
                key: key.to_string(),
                reason: format!(
                    "{} samples for a {}x{} tile",
                    elevations.len(),
                    shape.tile_width,
                    shape.tile_length
                ),
            });
        }
        if elevations.iter().all(|e| e.is_nan()) {
            return Ok(Self::empty(key, shape, fill));
        }
        let mut mesh = Self::grid(key, shape, shape.tile_width, shape.tile_length);
        for ((vertex, sample_color), elevation) in mesh.vertices.iter_mut().zip(mesh.colors.iter_mut()).zip(elevations) {
            if elevation.is_nan() {
                vertex.z = fill;
                *sample_color = [0.0; 4];
            } else {
                vertex.z = *elevation;
            }
        }
        mesh.update_surface_color(color);
        mesh.compute_normals();
        mesh.cache_edges();
        Ok(mesh)
    }

    /// The placeholder quad of a tile without data.
    pub fn empty(key: QuadKey, shape: TileShape, fill: f32) -> Self {
        let mut mesh = Self::grid(key, shape, 1, 1);
        mesh.empty = true;
        for (vertex, color) in mesh.vertices.iter_mut().zip(mesh.colors.iter_mut()) {
            vertex.z = fill;
            *color = [0.0; 4];
        }
        mesh
    }

    /// Vertex grid of `columns x rows` cells spanning the whole tile.
    fn grid(key: QuadKey, shape: TileShape, columns: usize, rows: usize) -> Self {
        let width = shape.tile_width as f32 * shape.pixel_width;
        let length = shape.tile_length as f32 * shape.pixel_length;
        let count = (columns + 1) * (rows + 1);
        let mut vertices = Vec::with_capacity(count);
        let mut tex_coords = Vec::with_capacity(count);
        for r in 0..=rows {
            for c in 0..=columns {
                let u = c as f32 / columns as f32;
                let v = r as f32 / rows as f32;
                vertices.push(Vec3::new(-width / 2.0 + u * width, length / 2.0 - v * length, 0.0));
                tex_coords.push([u, v]);
            }
        }
        let mut indices = Vec::with_capacity(rows * (columns + 1) * 2);
        let mut index_lengths = Vec::with_capacity(rows);
        for r in 0..rows {
            for c in 0..=columns {
                indices.push((r * (columns + 1) + c) as u32);
                indices.push(((r + 1) * (columns + 1) + c) as u32);
            }
            index_lengths.push((columns + 1) * 2);
        }
        Self {
            key,
            tile_width: shape.tile_width,
            tile_length: shape.tile_length,
            pixel_width: shape.pixel_width,
            pixel_length: shape.pixel_length,
            empty: false,
            vertices,
            normals: vec![Vec3::Z; count],
            colors: vec![[1.0; 4]; count],
            tex_coords,
            indices,
            index_lengths,
            layer_tex_coords: Vec::new(),
            textures: Vec::new(),
            edges: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_length(&self) -> usize {
        self.tile_length
    }

    pub fn shape(&self) -> TileShape {
        TileShape {
            tile_width: self.tile_width,
            tile_length: self.tile_length,
            pixel_width: self.pixel_width,
            pixel_length: self.pixel_length,
        }
    }

    fn index(&self, column: usize, row: usize) -> Result<usize> {
        if column > self.tile_width || row > self.tile_length {
            return Err(TerrainError::IndexOutOfRange {
                column,
                row,
                width: self.tile_width,
                length: self.tile_length,
            });
        }
        Ok(row * (self.tile_width + 1) + column)
    }

    fn out_of_range(&self, column: usize, row: usize) -> TerrainError {
        TerrainError::IndexOutOfRange {
            column,
            row,
            width: self.tile_width,
            length: self.tile_length,
        }
    }

    fn empty_z(&self) -> f32 {
        self.vertices.first().map_or(0.0, |v| v.z)
    }

    pub fn get_elevation(&self, column: usize, row: usize) -> Result<f32> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(self.empty_z());
        }
        self.vertices
            .get(i)
            .map(|v| v.z)
            .ok_or_else(|| self.out_of_range(column, row))
    }

    /// Ignored on the placeholder quad.
    pub fn set_elevation(&mut self, column: usize, row: usize, elevation: f32) -> Result<()> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(());
        }
        let err = self.out_of_range(column, row);
        let vertex = self.vertices.get_mut(i).ok_or(err)?;
        vertex.z = elevation;
        Ok(())
    }

    pub fn get_normal(&self, column: usize, row: usize) -> Result<Vec3> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(Vec3::Z);
        }
        self.normals
            .get(i)
            .copied()
            .ok_or_else(|| self.out_of_range(column, row))
    }

    pub fn set_normal(&mut self, column: usize, row: usize, normal: Vec3) -> Result<()> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(());
        }
        let err = self.out_of_range(column, row);
        *self.normals.get_mut(i).ok_or(err)? = normal;
        Ok(())
    }

    pub fn get_vertex(&self, column: usize, row: usize) -> Result<Vec3> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(Vec3::new(
                (column as f32 - self.tile_width as f32 / 2.0) * self.pixel_width,
                (self.tile_length as f32 / 2.0 - row as f32) * self.pixel_length,
                self.empty_z(),
            ));
        }
        self.vertices
            .get(i)
            .copied()
            .ok_or_else(|| self.out_of_range(column, row))
    }

    /// True where the source had no data.
    pub fn is_missing(&self, column: usize, row: usize) -> Result<bool> {
        let i = self.index(column, row)?;
        if self.empty {
            return Ok(true);
        }
        Ok(self.colors.get(i).map_or(true, |c| c[3] == 0.0))
    }

    /// Fractional (column, row) of a point given from the lower left corner,
    /// clamped to the tile.
    fn grid_position(&self, x: f64, y: f64) -> (f64, f64) {
        let tw = self.tile_width as f64;
        let tl = self.tile_length as f64;
        let column = (x / f64::from(self.pixel_width)).clamp(0.0, tw);
        let row = tl - (y / f64::from(self.pixel_length)).clamp(0.0, tl);
        (column, row)
    }

    fn sample(&self, column: usize, row: usize) -> f64 {
        match self.is_missing(column, row) {
            Ok(false) => self.get_elevation(column, row).map_or(f64::NAN, f64::from),
            _ => f64::NAN,
        }
    }

    /// Bilinear elevation at a point measured from the lower left corner.
    /// NaN if any surrounding sample is missing.
    pub fn get_elevation_bilinear(&self, x: f64, y: f64) -> f64 {
        if self.empty {
            return f64::NAN;
        }
        let (column, row) = self.grid_position(x, y);
        let c0 = column.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(self.tile_width);
        let r1 = (r0 + 1).min(self.tile_length);
        let fc = column - c0 as f64;
        let fr = row - r0 as f64;
        let top = lerp(self.sample(c0, r0), self.sample(c1, r0), fc);
        let bottom = lerp(self.sample(c0, r1), self.sample(c1, r1), fc);
        lerp(top, bottom, fr)
    }

    /// Elevation of the closest sample, NaN if it is missing.
    pub fn get_elevation_nearest_neighbor(&self, x: f64, y: f64) -> f64 {
        if self.empty {
            return f64::NAN;
        }
        let (column, row) = self.grid_position(x, y);
        self.sample(column.round() as usize, row.round() as usize)
    }

    /// Normal of the closest sample.
    pub fn get_normal_nearest_neighbor(&self, x: f64, y: f64) -> Vec3 {
        let (column, row) = self.grid_position(x, y);
        self.get_normal(column.round() as usize, row.round() as usize)
            .unwrap_or(Vec3::Z)
    }

    /// Number of vertices along an edge.
    pub fn edge_len(&self, side: Side) -> usize {
        if side.is_vertical() {
            self.tile_length + 1
        } else {
            self.tile_width + 1
        }
    }

    /// Grid position of the `j`th vertex of an edge. Left and right edges run
    /// top to bottom, top and bottom edges left to right.
    pub fn edge_position(&self, side: Side, j: usize) -> (usize, usize) {
        match side {
            Side::Left => (0, j),
            Side::Right => (self.tile_width, j),
            Side::Top => (j, 0),
            Side::Bottom => (j, self.tile_length),
        }
    }

    pub fn edge_elevations(&self, side: Side) -> Result<Vec<f32>> {
        (0..self.edge_len(side))
            .map(|j| {
                let (c, r) = self.edge_position(side, j);
                self.get_elevation(c, r)
            })
            .collect()
    }

    pub fn edge_normals(&self, side: Side) -> Result<Vec<Vec3>> {
        (0..self.edge_len(side))
            .map(|j| {
                let (c, r) = self.edge_position(side, j);
                self.get_normal(c, r)
            })
            .collect()
    }

    pub fn set_edge_sample(&mut self, side: Side, j: usize, elevation: f32, normal: Vec3) -> Result<()> {
        let (c, r) = self.edge_position(side, j);
        self.set_elevation(c, r, elevation)?;
        self.set_normal(c, r, normal)
    }

    /// Remembers the edges as built so stitching always starts from them.
    pub fn cache_edges(&mut self) {
        if self.empty {
            return;
        }
        let elevation = NodeNeighbours::from_fn(|side| self.edge_elevations(side).unwrap_or_default());
        let normals = NodeNeighbours::from_fn(|side| self.edge_normals(side).unwrap_or_default());
        self.edges = Some(MeshEdges { elevation, normals });
    }

    pub fn cached_edge(&self, side: Side) -> Option<(&[f32], &[Vec3])> {
        self.edges
            .as_ref()
            .map(|edges| (edges.elevation[side].as_slice(), edges.normals[side].as_slice()))
    }

    /// Stitching needs real vertices on both sides of a seam.
    pub fn is_stitchable(&self) -> bool {
        !self.empty && self.edges.is_some()
    }

    /// Recolors every sample that has data. An alpha of zero is reserved for
    /// missing samples.
    pub fn update_surface_color(&mut self, color: [f32; 4]) {
        let color = color_or_visible(color, [1.0; 4]);
        for c in self.colors.iter_mut().filter(|c| c[3] != 0.0) {
            *c = color;
        }
    }

    /// Area weighted vertex normals from the triangles around each vertex.
    /// Triangles touching a missing sample are skipped.
    pub fn compute_normals(&mut self) {
        if self.empty {
            return;
        }
        let mut sums = vec![Vec3::ZERO; self.vertices.len()];
        let stride = self.tile_width + 1;
        for r in 0..self.tile_length {
            for c in 0..self.tile_width {
                let tl = r * stride + c;
                let tr = tl + 1;
                let bl = tl + stride;
                let br = bl + 1;
                for [a, b, d] in [[tl, bl, tr], [tr, bl, br]] {
                    let corners = (self.vertices.get(a), self.vertices.get(b), self.vertices.get(d));
                    let (Some(va), Some(vb), Some(vd)) = corners else {
                        continue;
                    };
                    if [a, b, d].iter().any(|i| self.colors.get(*i).map_or(true, |c| c[3] == 0.0)) {
                        continue;
                    }
                    let normal = create_normal(*va, *vb, *vd);
                    for i in [a, b, d] {
                        if let Some(sum) = sums.get_mut(i) {
                            *sum += normal;
                        }
                    }
                }
            }
        }
        for (normal, sum) in self.normals.iter_mut().zip(sums) {
            let n = sum.normalize_or_zero();
            *normal = if n == Vec3::ZERO { Vec3::Z } else { n };
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.vertices.len() * (12 + 12 + 16 + 8)
            + self.indices.len() * 4
            + self
                .layer_tex_coords
                .iter()
                .flatten()
                .map(|coords| coords.len() * 8)
                .sum::<usize>()
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    if t == 0.0 {
        a
    } else if t == 1.0 {
        b
    } else {
        a + (b - a) * t
    }
}

fn color_or_visible(color: [f32; 4], fallback: [f32; 4]) -> [f32; 4] {
    if color[3] <= 0.0 {
        [color[0], color[1], color[2], fallback[3]]
    } else {
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(size: usize, pixel: f32) -> TileShape {
        TileShape {
            tile_width: size,
            tile_length: size,
            pixel_width: pixel,
            pixel_length: pixel,
        }
    }

    fn ramp_mesh() -> QuadTreeMesh {
        // 2x2 cells, elevation equals column + 10 * row
        let elevations: Vec<f32> = (0..3)
            .flat_map(|r| (0..3).map(move |c| (c + 10 * r) as f32))
            .collect();
        QuadTreeMesh::from_elevations(QuadKey::root(), shape(2, 1.0), &elevations, 0.0, [1.0; 4]).unwrap()
    }

    #[test]
    fn vertices_are_centered() {
        let mesh = ramp_mesh();
        assert_eq!(mesh.vertices.len(), 9);
        assert_eq!(mesh.get_vertex(0, 0).unwrap(), Vec3::new(-1.0, 1.0, 0.0));
        assert_eq!(mesh.get_vertex(2, 2).unwrap(), Vec3::new(1.0, -1.0, 22.0));
        assert_eq!(mesh.index_lengths, vec![6, 6]);
        assert_eq!(&mesh.indices[0..4], &[0, 3, 1, 4]);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut mesh = ramp_mesh();
        assert!(matches!(
            mesh.get_elevation(3, 0),
            Err(TerrainError::IndexOutOfRange { column: 3, .. })
        ));
        assert!(mesh.set_normal(0, 3, Vec3::X).is_err());
        mesh.set_elevation(1, 1, 5.0).unwrap();
        assert_eq!(mesh.get_elevation(1, 1).unwrap(), 5.0);
    }

    #[test]
    fn bilinear_flips_rows() {
        let mesh = ramp_mesh();
        // lower left corner is row 2
        assert_eq!(mesh.get_elevation_bilinear(0.0, 0.0), 20.0);
        assert_eq!(mesh.get_elevation_bilinear(0.0, 2.0), 0.0);
        assert_eq!(mesh.get_elevation_bilinear(0.5, 1.5), 5.5);
        assert_eq!(mesh.get_elevation_bilinear(9.0, -3.0), 22.0);
        assert_eq!(mesh.get_elevation_nearest_neighbor(1.6, 0.4), 22.0);
    }

    #[test]
    fn missing_samples() {
        let mut elevations = vec![1.0f32; 9];
        elevations[4] = f32::NAN;
        let mesh =
            QuadTreeMesh::from_elevations(QuadKey::root(), shape(2, 1.0), &elevations, -5.0, [1.0; 4]).unwrap();
        assert!(mesh.is_missing(1, 1).unwrap());
        assert!(!mesh.is_missing(0, 0).unwrap());
        assert_eq!(mesh.get_elevation(1, 1).unwrap(), -5.0);
        assert!(mesh.get_elevation_bilinear(0.5, 0.5).is_nan());
        assert_eq!(mesh.get_elevation_bilinear(0.0, 0.0), 1.0);
        assert_eq!(mesh.get_normal(0, 0).unwrap(), Vec3::Z);
    }

    #[test]
    fn all_missing_is_empty() {
        let mesh = QuadTreeMesh::from_elevations(
            QuadKey::root(),
            shape(4, 2.0),
            &[f32::NAN; 25],
            3.0,
            [1.0; 4],
        )
        .unwrap();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 2, 1, 3]);
        assert_eq!(mesh.get_elevation(4, 4).unwrap(), 3.0);
        assert_eq!(mesh.get_vertex(4, 0).unwrap(), Vec3::new(4.0, 4.0, 3.0));
        assert!(mesh.get_elevation_bilinear(1.0, 1.0).is_nan());
        assert!(!mesh.is_stitchable());
    }

    #[test]
    fn wrong_sample_count() {
        let result = QuadTreeMesh::from_elevations(QuadKey::root(), shape(2, 1.0), &[0.0; 4], 0.0, [1.0; 4]);
        assert!(matches!(result, Err(TerrainError::TileDecode { .. })));
    }

    #[test]
    fn edges_are_cached_as_built() {
        let mut mesh = ramp_mesh();
        assert_eq!(mesh.edge_elevations(Side::Left).unwrap(), vec![0.0, 10.0, 20.0]);
        assert_eq!(mesh.edge_elevations(Side::Bottom).unwrap(), vec![20.0, 21.0, 22.0]);
        mesh.set_edge_sample(Side::Left, 1, 99.0, Vec3::X).unwrap();
        assert_eq!(mesh.get_elevation(0, 1).unwrap(), 99.0);
        let (cached, normals) = mesh.cached_edge(Side::Left).unwrap();
        assert_eq!(cached, &[0.0, 10.0, 20.0]);
        assert_eq!(normals.len(), 3);
    }

    #[test]
    fn flat_tile_normals_point_up() {
        let mesh =
            QuadTreeMesh::from_elevations(QuadKey::root(), shape(2, 1.0), &[4.0; 9], 0.0, [1.0; 4]).unwrap();
        assert!(mesh.normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-6));
    }

    #[test]
    fn surface_color_skips_missing() {
        let mut elevations = vec![0.0f32; 9];
        elevations[0] = f32::NAN;
        let mut mesh =
            QuadTreeMesh::from_elevations(QuadKey::root(), shape(2, 1.0), &elevations, 0.0, [1.0; 4]).unwrap();
        mesh.update_surface_color([0.5, 0.25, 0.0, 1.0]);
        assert_eq!(mesh.colors[0], [0.0; 4]);
        assert_eq!(mesh.colors[1], [0.5, 0.25, 0.0, 1.0]);
    }
}
