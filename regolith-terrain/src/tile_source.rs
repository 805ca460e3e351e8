use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use bevy::utils::HashMap;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TerrainError},
    layer::LayerType,
    quad_key::QuadKey,
    side::{NodeChildren, Quadrant},
};

/// Property names understood by the engine.
pub mod property {
    pub const LAYER_TYPE: &str = "LayerType";
    pub const DATA_TYPE: &str = "DataType";
    pub const BYTES_PER_PIXEL: &str = "BytesPerPixel";
    pub const TILE_WIDTH: &str = "TileWidth";
    pub const TILE_LENGTH: &str = "TileLength";
    pub const NUMBER_OF_LEVELS: &str = "NumberOfLevels";
    pub const NUMBER_OF_TILES: &str = "NumberOfTiles";
    pub const RASTER_WIDTH: &str = "RasterWidth";
    pub const RASTER_LENGTH: &str = "RasterLength";
    pub const PIXEL_WIDTH: &str = "PixelWidth";
    pub const PIXEL_LENGTH: &str = "PixelLength";
    pub const MINIMUM_VALUE: &str = "MinimumValue";
    pub const MAXIMUM_VALUE: &str = "MaximumValue";
    pub const EDGE_FILL_VALUE: &str = "EdgeFillValue";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Integer,
    UnsignedInteger,
    Long,
    Float,
    Double,
    Unknown,
}

impl DataType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataType::Byte | DataType::UnsignedByte => 1,
            DataType::Short | DataType::UnsignedShort => 2,
            DataType::Integer | DataType::UnsignedInteger | DataType::Float => 4,
            DataType::Long | DataType::Double => 8,
            DataType::Unknown => 0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for DataType {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "byte" => DataType::Byte,
            "unsignedbyte" => DataType::UnsignedByte,
            "short" => DataType::Short,
            "unsignedshort" => DataType::UnsignedShort,
            "integer" => DataType::Integer,
            "unsignedinteger" => DataType::UnsignedInteger,
            "long" => DataType::Long,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "unknown" => DataType::Unknown,
            _ => {
                return Err(TerrainError::InvalidProperty {
                    name: property::DATA_TYPE.to_string(),
                    value: s.to_string(),
                })
            }
        })
    }
}

/// Raw raster of one tile as delivered by a [`TileSource`]. Samples are row
/// major, top row first, big-endian.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTile {
    pub key: QuadKey,
    pub columns: usize,
    pub rows: usize,
    pub data_type: DataType,
    pub bytes_per_pixel: usize,
    pub bytes: Bytes,
}

impl RawTile {
    pub fn new(
        key: QuadKey,
        columns: usize,
        rows: usize,
        data_type: DataType,
        bytes_per_pixel: usize,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            key,
            columns,
            rows,
            data_type,
            bytes_per_pixel,
            bytes: bytes.into(),
        }
    }

    pub fn from_f32_samples(key: QuadKey, columns: usize, rows: usize, samples: &[f32]) -> Self {
        let mut bytes = vec![0u8; samples.len() * 4];
        BigEndian::write_f32_into(samples, &mut bytes);
        Self::new(key, columns, rows, DataType::Float, 4, bytes)
    }

    pub fn sample_count(&self) -> usize {
        self.columns * self.rows
    }

    /// Decodes the tile as one scalar per pixel.
    pub fn float_samples(&self) -> Result<Vec<f32>> {
        let count = self.sample_count();
        let width = self.data_type.bytes_per_sample();
        if width == 0 || self.bytes.len() != count * width {
            return Err(self.decode_error(format!(
                "{} bytes for {} {} samples",
                self.bytes.len(),
                count,
                self.data_type
            )));
        }
        let bytes = self.bytes.as_ref();
        let samples = match self.data_type {
            DataType::Float => {
                let mut samples = vec![0.0f32; count];
                BigEndian::read_f32_into(bytes, &mut samples);
                samples
            }
            DataType::Double => {
                let mut samples = vec![0.0f64; count];
                BigEndian::read_f64_into(bytes, &mut samples);
                samples.into_iter().map(|v| v as f32).collect()
            }
            DataType::Short => bytes.chunks_exact(2).map(|b| f32::from(BigEndian::read_i16(b))).collect(),
            DataType::UnsignedShort => bytes.chunks_exact(2).map(|b| f32::from(BigEndian::read_u16(b))).collect(),
            DataType::Integer => bytes.chunks_exact(4).map(|b| BigEndian::read_i32(b) as f32).collect(),
            DataType::UnsignedInteger => bytes.chunks_exact(4).map(|b| BigEndian::read_u32(b) as f32).collect(),
            DataType::Long => bytes.chunks_exact(8).map(|b| BigEndian::read_i64(b) as f32).collect(),
            DataType::Byte => bytes.iter().map(|b| f32::from(*b as i8)).collect(),
            DataType::UnsignedByte => bytes.iter().map(|b| f32::from(*b)).collect(),
            DataType::Unknown => return Err(self.decode_error("unknown data type".to_string())),
        };
        Ok(samples)
    }

    /// Raw pixel bytes of an image tile, `bytes_per_pixel` bytes per pixel.
    pub fn pixels(&self) -> Result<&[u8]> {
        let expected = self.sample_count() * self.bytes_per_pixel;
        if self.bytes_per_pixel == 0 || self.bytes.len() != expected {
            return Err(self.decode_error(format!(
                "{} bytes for {} pixels of {} bytes",
                self.bytes.len(),
                self.sample_count(),
                self.bytes_per_pixel
            )));
        }
        Ok(self.bytes.as_ref())
    }

    fn decode_error(&self, reason: String) -> TerrainError {
        TerrainError::TileDecode {
            key: self.key.to_string(),
            reason,
        }
    }
}

/// String properties of a layer with typed accessors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl ToString) {
        self.0.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| TerrainError::MissingProperty(name.to_string()))
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|value| {
                value.trim().parse::<T>().map_err(|_| TerrainError::InvalidProperty {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T> {
        Ok(self.parse(name)?.unwrap_or(default))
    }

    pub fn require_parsed<T: FromStr>(&self, name: &str) -> Result<T> {
        self.parse(name)?
            .ok_or_else(|| TerrainError::MissingProperty(name.to_string()))
    }
}

/// Index of the tiles that exist in a pyramid. A node has either no children
/// or all four.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DepthTree {
    key: QuadKey,
    children: Option<Box<NodeChildren<DepthTree>>>,
}

impl DepthTree {
    pub fn new(key: QuadKey) -> Self {
        Self {
            key,
            children: None,
        }
    }

    pub fn key(&self) -> &QuadKey {
        &self.key
    }

    /// Records that a tile exists, along with every tile above it.
    pub fn insert(&mut self, key: &QuadKey) {
        let mut node = self;
        for quadrant in key.quadrants().iter().skip(node.key.level()) {
            let parent_key = node.key.clone();
            let children = node.children.get_or_insert_with(|| {
                Box::new(NodeChildren::from_array(
                    Quadrant::ALL.map(|q| DepthTree::new(parent_key.child(q))),
                ))
            });
            node = &mut children[*quadrant];
        }
    }

    pub fn contains(&self, key: &QuadKey) -> bool {
        if !key.starts_with(&self.key) {
            return false;
        }
        let mut node = self;
        for quadrant in key.quadrants().iter().skip(self.key.level()) {
            match &node.children {
                Some(children) => node = &children[*quadrant],
                None => return false,
            }
        }
        true
    }

    /// Number of levels below this node.
    pub fn depth(&self) -> usize {
        self.children
            .as_ref()
            .map_or(0, |children| 1 + children.iter().map(DepthTree::depth).max().unwrap_or(0))
    }

    /// Deepest existing tile containing (x, y), measured from this node's
    /// center, optionally stopping after `level` more levels.
    pub fn key_at(&self, x: f64, y: f64, half_width: f64, half_length: f64, level: Option<usize>) -> QuadKey {
        let mut node = self;
        let (mut x, mut y) = (x, y);
        let (mut w, mut l) = (half_width, half_length);
        let mut remaining = level;
        while let Some(children) = &node.children {
            if remaining == Some(0) {
                break;
            }
            w /= 2.0;
            l /= 2.0;
            let quadrant = match (x < 0.0, y >= 0.0) {
                (true, true) => Quadrant::Northwest,
                (true, false) => Quadrant::Southwest,
                (false, true) => Quadrant::Northeast,
                (false, false) => Quadrant::Southeast,
            };
            let (dx, dy) = quadrant.direction();
            x -= dx * w;
            y -= dy * l;
            node = &children[quadrant];
            remaining = remaining.map(|r| r - 1);
        }
        node.key.clone()
    }
}

/// Supplier of raw per-tile rasters and layer metadata.
pub trait TileSource: Send + Sync {
    fn depth_tree(&self) -> &DepthTree;

    fn get_tile(&self, layer_name: &str, key: &QuadKey, data_type: DataType) -> Option<RawTile>;

    fn get_properties(&self, layer_name: &str) -> Option<Properties>;

    fn get_layer_info(&self) -> Vec<(String, LayerType)>;

    fn tile_exists(&self, key: &QuadKey) -> bool {
        self.depth_tree().contains(key)
    }

    /// Key of the deepest tile covering (x, y), or of the tile `level` levels
    /// down. None outside the world extent.
    fn get_key(&self, x: f64, y: f64, world_width: f64, world_length: f64, level: Option<usize>) -> Option<QuadKey> {
        let (hw, hl) = (world_width / 2.0, world_length / 2.0);
        if !(x >= -hw && x <= hw && y >= -hl && y <= hl) {
            return None;
        }
        Some(self.depth_tree().key_at(x, y, hw, hl, level))
    }
}

/// Tile source holding every raster in memory.
#[derive(Default)]
pub struct MemoryTileSource {
    depth_tree: DepthTree,
    layers: Vec<(String, LayerType)>,
    properties: HashMap<String, Properties>,
    tiles: HashMap<(String, QuadKey), RawTile>,
}

impl MemoryTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, name: &str, layer_type: LayerType, properties: Properties) -> &mut Self {
        self.layers.retain(|(n, _)| n != name);
        self.layers.push((name.to_string(), layer_type));
        self.properties.insert(
            name.to_string(),
            properties.with(property::LAYER_TYPE, layer_type),
        );
        self
    }

    pub fn insert_tile(&mut self, layer_name: &str, tile: RawTile) -> &mut Self {
        self.depth_tree.insert(&tile.key);
        self.tiles.insert((layer_name.to_string(), tile.key.clone()), tile);
        self
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn into_shared(self) -> Arc<dyn TileSource> {
        Arc::new(self)
    }
}

impl TileSource for MemoryTileSource {
    fn depth_tree(&self) -> &DepthTree {
        &self.depth_tree
    }

    fn get_tile(&self, layer_name: &str, key: &QuadKey, _data_type: DataType) -> Option<RawTile> {
        self.tiles.get(&(layer_name.to_string(), key.clone())).cloned()
    }

    fn get_properties(&self, layer_name: &str) -> Option<Properties> {
        self.properties.get(layer_name).cloned()
    }

    fn get_layer_info(&self) -> Vec<(String, LayerType)> {
        self.layers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> QuadKey {
        QuadKey::parse(s).unwrap()
    }

    #[test]
    fn float_samples_are_big_endian() {
        let tile = RawTile::from_f32_samples(key("1"), 2, 1, &[1.5, -2.0]);
        assert_eq!(&tile.bytes[0..4], &1.5f32.to_be_bytes());
        assert_eq!(tile.float_samples().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn integer_samples_decode() {
        let tile = RawTile::new(key(""), 2, 1, DataType::Short, 2, vec![0xff, 0xfe, 0x00, 0x07]);
        assert_eq!(tile.float_samples().unwrap(), vec![-2.0, 7.0]);
        let gray = RawTile::new(key(""), 3, 1, DataType::UnsignedByte, 1, vec![0, 128, 255]);
        assert_eq!(gray.float_samples().unwrap(), vec![0.0, 128.0, 255.0]);
    }

    #[test]
    fn pixels_check_the_buffer_size() {
        let tile = RawTile::new(key("3"), 2, 1, DataType::UnsignedInteger, 4, vec![7u8; 8]);
        assert_eq!(tile.pixels().unwrap(), &[7u8; 8][..]);
        let short = RawTile::new(key("3"), 2, 2, DataType::UnsignedInteger, 4, vec![7u8; 8]);
        assert!(short.pixels().is_err());
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        let tile = RawTile::new(key("2"), 2, 2, DataType::Float, 4, vec![0u8; 12]);
        assert!(matches!(
            tile.float_samples(),
            Err(TerrainError::TileDecode { .. })
        ));
    }

    #[test]
    fn data_type_names() {
        assert_eq!("Float".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("unsignedbyte".parse::<DataType>().unwrap(), DataType::UnsignedByte);
        assert!("complex".parse::<DataType>().is_err());
        assert_eq!(DataType::Double.bytes_per_sample(), 8);
    }

    #[test]
    fn typed_properties() {
        let props = Properties::new()
            .with(property::TILE_WIDTH, 128)
            .with(property::MINIMUM_VALUE, "-12.5")
            .with(property::DATA_TYPE, "bogus");
        assert_eq!(props.require_parsed::<usize>(property::TILE_WIDTH).unwrap(), 128);
        assert_eq!(props.parse::<f64>(property::MINIMUM_VALUE).unwrap(), Some(-12.5));
        assert_eq!(props.parse_or(property::MAXIMUM_VALUE, 3.0).unwrap(), 3.0);
        assert!(matches!(
            props.require_parsed::<usize>(property::TILE_LENGTH),
            Err(TerrainError::MissingProperty(_))
        ));
        assert!(matches!(
            props.parse::<DataType>(property::DATA_TYPE),
            Err(TerrainError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn depth_tree_tracks_existence() {
        let mut tree = DepthTree::default();
        tree.insert(&key("1/3"));
        assert!(tree.contains(&key("")));
        assert!(tree.contains(&key("1")));
        assert!(tree.contains(&key("4")));
        assert!(tree.contains(&key("1/3")));
        assert!(tree.contains(&key("1/1")));
        assert!(!tree.contains(&key("2/1")));
        assert!(!tree.contains(&key("1/3/1")));
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn key_at_descends_by_sign() {
        let mut tree = DepthTree::default();
        tree.insert(&key("1/4"));
        tree.insert(&key("4/1"));
        // World is 8 x 8 centered on the origin.
        assert_eq!(tree.key_at(-1.0, 1.0, 4.0, 4.0, None), key("1/4"));
        assert_eq!(tree.key_at(-3.0, 3.0, 4.0, 4.0, None), key("1/1"));
        assert_eq!(tree.key_at(1.0, -1.0, 4.0, 4.0, None), key("4/1"));
        assert_eq!(tree.key_at(3.0, 3.0, 4.0, 4.0, None), key("2"));
        assert_eq!(tree.key_at(-1.0, 1.0, 4.0, 4.0, Some(1)), key("1"));
        assert_eq!(tree.key_at(-1.0, 1.0, 4.0, 4.0, Some(0)), key(""));
    }

    #[test]
    fn memory_source_serves_tiles() {
        let mut source = MemoryTileSource::new();
        source.add_layer("elevation", LayerType::Elevation, Properties::new());
        source.insert_tile("elevation", RawTile::from_f32_samples(key("2"), 1, 1, &[4.0]));
        assert!(source.tile_exists(&key("2")));
        assert!(source.tile_exists(&key("")));
        assert!(!source.tile_exists(&key("2/1")));
        let tile = source.get_tile("elevation", &key("2"), DataType::Float).unwrap();
        assert_eq!(tile.float_samples().unwrap(), vec![4.0]);
        assert!(source.get_tile("imagery", &key("2"), DataType::Float).is_none());
        assert_eq!(
            source.get_properties("elevation").unwrap().get(property::LAYER_TYPE),
            Some("elevation")
        );
        assert_eq!(source.get_key(3.0, 3.0, 8.0, 8.0, None), Some(key("2")));
        assert_eq!(source.get_key(5.0, 0.0, 8.0, 8.0, None), None);
    }
}
