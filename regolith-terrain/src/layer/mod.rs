use std::sync::Arc;

use bevy::math::DVec3;
use regolith_scene::{aspect_from_normal, slope_from_normal, ColorMap};

use crate::{
    error::{Result, TerrainError},
    quad_key::QuadKey,
    tile_source::{property, DataType, Properties, RawTile, TileSource},
};

mod layer_info;
mod texture;

pub use layer_info::*;
pub use texture::*;

/// What the tile factory needs from a layer.
pub trait LayerSource {
    fn info(&self) -> &LayerInfo;

    fn tile(&self, key: &QuadKey) -> Option<RawTile>;

    fn texture(&self, key: &QuadKey) -> Option<Arc<Texture>>;

    fn bytes_per_tile(&self) -> usize;

    fn properties(&self) -> Option<&Properties>;

    fn blend_factor(&self) -> f32 {
        self.info().blend_factor()
    }
}

/// A layer backed by per-tile rasters of the tile source.
pub struct RasterLayer {
    info: LayerInfo,
    source: Arc<dyn TileSource>,
    properties: Properties,
    data_type: DataType,
    bytes_per_pixel: usize,
    tile_width: usize,
    tile_length: usize,
}

impl RasterLayer {
    pub fn open(info: LayerInfo, source: Arc<dyn TileSource>) -> Result<Self> {
        let properties = source
            .get_properties(&info.name)
            .ok_or_else(|| TerrainError::MissingProperty(format!("{}:{}", info.name, property::LAYER_TYPE)))?;
        let tile_width: usize = properties.require_parsed(property::TILE_WIDTH)?;
        let tile_length = properties.parse_or(property::TILE_LENGTH, tile_width)?;
        let default_type = match info.layer_type {
            LayerType::ColorImage => DataType::UnsignedInteger,
            LayerType::GrayImage => DataType::UnsignedByte,
            _ => DataType::Float,
        };
        let data_type = properties.parse_or(property::DATA_TYPE, default_type)?;
        let bytes_per_pixel = properties.parse_or(property::BYTES_PER_PIXEL, data_type.bytes_per_sample())?;
        Ok(Self {
            info,
            source,
            properties,
            data_type,
            bytes_per_pixel,
            tile_width,
            tile_length,
        })
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_length(&self) -> usize {
        self.tile_length
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Value range from the layer's MinimumValue and MaximumValue.
    pub fn value_range(&self) -> Result<(f64, f64)> {
        Ok((
            self.properties.parse_or(property::MINIMUM_VALUE, 0.0)?,
            self.properties.parse_or(property::MAXIMUM_VALUE, 0.0)?,
        ))
    }

    fn image_texture(&self, key: &QuadKey) -> Option<Texture> {
        let tile = self.tile(key)?;
        let format = match self.info.layer_type {
            LayerType::ColorImage => TextureFormat::Rgba8,
            LayerType::GrayImage => TextureFormat::Luminance8,
            _ => return None,
        };
        let pixels = match tile.pixels() {
            Ok(pixels) => pixels.to_vec(),
            Err(e) => {
                bevy::log::debug!("Layer {}: {}", self.info.name, e);
                return None;
            }
        };
        let texture = Texture::new(&key.to_string(), tile.columns, tile.rows, format, pixels);
        if texture.is_none() {
            bevy::log::debug!(
                "Layer {} tile {} is not a {}x{} {:?} image",
                self.info.name,
                key,
                tile.columns,
                tile.rows,
                format
            );
        }
        texture
    }
}

impl LayerSource for RasterLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn tile(&self, key: &QuadKey) -> Option<RawTile> {
        self.source.get_tile(&self.info.name, key, self.data_type)
    }

    fn texture(&self, key: &QuadKey) -> Option<Arc<Texture>> {
        self.image_texture(key).map(Arc::new)
    }

    fn bytes_per_tile(&self) -> usize {
        (self.tile_width + 1) * (self.tile_length + 1) * self.bytes_per_pixel
    }

    fn properties(&self) -> Option<&Properties> {
        Some(&self.properties)
    }
}

/// Colors the surface by elevation, slope or aspect through a color map.
pub struct DerivativeLayer {
    info: LayerInfo,
    kind: DerivativeKind,
    color_map: ColorMap,
    ramp: Arc<Texture>,
    tile_width: usize,
    tile_length: usize,
}

impl DerivativeLayer {
    pub fn new(info: LayerInfo, base_range: (f64, f64), tile_width: usize, tile_length: usize) -> Self {
        let kind = DerivativeKind::from_name(&info.name);
        let (minimum, maximum) = kind.domain(base_range.0, base_range.1);
        let color_map = color_map_for(&info, minimum, maximum);
        let ramp = Arc::new(Texture::color_ramp(&color_map));
        Self {
            info,
            kind,
            color_map,
            ramp,
            tile_width,
            tile_length,
        }
    }

    pub fn kind(&self) -> DerivativeKind {
        self.kind
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// Texture coordinate of a vertex. A NaN elevation marks a missing sample.
    pub fn texture_coordinate(&self, elevation: f64, normal: DVec3) -> [f32; 2] {
        if elevation.is_nan() {
            return self.color_map.texture_coordinate(f64::NAN);
        }
        let value = match self.kind {
            DerivativeKind::Elevation => elevation,
            DerivativeKind::Slope => slope_from_normal(normal),
            DerivativeKind::Aspect => aspect_from_normal(normal),
        };
        self.color_map.texture_coordinate(value)
    }
}

impl LayerSource for DerivativeLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn tile(&self, _key: &QuadKey) -> Option<RawTile> {
        None
    }

    fn texture(&self, _key: &QuadKey) -> Option<Arc<Texture>> {
        Some(self.ramp.clone())
    }

    fn bytes_per_tile(&self) -> usize {
        (self.tile_width + 1) * (self.tile_length + 1) * 8
    }

    fn properties(&self) -> Option<&Properties> {
        None
    }
}

/// A scalar raster from the tile source shown through a color map.
pub struct FieldLayer {
    raster: RasterLayer,
    color_map: ColorMap,
    ramp: Arc<Texture>,
}

impl FieldLayer {
    pub fn open(info: LayerInfo, source: Arc<dyn TileSource>) -> Result<Self> {
        let raster = RasterLayer::open(info, source)?;
        let (minimum, maximum) = raster.value_range()?;
        let color_map = color_map_for(&raster.info, minimum, maximum);
        let ramp = Arc::new(Texture::color_ramp(&color_map));
        Ok(Self {
            raster,
            color_map,
            ramp,
        })
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// Field values of a tile, None when the tile is absent or unreadable.
    pub fn samples(&self, key: &QuadKey) -> Option<Vec<f32>> {
        let tile = self.raster.tile(key)?;
        match tile.float_samples() {
            Ok(samples) => Some(samples),
            Err(e) => {
                bevy::log::debug!("Field layer {}: {}", self.raster.info.name, e);
                None
            }
        }
    }

    pub fn texture_coordinate(&self, value: f64) -> [f32; 2] {
        self.color_map.texture_coordinate(value)
    }
}

impl LayerSource for FieldLayer {
    fn info(&self) -> &LayerInfo {
        &self.raster.info
    }

    fn tile(&self, key: &QuadKey) -> Option<RawTile> {
        self.raster.tile(key)
    }

    fn texture(&self, _key: &QuadKey) -> Option<Arc<Texture>> {
        Some(self.ramp.clone())
    }

    fn bytes_per_tile(&self) -> usize {
        (self.raster.tile_width + 1) * (self.raster.tile_length + 1) * 8
    }

    fn properties(&self) -> Option<&Properties> {
        Some(&self.raster.properties)
    }
}

/// Footprints and viewsheds are drawn by projecting onto the surface, so they
/// carry no per-tile data.
pub struct OverlayLayer {
    info: LayerInfo,
}

impl OverlayLayer {
    pub fn new(info: LayerInfo) -> Self {
        Self { info }
    }
}

impl LayerSource for OverlayLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn tile(&self, _key: &QuadKey) -> Option<RawTile> {
        None
    }

    fn texture(&self, _key: &QuadKey) -> Option<Arc<Texture>> {
        None
    }

    fn bytes_per_tile(&self) -> usize {
        0
    }

    fn properties(&self) -> Option<&Properties> {
        None
    }
}

fn color_map_for(info: &LayerInfo, minimum: f64, maximum: f64) -> ColorMap {
    ColorMap::new(
        info.color_map_name.as_deref().unwrap_or("rainbow"),
        minimum,
        maximum,
        info.minimum.unwrap_or(minimum),
        info.maximum.unwrap_or(maximum),
        info.gradient,
    )
}

pub enum Layer {
    Elevation(RasterLayer),
    Image(RasterLayer),
    Derivative(DerivativeLayer),
    Field(FieldLayer),
    Footprint(OverlayLayer),
    Viewshed(OverlayLayer),
}

impl Layer {
    pub fn open(info: LayerInfo, source: Arc<dyn TileSource>, base: &RasterLayer) -> Result<Self> {
        Ok(match info.layer_type {
            LayerType::Elevation => Layer::Elevation(RasterLayer::open(info, source)?),
            LayerType::ColorImage | LayerType::GrayImage => Layer::Image(RasterLayer::open(info, source)?),
            LayerType::Derivative => Layer::Derivative(DerivativeLayer::new(
                info,
                base.value_range()?,
                base.tile_width,
                base.tile_length,
            )),
            LayerType::Field => Layer::Field(FieldLayer::open(info, source)?),
            LayerType::Footprint => Layer::Footprint(OverlayLayer::new(info)),
            LayerType::Viewshed => Layer::Viewshed(OverlayLayer::new(info)),
            LayerType::None => {
                return Err(TerrainError::InvalidProperty {
                    name: property::LAYER_TYPE.to_string(),
                    value: info.layer_type.to_string(),
                })
            }
        })
    }

    fn source(&self) -> &dyn LayerSource {
        match self {
            Layer::Elevation(layer) | Layer::Image(layer) => layer,
            Layer::Derivative(layer) => layer,
            Layer::Field(layer) => layer,
            Layer::Footprint(layer) | Layer::Viewshed(layer) => layer,
        }
    }
}

impl LayerSource for Layer {
    fn info(&self) -> &LayerInfo {
        self.source().info()
    }

    fn tile(&self, key: &QuadKey) -> Option<RawTile> {
        self.source().tile(key)
    }

    fn texture(&self, key: &QuadKey) -> Option<Arc<Texture>> {
        self.source().texture(key)
    }

    fn bytes_per_tile(&self) -> usize {
        self.source().bytes_per_tile()
    }

    fn properties(&self) -> Option<&Properties> {
        self.source().properties()
    }

    fn blend_factor(&self) -> f32 {
        self.source().blend_factor()
    }
}

/// The base elevation layer plus up to `num_layers - 1` composited layers.
pub struct LayerManager {
    source: Arc<dyn TileSource>,
    base: RasterLayer,
    slots: Vec<Option<Layer>>,
}

impl LayerManager {
    /// Opens the layers of a landscape. The layer numbered 0 is the base and
    /// must be an elevation layer.
    pub fn open(source: Arc<dyn TileSource>, infos: &[LayerInfo], num_layers: usize) -> Result<Self> {
        let base_info = infos
            .iter()
            .find(|info| info.layer_number == 0)
            .filter(|info| info.layer_type == LayerType::Elevation)
            .ok_or(TerrainError::MissingBaseLayer)?;
        let base = RasterLayer::open(base_info.clone(), source.clone())?;
        let mut manager = Self {
            source,
            base,
            slots: (1..num_layers.max(1)).map(|_| None).collect(),
        };
        for info in infos.iter().filter(|info| info.layer_number != 0) {
            manager.set_layer(info.layer_number, Some(info.clone()))?;
        }
        Ok(manager)
    }

    pub fn base(&self) -> &RasterLayer {
        &self.base
    }

    pub fn num_layers(&self) -> usize {
        self.slots.len() + 1
    }

    pub fn tile_width(&self) -> usize {
        self.base.tile_width
    }

    pub fn tile_length(&self) -> usize {
        self.base.tile_length
    }

    pub fn base_properties(&self) -> &Properties {
        &self.base.properties
    }

    pub fn layer(&self, slot: usize) -> Option<&Layer> {
        self.slots.get(slot.checked_sub(1)?)?.as_ref()
    }

    /// Occupied slots above the base, in slot order.
    pub fn layers(&self) -> impl Iterator<Item = (usize, &Layer)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, layer)| layer.as_ref().map(|layer| (i + 1, layer)))
    }

    /// Replaces the layer in a slot and returns the old one. Tiles already
    /// built keep the old layer's textures until the landscape is reset.
    pub fn set_layer(&mut self, slot: usize, info: Option<LayerInfo>) -> Result<Option<Layer>> {
        let index = slot.checked_sub(1).filter(|i| *i < self.slots.len()).ok_or(TerrainError::LayerSlot(slot))?;
        let layer = match info {
            Some(mut info) => {
                info.layer_number = slot;
                Some(Layer::open(info, self.source.clone(), &self.base)?)
            }
            None => None,
        };
        match self.slots.get_mut(index) {
            Some(entry) => Ok(std::mem::replace(entry, layer)),
            None => Err(TerrainError::LayerSlot(slot)),
        }
    }

    /// Memory one tile takes with every layer loaded. The mesh buffers built
    /// from the base raster take six times its size.
    pub fn bytes_per_tile(&self) -> usize {
        self.base.bytes_per_tile() * 6
            + self
                .layers()
                .map(|(_, layer)| layer.bytes_per_tile())
                .sum::<usize>()
    }

    /// Blend factor per slot, base first. Autoblended layers split the
    /// blend evenly among themselves.
    pub fn blend_factors(&self) -> Vec<f32> {
        let autoblended = self
            .layers()
            .filter(|(_, layer)| layer.info().autoblend && layer.info().show)
            .count();
        let mut factors = vec![0.0; self.num_layers()];
        if let Some(base) = factors.first_mut() {
            *base = 1.0;
        }
        for (slot, layer) in self.layers() {
            let info = layer.info();
            let factor = if info.autoblend && info.show {
                1.0 / autoblended as f32
            } else {
                layer.blend_factor()
            };
            if let Some(f) = factors.get_mut(slot) {
                *f = factor;
            }
        }
        factors
    }

    pub fn elevation_range(&self) -> Result<(f64, f64)> {
        self.base.value_range()
    }

    pub fn edge_fill_value(&self) -> Result<Option<f32>> {
        self.base.properties.parse(property::EDGE_FILL_VALUE)
    }
}
