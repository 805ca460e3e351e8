use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TerrainError},
    tile_source::property,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    None,
    Elevation,
    ColorImage,
    GrayImage,
    Field,
    Footprint,
    Viewshed,
    Derivative,
}

impl LayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::None => "none",
            LayerType::Elevation => "elevation",
            LayerType::ColorImage => "colorimage",
            LayerType::GrayImage => "grayimage",
            LayerType::Field => "field",
            LayerType::Footprint => "footprint",
            LayerType::Viewshed => "viewshed",
            LayerType::Derivative => "derivative",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        [
            LayerType::None,
            LayerType::Elevation,
            LayerType::ColorImage,
            LayerType::GrayImage,
            LayerType::Field,
            LayerType::Footprint,
            LayerType::Viewshed,
            LayerType::Derivative,
        ]
        .into_iter()
        .find(|t| t.as_str() == lower)
        .ok_or_else(|| TerrainError::InvalidProperty {
            name: property::LAYER_TYPE.to_string(),
            value: s.to_string(),
        })
    }
}

/// Scalar a derivative layer colors the surface by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivativeKind {
    Elevation,
    Slope,
    Aspect,
}

impl DerivativeKind {
    /// Derivative layers are named after what they show.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("slope") {
            DerivativeKind::Slope
        } else if lower.contains("aspect") {
            DerivativeKind::Aspect
        } else {
            DerivativeKind::Elevation
        }
    }

    /// Value domain, in degrees for slope and aspect.
    pub fn domain(self, base_minimum: f64, base_maximum: f64) -> (f64, f64) {
        match self {
            DerivativeKind::Elevation => (base_minimum, base_maximum),
            DerivativeKind::Slope => (0.0, 90.0),
            DerivativeKind::Aspect => (0.0, 360.0),
        }
    }
}

/// Display settings of one layer slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub layer_type: LayerType,
    pub opacity: f32,
    pub color_map_name: Option<String>,
    pub gradient: bool,
    /// Window of the color map, defaults to the layer's value domain.
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub autoblend: bool,
    pub show: bool,
    pub layer_number: usize,
}

impl LayerInfo {
    pub fn new(name: &str, layer_type: LayerType, layer_number: usize) -> Self {
        Self {
            name: name.to_string(),
            layer_type,
            opacity: 1.0,
            color_map_name: None,
            gradient: true,
            minimum: None,
            maximum: None,
            autoblend: false,
            show: true,
            layer_number,
        }
    }

    pub fn with_color_map(mut self, name: &str, gradient: bool) -> Self {
        self.color_map_name = Some(name.to_string());
        self.gradient = gradient;
        self
    }

    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_autoblend(mut self, autoblend: bool) -> Self {
        self.autoblend = autoblend;
        self
    }

    pub fn blend_factor(&self) -> f32 {
        if self.show {
            self.opacity
        } else {
            0.0
        }
    }
}
