use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    /// Position in the ramp, 0 to 1.
    pub percent: f64,
    pub color: [u8; 4],
}

/// A named color ramp over a value domain.
///
/// Values are turned into a texture coordinate against the base domain
/// (`base_minimum..base_maximum`, widened to whole units). The ramp itself
/// covers `minimum..maximum`, and [`ColorMap::texture_transform`] maps one to
/// the other so the window can change without rebuilding texture coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMap {
    pub name: String,
    base_minimum: f64,
    base_maximum: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub gradient: bool,
    stops: Vec<ColorStop>,
}

impl ColorMap {
    pub const TEXTURE_WIDTH: usize = 256;

    pub fn new(name: &str, base_minimum: f64, base_maximum: f64, minimum: f64, maximum: f64, gradient: bool) -> Self {
        Self {
            name: name.to_string(),
            base_minimum: base_minimum.floor(),
            base_maximum: base_maximum.ceil(),
            minimum,
            maximum,
            gradient,
            stops: named_stops(name),
        }
    }

    pub fn with_stops(mut self, mut stops: Vec<ColorStop>) -> Self {
        stops.sort_by(|a, b| a.percent.total_cmp(&b.percent));
        self.stops = stops;
        self
    }

    pub fn base_minimum(&self) -> f64 {
        self.base_minimum
    }

    pub fn base_maximum(&self) -> f64 {
        self.base_maximum
    }

    pub fn base_range(&self) -> f64 {
        non_zero(self.base_maximum - self.base_minimum)
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Texture coordinate of a value along U. Missing values land at -1, outside
    /// the ramp, so they render with the border color.
    pub fn texture_coordinate(&self, value: f64) -> [f32; 2] {
        if value.is_nan() {
            return [-1.0, 0.0];
        }
        [((value - self.base_minimum) / self.base_range()) as f32, 0.0]
    }

    /// (scale, offset) taking a base texture coordinate into the ramp window.
    pub fn texture_transform(&self) -> (f64, f64) {
        let range = non_zero(self.maximum - self.minimum);
        (self.base_range() / range, -(self.minimum - self.base_minimum) / range)
    }

    /// Color at a position of the ramp window, 0 to 1.
    pub fn color_at(&self, t: f64) -> [u8; 4] {
        let t = t.clamp(0.0, 1.0);
        let Some(first) = self.stops.first() else {
            return [0, 0, 0, 0];
        };
        let mut below = first;
        for stop in &self.stops {
            if stop.percent > t {
                if !self.gradient || stop.percent <= below.percent {
                    return below.color;
                }
                let w = (t - below.percent) / (stop.percent - below.percent);
                let mut color = [0u8; 4];
                for (c, (a, b)) in color.iter_mut().zip(below.color.iter().zip(stop.color.iter())) {
                    *c = (f64::from(*a) + (f64::from(*b) - f64::from(*a)) * w).round() as u8;
                }
                return color;
            }
            below = stop;
        }
        below.color
    }

    /// RGBA8 pixels of a 1D ramp texture, `TEXTURE_WIDTH` wide.
    pub fn ramp_pixels(&self) -> Vec<u8> {
        let last = (Self::TEXTURE_WIDTH - 1) as f64;
        (0..Self::TEXTURE_WIDTH)
            .flat_map(|i| self.color_at(i as f64 / last))
            .collect()
    }
}

fn non_zero(range: f64) -> f64 {
    if range > 0.0 {
        range
    } else {
        1.0
    }
}

fn stop(percent: f64, color: [u8; 4]) -> ColorStop {
    ColorStop { percent, color }
}

/// Built in ramps. Unknown names get the default rainbow.
pub fn named_stops(name: &str) -> Vec<ColorStop> {
    match name {
        "gray" | "grey" => vec![stop(0.0, [0, 0, 0, 255]), stop(1.0, [255, 255, 255, 255])],
        "bluered" => vec![
            stop(0.0, [0, 0, 255, 255]),
            stop(0.5, [255, 255, 255, 255]),
            stop(1.0, [255, 0, 0, 255]),
        ],
        _ => vec![
            stop(0.0, [0, 0, 255, 255]),
            stop(0.25, [0, 255, 255, 255]),
            stop(0.5, [0, 255, 0, 255]),
            stop(0.75, [255, 255, 0, 255]),
            stop(1.0, [255, 0, 0, 255]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_domain_is_widened_to_whole_units() {
        let map = ColorMap::new("gray", -10.4, 20.2, -10.0, 20.0, true);
        assert_eq!(map.base_minimum(), -11.0);
        assert_eq!(map.base_maximum(), 21.0);
        assert_eq!(map.base_range(), 32.0);
    }

    #[test]
    fn texture_coordinate_along_u() {
        let map = ColorMap::new("gray", 0.0, 100.0, 0.0, 100.0, true);
        assert_eq!(map.texture_coordinate(25.0), [0.25, 0.0]);
        assert_eq!(map.texture_coordinate(f64::NAN), [-1.0, 0.0]);
    }

    #[test]
    fn texture_transform_maps_window() {
        let map = ColorMap::new("gray", 0.0, 100.0, 50.0, 100.0, true);
        let (scale, offset) = map.texture_transform();
        let u = f64::from(map.texture_coordinate(75.0)[0]);
        assert!((u * scale + offset - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gradient_interpolates_and_steps_do_not() {
        let smooth = ColorMap::new("gray", 0.0, 1.0, 0.0, 1.0, true);
        assert_eq!(smooth.color_at(0.5), [128, 128, 128, 255]);
        let stepped = ColorMap::new("gray", 0.0, 1.0, 0.0, 1.0, false);
        assert_eq!(stepped.color_at(0.5), [0, 0, 0, 255]);
        assert_eq!(stepped.color_at(1.0), [255, 255, 255, 255]);
    }

    #[test]
    fn ramp_has_one_pixel_per_texel() {
        let map = ColorMap::new("unknown", 0.0, 1.0, 0.0, 1.0, true);
        let pixels = map.ramp_pixels();
        assert_eq!(pixels.len(), ColorMap::TEXTURE_WIDTH * 4);
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
        assert_eq!(&pixels[pixels.len() - 4..], &[255, 0, 0, 255]);
    }
}
