use regolith_scene::ColorMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Luminance8,
    Rgba8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Luminance8 => 1,
            TextureFormat::Rgba8 => 4,
        }
    }
}

/// Pixel data of one layer for one tile, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl Texture {
    pub const EMPTY_SIZE: usize = 4;

    /// None when `data` does not hold exactly `width * height` pixels.
    pub fn new(name: &str, width: usize, height: usize, format: TextureFormat, data: Vec<u8>) -> Option<Self> {
        if data.len() != width * height * format.bytes_per_pixel() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            width,
            height,
            format,
            data,
        })
    }

    /// Fully transparent placeholder for tiles without layer data.
    pub fn empty() -> Self {
        Self {
            name: "empty".to_string(),
            width: Self::EMPTY_SIZE,
            height: Self::EMPTY_SIZE,
            format: TextureFormat::Rgba8,
            data: vec![0; Self::EMPTY_SIZE * Self::EMPTY_SIZE * 4],
        }
    }

    pub fn color_ramp(color_map: &ColorMap) -> Self {
        Self {
            name: color_map.name.clone(),
            width: ColorMap::TEXTURE_WIDTH,
            height: 1,
            format: TextureFormat::Rgba8,
            data: color_map.ramp_pixels(),
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_transparent(&self) -> bool {
        match self.format {
            TextureFormat::Rgba8 => self.data.chunks_exact(4).all(|p| p.get(3) == Some(&0)),
            TextureFormat::Luminance8 => false,
        }
    }
}
