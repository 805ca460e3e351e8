#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
mod color_map;
mod equirectangular_projection;
mod math;
mod polygon;
mod projection;

pub use color_map::*;
pub use equirectangular_projection::*;
pub use math::*;
pub use polygon::*;
pub use projection::*;
