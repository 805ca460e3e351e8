#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
mod camera;
mod config;
mod error;
mod landscape;
mod layer;
mod plugin;
mod quad_key;
mod quadtree;
mod quadtree_cache;
mod quadtree_factory;
mod quadtree_mesh;
mod side;
mod tile_source;

#[cfg(test)]
pub(crate) mod test_support;

pub use camera::*;
pub use config::*;
pub use error::*;
pub use landscape::*;
pub use layer::*;
pub use plugin::*;
pub use quad_key::*;
pub use quadtree::*;
pub use quadtree_cache::*;
pub use quadtree_factory::*;
pub use quadtree_mesh::*;
pub use side::*;
pub use tile_source::*;
