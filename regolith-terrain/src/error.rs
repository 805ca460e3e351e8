use std::io;

use crate::side::{Quadrant, Side};

#[derive(thiserror::Error, Debug)]
pub enum TerrainError {
    #[error("vertex ({column}, {row}) is outside a {width}x{length} tile")]
    IndexOutOfRange {
        column: usize,
        row: usize,
        width: usize,
        length: usize,
    },
    #[error("no {side:?} neighbour child for quadrant {quadrant:?}")]
    UnexpectedQuadrant {
        side: Side,
        quadrant: Option<Quadrant>,
    },
    #[error("neighbour of {key} is at level {neighbour_level}, finer than the requested level {level}")]
    UnexpectedNeighbourLevel {
        key: String,
        level: usize,
        neighbour_level: usize,
    },
    #[error("invalid tile key '{0}'")]
    InvalidKey(String),
    #[error("missing property {0}")]
    MissingProperty(String),
    #[error("property {name} has invalid value '{value}'")]
    InvalidProperty { name: String, value: String },
    #[error("no elevation layer to use as the base layer")]
    MissingBaseLayer,
    #[error("the base layer has no root tile")]
    MissingRootTile,
    #[error("layer slot {0} is not available")]
    LayerSlot(usize),
    #[error("tile {key} could not be decoded: {reason}")]
    TileDecode { key: String, reason: String },
    #[error("{0}")]
    Config(#[from] serde_json::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TerrainError>;
