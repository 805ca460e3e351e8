mod epsilon;
mod surface;

pub use epsilon::*;
pub use surface::*;
