use bevy::math::DVec3;
use crate::projection::Projection;

/// Equidistant cylindrical projection on a sphere, true scale at
/// `standard_parallel`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquirectangularProjection {
    pub radius: f64,
    pub central_meridian: f64,
    pub standard_parallel: f64,
    pub origin: DVec3,
}

impl Default for EquirectangularProjection {
    fn default() -> Self {
        Self::new(1_737_400.0, 0.0, 0.0)
    }
}

impl EquirectangularProjection {
    pub fn new(radius: f64, central_meridian: f64, standard_parallel: f64) -> Self {
        Self {
            radius,
            central_meridian,
            standard_parallel,
            origin: DVec3::ZERO,
        }
    }
    pub fn with_origin(mut self, origin: DVec3) -> Self {
        self.origin = origin;
        self
    }
    fn scale_x(&self) -> f64 {
        self.radius * self.standard_parallel.to_radians().cos()
    }
}

impl Projection for EquirectangularProjection {
    fn project(&self, spherical: DVec3) -> DVec3 {
        DVec3::new(
            self.scale_x() * (spherical.x - self.central_meridian).to_radians(),
            self.radius * spherical.y.to_radians(),
            spherical.z,
        )
    }
    fn un_project(&self, world: DVec3) -> DVec3 {
        DVec3::new(
            (world.x / self.scale_x()).to_degrees() + self.central_meridian,
            (world.y / self.radius).to_degrees(),
            world.z,
        )
    }
    fn origin(&self) -> DVec3 {
        self.origin
    }
}
