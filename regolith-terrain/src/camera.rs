use bevy::math::DVec3;

/// The view used to choose the level of detail. Positions are in the
/// landscape's local frame.
pub trait LodCamera {
    fn location(&self) -> DVec3;

    fn look_at(&self) -> DVec3;

    /// Size in local units of one screen pixel at the given point.
    fn pixel_size_at(&self, point: DVec3) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveCamera {
    pub location: DVec3,
    pub look_at: DVec3,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    /// Viewport height in pixels.
    pub viewport_height: f64,
}

impl PerspectiveCamera {
    pub fn new(location: DVec3, look_at: DVec3, fov_y: f64, viewport_height: f64) -> Self {
        Self {
            location,
            look_at,
            fov_y,
            viewport_height,
        }
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(DVec3::new(0.0, 0.0, 1000.0), DVec3::ZERO, std::f64::consts::FRAC_PI_4, 1080.0)
    }
}

impl LodCamera for PerspectiveCamera {
    fn location(&self) -> DVec3 {
        self.location
    }

    fn look_at(&self) -> DVec3 {
        self.look_at
    }

    fn pixel_size_at(&self, point: DVec3) -> f64 {
        if self.viewport_height <= 0.0 {
            return f64::NAN;
        }
        let distance = self.location.distance(point);
        2.0 * distance * (self.fov_y / 2.0).tan() / self.viewport_height
    }
}
