use bevy::math::{DVec3, Vec3};

/// Unit normal of a counter-clockwise triangle.
pub fn create_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

pub fn triangle_area(v0: DVec3, v1: DVec3, v2: DVec3) -> f64 {
    0.5 * (v1 - v0).cross(v2 - v0).length()
}

/// Angle in degrees between the normal and the vertical axis on the side the
/// normal points to.
pub fn slope_from_normal(normal: DVec3) -> f64 {
    let up = if normal.z < 0.0 { DVec3::NEG_Z } else { DVec3::Z };
    normal.dot(up).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Compass direction in degrees, clockwise from +Y, that a surface with this
/// normal faces. Always within [0, 360).
pub fn aspect_from_normal(normal: DVec3) -> f64 {
    aspect(normal.x, normal.y)
}

fn aspect(x: f64, y: f64) -> f64 {
    let mut angle = std::f64::consts::FRAC_PI_2 - y.atan2(x);
    if angle < 0.0 {
        angle += std::f64::consts::TAU;
    }
    if angle >= std::f64::consts::TAU {
        angle -= std::f64::consts::TAU;
    }
    angle.to_degrees()
}
