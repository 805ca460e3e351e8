use bevy::math::DVec3;

/// Conversion between the planar world frame of a landscape and spherical
/// coordinates. Spherical positions are (longitude degrees, latitude degrees,
/// height). Local positions are world positions relative to the landscape
/// origin.
pub trait Projection: Send + Sync {
    fn project(&self, spherical: DVec3) -> DVec3;
    fn un_project(&self, world: DVec3) -> DVec3;
    /// World position of the local origin.
    fn origin(&self) -> DVec3;

    fn local_to_world(&self, local: DVec3) -> DVec3 {
        local + self.origin()
    }
    fn world_to_local(&self, world: DVec3) -> DVec3 {
        world - self.origin()
    }
}
