use std::sync::Arc;

use bevy::prelude::{App, DetectChanges, Event, EventWriter, IntoSystemConfigs, Res, Resource, Update};

use crate::{camera::PerspectiveCamera, config::TerrainConfig, landscape::Landscape, quad_key::QuadKey};

/// The landscape driven by [`Plugin`].
#[derive(Resource, Clone)]
pub struct LandscapeHandle(pub Arc<Landscape>);

/// Camera the level of detail follows.
#[derive(Resource, Clone, Debug, Default)]
pub struct LodCameraState(pub PerspectiveCamera);

/// Sent when the subtree under `key` split or merged.
#[derive(Event, Clone, Debug, PartialEq, Eq)]
pub struct TerrainChanged {
    pub key: QuadKey,
}

pub struct Plugin;

impl bevy::prelude::Plugin for Plugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TerrainConfig>()
            .add_event::<TerrainChanged>()
            .add_systems(
                Update,
                (
                    sync_surface_color_system,
                    update_landscape_system.after(sync_surface_color_system),
                ),
            );
    }
}

fn sync_surface_color_system(config: Res<TerrainConfig>, landscape: Option<Res<LandscapeHandle>>) {
    let Some(landscape) = landscape else {
        return;
    };
    if config.is_changed() && !config.is_added() {
        landscape.0.set_surface_color(config.surface_color);
    }
}

fn update_landscape_system(
    landscape: Option<Res<LandscapeHandle>>,
    camera: Option<Res<LodCameraState>>,
    mut changed: EventWriter<TerrainChanged>,
) {
    let (Some(landscape), Some(camera)) = (landscape, camera) else {
        return;
    };
    if let Err(e) = landscape.0.update(&camera.0) {
        bevy::log::error!("Terrain update failed: {}", e);
    }
    for key in landscape.0.take_changed_keys() {
        changed.send(TerrainChanged { key });
    }
}
