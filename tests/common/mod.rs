#![allow(dead_code)]

use cullstream::assets::{
    Aabb, Geometry, GeometryPayload, StreamLoaderSettings, StreamSerializer, StreamedAsset,
    StreamedGeometryMeta, StreamedPlacement,
};
use cullstream::config::{CullerSettings, EngineSettings};
use cullstream::networking::MemoryStorage;
use cullstream::Camera;
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::time::Duration;

pub const TARGET_SIZE: u32 = 64;
pub const PASS_TIMEOUT: Duration = Duration::from_secs(5);

pub const GLOBAL_FILE: &str = "model-global";

/// Geometry far off to the side, never on screen
pub const HIDDEN_GEOMETRY: u32 = 1;
pub const HIDDEN_FILE: &str = "geometries-hidden";

/// Geometry at the origin, with one opaque and one transparent instance
pub const FRONT_GEOMETRY: u32 = 2;
pub const FRONT_FILE: &str = "geometries-front";

pub fn culler_settings() -> CullerSettings {
    CullerSettings {
        width: TARGET_SIZE,
        height: TARGET_SIZE,
        auto_update: false,
        ..CullerSettings::default()
    }
}

pub fn engine_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.culler = culler_settings();
    settings
}

/// Looking down -z at the origin
pub fn front_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0)
}

/// Same eye, looking the other way
pub fn away_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, 20.0), 1.0)
}

pub fn unit_bounds() -> Aabb {
    Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))
}

pub fn cube_payload(geometry_id: u32) -> GeometryPayload {
    let cube = Geometry::unit_box();
    GeometryPayload {
        geometry_id,
        position: cube.positions.iter().flatten().copied().collect(),
        index: cube.indices.clone(),
        normal: cube.normals.iter().flatten().copied().collect(),
    }
}

pub fn placement(geometry_id: u32, at: Vec3, alpha: f32) -> StreamedPlacement {
    StreamedPlacement {
        geometry_id,
        transformation: Mat4::from_translation(at).to_cols_array(),
        color: [0.8, 0.8, 0.8, alpha],
    }
}

pub fn meta(file: &str) -> StreamedGeometryMeta {
    StreamedGeometryMeta {
        bounding_box: unit_bounds(),
        has_holes: false,
        geometry_file: Some(file.to_string()),
    }
}

/// Manifest with one hidden and one front geometry
pub fn manifest() -> StreamLoaderSettings {
    StreamLoaderSettings {
        assets: vec![
            StreamedAsset {
                id: 100,
                geometries: vec![placement(HIDDEN_GEOMETRY, Vec3::new(500.0, 0.0, 0.0), 1.0)],
            },
            StreamedAsset {
                id: 200,
                geometries: vec![placement(FRONT_GEOMETRY, Vec3::ZERO, 1.0)],
            },
            StreamedAsset {
                id: 201,
                geometries: vec![placement(FRONT_GEOMETRY, Vec3::new(1.5, 0.0, 0.0), 0.3)],
            },
        ],
        geometries: HashMap::from([
            (HIDDEN_GEOMETRY, meta(HIDDEN_FILE)),
            (FRONT_GEOMETRY, meta(FRONT_FILE)),
        ]),
        global_data_file_id: GLOBAL_FILE.to_string(),
    }
}

pub fn global_data() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "name": "test model",
        "coordination_matrix": Mat4::IDENTITY.to_cols_array(),
    }))
    .unwrap()
}

/// Storage holding the global data and both geometry files
pub fn populated_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage.insert(GLOBAL_FILE, global_data());
    storage.insert(
        HIDDEN_FILE,
        StreamSerializer::export(&[cube_payload(HIDDEN_GEOMETRY)]).unwrap(),
    );
    storage.insert(
        FRONT_FILE,
        StreamSerializer::export(&[cube_payload(FRONT_GEOMETRY)]).unwrap(),
    );
    storage
}
