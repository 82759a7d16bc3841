//! Manifest and payload formats for streamed models
//!
//! The manifest (`StreamLoaderSettings`) is JSON. Geometry payload files are a
//! bincode-encoded list of [`GeometryPayload`] records, several geometries per
//! file.

use super::geometry::{Aabb, Geometry};
use super::{AssetError, AssetResult};
use glam::Mat4;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One placement of a geometry inside an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedPlacement {
    pub geometry_id: u32,
    /// Column-major 4x4 matrix
    pub transformation: [f32; 16],
    /// Linear RGBA; alpha 1 means opaque
    pub color: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedAsset {
    pub id: u32,
    pub geometries: Vec<StreamedPlacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedGeometryMeta {
    pub bounding_box: Aabb,
    #[serde(default)]
    pub has_holes: bool,
    /// Remote file holding the vertex data; geometries without one are never fetched
    #[serde(default)]
    pub geometry_file: Option<String>,
}

pub type StreamedGeometries = HashMap<u32, StreamedGeometryMeta>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamLoaderSettings {
    pub assets: Vec<StreamedAsset>,
    pub geometries: StreamedGeometries,
    pub global_data_file_id: String,
}

/// Instance record of a geometry, indexed from the asset list
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedInstance {
    pub id: u32,
    pub color: [f32; 4],
    pub transformation: Mat4,
}

impl StreamedInstance {
    pub fn is_opaque(&self) -> bool {
        self.color[3] == 1.0
    }
}

impl StreamLoaderSettings {
    pub fn from_json(data: &[u8]) -> AssetResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> AssetResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Group every placement by geometry, keeping asset order
    pub fn instances_by_geometry(&self) -> HashMap<u32, Vec<StreamedInstance>> {
        let mut instances: HashMap<u32, Vec<StreamedInstance>> = HashMap::new();
        for asset in &self.assets {
            for placement in &asset.geometries {
                instances
                    .entry(placement.geometry_id)
                    .or_default()
                    .push(StreamedInstance {
                        id: asset.id,
                        color: placement.color,
                        transformation: Mat4::from_cols_array(&placement.transformation),
                    });
            }
        }
        instances
    }
}

/// Raw vertex data of one geometry as stored in a payload file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryPayload {
    pub geometry_id: u32,
    pub position: Vec<f32>,
    pub index: Vec<u32>,
    pub normal: Vec<f32>,
}

impl GeometryPayload {
    fn validate(&self) -> AssetResult<()> {
        let malformed = |reason: String| AssetError::MalformedGeometry {
            geometry_id: self.geometry_id,
            reason,
        };

        if self.position.len() % 3 != 0 {
            return Err(malformed(format!("{} position floats", self.position.len())));
        }
        if !self.normal.is_empty() && self.normal.len() != self.position.len() {
            return Err(malformed(format!(
                "{} normal floats for {} position floats",
                self.normal.len(),
                self.position.len()
            )));
        }
        let vertex_count = (self.position.len() / 3) as u32;
        if let Some(bad) = self.index.iter().find(|&&i| i >= vertex_count) {
            return Err(malformed(format!("index {} out of {} vertices", bad, vertex_count)));
        }
        Ok(())
    }

    pub fn into_geometry(self) -> Geometry {
        let positions = self.position.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        let normals = self.normal.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        Geometry::new(positions, normals, self.index)
    }
}

/// Reads and writes geometry payload files
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamSerializer;

impl StreamSerializer {
    pub fn import(bytes: &[u8]) -> AssetResult<Vec<GeometryPayload>> {
        let payloads: Vec<GeometryPayload> = bincode::deserialize(bytes)?;
        for payload in &payloads {
            payload.validate()?;
        }
        Ok(payloads)
    }

    pub fn export(payloads: &[GeometryPayload]) -> AssetResult<Vec<u8>> {
        for payload in payloads {
            payload.validate()?;
        }
        Ok(bincode::serialize(payloads)?)
    }
}
