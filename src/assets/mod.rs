//! Streamed geometry data model
//!
//! Manifests describe where every geometry lives and how it is placed; payload
//! files carry the raw vertex data; fragments are the instance-batched units
//! built from both once a geometry has been seen.

pub mod fragment;
pub mod geometry;
pub mod group;
pub mod stream_format;

pub use fragment::{BaseMaterial, Fragment, FragmentId, FragmentItem, FragmentSummary};
pub use geometry::{Aabb, Geometry, SubMesh};
pub use group::{FragmentManager, FragmentsGroup, ModelId};
pub use stream_format::{
    GeometryPayload, StreamLoaderSettings, StreamSerializer, StreamedAsset, StreamedGeometries,
    StreamedGeometryMeta, StreamedInstance, StreamedPlacement,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Malformed geometry payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error("Malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Geometry {geometry_id} is malformed: {reason}")]
    MalformedGeometry { geometry_id: u32, reason: String },

    #[error("Model {id} is already loaded")]
    DuplicateModel { id: uuid::Uuid },

    #[error("Coordination matrix of model {id} is not invertible")]
    SingularMatrix { id: uuid::Uuid },
}

pub type AssetResult<T> = Result<T, AssetError>;
