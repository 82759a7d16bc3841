//! Visibility-driven geometry streaming

pub mod loader;

pub use loader::FragmentStreamLoader;

use crate::assets::{AssetError, ModelId};
use crate::networking::StorageError;
use crate::rendering::culling::CullError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Fragment group not found: {model}")]
    GroupNotFound { model: ModelId },

    #[error("Geometry {geometry_id} not found in model {model}")]
    GeometryNotFound { model: ModelId, geometry_id: u32 },

    #[error("Instances not found for geometry {geometry_id} of model {model}")]
    InstancesNotFound { model: ModelId, geometry_id: u32 },

    #[error("No tokio runtime available: {reason}")]
    NoRuntime { reason: String },

    #[error("Stream loader has been disposed")]
    Disposed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Cull(#[from] CullError),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Streaming statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub fetches_started: u64,
    pub fetches_failed: u64,
    pub bytes_fetched: u64,
    pub geometries_loaded: u64,
    pub fragments_loaded: u64,
    pub fragments_deleted: u64,
}
