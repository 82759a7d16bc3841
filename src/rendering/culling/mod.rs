//! Color-ID visibility culling
//!
//! Every tracked object gets a unique flat color in a parallel proxy scene.
//! Rendering that scene off-screen and reading the pixels back tells which
//! objects are visible: each color still present in the frame is an object
//! that survived frustum and occlusion culling.

pub mod color;
pub mod decoder;
pub mod differ;
pub mod geometry;
pub mod material;
pub mod proxy;
pub mod renderer;
pub mod software;
pub mod target;

pub use color::{ColorAllocator, ColorKey};
pub use decoder::{decode_colors, DecodeWorker, DecodedFrame};
pub use differ::{ViewUpdate, VisibilityDiffer};
pub use geometry::{
    GeometryCuller, GeometryKey, GeometrySets, GeometryViewUpdate, ProxyKey, Residency,
};
pub use material::{FlatMaterial, MaterialCache, MaterialInfo};
pub use proxy::{CullableObject, MaterialSlots, ProxyMesh, ProxyScene, MAX_CLIPPING_PLANES};
pub use renderer::CullerRenderer;
pub use software::SoftwareTarget;
pub use target::{PixelBuffer, VisibilityTarget};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CullError {
    #[error("Pixel readback failed: {reason}")]
    Readback { reason: String },

    #[error("GPU device error: {reason}")]
    Device { reason: String },

    #[error("Decoder worker failed to start: {reason}")]
    WorkerSpawn { reason: String },

    #[error("Decoder worker terminated unexpectedly")]
    DecoderTerminated,
}

pub type CullResult<T> = Result<T, CullError>;
