//! wgpu backend of the visibility pass

pub mod mesh;
pub mod readback;
pub mod target;

pub use mesh::{GpuMesh, InstanceRaw, Vertex};
pub use readback::PendingReadback;
pub use target::WgpuVisibilityTarget;
