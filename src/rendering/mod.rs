pub mod camera;
pub mod culling;
pub mod gpu;

pub use camera::{Camera, CameraUniform};
pub use gpu::WgpuVisibilityTarget;
