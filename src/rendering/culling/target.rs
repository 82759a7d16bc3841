use super::proxy::ProxyScene;
use super::CullResult;
use crate::rendering::camera::Camera;

/// Tightly packed RGBA8 frame read back from a visibility target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Off-screen surface the proxy scene is rendered into.
///
/// `begin_readback` must not block on the GPU; `poll_readback` returns the
/// frame once the copy has landed in host memory.
pub trait VisibilityTarget: Send {
    fn size(&self) -> (u32, u32);

    fn render(&mut self, scene: &ProxyScene, camera: &Camera) -> CullResult<()>;

    fn begin_readback(&mut self) -> CullResult<()>;

    fn poll_readback(&mut self) -> CullResult<Option<PixelBuffer>>;

    /// Free every resource held by the target. Must tolerate repeated calls.
    fn release(&mut self);
}
