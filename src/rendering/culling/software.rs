//! Headless visibility target
//!
//! Rasterizes each proxy instance as the screen-space rectangle of its
//! projected bounding box, depth-tested at the box's nearest point. Coarser
//! than the GPU target but needs no device, so it backs tests and machines
//! without an adapter. Clipping planes only drop instances whose box lies
//! entirely on the clipped side of a plane.

use super::proxy::ProxyScene;
use super::target::{PixelBuffer, VisibilityTarget};
use super::CullResult;
use crate::rendering::camera::Camera;
use glam::Vec4;
use tracing::trace;

pub struct SoftwareTarget {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
    pending: Option<PixelBuffer>,
}

impl SoftwareTarget {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![0; pixels * 4],
            depth: vec![f32::INFINITY; pixels],
            pending: None,
        }
    }

    fn clear(&mut self) {
        let pixels = self.width as usize * self.height as usize;
        self.color.clear();
        self.color.resize(pixels * 4, 0);
        self.depth.clear();
        self.depth.resize(pixels, f32::INFINITY);
    }

    fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, depth: f32, rgb: [u8; 3]) {
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            for x in x0..x1 {
                let i = row + x as usize;
                if depth < self.depth[i] {
                    self.depth[i] = depth;
                    self.color[i * 4..i * 4 + 4].copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
                }
            }
        }
    }
}

impl VisibilityTarget for SoftwareTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, scene: &ProxyScene, camera: &Camera) -> CullResult<()> {
        self.clear();
        let view_proj = camera.build_view_projection_matrix();
        let (w, h) = (self.width as f32, self.height as f32);

        for proxy in scene.iter().filter(|p| p.is_drawable()) {
            let corners = proxy.geometry.bounds().corners();
            let rgb = proxy.color.rgb();

            for transform in &proxy.transforms {
                if !scene.clipping_planes().is_empty() {
                    let world = corners.map(|corner| transform.transform_point3(corner));
                    if scene.clips_all(&world) {
                        continue;
                    }
                }

                let clip_from_local = view_proj * *transform;
                let mut min = glam::Vec3::splat(f32::INFINITY);
                let mut max = glam::Vec3::splat(f32::NEG_INFINITY);
                let mut projected = 0;

                for corner in corners {
                    let clip = clip_from_local * Vec4::from((corner, 1.0));
                    if clip.w <= 0.0 {
                        continue;
                    }
                    let ndc = clip.truncate() / clip.w;
                    min = min.min(ndc);
                    max = max.max(ndc);
                    projected += 1;
                }

                if projected == 0 || max.x < -1.0 || min.x > 1.0 || max.y < -1.0 || min.y > 1.0 {
                    continue;
                }
                if max.z < 0.0 || min.z > 1.0 {
                    continue;
                }

                // NDC y points up, rows go down
                let x0 = (((min.x + 1.0) * 0.5 * w).floor().max(0.0)) as u32;
                let x1 = (((max.x + 1.0) * 0.5 * w).ceil().min(w)) as u32;
                let y0 = (((1.0 - max.y) * 0.5 * h).floor().max(0.0)) as u32;
                let y1 = (((1.0 - min.y) * 0.5 * h).ceil().min(h)) as u32;
                self.fill_rect(x0, y0, x1, y1, min.z.max(0.0), rgb);
            }
        }

        trace!("Software visibility frame rendered ({} proxies)", scene.len());
        Ok(())
    }

    fn begin_readback(&mut self) -> CullResult<()> {
        self.pending = Some(PixelBuffer {
            width: self.width,
            height: self.height,
            data: self.color.clone(),
        });
        Ok(())
    }

    fn poll_readback(&mut self) -> CullResult<Option<PixelBuffer>> {
        Ok(self.pending.take())
    }

    fn release(&mut self) {
        self.pending = None;
        self.color = Vec::new();
        self.depth = Vec::new();
    }
}
