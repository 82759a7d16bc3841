//! Non-blocking RGBA8 texture readback
//!
//! The copy is recorded and submitted right away; the staging buffer is mapped
//! asynchronously and the map callback reports through a channel. Callers poll
//! the device until the channel fires, then receive tightly packed rows.

use crate::rendering::culling::{CullError, CullResult, PixelBuffer};
use crossbeam_channel::{bounded, Receiver, TryRecvError};

/// Align number to WebGPU's copy row alignment (256 bytes).
fn align_bpr(value: usize) -> usize {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    value.div_ceil(align) * align
}

/// Copy rows of `padded_bpr` bytes into a buffer of `tight_bpr`-byte rows
pub fn depad_rows(data: &[u8], tight_bpr: usize, padded_bpr: usize, height: usize) -> Vec<u8> {
    let mut tight = vec![0u8; tight_bpr * height];
    for row in 0..height {
        let src = row * padded_bpr;
        let dst = row * tight_bpr;
        tight[dst..dst + tight_bpr].copy_from_slice(&data[src..src + tight_bpr]);
    }
    tight
}

pub struct PendingReadback {
    staging: wgpu::Buffer,
    receiver: Receiver<Result<(), wgpu::BufferAsyncError>>,
    width: u32,
    height: u32,
    padded_bpr: usize,
}

impl PendingReadback {
    /// Record the texture copy, submit it and request the staging map
    pub fn start(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        size: (u32, u32),
    ) -> CullResult<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(CullError::Readback {
                reason: "readback size must be positive".to_string(),
            });
        }
        if texture.format() != wgpu::TextureFormat::Rgba8Unorm {
            return Err(CullError::Readback {
                reason: format!("unsupported readback format {:?}", texture.format()),
            });
        }

        let tight_bpr = 4 * width as usize;
        let padded_bpr = align_bpr(tight_bpr);
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Visibility Readback Staging"),
            size: (padded_bpr * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Visibility Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = bounded(1);
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        Ok(Self {
            staging,
            receiver,
            width,
            height,
            padded_bpr,
        })
    }

    /// Check for completion without waiting on the GPU
    pub fn poll(&self, device: &wgpu::Device) -> CullResult<Option<PixelBuffer>> {
        device.poll(wgpu::Maintain::Poll);
        match self.receiver.try_recv() {
            Ok(Ok(())) => {
                let data = {
                    let mapped = self.staging.slice(..).get_mapped_range();
                    depad_rows(&mapped, 4 * self.width as usize, self.padded_bpr, self.height as usize)
                };
                self.staging.unmap();
                Ok(Some(PixelBuffer {
                    width: self.width,
                    height: self.height,
                    data,
                }))
            }
            Ok(Err(e)) => Err(CullError::Readback { reason: e.to_string() }),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CullError::Readback {
                reason: "map callback dropped".to_string(),
            }),
        }
    }

    pub fn cancel(self) {
        self.staging.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_alignment() {
        assert_eq!(align_bpr(4), 256);
        assert_eq!(align_bpr(256), 256);
        assert_eq!(align_bpr(512 * 4), 2048);
        assert_eq!(align_bpr(100 * 4), 512);
    }

    #[test]
    fn test_depad_drops_row_padding() {
        // Two rows of 2 pixels, padded to 12 bytes
        let padded = vec![
            1, 1, 1, 1, 2, 2, 2, 2, 9, 9, 9, 9, //
            3, 3, 3, 3, 4, 4, 4, 4, 9, 9, 9, 9,
        ];
        let tight = depad_rows(&padded, 8, 12, 2);
        assert_eq!(tight, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]);
    }
}
