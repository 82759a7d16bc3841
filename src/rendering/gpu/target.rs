use super::mesh::{GpuMesh, InstanceRaw, Vertex};
use super::readback::PendingReadback;
use crate::rendering::camera::{Camera, CameraUniform};
use crate::rendering::culling::{
    ColorKey, CullError, CullResult, PixelBuffer, ProxyScene, VisibilityTarget, MAX_CLIPPING_PLANES,
};
use crate::utils::logging::{handle_wgpu_result, log_adapter_info};
use glam::Vec4;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Matches `ClippingUniform` in flat_color.wgsl
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ClippingUniform {
    planes: [[f32; 4]; MAX_CLIPPING_PLANES],
    count: u32,
    _padding: [u32; 3],
}

impl From<&[Vec4]> for ClippingUniform {
    fn from(planes: &[Vec4]) -> Self {
        let mut uniform = Self {
            planes: [[0.0; 4]; MAX_CLIPPING_PLANES],
            count: 0,
            _padding: [0; 3],
        };
        for (slot, plane) in uniform.planes.iter_mut().zip(planes) {
            *slot = plane.to_array();
            uniform.count += 1;
        }
        uniform
    }
}

struct UploadedProxy {
    revision: u64,
    mesh: GpuMesh,
    ranges: Vec<Range<u32>>,
}

/// Off-screen color and depth textures the proxy scene is drawn into
pub struct WgpuVisibilityTarget {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    width: u32,
    height: u32,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    clipping_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    uploaded: HashMap<ColorKey, UploadedProxy>,
    readback: Option<PendingReadback>,
    released: bool,
}

impl WgpuVisibilityTarget {
    /// Create a headless device and a target on it
    pub async fn request(width: u32, height: u32) -> CullResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| CullError::Device {
                reason: "no suitable GPU adapter".to_string(),
            })?;
        log_adapter_info(&adapter);

        let (device, queue) = handle_wgpu_result(
            adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Culling Device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::downlevel_defaults(),
                        memory_hints: wgpu::MemoryHints::default(),
                    },
                    None,
                )
                .await,
            "request_device",
        )
        .map_err(|e| CullError::Device { reason: e.to_string() })?;

        Ok(Self::new(Arc::new(device), Arc::new(queue), width, height))
    }

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, width: u32, height: u32) -> Self {
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Visibility Color Target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Visibility Depth Target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Visibility Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform::from(&Camera::default())]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let clipping_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Visibility Clipping Buffer"),
            contents: bytemuck::cast_slice(&[ClippingUniform::from(&[] as &[Vec4])]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_entry = |binding: u32, visibility: wgpu::ShaderStages| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let camera_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX),
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
            label: Some("visibility_camera_bind_group_layout"),
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: clipping_buffer.as_entire_binding(),
                },
            ],
            label: Some("visibility_camera_bind_group"),
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Flat Color Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/flat_color.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Visibility Pipeline Layout"),
            bind_group_layouts: &[&camera_bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Visibility Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::desc(), InstanceRaw::desc()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // Proxies are double sided
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        info!("Visibility target created ({}x{})", width, height);
        Self {
            device,
            queue,
            width,
            height,
            color_texture,
            color_view,
            depth_texture,
            depth_view,
            pipeline,
            camera_buffer,
            clipping_buffer,
            camera_bind_group,
            uploaded: HashMap::new(),
            readback: None,
            released: false,
        }
    }

    pub fn device(&self) -> Arc<wgpu::Device> {
        Arc::clone(&self.device)
    }

    /// Upload new or changed proxies and free the ones that left the scene
    fn sync_scene(&mut self, scene: &ProxyScene) {
        self.uploaded.retain(|color, uploaded| match scene.get(*color) {
            Some(proxy) if proxy.revision() == uploaded.revision => true,
            _ => {
                uploaded.mesh.vertex_buffer.destroy();
                uploaded.mesh.index_buffer.destroy();
                uploaded.mesh.instance_buffer.destroy();
                false
            }
        });

        for proxy in scene.iter().filter(|p| p.is_drawable()) {
            if self.uploaded.contains_key(&proxy.color) {
                continue;
            }
            let color = proxy.color.to_rgba_f32();
            let instances: Vec<InstanceRaw> = proxy
                .transforms
                .iter()
                .map(|transform| InstanceRaw::new(*transform, color))
                .collect();
            let mesh = GpuMesh::upload(&self.device, &format!("Proxy {}", proxy.color), &proxy.geometry, &instances);
            self.uploaded.insert(
                proxy.color,
                UploadedProxy {
                    revision: proxy.revision(),
                    mesh,
                    ranges: proxy.drawn_ranges(),
                },
            );
        }
    }
}

impl VisibilityTarget for WgpuVisibilityTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, scene: &ProxyScene, camera: &Camera) -> CullResult<()> {
        if self.released {
            return Err(CullError::Device {
                reason: "visibility target already released".to_string(),
            });
        }
        self.sync_scene(scene);
        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniform::from(camera)]),
        );
        self.queue.write_buffer(
            &self.clipping_buffer,
            0,
            bytemuck::cast_slice(&[ClippingUniform::from(scene.clipping_planes())]),
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Visibility Render Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Visibility Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            for uploaded in self.uploaded.values() {
                let mesh = &uploaded.mesh;
                render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                render_pass.set_vertex_buffer(1, mesh.instance_buffer.slice(..));
                render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                for range in &uploaded.ranges {
                    render_pass.draw_indexed(range.clone(), 0, 0..mesh.num_instances);
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        debug!("Visibility frame submitted ({} meshes)", self.uploaded.len());
        Ok(())
    }

    fn begin_readback(&mut self) -> CullResult<()> {
        if let Some(stale) = self.readback.take() {
            stale.cancel();
        }
        self.readback = Some(PendingReadback::start(
            &self.device,
            &self.queue,
            &self.color_texture,
            (self.width, self.height),
        )?);
        Ok(())
    }

    fn poll_readback(&mut self) -> CullResult<Option<PixelBuffer>> {
        let Some(pending) = &self.readback else {
            return Ok(None);
        };
        let result = pending.poll(&self.device);
        if !matches!(result, Ok(None)) {
            self.readback = None;
        }
        result
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(pending) = self.readback.take() {
            pending.cancel();
        }
        for (_, uploaded) in self.uploaded.drain() {
            uploaded.mesh.destroy();
        }
        self.camera_buffer.destroy();
        self.clipping_buffer.destroy();
        self.color_texture.destroy();
        self.depth_texture.destroy();
        info!("Visibility target released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipping_uniform_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<ClippingUniform>(), 16 * MAX_CLIPPING_PLANES + 16);

        let planes = [Vec4::new(0.0, 0.0, -1.0, -2.0), Vec4::X];
        let uniform = ClippingUniform::from(&planes[..]);
        assert_eq!(uniform.count, 2);
        assert_eq!(uniform.planes[0], [0.0, 0.0, -1.0, -2.0]);
        assert_eq!(uniform.planes[2], [0.0; 4]);
    }
}
