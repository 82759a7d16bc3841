use super::geometry::Geometry;
use super::group::ModelId;
use crate::rendering::culling::MaterialInfo;
use crate::rendering::gpu::{GpuMesh, InstanceRaw};
use glam::Mat4;
use std::fmt;
use std::sync::Arc;

/// Handle of a fragment, unique within a `FragmentManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub(crate) u64);

impl FragmentId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fragment#{}", self.0)
    }
}

/// Shared presentation material of streamed fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseMaterial {
    Opaque,
    /// Half-transparent material used for instances whose alpha is below 1
    Transparent,
}

impl BaseMaterial {
    pub fn info(self) -> MaterialInfo {
        match self {
            BaseMaterial::Opaque => MaterialInfo::OPAQUE,
            BaseMaterial::Transparent => MaterialInfo::transparent(0.5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentItem {
    /// Id of the asset this instance belongs to
    pub id: u32,
    pub transform: Mat4,
    pub color: [f32; 4],
}

/// Instance-batched mesh of one geometry
#[derive(Debug)]
pub struct Fragment {
    pub id: FragmentId,
    pub model: ModelId,
    pub geometry_id: u32,
    pub geometry: Arc<Geometry>,
    pub material: BaseMaterial,
    pub items: Vec<FragmentItem>,
    pub visible: bool,
    gpu: Option<GpuMesh>,
    disposed: bool,
}

impl Fragment {
    pub fn new(
        id: FragmentId,
        model: ModelId,
        geometry_id: u32,
        geometry: Arc<Geometry>,
        material: BaseMaterial,
        items: Vec<FragmentItem>,
    ) -> Self {
        Self {
            id,
            model,
            geometry_id,
            geometry,
            material,
            items,
            visible: true,
            gpu: None,
            disposed: false,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_transparent(&self) -> bool {
        self.material == BaseMaterial::Transparent
    }

    pub fn transforms(&self) -> Vec<Mat4> {
        self.items.iter().map(|item| item.transform).collect()
    }

    /// Create the vertex, index and instance buffers
    pub fn upload(&mut self, device: &wgpu::Device) {
        let instances: Vec<InstanceRaw> = self
            .items
            .iter()
            .map(|item| InstanceRaw::new(item.transform, item.color))
            .collect();
        let label = self.id.to_string();
        self.gpu = Some(GpuMesh::upload(device, &label, &self.geometry, &instances));
    }

    pub fn gpu_mesh(&self) -> Option<&GpuMesh> {
        self.gpu.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release GPU buffers and instance data. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy();
        }
        self.items.clear();
        self.visible = false;
        self.disposed = true;
    }

    pub fn summary(&self) -> FragmentSummary {
        FragmentSummary {
            id: self.id,
            model: self.model,
            geometry_id: self.geometry_id,
            instance_count: self.items.len(),
            transparent: self.is_transparent(),
        }
    }
}

/// Event payload describing a loaded or deleted fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSummary {
    pub id: FragmentId,
    pub model: ModelId,
    pub geometry_id: u32,
    pub instance_count: usize,
    pub transparent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_is_idempotent() {
        let mut fragment = Fragment::new(
            FragmentId(1),
            ModelId::nil(),
            7,
            Arc::new(Geometry::unit_box()),
            BaseMaterial::Opaque,
            vec![FragmentItem {
                id: 3,
                transform: Mat4::IDENTITY,
                color: [1.0, 1.0, 1.0, 1.0],
            }],
        );
        assert_eq!(fragment.summary().instance_count, 1);

        fragment.dispose();
        fragment.dispose();
        assert!(fragment.is_disposed());
        assert_eq!(fragment.instance_count(), 0);
        assert!(!fragment.visible);
    }

    #[test]
    fn test_transparent_base_material_is_culled_out() {
        assert!(BaseMaterial::Transparent.info().is_transparent());
        assert!(!BaseMaterial::Opaque.info().is_transparent());
    }
}
