//! Proxy scene rendered by the visibility pass
//!
//! Proxies share geometry with the objects they stand for but carry their own
//! flat materials and a copy of the world transforms, so the real objects are
//! never modified.

use super::color::ColorKey;
use super::material::{FlatMaterial, MaterialInfo};
use crate::assets::Geometry;
use glam::{Mat4, Vec3, Vec4};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Most clipping planes a visibility pass honors
pub const MAX_CLIPPING_PLANES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialSlots {
    Single(MaterialInfo),
    /// One entry per sub-mesh material index
    Multi(Vec<MaterialInfo>),
}

impl MaterialSlots {
    /// True when nothing of the object can occlude
    pub fn all_transparent(&self) -> bool {
        match self {
            MaterialSlots::Single(info) => info.is_transparent(),
            MaterialSlots::Multi(slots) => slots.iter().all(MaterialInfo::is_transparent),
        }
    }
}

/// Anything the culler can track
#[derive(Debug, Clone)]
pub struct CullableObject {
    pub geometry: Arc<Geometry>,
    pub materials: MaterialSlots,
    /// Object transform
    pub transform: Mat4,
    /// Per-instance transforms, applied before `transform`. Empty for plain meshes.
    pub instances: Vec<Mat4>,
}

impl CullableObject {
    pub fn mesh(geometry: Arc<Geometry>, materials: MaterialSlots, transform: Mat4) -> Self {
        Self {
            geometry,
            materials,
            transform,
            instances: Vec::new(),
        }
    }

    pub fn instanced(
        geometry: Arc<Geometry>,
        materials: MaterialSlots,
        transform: Mat4,
        instances: Vec<Mat4>,
    ) -> Self {
        Self {
            geometry,
            materials,
            transform,
            instances,
        }
    }

    pub fn world_transforms(&self) -> Vec<Mat4> {
        if self.instances.is_empty() {
            vec![self.transform]
        } else {
            self.instances.iter().map(|m| self.transform * *m).collect()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyMesh {
    pub color: ColorKey,
    pub geometry: Arc<Geometry>,
    /// Material per slot, either the color material or the shared placeholder
    pub slots: Vec<Arc<FlatMaterial>>,
    pub transforms: Vec<Mat4>,
    revision: u64,
}

impl ProxyMesh {
    pub fn new(
        color: ColorKey,
        geometry: Arc<Geometry>,
        slots: Vec<Arc<FlatMaterial>>,
        transforms: Vec<Mat4>,
    ) -> Self {
        Self {
            color,
            geometry,
            slots,
            transforms,
            revision: 0,
        }
    }

    /// Changes whenever the proxy is (re)inserted into a scene
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether any slot writes the identity color
    pub fn is_drawable(&self) -> bool {
        !self.transforms.is_empty() && self.slots.iter().any(|slot| !slot.is_placeholder())
    }

    /// Index ranges drawn with the identity color
    pub fn drawn_ranges(&self) -> Vec<std::ops::Range<u32>> {
        self.geometry
            .sub_meshes()
            .into_iter()
            .filter(|sub| {
                self.slots
                    .get(sub.material_index)
                    .map_or(false, |slot| !slot.is_placeholder())
            })
            .map(|sub| sub.start..sub.start + sub.count)
            .collect()
    }
}

/// Flat-colored stand-ins for every tracked object, keyed by color
#[derive(Debug, Default)]
pub struct ProxyScene {
    proxies: HashMap<ColorKey, ProxyMesh>,
    revision: u64,
    /// World-space planes `(normal, constant)`; points with
    /// `normal.dot(p) + constant < 0` are cut away
    clipping_planes: Vec<Vec4>,
}

impl ProxyScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut proxy: ProxyMesh) {
        self.revision += 1;
        proxy.revision = self.revision;
        self.proxies.insert(proxy.color, proxy);
    }

    pub fn remove(&mut self, color: ColorKey) -> Option<ProxyMesh> {
        self.proxies.remove(&color)
    }

    pub fn get(&self, color: ColorKey) -> Option<&ProxyMesh> {
        self.proxies.get(&color)
    }

    pub fn contains(&self, color: ColorKey) -> bool {
        self.proxies.contains_key(&color)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyMesh> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        self.proxies.values().map(|p| p.transforms.len()).sum()
    }

    pub fn clear(&mut self) {
        self.proxies.clear();
    }

    pub fn clipping_planes(&self) -> &[Vec4] {
        &self.clipping_planes
    }

    pub fn set_clipping_planes(&mut self, mut planes: Vec<Vec4>) {
        if planes.len() > MAX_CLIPPING_PLANES {
            warn!(
                "{} clipping planes given, only the first {} are used",
                planes.len(),
                MAX_CLIPPING_PLANES
            );
            planes.truncate(MAX_CLIPPING_PLANES);
        }
        self.clipping_planes = planes;
    }

    /// Whether a single plane cuts away every one of `points`
    pub fn clips_all(&self, points: &[Vec3]) -> bool {
        self.clipping_planes.iter().any(|plane| {
            points
                .iter()
                .all(|point| plane.truncate().dot(*point) + plane.w < 0.0)
        })
    }
}
