use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut aabb, p| {
            aabb.extend(p);
            aabb
        })
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Transform that maps the unit box (centered, side 1) onto this box
    pub fn unit_box_transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.size(), glam::Quat::IDENTITY, self.center())
    }
}

/// Index range drawn with one material slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubMesh {
    pub start: u32,
    pub count: u32,
    pub material_index: usize,
}

/// CPU-side triangle mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    /// Material slot ranges; empty means the whole index buffer uses slot 0
    pub groups: Vec<SubMesh>,
    bounds: Aabb,
}

impl Geometry {
    pub fn new(positions: Vec<[f32; 3]>, normals: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::from_points(positions.iter().map(|p| Vec3::from_array(*p)));
        Self {
            positions,
            normals,
            indices,
            groups: Vec::new(),
            bounds,
        }
    }

    pub fn with_groups(mut self, groups: Vec<SubMesh>) -> Self {
        self.groups = groups;
        self
    }

    /// Unit cube centered on the origin, used as the bounding-box proxy
    pub fn unit_box() -> Self {
        let aabb = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let positions: Vec<[f32; 3]> = aabb.corners().iter().map(|c| c.to_array()).collect();
        let normals = positions
            .iter()
            .map(|p| Vec3::from_array(*p).normalize().to_array())
            .collect();
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        Self::new(positions, normals, indices)
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Index ranges per material slot
    pub fn sub_meshes(&self) -> Vec<SubMesh> {
        if self.groups.is_empty() {
            vec![SubMesh {
                start: 0,
                count: self.indices.len() as u32,
                material_index: 0,
            }]
        } else {
            self.groups.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_box_bounds() {
        let geometry = Geometry::unit_box();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.triangle_count(), 12);
        assert_eq!(geometry.bounds(), Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)));
    }

    #[test]
    fn test_unit_box_transform_maps_onto_bounds() {
        let aabb = Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(3.0, 6.0, 4.0));
        let m = aabb.unit_box_transform();
        assert!(m.transform_point3(Vec3::splat(-0.5)).abs_diff_eq(aabb.min, 1e-6));
        assert!(m.transform_point3(Vec3::splat(0.5)).abs_diff_eq(aabb.max, 1e-6));
    }

    #[test]
    fn test_empty_bounds() {
        assert!(Aabb::EMPTY.is_empty());
        assert!(Geometry::new(Vec::new(), Vec::new(), Vec::new()).bounds().is_empty());
    }
}
