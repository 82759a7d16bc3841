//! Loaded models and the fragments attached to them

use super::fragment::{Fragment, FragmentId};
use super::{AssetError, AssetResult};
use glam::Mat4;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

pub type ModelId = Uuid;

/// Global data file of a streamed model
#[derive(Debug, Deserialize)]
struct GroupData {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    name: String,
    coordination_matrix: [f32; 16],
}

#[derive(Debug)]
pub struct FragmentsGroup {
    pub id: ModelId,
    pub name: String,
    pub coordination_matrix: Mat4,
    /// Applied on top of every instance transform of the model
    pub transform: Mat4,
    items: BTreeMap<FragmentId, Fragment>,
}

impl FragmentsGroup {
    pub fn add(&mut self, fragment: Fragment) {
        self.items.insert(fragment.id, fragment);
    }

    pub fn remove(&mut self, id: FragmentId) -> Option<Fragment> {
        self.items.remove(&id)
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.items.get(&id)
    }

    pub fn fragment_mut(&mut self, id: FragmentId) -> Option<&mut Fragment> {
        self.items.get_mut(&id)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn dispose(&mut self) {
        for fragment in self.items.values_mut() {
            fragment.dispose();
        }
        self.items.clear();
    }
}

/// Owns every loaded model and hands out fragment ids
#[derive(Debug, Default)]
pub struct FragmentManager {
    groups: Vec<FragmentsGroup>,
    base_coordination: Option<Mat4>,
    next_fragment_id: u64,
}

impl FragmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a model from its global data file.
    ///
    /// The first model loaded fixes the base coordination matrix. With
    /// `coordinate` set, later models are moved into that frame with
    /// `base * inverse(own)`.
    pub fn load(&mut self, bytes: &[u8], coordinate: bool) -> AssetResult<&FragmentsGroup> {
        let data: GroupData = serde_json::from_slice(bytes)?;
        let id = data.id.unwrap_or_else(Uuid::new_v4);
        if self.group(id).is_some() {
            return Err(AssetError::DuplicateModel { id });
        }

        let coordination_matrix = Mat4::from_cols_array(&data.coordination_matrix);
        let invertible = coordination_matrix.determinant().abs() > f32::EPSILON;
        if coordinate && !invertible {
            return Err(AssetError::SingularMatrix { id });
        }

        // Only an invertible matrix from a successful load can become the base
        let base = self.base_coordination.unwrap_or(coordination_matrix);
        if self.base_coordination.is_none() && invertible {
            self.base_coordination = Some(coordination_matrix);
        }

        let transform = if coordinate {
            base * coordination_matrix.inverse()
        } else {
            Mat4::IDENTITY
        };

        info!("Loaded model {} ({})", id, data.name);
        self.groups.push(FragmentsGroup {
            id,
            name: data.name,
            coordination_matrix,
            transform,
            items: BTreeMap::new(),
        });
        Ok(&self.groups[self.groups.len() - 1])
    }

    pub fn group(&self, id: ModelId) -> Option<&FragmentsGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn group_mut(&mut self, id: ModelId) -> Option<&mut FragmentsGroup> {
        self.groups.iter_mut().find(|group| group.id == id)
    }

    pub fn groups(&self) -> &[FragmentsGroup] {
        &self.groups
    }

    pub fn next_fragment_id(&mut self) -> FragmentId {
        let id = FragmentId(self.next_fragment_id);
        self.next_fragment_id += 1;
        id
    }

    /// Remove a model, releasing its fragments
    pub fn remove_group(&mut self, id: ModelId) -> bool {
        match self.groups.iter().position(|group| group.id == id) {
            Some(index) => {
                let mut group = self.groups.remove(index);
                group.dispose();
                debug!("Removed model {}", id);
                true
            }
            None => false,
        }
    }

    pub fn dispose(&mut self) {
        for group in &mut self.groups {
            group.dispose();
        }
        self.groups.clear();
        self.base_coordination = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn group_json(id: Uuid, translation: [f32; 3]) -> Vec<u8> {
        let matrix = Mat4::from_translation(Vec3::from_array(translation)).to_cols_array();
        serde_json::to_vec(&serde_json::json!({
            "id": id,
            "name": "model",
            "coordination_matrix": matrix,
        }))
        .unwrap()
    }

    #[test]
    fn test_first_model_defines_base_coordination() {
        let mut manager = FragmentManager::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let group = manager.load(&group_json(first, [10.0, 0.0, 0.0]), true).unwrap();
        assert!(group.transform.abs_diff_eq(Mat4::IDENTITY, 1e-6));

        let group = manager.load(&group_json(second, [4.0, 0.0, 0.0]), true).unwrap();
        let moved = group.transform.transform_point3(Vec3::ZERO);
        assert!(moved.abs_diff_eq(Vec3::new(6.0, 0.0, 0.0), 1e-5));
        assert_eq!(manager.groups().len(), 2);
    }

    #[test]
    fn test_uncoordinated_models_keep_identity() {
        let mut manager = FragmentManager::new();
        manager.load(&group_json(Uuid::new_v4(), [1.0, 2.0, 3.0]), false).unwrap();
        let group = manager.load(&group_json(Uuid::new_v4(), [4.0, 0.0, 0.0]), false).unwrap();
        assert_eq!(group.transform, Mat4::IDENTITY);
    }

    #[test]
    fn test_failed_load_does_not_fix_base_coordination() {
        let mut manager = FragmentManager::new();
        let broken = serde_json::to_vec(&serde_json::json!({
            "name": "broken",
            "coordination_matrix": ([0.0f32; 16]),
        }))
        .unwrap();
        assert!(matches!(
            manager.load(&broken, true),
            Err(AssetError::SingularMatrix { .. })
        ));
        assert!(manager.groups().is_empty());

        let group = manager.load(&group_json(Uuid::new_v4(), [7.0, 0.0, 0.0]), true).unwrap();
        assert!(group.transform.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_duplicate_model_is_rejected() {
        let mut manager = FragmentManager::new();
        let id = Uuid::new_v4();
        manager.load(&group_json(id, [0.0; 3]), true).unwrap();
        assert!(matches!(
            manager.load(&group_json(id, [0.0; 3]), true),
            Err(AssetError::DuplicateModel { .. })
        ));
        assert!(manager.remove_group(id));
        assert!(manager.group(id).is_none());
    }
}
