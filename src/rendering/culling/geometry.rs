//! Geometry-level culling for streamed models
//!
//! Every streamed geometry starts out tracked through a box proxy built from
//! its bounding box and instanced at each placement. Once real fragments are
//! loaded the box is swapped for the opaque fragment plus a box instanced over
//! the transparent placements only, and the full box comes back when the
//! fragments are evicted. Object-level visibility is folded into per-geometry
//! load, remove, show and hide requests.

use super::differ::ViewUpdate;
use super::material::MaterialInfo;
use super::proxy::{CullableObject, MaterialSlots};
use super::renderer::CullerRenderer;
use super::target::VisibilityTarget;
use super::CullResult;
use crate::assets::{Fragment, FragmentId, Geometry, ModelId, StreamedGeometries, StreamedInstance};
use crate::config::CullerSettings;
use crate::rendering::camera::Camera;
use crate::utils::Event;
use glam::Mat4;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey {
    pub model: ModelId,
    pub geometry: u32,
}

impl GeometryKey {
    pub fn new(model: ModelId, geometry: u32) -> Self {
        Self { model, geometry }
    }
}

/// What a proxy in the geometry culler stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKey {
    Bounds(GeometryKey),
    Fragment(FragmentId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Unloaded,
    /// Requested through `to_load`, fetch not finished yet
    Loading,
    Loaded,
}

pub type GeometrySets = HashMap<ModelId, HashSet<u32>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryViewUpdate {
    pub to_load: GeometrySets,
    pub to_remove: GeometrySets,
    pub to_show: GeometrySets,
    pub to_hide: GeometrySets,
}

impl GeometryViewUpdate {
    pub fn is_empty(&self) -> bool {
        self.to_load.is_empty()
            && self.to_remove.is_empty()
            && self.to_show.is_empty()
            && self.to_hide.is_empty()
    }

    fn insert(sets: &mut GeometrySets, key: GeometryKey) {
        sets.entry(key.model).or_default().insert(key.geometry);
    }

    pub fn count(sets: &GeometrySets) -> usize {
        sets.values().map(HashSet::len).sum()
    }
}

#[derive(Debug)]
struct GeometryState {
    bounds: CullableObject,
    /// Box over the transparent placements, kept while fragments are loaded
    transparent_bounds: Option<CullableObject>,
    residency: Residency,
    fragments: Vec<FragmentId>,
    hidden: bool,
    unseen_passes: u32,
    loaded_at_pass: u64,
}

pub struct GeometryCuller {
    renderer: CullerRenderer<ProxyKey>,
    geometries: HashMap<GeometryKey, GeometryState>,
    fragment_owners: HashMap<FragmentId, GeometryKey>,
    box_geometry: Arc<Geometry>,
    unload_after_passes: u32,
    pub on_view_updated: Event<GeometryViewUpdate>,
}

impl GeometryCuller {
    pub fn new(
        settings: CullerSettings,
        unload_after_passes: u32,
        target: Box<dyn VisibilityTarget>,
    ) -> CullResult<Self> {
        Ok(Self {
            renderer: CullerRenderer::new(settings, target)?,
            geometries: HashMap::new(),
            fragment_owners: HashMap::new(),
            box_geometry: Arc::new(Geometry::unit_box()),
            unload_after_passes,
            on_view_updated: Event::new(),
        })
    }

    pub fn renderer(&self) -> &CullerRenderer<ProxyKey> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut CullerRenderer<ProxyKey> {
        &mut self.renderer
    }

    pub fn set_needs_update(&mut self) {
        self.renderer.needs_update = true;
    }

    pub fn residency(&self, key: GeometryKey) -> Option<Residency> {
        self.geometries.get(&key).map(|state| state.residency)
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    /// Register a box proxy for every geometry of `model` that has instances.
    /// Returns the number of geometries now tracked for the model.
    pub fn add(
        &mut self,
        model: ModelId,
        transform: Mat4,
        instances: &HashMap<u32, Vec<StreamedInstance>>,
        geometries: &StreamedGeometries,
    ) -> usize {
        let mut added = 0;
        for (&geometry_id, placements) in instances {
            if placements.is_empty() {
                continue;
            }
            let Some(meta) = geometries.get(&geometry_id) else {
                warn!("Geometry {} of model {} has instances but no metadata", geometry_id, model);
                continue;
            };
            if meta.bounding_box.is_empty() {
                warn!("Geometry {} of model {} has an empty bounding box", geometry_id, model);
                continue;
            }

            let box_transform = meta.bounding_box.unit_box_transform();
            let box_proxy = |covered: Vec<&StreamedInstance>| {
                CullableObject::instanced(
                    Arc::clone(&self.box_geometry),
                    MaterialSlots::Single(MaterialInfo::OPAQUE),
                    transform,
                    covered
                        .iter()
                        .map(|instance| instance.transformation * box_transform)
                        .collect(),
                )
            };
            let bounds = box_proxy(placements.iter().collect());
            let transparent: Vec<&StreamedInstance> =
                placements.iter().filter(|instance| !instance.is_opaque()).collect();
            let transparent_bounds = (!transparent.is_empty()).then(|| box_proxy(transparent));

            let key = GeometryKey::new(model, geometry_id);
            self.renderer.add(ProxyKey::Bounds(key), &bounds);
            self.geometries.insert(
                key,
                GeometryState {
                    bounds,
                    transparent_bounds,
                    residency: Residency::Unloaded,
                    fragments: Vec::new(),
                    hidden: false,
                    unseen_passes: 0,
                    loaded_at_pass: 0,
                },
            );
            added += 1;
        }
        debug!("Tracking {} geometries of model {}", added, model);
        added
    }

    /// Track a freshly loaded fragment of `key`.
    ///
    /// Opaque fragments replace the box proxy, which shrinks to the transparent
    /// placements so those keep the geometry on screen. Transparent fragments
    /// leave the box in place since they cannot occlude. Returns whether a
    /// proxy was added.
    pub fn add_fragment(&mut self, key: GeometryKey, fragment: &Fragment, group_transform: Mat4) -> bool {
        let pass = self.renderer.pass_count();
        let Some(state) = self.geometries.get_mut(&key) else {
            warn!("Fragment {} added for untracked geometry {:?}", fragment.id, key);
            return false;
        };
        state.residency = Residency::Loaded;
        state.hidden = !fragment.visible;
        state.unseen_passes = 0;
        state.loaded_at_pass = pass;

        let object = CullableObject::instanced(
            Arc::clone(&fragment.geometry),
            MaterialSlots::Single(fragment.material.info()),
            group_transform,
            fragment.transforms(),
        );
        if !self.renderer.add(ProxyKey::Fragment(fragment.id), &object) {
            return false;
        }
        state.fragments.push(fragment.id);
        self.fragment_owners.insert(fragment.id, key);
        match &state.transparent_bounds {
            Some(bounds) => self.renderer.add(ProxyKey::Bounds(key), bounds),
            None => self.renderer.remove(&ProxyKey::Bounds(key)),
        };
        true
    }

    /// Stop tracking the fragments of a geometry and fall back to its box proxy
    pub fn remove_fragment(&mut self, model: ModelId, geometry_id: u32) {
        let key = GeometryKey::new(model, geometry_id);
        let Some(state) = self.geometries.get_mut(&key) else {
            return;
        };
        for id in state.fragments.drain(..) {
            self.renderer.remove(&ProxyKey::Fragment(id));
            self.fragment_owners.remove(&id);
        }
        state.residency = Residency::Unloaded;
        state.hidden = false;
        state.unseen_passes = 0;

        // A transparent-only box may be tracked in place of the full one
        let bounds_key = ProxyKey::Bounds(key);
        if state.transparent_bounds.is_some() || !self.renderer.contains(&bounds_key) {
            self.renderer.add(bounds_key, &state.bounds);
        }
    }

    /// A requested load did not produce fragments; allow a later retry
    pub fn cancel_load(&mut self, key: GeometryKey) {
        if let Some(state) = self.geometries.get_mut(&key) {
            if state.residency == Residency::Loading {
                state.residency = Residency::Unloaded;
            }
        }
    }

    pub fn remove_model(&mut self, model: ModelId) {
        let keys: Vec<GeometryKey> = self.geometries.keys().filter(|k| k.model == model).copied().collect();
        for key in keys {
            if let Some(state) = self.geometries.remove(&key) {
                for id in state.fragments {
                    self.renderer.remove(&ProxyKey::Fragment(id));
                    self.fragment_owners.remove(&id);
                }
            }
            self.renderer.remove(&ProxyKey::Bounds(key));
        }
    }

    pub fn update_visibility(&mut self, camera: &Camera, force: bool) -> CullResult<bool> {
        self.renderer.update_visibility(camera, force)
    }

    pub fn tick(&mut self, camera: &Camera) -> CullResult<Option<GeometryViewUpdate>> {
        let update = self.renderer.tick(camera)?;
        Ok(update.map(|update| self.handle_view_update(&update)))
    }

    pub fn poll(&mut self) -> CullResult<Option<GeometryViewUpdate>> {
        let update = self.renderer.poll()?;
        Ok(update.map(|update| self.handle_view_update(&update)))
    }

    pub fn finish_pass(&mut self, timeout: Duration) -> CullResult<Option<GeometryViewUpdate>> {
        let update = self.renderer.finish_pass(timeout)?;
        Ok(update.map(|update| self.handle_view_update(&update)))
    }

    fn handle_view_update(&mut self, update: &ViewUpdate<ProxyKey>) -> GeometryViewUpdate {
        let visible: HashSet<GeometryKey> = update
            .visible
            .iter()
            .filter_map(|proxy| match proxy {
                ProxyKey::Bounds(key) => Some(*key),
                ProxyKey::Fragment(id) => self.fragment_owners.get(id).copied(),
            })
            .collect();

        let mut result = GeometryViewUpdate::default();
        for (key, state) in self.geometries.iter_mut() {
            if visible.contains(key) {
                state.unseen_passes = 0;
                match state.residency {
                    Residency::Unloaded => {
                        state.residency = Residency::Loading;
                        GeometryViewUpdate::insert(&mut result.to_load, *key);
                    }
                    Residency::Loaded if state.hidden => {
                        state.hidden = false;
                        GeometryViewUpdate::insert(&mut result.to_show, *key);
                    }
                    _ => {}
                }
                continue;
            }

            // Frames rendered before the fragments arrived still show the box
            if state.residency != Residency::Loaded || update.pass <= state.loaded_at_pass {
                continue;
            }
            state.unseen_passes += 1;
            if state.unseen_passes > self.unload_after_passes {
                GeometryViewUpdate::insert(&mut result.to_remove, *key);
            } else if !state.hidden {
                state.hidden = true;
                GeometryViewUpdate::insert(&mut result.to_hide, *key);
            }
        }

        if !result.is_empty() {
            debug!(
                "Geometry update: {} to load, {} to remove, {} to show, {} to hide",
                GeometryViewUpdate::count(&result.to_load),
                GeometryViewUpdate::count(&result.to_remove),
                GeometryViewUpdate::count(&result.to_show),
                GeometryViewUpdate::count(&result.to_hide)
            );
        }
        self.on_view_updated.trigger(&result);
        result
    }

    pub fn dispose(&mut self) {
        self.renderer.dispose();
        self.geometries.clear();
        self.fragment_owners.clear();
        self.on_view_updated.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Aabb, BaseMaterial, FragmentItem, StreamedGeometryMeta};
    use crate::rendering::culling::software::SoftwareTarget;
    use glam::Vec3;

    fn culler(unload_after_passes: u32) -> GeometryCuller {
        let settings = CullerSettings {
            width: 32,
            height: 32,
            auto_update: false,
            ..CullerSettings::default()
        };
        GeometryCuller::new(settings, unload_after_passes, Box::new(SoftwareTarget::new(32, 32))).unwrap()
    }

    fn single_geometry(model: ModelId, culler: &mut GeometryCuller) -> GeometryKey {
        let instances = HashMap::from([(
            4,
            vec![StreamedInstance {
                id: 1,
                color: [1.0; 4],
                transformation: Mat4::IDENTITY,
            }],
        )]);
        let geometries = HashMap::from([(
            4,
            StreamedGeometryMeta {
                bounding_box: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
                has_holes: false,
                geometry_file: Some("file".to_string()),
            },
        )]);
        assert_eq!(culler.add(model, Mat4::IDENTITY, &instances, &geometries), 1);
        GeometryKey::new(model, 4)
    }

    fn fragment(id: u64, model: ModelId, material: BaseMaterial) -> Fragment {
        Fragment::new(
            FragmentId(id),
            model,
            4,
            Arc::new(Geometry::unit_box()),
            material,
            vec![FragmentItem {
                id: 1,
                transform: Mat4::IDENTITY,
                color: [1.0; 4],
            }],
        )
    }

    fn pass(culler: &mut GeometryCuller, camera: &Camera) -> GeometryViewUpdate {
        culler.update_visibility(camera, true).unwrap();
        culler.finish_pass(Duration::from_secs(5)).unwrap().unwrap()
    }

    #[test]
    fn test_seen_box_requests_load_once() {
        let model = ModelId::new_v4();
        let mut culler = culler(0);
        let key = single_geometry(model, &mut culler);
        let camera = Camera::new(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, 1.0);

        let first = pass(&mut culler, &camera);
        assert!(first.to_load[&model].contains(&4));
        assert_eq!(culler.residency(key), Some(Residency::Loading));

        let second = pass(&mut culler, &camera);
        assert!(second.to_load.is_empty());

        culler.cancel_load(key);
        let third = pass(&mut culler, &camera);
        assert!(third.to_load[&model].contains(&4));
    }

    #[test]
    fn test_opaque_fragment_swaps_out_box() {
        let model = ModelId::new_v4();
        let mut culler = culler(0);
        let key = single_geometry(model, &mut culler);

        assert!(!culler.add_fragment(key, &fragment(1, model, BaseMaterial::Transparent), Mat4::IDENTITY));
        assert!(culler.renderer().contains(&ProxyKey::Bounds(key)));

        assert!(culler.add_fragment(key, &fragment(2, model, BaseMaterial::Opaque), Mat4::IDENTITY));
        assert!(!culler.renderer().contains(&ProxyKey::Bounds(key)));
        assert!(culler.renderer().contains(&ProxyKey::Fragment(FragmentId(2))));

        culler.remove_fragment(model, 4);
        assert!(culler.renderer().contains(&ProxyKey::Bounds(key)));
        assert!(!culler.renderer().contains(&ProxyKey::Fragment(FragmentId(2))));
        assert_eq!(culler.residency(key), Some(Residency::Unloaded));
    }

    #[test]
    fn test_transparent_placements_keep_geometry_tracked() {
        let model = ModelId::new_v4();
        let mut culler = culler(0);
        let far = Mat4::from_translation(Vec3::new(500.0, 0.0, 0.0));
        let instances = HashMap::from([(
            4,
            vec![
                StreamedInstance { id: 1, color: [1.0; 4], transformation: far },
                StreamedInstance { id: 2, color: [1.0, 1.0, 1.0, 0.3], transformation: Mat4::IDENTITY },
            ],
        )]);
        let geometries = HashMap::from([(
            4,
            StreamedGeometryMeta {
                bounding_box: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
                has_holes: false,
                geometry_file: Some("file".to_string()),
            },
        )]);
        culler.add(model, Mat4::IDENTITY, &instances, &geometries);
        let key = GeometryKey::new(model, 4);
        let camera = Camera::new(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, 1.0);

        assert!(pass(&mut culler, &camera).to_load[&model].contains(&4));
        let opaque = Fragment::new(
            FragmentId(1),
            model,
            4,
            Arc::new(Geometry::unit_box()),
            BaseMaterial::Opaque,
            vec![FragmentItem { id: 1, transform: far, color: [1.0; 4] }],
        );
        assert!(culler.add_fragment(key, &opaque, Mat4::IDENTITY));

        let boxed = |culler: &GeometryCuller| {
            let color = culler.renderer().color_of(&ProxyKey::Bounds(key)).unwrap();
            culler.renderer().scene().get(color).unwrap().transforms.len()
        };
        assert_eq!(boxed(&culler), 1);

        // The opaque fragment is off screen but the transparent box is not
        for _ in 0..4 {
            assert!(pass(&mut culler, &camera).is_empty());
        }
        assert_eq!(culler.residency(key), Some(Residency::Loaded));

        culler.remove_fragment(model, 4);
        assert_eq!(boxed(&culler), 2);
    }

    #[test]
    fn test_grace_period_hides_before_removing() {
        let model = ModelId::new_v4();
        let mut culler = culler(1);
        let key = single_geometry(model, &mut culler);
        let looking = Camera::new(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, 1.0);
        let away = Camera::new(Vec3::new(0.0, 0.0, 6.0), Vec3::new(0.0, 0.0, 12.0), 1.0);

        pass(&mut culler, &looking);
        culler.add_fragment(key, &fragment(1, model, BaseMaterial::Opaque), Mat4::IDENTITY);

        let hidden = pass(&mut culler, &away);
        assert!(hidden.to_hide[&model].contains(&4));
        assert!(hidden.to_remove.is_empty());

        let shown = pass(&mut culler, &looking);
        assert!(shown.to_show[&model].contains(&4));

        pass(&mut culler, &away);
        let removed = pass(&mut culler, &away);
        assert!(removed.to_remove[&model].contains(&4));
    }
}
