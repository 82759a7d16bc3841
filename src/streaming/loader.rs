//! Fragment stream loader
//!
//! Turns geometry visibility into fetches and evictions. Fetches run as tokio
//! tasks bounded by a semaphore; payloads are decoded inside the task and the
//! results are applied on the tick thread, either from `tick` without waiting
//! or from `flush`.

use super::{StreamError, StreamResult, StreamStats};
use crate::assets::{
    BaseMaterial, Fragment, FragmentId, FragmentItem, FragmentManager, FragmentSummary, Geometry,
    GeometryPayload, ModelId, StreamLoaderSettings, StreamSerializer, StreamedGeometries,
    StreamedInstance,
};
use crate::config::{EngineSettings, StreamingSettings};
use crate::networking::RemoteStorage;
use crate::rendering::camera::Camera;
use crate::rendering::culling::geometry::GeometrySets;
use crate::rendering::culling::{
    GeometryCuller, GeometryKey, GeometryViewUpdate, Residency, VisibilityTarget,
};
use crate::utils::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

struct StreamedModel {
    geometries: StreamedGeometries,
    instances: HashMap<u32, Vec<StreamedInstance>>,
}

struct FetchOutcome {
    model: ModelId,
    file_id: String,
    result: StreamResult<(Vec<GeometryPayload>, usize)>,
}

async fn fetch_payloads(
    storage: &dyn RemoteStorage,
    file_id: &str,
) -> StreamResult<(Vec<GeometryPayload>, usize)> {
    let bytes = storage.fetch(file_id).await?;
    let payloads = StreamSerializer::import(&bytes)?;
    Ok((payloads, bytes.len()))
}

pub struct FragmentStreamLoader {
    pub enabled: bool,
    culler: GeometryCuller,
    storage: Arc<dyn RemoteStorage>,
    fragments: FragmentManager,
    settings: StreamingSettings,
    models: HashMap<ModelId, StreamedModel>,
    /// Fragment ids per model and geometry
    loaded: HashMap<ModelId, HashMap<u32, Vec<FragmentId>>>,
    /// Geometries waiting on each in-flight file
    in_flight: HashMap<(ModelId, String), HashSet<u32>>,
    tasks: JoinSet<FetchOutcome>,
    /// File behind each fetch task, for tasks that end without an outcome
    task_files: HashMap<Id, (ModelId, String)>,
    semaphore: Arc<Semaphore>,
    runtime: Handle,
    device: Option<Arc<wgpu::Device>>,
    stats: StreamStats,
    disposed: bool,
    pub on_fragments_loaded: Event<Vec<FragmentSummary>>,
    pub on_fragments_deleted: Event<Vec<FragmentSummary>>,
}

impl FragmentStreamLoader {
    /// Create a loader that fetches on the current tokio runtime
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        target: Box<dyn VisibilityTarget>,
        settings: &EngineSettings,
    ) -> StreamResult<Self> {
        let runtime = Handle::try_current().map_err(|e| StreamError::NoRuntime {
            reason: e.to_string(),
        })?;
        let culler = GeometryCuller::new(
            settings.culler.clone(),
            settings.streaming.unload_after_passes,
            target,
        )?;

        info!(
            "Stream loader ready (max {} concurrent fetches)",
            settings.streaming.max_concurrent_fetches
        );
        Ok(Self {
            enabled: true,
            culler,
            storage,
            fragments: FragmentManager::new(),
            settings: settings.streaming.clone(),
            models: HashMap::new(),
            loaded: HashMap::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            task_files: HashMap::new(),
            semaphore: Arc::new(Semaphore::new(settings.streaming.max_concurrent_fetches.max(1))),
            runtime,
            device: None,
            stats: StreamStats::default(),
            disposed: false,
            on_fragments_loaded: Event::new(),
            on_fragments_deleted: Event::new(),
        })
    }

    /// Spawn fetches on `runtime` instead of the runtime `new` was called on
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = runtime;
        self
    }

    /// Upload fragment buffers to `device` as they are built
    pub fn with_device(mut self, device: Arc<wgpu::Device>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn culler(&self) -> &GeometryCuller {
        &self.culler
    }

    pub fn culler_mut(&mut self) -> &mut GeometryCuller {
        &mut self.culler
    }

    pub fn fragments(&self) -> &FragmentManager {
        &self.fragments
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn pending_fetches(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Fragments currently loaded for a geometry
    pub fn loaded_fragments(&self, model: ModelId, geometry_id: u32) -> &[FragmentId] {
        self.loaded
            .get(&model)
            .and_then(|geometries| geometries.get(&geometry_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Load a model's global data and start tracking its geometries
    pub async fn load(&mut self, settings: StreamLoaderSettings, coordinate: bool) -> StreamResult<ModelId> {
        if self.disposed {
            return Err(StreamError::Disposed);
        }

        let instances = settings.instances_by_geometry();
        let StreamLoaderSettings {
            geometries,
            global_data_file_id,
            ..
        } = settings;

        let bytes = self.storage.fetch(&global_data_file_id).await?;
        let group = self.fragments.load(&bytes, coordinate)?;
        let (model, transform) = (group.id, group.transform);

        let tracked = self.culler.add(model, transform, &instances, &geometries);
        self.models.insert(model, StreamedModel { geometries, instances });
        self.culler.set_needs_update();

        info!("Streaming model {} with {} geometries", model, tracked);
        Ok(model)
    }

    /// Apply finished fetches, run the culler and act on its verdict
    pub fn tick(&mut self, camera: &Camera) -> StreamResult<()> {
        if self.disposed || !self.enabled {
            return Ok(());
        }
        self.harvest_fetches()?;
        if let Some(update) = self.culler.tick(camera)? {
            self.apply_update(&update)?;
        }
        Ok(())
    }

    /// Block until the in-flight visibility pass completes and apply it
    pub fn finish_pass(&mut self, timeout: Duration) -> StreamResult<Option<GeometryViewUpdate>> {
        let update = self.culler.finish_pass(timeout)?;
        if let Some(update) = &update {
            self.apply_update(update)?;
        }
        Ok(update)
    }

    /// Wait for every in-flight fetch and apply it
    pub async fn flush(&mut self) -> StreamResult<()> {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.finish_task(joined)?;
        }
        Ok(())
    }

    pub fn apply_update(&mut self, update: &GeometryViewUpdate) -> StreamResult<()> {
        self.load_found_geometries(&update.to_load)?;
        self.unload_lost_geometries(&update.to_remove)?;
        self.set_visibility(&update.to_show, true);
        self.set_visibility(&update.to_hide, false);
        Ok(())
    }

    fn harvest_fetches(&mut self) -> StreamResult<()> {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.finish_task(joined)?;
        }
        Ok(())
    }

    fn finish_task(&mut self, joined: Result<(Id, FetchOutcome), JoinError>) -> StreamResult<()> {
        match joined {
            Ok((id, outcome)) => {
                self.task_files.remove(&id);
                self.finish_fetch(outcome)
            }
            Err(e) => {
                warn!("Geometry fetch task failed: {}", e);
                if let Some((model, file_id)) = self.task_files.remove(&e.id()) {
                    self.abandon_fetch(model, &file_id);
                }
                Ok(())
            }
        }
    }

    fn load_found_geometries(&mut self, seen: &GeometrySets) -> StreamResult<()> {
        for (&model, ids) in seen {
            let streamed = match (self.fragments.group(model), self.models.get(&model)) {
                (Some(_), Some(streamed)) => streamed,
                _ => {
                    error!("Fragment group {} not found", model);
                    return Err(StreamError::GroupNotFound { model });
                }
            };

            let mut files: HashMap<String, HashSet<u32>> = HashMap::new();
            for &geometry_id in ids {
                let Some(meta) = streamed.geometries.get(&geometry_id) else {
                    error!("Geometry {} not found in model {}", geometry_id, model);
                    return Err(StreamError::GeometryNotFound { model, geometry_id });
                };
                match &meta.geometry_file {
                    Some(file) => {
                        files.entry(file.clone()).or_default().insert(geometry_id);
                    }
                    None => debug!("Geometry {} of model {} has no geometry file", geometry_id, model),
                }
            }

            for (file_id, ids) in files {
                let key = (model, file_id);
                if let Some(waiting) = self.in_flight.get_mut(&key) {
                    waiting.extend(ids);
                    continue;
                }
                let file_id = key.1.clone();
                self.in_flight.insert(key, ids);
                self.spawn_fetch(model, file_id);
            }
        }
        Ok(())
    }

    fn spawn_fetch(&mut self, model: ModelId, file_id: String) {
        let storage = Arc::clone(&self.storage);
        let semaphore = Arc::clone(&self.semaphore);
        self.stats.fetches_started += 1;
        debug!("Fetching geometry file {}", file_id);

        let task_file = file_id.clone();
        let handle = self.tasks.spawn_on(
            async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetch_payloads(storage.as_ref(), &file_id).await,
                    Err(_) => Err(StreamError::Disposed),
                };
                FetchOutcome { model, file_id, result }
            },
            &self.runtime,
        );
        self.task_files.insert(handle.id(), (model, task_file));
    }

    /// Forget a fetch that produced nothing so its geometries can be requested again
    fn abandon_fetch(&mut self, model: ModelId, file_id: &str) {
        self.stats.fetches_failed += 1;
        let requested = self
            .in_flight
            .remove(&(model, file_id.to_string()))
            .unwrap_or_default();
        for geometry_id in requested {
            self.culler.cancel_load(GeometryKey::new(model, geometry_id));
        }
    }

    fn finish_fetch(&mut self, outcome: FetchOutcome) -> StreamResult<()> {
        let FetchOutcome { model, file_id, result } = outcome;
        let (payloads, size) = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Failed to load geometry file {}: {}", file_id, e);
                self.abandon_fetch(model, &file_id);
                return Ok(());
            }
        };
        let requested = self
            .in_flight
            .remove(&(model, file_id.clone()))
            .unwrap_or_default();
        self.stats.bytes_fetched += size as u64;

        if !self.models.contains_key(&model) {
            debug!("Model {} was removed while {} was in flight", model, file_id);
            return Ok(());
        }

        let mut loaded = Vec::new();
        let mut produced = HashSet::new();
        for payload in payloads {
            let geometry_id = payload.geometry_id;
            let key = GeometryKey::new(model, geometry_id);
            if !requested.contains(&geometry_id) || self.culler.residency(key) != Some(Residency::Loading) {
                continue;
            }

            let Some(instances) = self
                .models
                .get(&model)
                .and_then(|streamed| streamed.instances.get(&geometry_id))
            else {
                error!("Instances not found for geometry {} of model {}", geometry_id, model);
                return Err(StreamError::InstancesNotFound { model, geometry_id });
            };
            let (opaque, transparent): (Vec<StreamedInstance>, Vec<StreamedInstance>) =
                instances.iter().cloned().partition(StreamedInstance::is_opaque);

            let geometry = Arc::new(payload.into_geometry());
            self.new_fragment(key, &geometry, transparent, BaseMaterial::Transparent, &mut loaded)?;
            self.new_fragment(key, &geometry, opaque, BaseMaterial::Opaque, &mut loaded)?;
            produced.insert(geometry_id);
        }

        for geometry_id in requested.difference(&produced) {
            let key = GeometryKey::new(model, *geometry_id);
            if self.culler.residency(key) == Some(Residency::Loading) {
                warn!("Geometry {} is missing from file {}", geometry_id, file_id);
            }
        }

        if !loaded.is_empty() {
            self.stats.geometries_loaded += produced.len() as u64;
            info!("Loaded {} fragments from {}", loaded.len(), file_id);
            self.on_fragments_loaded.trigger(&loaded);
        }
        Ok(())
    }

    fn new_fragment(
        &mut self,
        key: GeometryKey,
        geometry: &Arc<Geometry>,
        instances: Vec<StreamedInstance>,
        material: BaseMaterial,
        loaded: &mut Vec<FragmentSummary>,
    ) -> StreamResult<()> {
        if instances.is_empty() {
            return Ok(());
        }

        let id = self.fragments.next_fragment_id();
        let items = instances
            .into_iter()
            .map(|instance| FragmentItem {
                id: instance.id,
                transform: instance.transformation,
                color: instance.color,
            })
            .collect();
        let mut fragment = Fragment::new(id, key.model, key.geometry, Arc::clone(geometry), material, items);
        if let Some(device) = &self.device {
            fragment.upload(device);
        }

        let Some(group) = self.fragments.group_mut(key.model) else {
            error!("Fragment group {} not found", key.model);
            return Err(StreamError::GroupNotFound { model: key.model });
        };
        self.culler.add_fragment(key, &fragment, group.transform);
        loaded.push(fragment.summary());
        group.add(fragment);

        self.loaded
            .entry(key.model)
            .or_default()
            .entry(key.geometry)
            .or_default()
            .push(id);
        self.stats.fragments_loaded += 1;
        Ok(())
    }

    fn unload_lost_geometries(&mut self, unseen: &GeometrySets) -> StreamResult<()> {
        let mut deleted = Vec::new();
        for (&model, ids) in unseen {
            let Some(group) = self.fragments.group_mut(model) else {
                error!("Fragment group {} not found", model);
                return Err(StreamError::GroupNotFound { model });
            };

            for &geometry_id in ids {
                self.culler.remove_fragment(model, geometry_id);
                let Some(fragment_ids) = self
                    .loaded
                    .get_mut(&model)
                    .and_then(|geometries| geometries.remove(&geometry_id))
                else {
                    continue;
                };
                deleted.extend(fragment_ids.into_iter().filter_map(|id| group.remove(id)));
            }
        }

        if deleted.is_empty() {
            return Ok(());
        }

        let summaries: Vec<FragmentSummary> = deleted.iter().map(Fragment::summary).collect();
        self.on_fragments_deleted.trigger(&summaries);
        for mut fragment in deleted {
            fragment.dispose();
        }
        self.stats.fragments_deleted += summaries.len() as u64;
        info!("Unloaded {} fragments", summaries.len());
        Ok(())
    }

    fn set_visibility(&mut self, filter: &GeometrySets, visible: bool) {
        for (model, ids) in filter {
            let (Some(geometries), Some(group)) = (self.loaded.get(model), self.fragments.group_mut(*model)) else {
                continue;
            };
            for geometry_id in ids {
                for id in geometries.get(geometry_id).into_iter().flatten() {
                    if let Some(fragment) = group.fragment_mut(*id) {
                        fragment.visible = visible;
                    }
                }
            }
        }
    }

    /// Evict every fragment of a model and forget it
    pub fn remove_model(&mut self, model: ModelId) -> StreamResult<()> {
        if self.fragments.group(model).is_none() {
            error!("Fragment group {} not found", model);
            return Err(StreamError::GroupNotFound { model });
        }

        if let Some(geometries) = self.loaded.get(&model) {
            let all: GeometrySets = HashMap::from([(model, geometries.keys().copied().collect())]);
            self.unload_lost_geometries(&all)?;
        }
        self.loaded.remove(&model);
        self.culler.remove_model(model);
        self.models.remove(&model);
        self.in_flight.retain(|(owner, _), _| *owner != model);
        self.fragments.remove_group(model);
        info!("Removed model {}", model);
        Ok(())
    }

    /// Abort fetches and release every fragment and the culler. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.enabled = false;

        // Dropping the set aborts the remaining fetches
        self.tasks = JoinSet::new();
        self.task_files.clear();
        self.semaphore.close();
        self.in_flight.clear();

        self.culler.dispose();
        self.fragments.dispose();
        self.loaded.clear();
        self.models.clear();
        self.on_fragments_loaded.reset();
        self.on_fragments_deleted.reset();
        info!("Stream loader disposed");
    }
}

impl Drop for FragmentStreamLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}
