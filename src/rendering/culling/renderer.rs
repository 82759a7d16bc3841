use super::color::{ColorAllocator, ColorKey};
use super::decoder::{DecodeJob, DecodeWorker};
use super::differ::{ViewUpdate, VisibilityDiffer};
use super::material::{FlatMaterial, MaterialCache};
use super::proxy::{CullableObject, MaterialSlots, ProxyMesh, ProxyScene};
use super::target::VisibilityTarget;
use super::CullResult;
use crate::config::CullerSettings;
use crate::rendering::camera::Camera;
use crate::utils::Event;
use glam::Vec4;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Idle,
    Reading { pass: u64 },
    Decoding { pass: u64 },
}

/// Determines which tracked objects are visible on screen.
///
/// A pass renders the proxy scene, reads the frame back and decodes it on the
/// decoder thread; `poll` drives it forward without blocking. Only one pass is
/// in flight at a time.
pub struct CullerRenderer<K: Eq + Hash> {
    pub enabled: bool,
    /// Request a pass on the next `update_visibility` or auto-update tick
    pub needs_update: bool,
    settings: CullerSettings,
    target: Box<dyn VisibilityTarget>,
    colors: ColorAllocator,
    materials: MaterialCache,
    placeholder: Arc<FlatMaterial>,
    scene: ProxyScene,
    keys: HashMap<K, ColorKey>,
    differ: VisibilityDiffer<K>,
    decoder: Option<DecodeWorker>,
    state: PassState,
    passes: u64,
    last_auto_update: Option<Instant>,
    disposed: bool,
    pub on_view_updated: Event<ViewUpdate<K>>,
    pub on_disposed: Event<()>,
}

impl<K> CullerRenderer<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new(settings: CullerSettings, target: Box<dyn VisibilityTarget>) -> CullResult<Self> {
        let decoder = DecodeWorker::spawn(settings.parallel_decode_threshold)?;
        let (width, height) = target.size();
        if (width, height) != (settings.width, settings.height) {
            warn!(
                "Visibility target is {}x{}, settings ask for {}x{}",
                width, height, settings.width, settings.height
            );
        }
        info!("Culler renderer ready ({}x{})", width, height);

        let mut scene = ProxyScene::new();
        scene.set_clipping_planes(settings.clipping_planes.iter().copied().map(Vec4::from_array).collect());

        Ok(Self {
            enabled: true,
            needs_update: false,
            settings,
            target,
            colors: ColorAllocator::new(),
            materials: MaterialCache::new(),
            placeholder: Arc::new(FlatMaterial::placeholder()),
            scene,
            keys: HashMap::new(),
            differ: VisibilityDiffer::new(),
            decoder: Some(decoder),
            state: PassState::Idle,
            passes: 0,
            last_auto_update: None,
            disposed: false,
            on_view_updated: Event::new(),
            on_disposed: Event::new(),
        })
    }

    /// Start tracking `object` under `key`.
    ///
    /// Returns false when the culler is disabled or nothing of the object can
    /// occlude. Adding a key that is already tracked replaces its proxy.
    pub fn add(&mut self, key: K, object: &CullableObject) -> bool {
        if !self.enabled {
            return false;
        }
        if object.materials.all_transparent() {
            debug!("Skipping fully transparent object {:?}", key);
            return false;
        }
        if self.keys.contains_key(&key) {
            self.remove(&key);
        }

        let color = self.colors.next();
        let material = self.materials.get_or_create(color);
        let slots = match &object.materials {
            MaterialSlots::Single(_) => vec![material],
            MaterialSlots::Multi(infos) => infos
                .iter()
                .map(|info| {
                    if info.is_transparent() {
                        Arc::clone(&self.placeholder)
                    } else {
                        Arc::clone(&material)
                    }
                })
                .collect(),
        };

        self.scene.insert(ProxyMesh::new(
            color,
            Arc::clone(&object.geometry),
            slots,
            object.world_transforms(),
        ));
        self.differ.register(color, key.clone());
        self.keys.insert(key, color);
        true
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let Some(color) = self.keys.remove(key) else {
            return false;
        };
        self.scene.remove(color);
        self.materials.remove(color);
        self.differ.unregister(color);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    pub fn color_of(&self, key: &K) -> Option<ColorKey> {
        self.keys.get(key).copied()
    }

    pub fn key_for(&self, color: ColorKey) -> Option<&K> {
        self.differ.resolve(color)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn scene(&self) -> &ProxyScene {
        &self.scene
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Shared material of transparent slots in multi-material proxies
    pub fn placeholder(&self) -> &Arc<FlatMaterial> {
        &self.placeholder
    }

    pub fn settings(&self) -> &CullerSettings {
        &self.settings
    }

    pub fn clipping_planes(&self) -> &[Vec4] {
        self.scene.clipping_planes()
    }

    /// Replace the clipping planes and request a pass
    pub fn set_clipping_planes(&mut self, planes: Vec<Vec4>) {
        self.settings.clipping_planes = planes.iter().map(|plane| plane.to_array()).collect();
        self.scene.set_clipping_planes(planes);
        self.needs_update = true;
    }

    /// Number of passes started so far
    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    pub fn is_busy(&self) -> bool {
        self.state != PassState::Idle
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Render the proxy scene and start reading it back.
    ///
    /// Does nothing unless `needs_update` or `force` is set. While a pass is in
    /// flight the request is kept in `needs_update` and served later.
    pub fn update_visibility(&mut self, camera: &Camera, force: bool) -> CullResult<bool> {
        if !self.enabled || (!self.needs_update && !force) {
            return Ok(false);
        }
        if self.is_busy() {
            self.needs_update = true;
            debug!("Visibility pass still in flight, coalescing request");
            return Ok(false);
        }

        self.passes += 1;
        let pass = self.passes;
        self.target.render(&self.scene, camera)?;
        self.target.begin_readback()?;
        self.state = PassState::Reading { pass };
        self.needs_update = false;
        debug!("Started visibility pass {} ({} proxies)", pass, self.scene.len());
        Ok(true)
    }

    /// Advance the in-flight pass. Returns the update once the frame is decoded.
    pub fn poll(&mut self) -> CullResult<Option<ViewUpdate<K>>> {
        if let PassState::Reading { pass } = self.state {
            match self.target.poll_readback() {
                Ok(Some(buffer)) => {
                    let submitted = match &self.decoder {
                        Some(decoder) => decoder.submit(DecodeJob { pass, buffer }),
                        None => Ok(()),
                    };
                    if let Err(e) = submitted {
                        self.abort_pass();
                        return Err(e);
                    }
                    self.state = PassState::Decoding { pass };
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!("Visibility readback failed: {}", e);
                    self.abort_pass();
                    return Err(e);
                }
            }
        }

        let PassState::Decoding { pass } = self.state else {
            return Ok(None);
        };
        let Some(decoder) = &self.decoder else {
            return Ok(None);
        };

        let frame = match decoder.try_recv() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.abort_pass();
                return Err(e);
            }
        };
        if frame.pass != pass {
            debug!("Dropping stale decode result for pass {}", frame.pass);
            return Ok(None);
        }

        self.state = PassState::Idle;
        let update = self.differ.diff(&frame.colors, pass);
        debug!(
            "Visibility pass {}: {} visible, {} seen, {} unseen",
            pass,
            update.visible.len(),
            update.seen.len(),
            update.unseen.len()
        );
        self.on_view_updated.trigger(&update);
        Ok(Some(update))
    }

    /// Auto-update on the configured interval, then poll
    pub fn tick(&mut self, camera: &Camera) -> CullResult<Option<ViewUpdate<K>>> {
        if self.settings.auto_update {
            let due = self
                .last_auto_update
                .map_or(true, |last| last.elapsed() >= self.settings.update_interval());
            if due {
                self.last_auto_update = Some(Instant::now());
                self.update_visibility(camera, false)?;
            }
        }
        self.poll()
    }

    /// Poll until the in-flight pass completes or `timeout` elapses
    pub fn finish_pass(&mut self, timeout: Duration) -> CullResult<Option<ViewUpdate<K>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(update) = self.poll()? {
                return Ok(Some(update));
            }
            if !self.is_busy() || Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn abort_pass(&mut self) {
        self.state = PassState::Idle;
        self.needs_update = true;
    }

    /// Release the target, the proxy scene and the decoder thread. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.enabled = false;
        self.disposed = true;
        self.needs_update = false;
        self.state = PassState::Idle;

        if let Some(mut decoder) = self.decoder.take() {
            decoder.shutdown();
        }
        self.target.release();
        self.scene.clear();
        self.materials.clear();
        self.keys.clear();
        self.differ.reset();
        self.colors.reset();

        self.on_view_updated.reset();
        self.on_disposed.trigger(&());
        self.on_disposed.reset();
        info!("Culler renderer disposed");
    }
}
