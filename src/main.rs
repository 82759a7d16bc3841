use anyhow::Context;
use cullstream::assets::StreamLoaderSettings;
use cullstream::config::{load_settings, save_settings};
use cullstream::networking::{FileStorage, HttpStorage, RemoteStorage};
use cullstream::rendering::WgpuVisibilityTarget;
use cullstream::utils::logging::init_logging;
use cullstream::{Camera, EngineSettings, FragmentStreamLoader, SoftwareTarget, VisibilityTarget};
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ORBIT_STEPS: u32 = 120;
const ORBIT_STEP: f32 = std::f32::consts::TAU / ORBIT_STEPS as f32;

fn usage() -> String {
    format!("usage: {} <manifest.json> [storage-dir]", cullstream::APP_NAME)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let manifest_path = PathBuf::from(args.next().ok_or_else(|| anyhow::anyhow!(usage()))?);
    let storage_dir = args.next().map(PathBuf::from);

    let settings = EngineSettings::load(None)?;
    init_logging(&settings.logging)?;
    info!("{} {} starting", cullstream::APP_NAME, cullstream::VERSION);

    // First run: write the effective settings out for editing
    if load_settings().is_none() {
        if let Err(e) = save_settings(&settings) {
            warn!("Could not save default settings: {}", e);
        }
    }

    let manifest = std::fs::read(&manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let manifest = StreamLoaderSettings::from_json(&manifest)?;

    let storage: Arc<dyn RemoteStorage> = match storage_dir {
        Some(dir) => Arc::new(FileStorage::new(dir)),
        None => Arc::new(HttpStorage::new(settings.streaming.storage_url.clone())?),
    };

    let (width, height) = (settings.culler.width, settings.culler.height);
    let (target, device): (Box<dyn VisibilityTarget>, _) =
        match WgpuVisibilityTarget::request(width, height).await {
            Ok(target) => {
                let device = target.device();
                (Box::new(target) as Box<dyn VisibilityTarget>, Some(device))
            }
            Err(e) => {
                warn!("GPU visibility target unavailable ({}), using software target", e);
                (Box::new(SoftwareTarget::new(width, height)) as Box<dyn VisibilityTarget>, None)
            }
        };

    let mut loader = FragmentStreamLoader::new(storage, target, &settings)?;
    if let Some(device) = device {
        loader = loader.with_device(device);
    }
    loader.on_fragments_loaded.add(|fragments| info!("{} fragments loaded", fragments.len()));
    loader.on_fragments_deleted.add(|fragments| info!("{} fragments deleted", fragments.len()));

    let model = loader.load(manifest, settings.streaming.coordinate).await?;

    let mut camera = Camera::new(Vec3::new(0.0, 20.0, 60.0), Vec3::ZERO, width as f32 / height as f32);
    for step in 0..ORBIT_STEPS {
        camera.orbit(ORBIT_STEP);
        // The camera moved every step
        loader.culler_mut().set_needs_update();
        loader.tick(&camera)?;
        if step % 30 == 0 {
            info!("Step {}: {:?}", step, loader.stats());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    loader.flush().await?;
    info!(
        "Model {} done: {} fragments resident, {:?}",
        model,
        loader.fragments().group(model).map_or(0, |group| group.len()),
        loader.stats()
    );
    loader.dispose();
    Ok(())
}
