use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use directories::ProjectDirs;
use serde::{Serialize, Deserialize};

const CONFIG_FILE: &str = "cullstream.toml";
const ENV_PREFIX: &str = "CULLSTREAM";

// =============================================================================
// Streaming Profiles
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingProfile {
    Low,      // Small visibility target, slow refresh, aggressive eviction
    Balanced, // Default for mid-range systems
    High,     // Large target, fast refresh, keeps geometry resident longer
    Custom,   // User-defined granular controls
}

impl Default for StreamingProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CullerSettings {
    /// Off-screen visibility target width in pixels
    pub width: u32,
    /// Off-screen visibility target height in pixels
    pub height: u32,
    /// Run `update_visibility` from `tick` on a fixed interval
    pub auto_update: bool,
    pub update_interval_ms: u64,
    /// Pixel buffers at least this large are scanned in parallel
    pub parallel_decode_threshold: usize,
    /// World-space planes `[nx, ny, nz, constant]` applied to every proxy;
    /// anything on the negative side is cut away and cannot be seen
    pub clipping_planes: Vec<[f32; 4]>,
}

impl CullerSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl Default for CullerSettings {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            auto_update: true,
            update_interval_ms: 1000,
            parallel_decode_threshold: 256 * 256 * 4,
            clipping_planes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Base URL that remote file ids are appended to
    pub storage_url: String,
    /// Consecutive passes a loaded geometry may stay unseen before eviction.
    /// Geometries within the grace period are hidden instead of unloaded.
    pub unload_after_passes: u32,
    pub max_concurrent_fetches: usize,
    /// Align every loaded model to the first model's coordination matrix
    pub coordinate: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            storage_url: "http://localhost:8080/storage?fileId=".to_string(),
            unload_after_passes: 0,
            max_concurrent_fetches: 8,
            coordinate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
    pub wgpu_logging: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            wgpu_logging: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub profile: StreamingProfile,
    pub culler: CullerSettings,
    pub streaming: StreamingSettings,
    pub logging: LoggingSettings,
}

impl EngineSettings {
    pub fn for_profile(profile: StreamingProfile) -> Self {
        let (culler, unload_after_passes, max_concurrent_fetches) = match profile {
            StreamingProfile::Low => (
                CullerSettings {
                    width: 256,
                    height: 256,
                    update_interval_ms: 2000,
                    ..CullerSettings::default()
                },
                0,
                2,
            ),
            StreamingProfile::Balanced => (CullerSettings::default(), 0, 8),
            StreamingProfile::High => (
                CullerSettings {
                    width: 1024,
                    height: 1024,
                    update_interval_ms: 250,
                    ..CullerSettings::default()
                },
                4,
                16,
            ),
            StreamingProfile::Custom => {
                // For custom, return defaults that user can modify
                return Self {
                    profile,
                    ..Self::default()
                };
            }
        };

        Self {
            profile,
            culler,
            streaming: StreamingSettings {
                unload_after_passes,
                max_concurrent_fetches,
                ..StreamingSettings::default()
            },
            logging: LoggingSettings::default(),
        }
    }

    /// Layer defaults, a TOML file and `CULLSTREAM__*` environment variables.
    ///
    /// An explicit `path` must exist; without one the platform config file is
    /// read when present. Nested keys use `__`, e.g. `CULLSTREAM__CULLER__WIDTH=1024`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineSettings::default())?);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => match settings_path() {
                Some(path) => builder.add_source(config::File::from(path).required(false)),
                None => builder,
            },
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<EngineSettings>()?;

        tracing::debug!("Loaded engine settings: {:?}", settings);
        Ok(settings)
    }
}

// Configuration file management
fn settings_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "cullstream", "cullstream")
        .map(|proj| proj.config_dir().join(CONFIG_FILE))
}

pub fn save_settings_to(path: &Path, settings: &EngineSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let toml = toml::to_string_pretty(settings)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, toml)
}

pub fn save_settings(settings: &EngineSettings) -> std::io::Result<()> {
    match settings_path() {
        Some(path) => save_settings_to(&path, settings),
        None => Ok(()),
    }
}

pub fn load_settings() -> Option<EngineSettings> {
    let path = settings_path()?;
    let data = fs::read_to_string(path).ok()?;
    toml::from_str::<EngineSettings>(&data).ok()
}
