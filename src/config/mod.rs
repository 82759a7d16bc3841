pub mod settings;

// Re-export commonly used types
pub use settings::{
    EngineSettings, StreamingProfile, CullerSettings, StreamingSettings, LoggingSettings,
    save_settings, save_settings_to, load_settings,
};
