// cullstream: visibility culling and on-demand geometry streaming
// Color-ID visibility queries drive lazy loading and eviction of remote geometry

pub mod utils;
pub mod config;
pub mod networking;
pub mod rendering;
pub mod assets;
pub mod streaming;

// Re-export commonly used types for convenience
pub use config::{EngineSettings, CullerSettings, StreamingSettings, LoggingSettings};
pub use rendering::camera::Camera;
pub use rendering::culling::{
    CullerRenderer, CullError, CullResult, CullableObject, GeometryCuller, GeometryKey,
    GeometryViewUpdate, SoftwareTarget, ViewUpdate, VisibilityTarget,
};
pub use streaming::{FragmentStreamLoader, StreamError, StreamResult};
pub use networking::{RemoteStorage, StorageError, StorageResult};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
