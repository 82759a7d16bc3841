//! Remote storage backends
//!
//! `HttpStorage` appends the file id to a base URL (the storage service takes
//! the id as a query parameter), `FileStorage` serves a local directory with the
//! same layout, and `MemoryStorage` keeps blobs in process and records every
//! fetch.

use super::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Retrieve the blob stored under `file_id`
    async fn fetch(&self, file_id: &str) -> StorageResult<Bytes>;
}

/// HTTP storage client
pub struct HttpStorage {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>) -> StorageResult<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url).map_err(|e| StorageError::Http {
            file_id: String::new(),
            reason: format!("invalid base url {}: {}", base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("cullstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Http {
                file_id: String::new(),
                reason: e.to_string(),
            })?;

        info!("Using HTTP storage at {}", base_url);
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, file_id: &str) -> String {
        format!("{}{}", self.base_url, file_id)
    }
}

#[async_trait]
impl RemoteStorage for HttpStorage {
    async fn fetch(&self, file_id: &str) -> StorageResult<Bytes> {
        let url = self.url_for(file_id);
        debug!("Requesting file {}", file_id);

        let http_error = |e: reqwest::Error| StorageError::Http {
            file_id: file_id.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(http_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            warn!("File {} not found on storage", file_id);
            return Err(StorageError::NotFound { file_id: file_id.to_string() });
        }
        if !status.is_success() {
            warn!("Failed to download file {}: HTTP {}", file_id, status.as_u16());
            return Err(StorageError::Http {
                file_id: file_id.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let data = response.bytes().await.map_err(http_error)?;
        debug!("Downloaded file {}: {} bytes", file_id, data.len());
        Ok(data)
    }
}

/// Storage backed by a local directory, one file per file id
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, file_id: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(file_id);
        let plain = !file_id.is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StorageError::InvalidFileId { file_id: file_id.to_string() });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteStorage for FileStorage {
    async fn fetch(&self, file_id: &str) -> StorageResult<Bytes> {
        let path = self.resolve(file_id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!("Read file {} ({} bytes)", path.display(), data.len());
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { file_id: file_id.to_string() })
            }
            Err(e) => Err(StorageError::Io {
                file_id: file_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// In-process storage that records every fetch it serves
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
    fetches: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: impl Into<String>, data: impl Into<Bytes>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(file_id.into(), data.into());
    }

    pub fn remove(&self, file_id: &str) -> bool {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(file_id).is_some()
    }

    /// Every fetched file id, in request order
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fetch_count(&self, file_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|id| id.as_str() == file_id)
            .count()
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    async fn fetch(&self, file_id: &str) -> StorageResult<Bytes> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(file_id.to_string());

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(file_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { file_id: file_id.to_string() })
    }
}
