use std::io;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::model::BookingPolicy;

use super::{ConfigurationProvider, StoreError};

/// Booking policy kept as a JSON document owned outside this process.
/// Re-read on every call, so edits apply without a restart.
pub struct FileConfigurationProvider {
    path: PathBuf,
}

impl FileConfigurationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigurationProvider {
    async fn configuration(&self) -> Result<Option<BookingPolicy>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("{}: {e}", self.path.display())))
    }
}

/// Fixed policy (or none), set at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigurationProvider {
    policy: Option<BookingPolicy>,
}

impl StaticConfigurationProvider {
    pub fn new(policy: Option<BookingPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ConfigurationProvider for StaticConfigurationProvider {
    async fn configuration(&self) -> Result<Option<BookingPolicy>, StoreError> {
        Ok(self.policy.clone())
    }
}
