use std::path::PathBuf;

use dbdock_common::DockError;
use thiserror::Error;

pub mod json;
pub mod storage;

pub use json::JsonFileStore;
pub use storage::{InMemoryStore, InstanceStore};

// Error Types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Settings file {} could not be accessed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Settings could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for DockError {
    fn from(err: StoreError) -> Self {
        DockError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
