//! Durable JSON documents, one per concern, written atomically.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stores a single JSON document at a fixed path. A missing file is a
/// well-defined state (`load` returns `Ok(None)`); an unparsable file is
/// reported as `Corrupt` so callers can refuse to proceed instead of
/// silently rebuilding state.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, DocumentError> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(source) => Err(DocumentError::Corrupt {
                    path: self.path.clone(),
                    source,
                }),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DocumentError::Io(err)),
        }
    }

    /// Writes via a temporary sibling file and renames into place, so the
    /// document on disk is always a fully-written version.
    pub fn persist<T: Serialize>(&self, value: &T) -> Result<(), DocumentError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp_file = fs::File::create(&tmp_path)?;
        let payload = serde_json::to_vec_pretty(value)?;
        tmp_file.write_all(&payload)?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(
            "event=document_persisted path={:?} bytes={}",
            self.path,
            payload.len()
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("document {path:?} is unparsable: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocumentError {
    /// True when the document exists on disk but cannot be decoded.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, DocumentError::Corrupt { .. })
    }
}
