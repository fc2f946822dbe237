use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

/// One-record-per-file JSON persistence, shared by the instance, health and
/// migration stores, laid out on disk as `<stateDir>/<kind>/<id>.json`.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so a crash never leaves a record half-written — `rename` is
/// atomic on the same filesystem.
#[derive(Debug, Clone)]
pub struct RecordDir {
    dir: PathBuf,
}

impl RecordDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn ensure(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn write<T: Serialize>(&self, id: &str, record: &T) -> Result<(), StoreError> {
        self.ensure()?;
        let final_path = self.record_path(id);
        let tmp_path = self.dir.join(format!(".{id}.{}.tmp", Uuid::new_v4()));

        let body = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp_path, &body).map_err(|e| StoreError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::Io {
            path: final_path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let path = self.record_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Load every `*.json` record in the directory. A missing directory is
    /// treated as empty rather than an error, so a fresh `stateDir` needs no
    /// special-casing at startup.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.dir.display().to_string(),
                    source: e,
                })
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.dir.display().to_string(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            match serde_json::from_slice(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed record");
                    continue;
                }
            }
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}
