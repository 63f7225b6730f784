//! Persistence port
//!
//! The engine hands serialised project bytes to whoever owns storage and
//! asks for them back; it never decides where they live. A failed save is
//! reported to the caller and leaves the in-memory session untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LayerdeckError, Result};

/// Storage for one serialised project
pub trait PersistencePort {
    /// Read the stored bytes, or `None` if nothing has been saved yet
    fn load(&mut self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored bytes
    fn save(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Write `bytes` to a `.part` sibling, then rename over `path`
///
/// Readers never observe a half-written file; on error the partial file
/// is removed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let part = part_path(path);
    let result = fs::write(&part, bytes).and_then(|()| fs::rename(&part, path));
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Project stored as a single file
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the project is stored in
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistencePort for FilePersistence {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "project loaded");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LayerdeckError::Persistence {
                reason: format!("cannot read {}: {}", self.path.display(), e),
            }),
        }
    }

    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path, bytes).map_err(|e| LayerdeckError::Persistence {
            reason: format!("cannot write {}: {}", self.path.display(), e),
        })?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "project saved");
        Ok(())
    }
}

/// In-memory store, handy for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    data: Option<Vec<u8>>,
    fail_saves: bool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects every save, for exercising failure paths
    pub fn failing() -> Self {
        Self {
            data: None,
            fail_saves: true,
        }
    }

    /// Bytes stored so far
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

impl PersistencePort for MemoryPersistence {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.data.clone())
    }

    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_saves {
            return Err(LayerdeckError::Persistence {
                reason: "storage is read-only".to_string(),
            });
        }
        self.data = Some(bytes.to_vec());
        Ok(())
    }
}
