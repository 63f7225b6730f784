//! State Management Module
//!
//! Project documents and the storage ports they are saved through.

pub mod persistence;
pub mod project;

pub use persistence::{write_atomic, FilePersistence, MemoryPersistence, PersistencePort};
pub use project::{LayerRecord, ProjectDocument, PROJECT_VERSION};
