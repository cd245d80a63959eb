//! facegrab-store — Persistence and orchestration for registered faces.
//!
//! A flat squared-L2 vector index on disk, a SQLite table of names joined to
//! index slots, and [`FaceRegistry`], which ties both to an embedding
//! extractor.

pub mod config;
pub mod index;
pub mod metadata;
pub mod registry;
pub mod uploads;

pub use config::{Config, ConfigError};
pub use index::{FlatIndex, IndexError, Neighbor};
pub use metadata::{FaceRecord, MetadataError, MetadataStore};
pub use registry::{FaceRegistry, Recognition, Registration, RegistryError, RegistryStatus};
pub use uploads::UploadDir;
