//! Exact nearest-neighbour index over squared L2 distance.
//!
//! Vectors live in memory in slot order and are mirrored to an append-only
//! file, all fields in native byte order:
//!
//! ```text
//! offset 0   b"FGIX"
//! offset 4   u32      format version (1)
//! offset 8   u64      dimension
//! offset 16  f32 × dimension, one record per slot
//! ```
//!
//! An insert appends one record and syncs it; the file is never rewritten.
//! The index has a single owner and no internal locking.

use bytemuck::{Pod, Zeroable};
use facegrab_core::types::squared_l2;
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem::{size_of, size_of_val};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: [u8; 4] = *b"FGIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = size_of::<Header>();

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a facegrab index file")]
    BadHeader(String),
    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),
    #[error("vector dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector is empty")]
    EmptyVector,
    #[error("vector contains non-finite values")]
    NonFinite,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    version: u32,
    dimension: u64,
}

/// Best match returned by [`FlatIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    /// Squared L2 distance to the query.
    pub distance: f32,
}

pub struct FlatIndex {
    path: PathBuf,
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Load the index at `path`, or start an empty one if the file is absent.
    ///
    /// When `dimension` is given it must match what the file already holds.
    pub fn open(path: impl Into<PathBuf>, dimension: Option<usize>) -> Result<Self, IndexError> {
        let path = path.into();
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path, dimension)),
            Err(e) => return Err(io_error(&path, e)),
        };
        let file_len = file.metadata().map_err(|e| io_error(&path, e))?.len();
        if file_len == 0 {
            return Ok(Self::empty(path, dimension));
        }

        let stored = read_header(&path, &mut file, file_len)?;
        if let Some(configured) = dimension {
            if configured != stored {
                return Err(IndexError::DimensionMismatch {
                    expected: stored,
                    actual: configured,
                });
            }
        }

        let bad = || IndexError::BadHeader(path.display().to_string());
        let record_len = stored.checked_mul(size_of::<f32>()).ok_or_else(bad)? as u64;
        let body_len = file_len - HEADER_LEN as u64;
        let complete = body_len / record_len;
        let valid_len = complete * record_len;
        if valid_len != body_len {
            tracing::warn!(
                path = %path.display(),
                trailing_bytes = body_len - valid_len,
                "discarding partial trailing record"
            );
            truncate(&path, HEADER_LEN as u64 + valid_len)?;
        }

        // `valid_len` is bounded by the file length, so the record count fits.
        let mut data = vec![0f32; complete as usize * stored];
        file.read_exact(bytemuck::cast_slice_mut(&mut data))
            .map_err(|e| io_error(&path, e))?;

        tracing::info!(path = %path.display(), vectors = complete, dimension = stored, "vector index loaded");
        Ok(Self {
            path,
            dimension: Some(stored),
            data,
        })
    }

    fn empty(path: PathBuf, dimension: Option<usize>) -> Self {
        tracing::info!(path = %path.display(), ?dimension, "vector index not found, starting empty");
        Self {
            path,
            dimension,
            data: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fixed vector dimension, or `None` until the first insert when unconfigured.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        match self.dimension {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stored vector for `slot`.
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        self.data.get(slot * dim..(slot + 1) * dim)
    }

    /// Append a vector and return its slot (the number of vectors stored before it).
    ///
    /// The first insert locks the dimension if none was configured.
    pub fn insert(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        check_vector(vector)?;
        let dim = self.expect_dimension(vector.len())?.unwrap_or(vector.len());

        let slot = self.len();
        self.append_record(dim, vector)?;
        self.dimension = Some(dim);
        self.data.extend_from_slice(vector);

        tracing::debug!(slot, dim, "vector appended");
        Ok(slot)
    }

    /// Exact 1-nearest-neighbour by squared L2; ties go to the lowest slot.
    ///
    /// Returns `None` on an empty index.
    pub fn search(&self, query: &[f32]) -> Result<Option<Neighbor>, IndexError> {
        check_vector(query)?;
        let Some(dim) = self.expect_dimension(query.len())? else {
            return Ok(None);
        };

        let best = self
            .data
            .par_chunks_exact(dim)
            .enumerate()
            .map(|(slot, stored)| Neighbor {
                slot,
                distance: squared_l2(stored, query),
            })
            .min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.slot.cmp(&b.slot))
            });
        Ok(best)
    }

    fn expect_dimension(&self, actual: usize) -> Result<Option<usize>, IndexError> {
        match self.dimension {
            Some(expected) if expected != actual => {
                Err(IndexError::DimensionMismatch { expected, actual })
            }
            other => Ok(other),
        }
    }

    fn append_record(&self, dim: usize, vector: &[f32]) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        let existing = file
            .metadata()
            .map_err(|e| io_error(&self.path, e))?
            .len();

        let mut buf = Vec::with_capacity(HEADER_LEN + size_of_val(vector));
        if existing == 0 {
            let header = Header {
                magic: MAGIC,
                version: FORMAT_VERSION,
                dimension: dim as u64,
            };
            buf.extend_from_slice(bytemuck::bytes_of(&header));
        }
        buf.extend_from_slice(bytemuck::cast_slice(vector));

        file.write_all(&buf)
            .and_then(|_| file.sync_data())
            .map_err(|e| io_error(&self.path, e))
    }
}

fn check_vector(vector: &[f32]) -> Result<(), IndexError> {
    if vector.is_empty() {
        return Err(IndexError::EmptyVector);
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::NonFinite);
    }
    Ok(())
}

/// Read and validate the header, returning the stored dimension.
fn read_header(path: &Path, file: &mut File, file_len: u64) -> Result<usize, IndexError> {
    let bad = || IndexError::BadHeader(path.display().to_string());
    if file_len < HEADER_LEN as u64 {
        return Err(bad());
    }
    let mut header = Header::zeroed();
    file.read_exact(bytemuck::bytes_of_mut(&mut header))
        .map_err(|e| io_error(path, e))?;
    if header.magic != MAGIC {
        return Err(bad());
    }
    if header.version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedVersion(header.version));
    }
    match header.dimension {
        0 => Err(bad()),
        d => usize::try_from(d).map_err(|_| bad()),
    }
}

fn truncate(path: &Path, len: u64) -> Result<(), IndexError> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_len(len))
        .map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: io::Error) -> IndexError {
    IndexError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir, dimension: Option<usize>) -> FlatIndex {
        FlatIndex::open(dir.path().join("faces.fgix"), dimension).unwrap()
    }

    #[test]
    fn test_empty_index_search_returns_none() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir, None);
        assert!(index.is_empty());
        assert_eq!(index.search(&[1.0, 0.0]).unwrap(), None);
        assert!(!index.path().exists(), "file is created lazily");
    }

    #[test]
    fn test_slots_follow_insertion_order() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, None);
        let vectors = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.5, 0.5, 0.0]];
        for (expected, v) in vectors.iter().enumerate() {
            assert_eq!(index.insert(v).unwrap(), expected);
        }
        assert_eq!(index.len(), 4);
        for (slot, v) in vectors.iter().enumerate() {
            assert_eq!(index.vector(slot).unwrap(), v);
            let hit = index.search(v).unwrap().unwrap();
            assert_eq!(hit, Neighbor { slot, distance: 0.0 });
        }
        assert!(index.vector(4).is_none());
    }

    #[test]
    fn test_search_returns_squared_distance() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, None);
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[0.0, 3.0]).unwrap();
        let hit = index.search(&[0.0, 1.0]).unwrap().unwrap();
        assert_eq!(hit.slot, 0);
        assert!((hit.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_resolve_to_lowest_slot() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, None);
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[1.0, 0.0]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0]).unwrap().unwrap().slot, 0);
    }

    #[test]
    fn test_dimension_locks_on_first_insert() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, None);
        assert_eq!(index.dimension(), None);
        index.insert(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(index.dimension(), Some(3));

        let err = index.insert(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        let err = index.search(&[1.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_configured_dimension_enforced_before_first_insert() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, Some(4));
        assert!(matches!(
            index.insert(&[1.0, 2.0]).unwrap_err(),
            IndexError::DimensionMismatch { expected: 4, actual: 2 }
        ));
        assert!(!index.path().exists());
    }

    #[test]
    fn test_reopen_preserves_vectors() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = index_in(&dir, None);
            index.insert(&[0.25, -1.5]).unwrap();
            index.insert(&[3.0, 4.0]).unwrap();
        }
        let mut index = index_in(&dir, Some(2));
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector(1).unwrap(), &[3.0, 4.0]);
        assert_eq!(index.insert(&[9.0, 9.0]).unwrap(), 2);
        assert_eq!(index_in(&dir, None).len(), 3);
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() {
        let dir = TempDir::new().unwrap();
        index_in(&dir, None).insert(&[1.0, 0.0]).unwrap();
        let err = FlatIndex::open(dir.path().join("faces.fgix"), Some(512))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 2, actual: 512 }
        ));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.fgix");
        index_in(&dir, None).insert(&[1.0, 2.0]).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAA, 0xBB, 0xCC]).unwrap();
        drop(file);

        let index = index_in(&dir, None);
        assert_eq!(index.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), (HEADER_LEN + 8) as u64);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.fgix");
        fs::write(&path, b"not an index at all").unwrap();
        assert!(matches!(
            FlatIndex::open(&path, None).err().unwrap(),
            IndexError::BadHeader(_)
        ));
    }

    #[test]
    fn test_rejects_non_finite_and_empty() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, None);
        assert!(matches!(index.insert(&[]).unwrap_err(), IndexError::EmptyVector));
        assert!(matches!(
            index.insert(&[f32::NAN, 1.0]).unwrap_err(),
            IndexError::NonFinite
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_rejects_oversized_dimension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.fgix");
        let header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dimension: 1 << 62,
        };
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            FlatIndex::open(&path, None).err().unwrap(),
            IndexError::BadHeader(_)
        ));
    }

    #[test]
    fn test_records_are_raw_f32_after_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faces.fgix");
        let mut index = index_in(&dir, None);
        index.insert(&[1.5, -2.0]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"FGIX");
        assert_eq!(bytes.len(), HEADER_LEN + 8);
        let record: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[HEADER_LEN..]);
        assert_eq!(record, vec![1.5, -2.0]);
    }
}
