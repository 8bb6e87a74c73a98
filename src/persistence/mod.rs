//! Graph persistence: snapshot codec and storage backends.
//!
//! Snapshots route through the [`StorageBackend`] seam. Directory-layout
//! databases use [`DirectoryBackend`] (`{db}/{table}_{column}.hnsw`,
//! written atomically via temp file + rename); single-file databases
//! adapt their named-block API to the same trait. Encryption, if any, is
//! a property of the backend the host supplies; the snapshot bytes are
//! plaintext as far as this crate is concerned.

mod snapshot;

pub(crate) use snapshot::{decode_snapshot, encode_snapshot};

use crate::codec::HeaderError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while reading a snapshot. Any of these refuses the
/// whole snapshot; an index is never partially loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The magic bytes are not `"HNSW"`.
    #[error("bad snapshot magic: {0:?}")]
    BadMagic([u8; 4]),

    /// The snapshot version is newer than this reader understands.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u8),

    /// The trailing crc32 does not match the content.
    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the snapshot.
        stored: u32,
        /// Checksum computed over the content.
        computed: u32,
    },

    /// The snapshot ends before its declared content does.
    #[error("truncated snapshot at offset {0}")]
    Truncated(usize),

    /// Unknown metric code.
    #[error("unknown metric code: {0}")]
    UnknownMetric(u8),

    /// Unknown quantization code.
    #[error("unknown quantization code: {0}")]
    UnknownQuantization(u8),

    /// The snapshot disagrees with the descriptor it is being restored
    /// under (dimension, metric, quantization, or `m`).
    #[error("snapshot does not match descriptor: {0}")]
    DescriptorMismatch(String),

    /// A stored vector value failed codec validation.
    #[error("stored vector rejected: {0}")]
    Value(#[from] HeaderError),

    /// A structural invariant does not hold (mutual membership, degree
    /// bound, entry point, id ordering, dangling neighbor).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}

/// Byte-blob storage seam for snapshots and the registry catalog.
///
/// `atomic_write` must publish the blob all-or-nothing: a crash mid-write
/// leaves either the old content or the new, never a torn mix.
pub trait StorageBackend: Send + Sync {
    /// Reads a named blob; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// I/O failure other than absence.
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Atomically replaces a named blob.
    ///
    /// # Errors
    ///
    /// I/O failure; on error the previous content must survive.
    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Deletes a named blob; absence is not an error.
    ///
    /// # Errors
    ///
    /// I/O failure.
    fn delete(&self, name: &str) -> io::Result<()>;
}

/// In-memory backend for tests and for hosts that stage blobs themselves.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(name).cloned())
    }

    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.blobs.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        self.blobs.lock().remove(name);
        Ok(())
    }
}

/// Filesystem backend rooted at the database directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Creates a backend rooted at `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// I/O failure creating the directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        // Blob names come from table/column identifiers; refuse anything
        // that would escape the root.
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob name: {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl StorageBackend for DirectoryBackend {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)?) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn atomic_write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let target = self.path_for(name)?;
        let tmp = self.root.join(format!("{name}.tmp"));
        fs::write(&tmp, data)?;
        // rename is atomic within a filesystem; the old snapshot survives
        // any crash before this point.
        fs::rename(&tmp, &target)?;
        log::debug!("wrote blob {name} ({} bytes)", data.len());
        Ok(())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.read("a").unwrap(), None);
        backend.atomic_write("a", b"hello").unwrap();
        assert_eq!(backend.read("a").unwrap().as_deref(), Some(&b"hello"[..]));
        backend.delete("a").unwrap();
        backend.delete("a").unwrap();
        assert_eq!(backend.read("a").unwrap(), None);
    }

    #[test]
    fn directory_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path()).unwrap();
        backend.atomic_write("docs_embedding.hnsw", b"snapshot").unwrap();
        assert_eq!(
            backend.read("docs_embedding.hnsw").unwrap().as_deref(),
            Some(&b"snapshot"[..])
        );
        backend.atomic_write("docs_embedding.hnsw", b"replaced").unwrap();
        assert_eq!(
            backend.read("docs_embedding.hnsw").unwrap().as_deref(),
            Some(&b"replaced"[..])
        );
        backend.delete("docs_embedding.hnsw").unwrap();
        assert_eq!(backend.read("docs_embedding.hnsw").unwrap(), None);
    }

    #[test]
    fn directory_backend_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path()).unwrap();
        assert!(backend.read("../etc/passwd").is_err());
        assert!(backend.atomic_write("a/b", b"x").is_err());
        assert!(backend.read("").is_err());
    }
}
