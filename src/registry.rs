//! Memory-bounded index registry.
//!
//! Owns every index keyed by `(table, column)`, gates admission against
//! the configured memory budget, lazily restores snapshots on first use,
//! and evicts least-recently-searched indexes when asked (or, optionally,
//! under memory pressure).
//!
//! Lifecycle per entry: `Unloaded → Loading → Ready ⇄ Evicted → Closed`.
//! The budget is advisory for steady-state writes; only admission and the
//! eviction paths enforce it.

use crate::cancel::CancelToken;
use crate::codec;
use crate::config::ExtensionConfig;
use crate::error::{Error, Result};
use crate::index::{
    FlatIndex, HnswIndex, IndexDescriptor, IndexKey, IndexKind, VectorIndex,
};
use crate::persistence::StorageBackend;
use crate::topk::SearchHit;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Blob name for the persisted descriptor catalog.
const CATALOG_BLOB: &str = "simvec_catalog.bin";

/// Fixed per-index overhead assumed at admission time.
const BASE_INDEX_BYTES: u64 = 4096;

/// Registry-visible lifecycle state of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Descriptor known, nothing in memory yet.
    Unloaded,
    /// A caller is restoring the snapshot right now.
    Loading,
    /// In memory and serving.
    Ready,
    /// Was ready; memory released, descriptor kept.
    Evicted,
    /// Database closed; terminal.
    Closed,
}

impl IndexState {
    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            IndexState::Unloaded => "unloaded",
            IndexState::Loading => "loading",
            IndexState::Ready => "ready",
            IndexState::Evicted => "evicted",
            IndexState::Closed => "closed",
        }
    }
}

/// One row of [`IndexRegistry::enumerate`] output.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    /// Table and column.
    pub key: IndexKey,
    /// Index algorithm.
    pub kind: IndexKind,
    /// Lifecycle state.
    pub state: IndexState,
    /// Bytes currently held in memory (0 unless `Ready`).
    pub memory_bytes: u64,
}

enum EntryState {
    Unloaded,
    Loading,
    Ready(Arc<dyn VectorIndex>),
    Evicted,
    Closed,
}

impl EntryState {
    fn state(&self) -> IndexState {
        match self {
            EntryState::Unloaded => IndexState::Unloaded,
            EntryState::Loading => IndexState::Loading,
            EntryState::Ready(_) => IndexState::Ready,
            EntryState::Evicted => IndexState::Evicted,
            EntryState::Closed => IndexState::Closed,
        }
    }
}

struct RegistryEntry {
    descriptor: IndexDescriptor,
    state: EntryState,
    last_search: Instant,
}

/// Owns and serves every vector index of one database handle.
pub struct IndexRegistry {
    config: ExtensionConfig,
    backend: Arc<dyn StorageBackend>,
    entries: Mutex<HashMap<IndexKey, RegistryEntry>>,
}

impl IndexRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: ExtensionConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            config,
            backend,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a registry, restoring the descriptor catalog from the
    /// backend. Indexes start `Unloaded`; snapshots load on first use
    /// (or immediately when lazy loading is disabled).
    ///
    /// # Errors
    ///
    /// I/O errors from the backend, or corrupt catalog bytes.
    pub fn open(config: ExtensionConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let registry = Self::new(config, backend);
        if let Some(bytes) = registry.backend.read(CATALOG_BLOB)? {
            let descriptors: Vec<IndexDescriptor> = postcard::from_bytes(&bytes)
                .map_err(|err| Error::Corrupt(format!("descriptor catalog: {err}")))?;
            let mut entries = registry.entries.lock();
            for descriptor in descriptors {
                entries.insert(
                    descriptor.key.clone(),
                    RegistryEntry {
                        descriptor,
                        state: EntryState::Unloaded,
                        last_search: Instant::now(),
                    },
                );
            }
            drop(entries);
        }
        if !registry.config.lazy_index_loading {
            let keys: Vec<IndexKey> = registry
                .entries
                .lock()
                .keys()
                .cloned()
                .collect();
            for key in keys {
                registry.get_or_load(&key)?;
            }
        }
        Ok(registry)
    }

    /// The configuration this registry enforces.
    #[must_use]
    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    /// Creates a new, empty index.
    ///
    /// `estimated_rows` sizes the admission check: creation is refused
    /// outright if the expected steady-state footprint would break the
    /// budget, leaving no partial state behind.
    ///
    /// # Errors
    ///
    /// `IndexAlreadyExists`, `Config` (bad descriptor or dimension over
    /// the configured limit), or `MemoryBudgetExceeded`.
    pub fn create_index(&self, descriptor: IndexDescriptor, estimated_rows: u64) -> Result<()> {
        descriptor.validate()?;
        if descriptor.dimension > self.config.max_dimensions {
            return Err(Error::Config(format!(
                "dimension {} exceeds max_dimensions {}",
                descriptor.dimension, self.config.max_dimensions
            )));
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&descriptor.key) {
            if !matches!(existing.state, EntryState::Closed) {
                return Err(Error::IndexAlreadyExists {
                    table: descriptor.key.table.clone(),
                    column: descriptor.key.column.clone(),
                });
            }
        }

        let requested =
            BASE_INDEX_BYTES + estimated_rows * descriptor.estimated_bytes_per_vector();
        if let Some(budget) = self.config.memory_budget_bytes() {
            let in_use = Self::memory_in_use(&entries);
            if in_use.saturating_add(requested) > budget {
                return Err(Error::MemoryBudgetExceeded { requested, budget });
            }
        }

        let index = Self::build_index(&descriptor)?;
        entries.insert(
            descriptor.key.clone(),
            RegistryEntry {
                descriptor,
                state: EntryState::Ready(index),
                last_search: Instant::now(),
            },
        );
        self.save_catalog(&entries)?;
        Ok(())
    }

    /// Drops an index: entry, snapshot blob, and catalog row.
    ///
    /// # Errors
    ///
    /// `NoSuchIndex` if the key is unknown.
    pub fn drop_index(&self, key: &IndexKey) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Err(Error::NoSuchIndex {
                table: key.table.clone(),
                column: key.column.clone(),
            });
        }
        self.backend.delete(&key.snapshot_name())?;
        self.save_catalog(&entries)?;
        Ok(())
    }

    /// Returns the ready index for `key`, restoring it first if needed.
    ///
    /// # Errors
    ///
    /// `NoSuchIndex` for unknown keys; `Snapshot`/`Corrupt` when the
    /// stored snapshot fails validation (the entry then returns to
    /// `Unloaded`, so a later call can retry after the host re-creates
    /// or repairs it).
    pub fn get_or_load(&self, key: &IndexKey) -> Result<Arc<dyn VectorIndex>> {
        loop {
            let descriptor = {
                let mut entries = self.entries.lock();
                let entry = entries.get_mut(key).ok_or_else(|| Error::NoSuchIndex {
                    table: key.table.clone(),
                    column: key.column.clone(),
                })?;
                if let EntryState::Ready(index) = &entry.state {
                    return Ok(Arc::clone(index));
                }
                if matches!(entry.state, EntryState::Closed) {
                    return Err(Error::Config(format!("index {key} is closed")));
                }
                if matches!(entry.state, EntryState::Loading) {
                    None
                } else {
                    // Unloaded or Evicted: claim the load.
                    entry.state = EntryState::Loading;
                    Some(entry.descriptor.clone())
                }
            };

            let Some(descriptor) = descriptor else {
                // Another caller is loading; let it finish.
                std::thread::yield_now();
                continue;
            };

            let loaded = self.load_index(&descriptor);
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(key).ok_or_else(|| Error::NoSuchIndex {
                table: key.table.clone(),
                column: key.column.clone(),
            })?;
            match loaded {
                Ok(index) => {
                    entry.state = EntryState::Ready(Arc::clone(&index));
                    return Ok(index);
                }
                Err(err) => {
                    entry.state = EntryState::Unloaded;
                    return Err(err);
                }
            }
        }
    }

    /// Evicts a ready index: snapshots it, releases its memory, keeps the
    /// descriptor. Only allowed when lazy loading is enabled (otherwise
    /// nothing could bring it back).
    ///
    /// # Errors
    ///
    /// `NoSuchIndex`, or `Config` when lazy loading is disabled.
    pub fn evict(&self, key: &IndexKey) -> Result<()> {
        if !self.config.lazy_index_loading {
            return Err(Error::Config(
                "eviction requires lazy_index_loading".into(),
            ));
        }
        let index = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(key).ok_or_else(|| Error::NoSuchIndex {
                table: key.table.clone(),
                column: key.column.clone(),
            })?;
            match &entry.state {
                EntryState::Ready(index) => Arc::clone(index),
                // Already out of memory; nothing to do.
                _ => return Ok(()),
            }
        };

        if let Some(bytes) = index.snapshot()? {
            self.backend.atomic_write(&key.snapshot_name(), &bytes)?;
        }

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if matches!(entry.state, EntryState::Ready(_)) {
                log::debug!("evicting index {key} ({} bytes)", index.memory_bytes());
                entry.state = EntryState::Evicted;
            }
        }
        Ok(())
    }

    /// Post-commit write hook: decodes the stored value and forwards it.
    ///
    /// # Errors
    ///
    /// Codec validation errors, `DuplicateId`, `NoSuchIndex`.
    pub fn on_write(&self, key: &IndexKey, id: u64, value: &[u8]) -> Result<()> {
        let descriptor = self.descriptor(key)?;
        let decoded = codec::decode(value, descriptor.dimension as usize)?;
        let floats = decoded.floats()?;
        self.on_write_vector(key, id, &floats)
    }

    /// Post-commit write hook for hosts that still hold the float form.
    ///
    /// # Errors
    ///
    /// As [`on_write`](Self::on_write).
    pub fn on_write_vector(&self, key: &IndexKey, id: u64, vector: &[f32]) -> Result<()> {
        let index = self.get_or_load(key)?;
        index.add(id, vector, None)?;
        if self.config.evict_on_memory_pressure {
            self.relieve_pressure(key);
        }
        Ok(())
    }

    /// Post-commit delete hook. Returns false when the id was not
    /// indexed.
    ///
    /// # Errors
    ///
    /// `NoSuchIndex`, or `Corrupt` from a poisoned index.
    pub fn on_delete(&self, key: &IndexKey, id: u64) -> Result<bool> {
        let index = self.get_or_load(key)?;
        index.remove(id)
    }

    /// Runs a top-k search, refreshing the entry's LRU stamp.
    ///
    /// # Errors
    ///
    /// As the underlying index search, plus `NoSuchIndex`.
    pub fn search(
        &self,
        key: &IndexKey,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        let index = self.get_or_load(key)?;
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(key) {
                entry.last_search = Instant::now();
            }
        }
        index.search(query, k, ef_override, cancel)
    }

    /// The descriptor registered for a key.
    ///
    /// # Errors
    ///
    /// `NoSuchIndex`.
    pub fn descriptor(&self, key: &IndexKey) -> Result<IndexDescriptor> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| Error::NoSuchIndex {
                table: key.table.clone(),
                column: key.column.clone(),
            })
    }

    /// Introspection: every registered index with state and memory use.
    #[must_use]
    pub fn enumerate(&self) -> Vec<IndexStatus> {
        let entries = self.entries.lock();
        let mut rows: Vec<IndexStatus> = entries
            .values()
            .map(|entry| IndexStatus {
                key: entry.descriptor.key.clone(),
                kind: entry.descriptor.kind,
                state: entry.state.state(),
                memory_bytes: match &entry.state {
                    EntryState::Ready(index) => index.memory_bytes(),
                    _ => 0,
                },
            })
            .collect();
        rows.sort_by(|a, b| (&a.key.table, &a.key.column).cmp(&(&b.key.table, &b.key.column)));
        rows
    }

    /// Total bytes currently held by ready indexes.
    #[must_use]
    pub fn memory_bytes(&self) -> u64 {
        Self::memory_in_use(&self.entries.lock())
    }

    /// Snapshots every ready index that supports it (checkpoint hook).
    ///
    /// # Errors
    ///
    /// The first snapshot or backend error encountered.
    pub fn snapshot_all(&self) -> Result<()> {
        let ready: Vec<(IndexKey, Arc<dyn VectorIndex>)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter_map(|(key, entry)| match &entry.state {
                    EntryState::Ready(index) => Some((key.clone(), Arc::clone(index))),
                    _ => None,
                })
                .collect()
        };
        for (key, index) in ready {
            if let Some(bytes) = index.snapshot()? {
                self.backend.atomic_write(&key.snapshot_name(), &bytes)?;
            }
        }
        Ok(())
    }

    /// Checkpoints everything and marks every entry `Closed`. Further
    /// operations on any index fail.
    ///
    /// # Errors
    ///
    /// As [`snapshot_all`](Self::snapshot_all).
    pub fn close(&self) -> Result<()> {
        self.snapshot_all()?;
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.state = EntryState::Closed;
        }
        Ok(())
    }

    fn memory_in_use(entries: &HashMap<IndexKey, RegistryEntry>) -> u64 {
        entries
            .values()
            .map(|entry| match &entry.state {
                EntryState::Ready(index) => index.memory_bytes(),
                _ => 0,
            })
            .sum()
    }

    fn build_index(descriptor: &IndexDescriptor) -> Result<Arc<dyn VectorIndex>> {
        Ok(match descriptor.kind {
            IndexKind::Flat => Arc::new(FlatIndex::new(descriptor.clone())?),
            IndexKind::Hnsw => Arc::new(HnswIndex::new(descriptor.clone())?),
        })
    }

    fn load_index(&self, descriptor: &IndexDescriptor) -> Result<Arc<dyn VectorIndex>> {
        match descriptor.kind {
            // Flat indexes have no snapshot form; the host replays table
            // data through the post-commit hook.
            IndexKind::Flat => Self::build_index(descriptor),
            IndexKind::Hnsw => match self.backend.read(&descriptor.key.snapshot_name())? {
                Some(bytes) => {
                    log::debug!(
                        "restoring index {} from {} snapshot bytes",
                        descriptor.key,
                        bytes.len()
                    );
                    Ok(Arc::new(HnswIndex::restore(descriptor.clone(), &bytes)?))
                }
                None => Self::build_index(descriptor),
            },
        }
    }

    /// Evicts least-recently-searched indexes (other than the one just
    /// written) until the budget holds again. Best effort: snapshot
    /// failures leave the index resident.
    fn relieve_pressure(&self, just_written: &IndexKey) {
        let Some(budget) = self.config.memory_budget_bytes() else {
            return;
        };
        loop {
            let victim = {
                let entries = self.entries.lock();
                if Self::memory_in_use(&entries) <= budget {
                    return;
                }
                entries
                    .iter()
                    .filter(|(key, entry)| {
                        *key != just_written && matches!(entry.state, EntryState::Ready(_))
                    })
                    .min_by_key(|(_, entry)| entry.last_search)
                    .map(|(key, _)| key.clone())
            };
            let Some(victim) = victim else {
                return;
            };
            if self.evict(&victim).is_err() {
                return;
            }
        }
    }

    fn save_catalog(&self, entries: &HashMap<IndexKey, RegistryEntry>) -> Result<()> {
        let mut descriptors: Vec<&IndexDescriptor> =
            entries.values().map(|entry| &entry.descriptor).collect();
        descriptors.sort_by(|a, b| (&a.key.table, &a.key.column).cmp(&(&b.key.table, &b.key.column)));
        let bytes = postcard::to_allocvec(&descriptors)
            .map_err(|err| Error::Corrupt(format!("descriptor catalog: {err}")))?;
        self.backend.atomic_write(CATALOG_BLOB, &bytes)?;
        Ok(())
    }
}
