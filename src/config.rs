//! Extension-level configuration.

use crate::index::IndexKind;
use crate::metric::Metric;
use crate::quantization::Quantization;
use serde::{Deserialize, Serialize};

/// Registry and extension configuration, with the documented defaults.
///
/// Hosts typically deserialize this from their own configuration surface;
/// every field is optional there thanks to the serde defaults.
///
/// # Example
///
/// ```rust
/// use simvec::ExtensionConfig;
///
/// let config = ExtensionConfig::default()
///     .with_max_memory_mb(512)
///     .with_lazy_index_loading(false);
/// assert_eq!(config.max_memory_mb, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Memory budget for all indexes in MiB; 0 means unlimited.
    pub max_memory_mb: u32,

    /// Defer snapshot loading until an index is first used.
    pub lazy_index_loading: bool,

    /// Evict least-recently-searched indexes when the budget is exceeded.
    pub evict_on_memory_pressure: bool,

    /// Largest accepted vector dimension.
    pub max_dimensions: u32,

    /// Index kind used when DDL omits `USING`.
    pub default_index_kind: IndexKind,

    /// Metric used when DDL omits `metric`.
    pub default_metric: Metric,

    /// Quantization used when DDL omits `quantization`.
    pub default_quantization: Quantization,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            lazy_index_loading: true,
            evict_on_memory_pressure: false,
            max_dimensions: 4096,
            default_index_kind: IndexKind::Hnsw,
            default_metric: Metric::Cosine,
            default_quantization: Quantization::None,
        }
    }
}

impl ExtensionConfig {
    /// Sets the memory budget in MiB (0 = unlimited).
    #[must_use]
    pub fn with_max_memory_mb(mut self, mb: u32) -> Self {
        self.max_memory_mb = mb;
        self
    }

    /// Enables or disables lazy index loading.
    #[must_use]
    pub fn with_lazy_index_loading(mut self, lazy: bool) -> Self {
        self.lazy_index_loading = lazy;
        self
    }

    /// Enables or disables eviction under memory pressure.
    #[must_use]
    pub fn with_evict_on_memory_pressure(mut self, evict: bool) -> Self {
        self.evict_on_memory_pressure = evict;
        self
    }

    /// Sets the maximum accepted vector dimension.
    #[must_use]
    pub fn with_max_dimensions(mut self, dims: u32) -> Self {
        self.max_dimensions = dims;
        self
    }

    /// Memory budget in bytes; `None` when unlimited.
    #[must_use]
    pub fn memory_budget_bytes(&self) -> Option<u64> {
        if self.max_memory_mb == 0 {
            None
        } else {
            Some(u64::from(self.max_memory_mb) * 1024 * 1024)
        }
    }
}
