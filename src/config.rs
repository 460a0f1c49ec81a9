//! Options for building and opening a virtual hierarchy.

use serde::{Deserialize, Serialize};

use crate::{manifest::DEFAULT_METADATA_KEY, storage::cache::DEFAULT_MAX_SIZE};

/// How the metadata store may be modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Open an existing hierarchy; never write.
    Read,
    /// Replace whatever the store holds.
    #[default]
    Overwrite,
    /// Build into a store that holds no hierarchy yet.
    CreateNew,
}

impl StoreMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, StoreMode::Read)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Source group to mirror.
    pub group: String,
    pub store_mode: StoreMode,
    /// Replace variable-length string datasets in the source by fixed-width
    /// copies so they can be indexed. Requires a writable source.
    pub allow_changing_string_types: bool,
    pub consolidate_metadata: bool,
    /// Store key of the consolidated blob.
    pub metadata_key: String,
    /// Wrap the store in an [`LruCacheStore`](crate::storage::cache::LruCacheStore).
    pub lru: bool,
    /// Byte budget of the cache.
    pub lru_max_size: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            group: "/".to_string(),
            store_mode: StoreMode::default(),
            allow_changing_string_types: false,
            consolidate_metadata: true,
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            lru: true,
            lru_max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl BridgeOptions {
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_store_mode(mut self, store_mode: StoreMode) -> Self {
        self.store_mode = store_mode;
        self
    }

    pub fn with_string_materialization(mut self, allow: bool) -> Self {
        self.allow_changing_string_types = allow;
        self
    }

    pub fn with_consolidation(mut self, consolidate: bool) -> Self {
        self.consolidate_metadata = consolidate;
        self
    }

    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = key.into();
        self
    }

    /// Enable the cache with the given byte budget, or disable it with `None`.
    pub fn with_lru(mut self, max_size: Option<u64>) -> Self {
        match max_size {
            Some(max_size) => {
                self.lru = true;
                self.lru_max_size = max_size;
            }
            None => self.lru = false,
        }
        self
    }
}
