//! Building and opening a virtual Zarr hierarchy over a source container.

use std::sync::Arc;

use zarrs::storage::{
    ListableStorageTraits, ReadableListableStorage, ReadableStorageTraits, StorePrefix,
    WritableStorageTraits,
};

use crate::{
    chunk_key_encoding::{NODE_METADATA_KEY, node_key},
    codec::CodecRegistry,
    config::{BridgeOptions, StoreMode},
    manifest::Manifest,
    source::SourceContainer,
    storage::{ByteSource, VirtualChunkStore, cache::LruCacheStore},
    walker::{WalkReport, Walker},
};

/// A Zarr view of a source container whose chunks are read in place.
pub struct VirtualHierarchy<S: ?Sized> {
    chunks: Arc<VirtualChunkStore<S>>,
    storage: ReadableListableStorage,
    report: Option<WalkReport>,
}

impl<S> VirtualHierarchy<S>
where
    S: ReadableStorageTraits + ListableStorageTraits + WritableStorageTraits + ?Sized + 'static,
{
    /// Mirror `source` into `metadata_store` and open the result.
    ///
    /// The store is cleared first. Nodes that cannot be mirrored are left
    /// out and listed in [`report`](Self::report).
    pub fn build<C: SourceContainer + ?Sized>(
        source: &mut C,
        byte_source: Arc<dyn ByteSource>,
        metadata_store: Arc<S>,
        options: &BridgeOptions,
    ) -> crate::Result<Self> {
        if !options.store_mode.is_writable() {
            return Err(crate::Error::general(
                "cannot build a hierarchy with a read-only store mode",
            ));
        }
        if options.store_mode == StoreMode::CreateNew
            && metadata_store
                .size_key(&node_key("/", NODE_METADATA_KEY)?)?
                .is_some()
        {
            return Err(crate::Error::general(
                "metadata store already holds a hierarchy",
            ));
        }
        metadata_store.erase_prefix(&StorePrefix::root())?;

        let registry = CodecRegistry::new();
        let report = Walker::new(source, &*metadata_store, &registry)
            .materialize_strings(options.allow_changing_string_types)
            .walk(&options.group)?;
        if options.consolidate_metadata {
            Manifest::consolidate(&*metadata_store, &options.metadata_key)?;
        }
        log::info!(
            "mirrored {} from {}: {} groups, {} arrays, {} nodes or attributes skipped",
            options.group,
            source.uri(),
            report.groups,
            report.arrays,
            report.diagnostics.len()
        );

        let mut hierarchy = Self::open(byte_source, metadata_store, options)?;
        hierarchy.report = Some(report);
        Ok(hierarchy)
    }
}

impl<S> VirtualHierarchy<S>
where
    S: ReadableStorageTraits + ListableStorageTraits + ?Sized + 'static,
{
    /// Open a previously built hierarchy without walking the source.
    ///
    /// With consolidation enabled, only the consolidated blob is consulted.
    pub fn open(
        byte_source: Arc<dyn ByteSource>,
        metadata_store: Arc<S>,
        options: &BridgeOptions,
    ) -> crate::Result<Self> {
        let chunks = if options.consolidate_metadata {
            VirtualChunkStore::consolidated(metadata_store, byte_source, &options.metadata_key)?
        } else {
            VirtualChunkStore::new(metadata_store, byte_source)?
        };
        let chunks = Arc::new(chunks);
        let storage: ReadableListableStorage = if options.lru {
            Arc::new(LruCacheStore::new(chunks.clone(), options.lru_max_size))
        } else {
            chunks.clone()
        };
        log::debug!("opened virtual store with {} chunks", chunks.count());
        Ok(Self {
            chunks,
            storage,
            report: None,
        })
    }
}

impl<S: ?Sized> VirtualHierarchy<S> {
    /// Store to open Zarr arrays and groups from.
    pub fn storage(&self) -> ReadableListableStorage {
        self.storage.clone()
    }

    /// The uncached virtual chunk store.
    pub fn chunk_store(&self) -> &Arc<VirtualChunkStore<S>> {
        &self.chunks
    }

    /// Outcome of the walk, if this hierarchy was built rather than opened.
    pub fn report(&self) -> Option<&WalkReport> {
        self.report.as_ref()
    }
}
