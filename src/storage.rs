//! Read-only Zarr storage serving chunk bytes out of the source file.

#[cfg(feature = "async")]
mod asynch;
pub mod cache;
pub mod file;

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use zarrs::storage::{
    ListableStorageTraits, MaybeBytes, MaybeBytesIterator, ReadableStorageTraits, StorageError,
    StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix, StorePrefixes,
    byte_range::{ByteRange, ByteRangeIterator},
};

use crate::{
    chunk::ChunkIndex,
    chunk_key_encoding::{decode_chunk_key, encode_chunk_name, is_metadata_key, node_prefix},
    manifest::Manifest,
};
pub use file::ByteSource;
#[cfg(any(unix, windows))]
pub use file::FileSource;

/// Metadata served from a consolidated blob instead of the metadata store.
struct Consolidated {
    key: String,
    manifest: Manifest,
    blob: Bytes,
}

/// Zarr store over a metadata store and a backing byte source.
///
/// Requests for chunk keys of indexed arrays are answered by a positioned
/// read of the byte range recorded in the array's chunk index; a chunk
/// missing from the index reads as absent so the fill value is used.
/// Everything else is answered by the metadata store, or by the
/// consolidated manifest when opened through one.
pub struct VirtualChunkStore<R: ?Sized> {
    inner: Arc<R>,
    source: Arc<dyn ByteSource>,
    consolidated: Option<Consolidated>,
    /// By store prefix of the array.
    indices: BTreeMap<String, ChunkIndex>,
}

/// Where a store key is answered from.
enum Resolved<'a> {
    Document(Option<Bytes>),
    Chunk(Option<&'a crate::chunk::ChunkLocation>),
    Inner,
}

impl<R> VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    /// Index every array from the per-node documents of `inner`.
    pub fn new(inner: Arc<R>, source: Arc<dyn ByteSource>) -> crate::Result<Self> {
        let manifest = Manifest::collect(&*inner)?;
        let indices = prefixed_indices(&manifest)?;
        Ok(Self {
            inner,
            source,
            consolidated: None,
            indices,
        })
    }

    /// Serve all metadata from the consolidated blob stored under `key`.
    pub fn consolidated(
        inner: Arc<R>,
        source: Arc<dyn ByteSource>,
        key: &str,
    ) -> crate::Result<Self> {
        let manifest = Manifest::read(&*inner, key)?;
        let indices = prefixed_indices(&manifest)?;
        let blob = Bytes::from(manifest.to_vec()?);
        Ok(Self {
            inner,
            source,
            consolidated: Some(Consolidated {
                key: key.to_string(),
                manifest,
                blob,
            }),
            indices,
        })
    }
}

impl<R: ?Sized> VirtualChunkStore<R> {
    /// Chunk index of the array at `path`, if it has one.
    pub fn chunk_index(&self, path: &str) -> Option<&ChunkIndex> {
        self.indices.get(node_prefix(path))
    }

    fn resolve(&self, key: &str) -> Resolved<'_> {
        if let Some(c) = &self.consolidated
            && is_metadata_key(key, Some(c.key.as_str()))
        {
            let bytes = if key == c.key {
                Some(c.blob.clone())
            } else {
                c.manifest
                    .get(key)
                    .and_then(|v| serde_json::to_vec(v).ok())
                    .map(Bytes::from)
            };
            return Resolved::Document(bytes);
        }
        if is_metadata_key(key, None) {
            return Resolved::Inner;
        }
        match decode_chunk_key(key) {
            Some((prefix, coords)) => match self.indices.get(prefix) {
                Some(index) => Resolved::Chunk(index.get(&coords)),
                None => Resolved::Inner,
            },
            None => Resolved::Inner,
        }
    }

    /// Bytes of one chunk.
    ///
    /// Fails with [`crate::Error::NotFound`] if the key's array has no chunk
    /// index or the index has no entry for it.
    pub fn read_chunk(&self, key: &StoreKey) -> crate::Result<Bytes> {
        let not_found = || crate::Error::NotFound(key.as_str().to_string());
        let (prefix, coords) = decode_chunk_key(key.as_str()).ok_or_else(not_found)?;
        let location = self
            .indices
            .get(prefix)
            .and_then(|index| index.get(&coords))
            .ok_or_else(not_found)?;
        if location.size == 0 {
            return Ok(Bytes::new());
        }
        log::trace!(
            "reading {} bytes at {} for {key}",
            location.size,
            location.offset
        );
        Ok(self.source.read_range(location.offset, location.size)?)
    }

    /// Every chunk key in every chunk index, computed afresh on each call.
    pub fn chunk_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.indices.iter().flat_map(|(prefix, index)| {
            index.iter().map(move |(coords, _)| {
                let name = encode_chunk_name(coords);
                if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                }
            })
        })
    }

    /// Number of addressable chunks across all arrays.
    pub fn count(&self) -> usize {
        self.indices.values().map(ChunkIndex::len).sum()
    }

    pub fn set(&self, key: &StoreKey, _value: Bytes) -> crate::Result<()> {
        Err(crate::Error::ImmutableStore {
            operation: "set",
            key: key.as_str().to_string(),
        })
    }

    pub fn erase(&self, key: &StoreKey) -> crate::Result<()> {
        Err(crate::Error::ImmutableStore {
            operation: "erase",
            key: key.as_str().to_string(),
        })
    }

    pub fn erase_prefix(&self, prefix: &StorePrefix) -> crate::Result<()> {
        Err(crate::Error::ImmutableStore {
            operation: "erase",
            key: prefix.as_str().to_string(),
        })
    }
}

fn prefixed_indices(manifest: &Manifest) -> crate::Result<BTreeMap<String, ChunkIndex>> {
    Ok(manifest
        .chunk_indices()?
        .into_iter()
        .map(|(path, index)| (node_prefix(&path).to_string(), index))
        .collect())
}

impl<R> VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    fn metadata_keys(&self) -> Result<StoreKeys, StorageError> {
        match &self.consolidated {
            Some(c) => std::iter::once(c.key.as_str())
                .chain(c.manifest.keys())
                .map(StoreKey::new)
                .collect::<Result<_, _>>()
                .map_err(|e| StorageError::Other(e.to_string())),
            None => self.inner.list(),
        }
    }

    fn all_keys(&self) -> Result<StoreKeys, StorageError> {
        let mut keys = self.metadata_keys()?;
        for key in self.chunk_keys() {
            keys.push(StoreKey::new(key).map_err(|e| StorageError::Other(e.to_string()))?);
        }
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys.dedup();
        Ok(keys)
    }
}

impl<R> ReadableStorageTraits for VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.resolve(key.as_str()) {
            Resolved::Document(bytes) => Ok(bytes.map(|b| b.len() as u64)),
            Resolved::Chunk(location) => Ok(location.map(|l| l.size).filter(|&size| size > 0)),
            Resolved::Inner => self.inner.size_key(key),
        }
    }

    fn supports_get_partial(&self) -> bool {
        false
    }

    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        match self.resolve(key.as_str()) {
            Resolved::Document(bytes) => Ok(bytes),
            // an empty extent holds no data; zarrs falls back to the fill value
            Resolved::Chunk(None) => Ok(None),
            Resolved::Chunk(Some(location)) if location.size == 0 => Ok(None),
            Resolved::Chunk(Some(_)) => Ok(Some(self.read_chunk(key)?)),
            Resolved::Inner => self.inner.get(key),
        }
    }

    fn get_partial_many<'a>(
        &'a self,
        _key: &StoreKey,
        _byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial_many not supported".into(),
        ))
    }

    fn get_partial(
        &self,
        _key: &StoreKey,
        _byte_range: ByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial not supported".into(),
        ))
    }
}

impl<R> ListableStorageTraits for VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.all_keys()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        let mut keys = self.all_keys()?;
        keys.retain(|key| key.as_str().starts_with(prefix.as_str()));
        Ok(keys)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        let mut keys = StoreKeys::new();
        let mut prefixes = StorePrefixes::new();
        for key in self.list_prefix(prefix)? {
            let rest = &key.as_str()[prefix.as_str().len()..];
            match rest.split_once('/') {
                None => keys.push(key),
                Some((child, _)) => {
                    let child = StorePrefix::new(format!("{}{child}/", prefix.as_str()))
                        .map_err(|e| StorageError::Other(e.to_string()))?;
                    if prefixes.last() != Some(&child) {
                        prefixes.push(child);
                    }
                }
            }
        }
        prefixes.dedup();
        Ok(StoreKeysPrefixes::new(keys, prefixes))
    }

    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        let mut size = 0;
        for key in self.list_prefix(prefix)? {
            size += self.size_key(&key)?.unwrap_or(0);
        }
        Ok(size)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.size_prefix(&StorePrefix::root())
    }
}
