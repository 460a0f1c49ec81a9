//! Consolidated metadata: every node document and chunk index in one blob.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, StoreKey, WritableStorageTraits,
};

use crate::{
    chunk::ChunkIndex,
    chunk_key_encoding::{CHUNK_INDEX_KEY, is_metadata_key},
};

/// Default store key of the consolidated blob.
pub const DEFAULT_METADATA_KEY: &str = ".zmetadata";

const CONSOLIDATED_FORMAT: u64 = 1;

#[derive(Serialize, Deserialize)]
struct ConsolidatedBlob {
    zarr_consolidated_format: u64,
    metadata: BTreeMap<String, Value>,
}

/// Store key to JSON document, for every metadata document of a hierarchy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: BTreeMap<String, Value>,
}

impl Manifest {
    /// Gather every node metadata and chunk-index document in `store`.
    pub fn collect<S>(store: &S) -> crate::Result<Self>
    where
        S: ReadableStorageTraits + ListableStorageTraits + ?Sized,
    {
        let mut entries = BTreeMap::new();
        for key in store.list()? {
            if !is_metadata_key(key.as_str(), None) {
                continue;
            }
            let Some(bytes) = store.get(&key)? else {
                continue;
            };
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                crate::Error::incomplete(key.as_str(), format!("not valid JSON: {e}"))
            })?;
            entries.insert(key.as_str().to_string(), value);
        }
        log::debug!("collected {} metadata documents", entries.len());
        Ok(Self { entries })
    }

    /// Collect the documents of `store` and write them under `key`.
    pub fn consolidate<S>(store: &S, key: &str) -> crate::Result<Self>
    where
        S: ReadableStorageTraits + ListableStorageTraits + WritableStorageTraits + ?Sized,
    {
        let manifest = Self::collect(store)?;
        manifest.write(store, key)?;
        Ok(manifest)
    }

    /// Read a consolidated blob; a missing blob is an error.
    pub fn read<S: ReadableStorageTraits + ?Sized>(store: &S, key: &str) -> crate::Result<Self> {
        let store_key = StoreKey::new(key).map_err(crate::Error::wrap)?;
        let Some(bytes) = store.get(&store_key)? else {
            return Err(crate::Error::incomplete(
                key,
                "consolidated metadata is missing",
            ));
        };
        let blob: ConsolidatedBlob = serde_json::from_slice(&bytes)
            .map_err(|e| crate::Error::incomplete(key, format!("malformed: {e}")))?;
        if blob.zarr_consolidated_format != CONSOLIDATED_FORMAT {
            return Err(crate::Error::incomplete(
                key,
                format!(
                    "unsupported consolidated format {}",
                    blob.zarr_consolidated_format
                ),
            ));
        }
        Ok(Self {
            entries: blob.metadata,
        })
    }

    pub fn write<S>(&self, store: &S, key: &str) -> crate::Result<()>
    where
        S: WritableStorageTraits + ?Sized,
    {
        let store_key = StoreKey::new(key).map_err(crate::Error::wrap)?;
        store.set(&store_key, Bytes::from(self.to_vec()?))?;
        log::debug!("consolidated {} documents under {key}", self.entries.len());
        Ok(())
    }

    /// The serialized consolidated blob.
    pub fn to_vec(&self) -> crate::Result<Vec<u8>> {
        let blob = ConsolidatedBlob {
            zarr_consolidated_format: CONSOLIDATED_FORMAT,
            metadata: self.entries.clone(),
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed chunk index of every array that has one, by array path.
    pub fn chunk_indices(&self) -> crate::Result<BTreeMap<String, ChunkIndex>> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.entries {
            let Some(prefix) = document_prefix(key, CHUNK_INDEX_KEY) else {
                continue;
            };
            let path = format!("/{prefix}");
            let index = ChunkIndex::from_json(&path, value.clone())?;
            out.insert(path, index);
        }
        Ok(out)
    }
}

/// Node prefix of `<prefix>/<name>`, or `""` for a document at the root.
fn document_prefix<'a>(key: &'a str, name: &str) -> Option<&'a str> {
    if key == name {
        return Some("");
    }
    key.strip_suffix(name)?.strip_suffix('/')
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use zarrs::storage::store::MemoryStore;

    use super::*;
    use crate::chunk_key_encoding::NODE_METADATA_KEY;

    fn put(store: &MemoryStore, key: &str, value: Value) {
        store
            .set(
                &StoreKey::new(key).unwrap(),
                Bytes::from(serde_json::to_vec(&value).unwrap()),
            )
            .unwrap();
    }

    #[test]
    fn consolidate_and_read_back() {
        let store = MemoryStore::new();
        put(&store, "zarr.json", json!({"zarr_format": 3, "node_type": "group"}));
        put(&store, "g/x/zarr.json", json!({"zarr_format": 3, "node_type": "array"}));
        put(
            &store,
            "g/x/.zchunkstore",
            json!({
                "source": {"uri": "f.h5", "array_name": "/g/x"},
                "g/x/0": {"offset": 10, "size": 4},
            }),
        );
        store
            .set(&StoreKey::new("g/x/0").unwrap(), Bytes::from_static(b"data"))
            .unwrap();

        let manifest = Manifest::consolidate(&store, DEFAULT_METADATA_KEY).unwrap();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.get("g/x/0").is_none());

        let read = Manifest::read(&store, DEFAULT_METADATA_KEY).unwrap();
        assert_eq!(read, manifest);
        let indices = read.chunk_indices().unwrap();
        assert_eq!(indices["/g/x"].get(&[0]).unwrap().offset, 10);
    }

    #[test]
    fn missing_blob_is_an_error() {
        let store = MemoryStore::new();
        assert!(Manifest::read(&store, DEFAULT_METADATA_KEY).is_err());
    }

    #[test]
    fn document_prefixes() {
        assert_eq!(document_prefix("zarr.json", NODE_METADATA_KEY), Some(""));
        assert_eq!(document_prefix("a/b/zarr.json", NODE_METADATA_KEY), Some("a/b"));
        assert_eq!(document_prefix("a/bzarr.json", NODE_METADATA_KEY), None);
    }
}
