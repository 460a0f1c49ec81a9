//! Store keys for nodes and chunks.
//!
//! Arrays use the Zarr `v2` chunk key encoding with a `.` separator, so every
//! chunk key is `<array prefix>/<i>.<j>...` and the owning array can be
//! recovered from the key's parent.

use std::fmt::Write;

use serde::Serialize;
use zarrs::{metadata::v3::MetadataV3, storage::StoreKey};

/// Name of a node's Zarr metadata document.
pub const NODE_METADATA_KEY: &str = "zarr.json";

/// Name of the chunk-index document stored next to an array's metadata.
pub const CHUNK_INDEX_KEY: &str = ".zchunkstore";

const SEPARATOR: char = '.';

#[derive(Serialize)]
struct V2ChunkKeyEncodingConfiguration {
    separator: char,
}

/// Chunk key encoding metadata written into every array.
pub fn chunk_key_encoding_metadata() -> crate::Result<MetadataV3> {
    let out = MetadataV3::new_with_serializable_configuration(
        "v2".to_string(),
        &V2ChunkKeyEncodingConfiguration {
            separator: SEPARATOR,
        },
    )?;
    Ok(out)
}

/// Store prefix (without trailing `/`) of a node path; empty for the root.
pub fn node_prefix(path: &str) -> &str {
    path.trim_matches('/')
}

/// Key of a document named `name` under the node at `path`.
pub fn node_key(path: &str, name: &str) -> crate::Result<StoreKey> {
    let prefix = node_prefix(path);
    let s = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };
    StoreKey::new(s).map_err(crate::Error::wrap)
}

/// Chunk name within the array, e.g. `1.0`; zero-dimensional arrays use `0`.
pub fn encode_chunk_name(chunk_indices: &[u64]) -> String {
    if chunk_indices.is_empty() {
        return "0".to_string();
    }
    let mut s = String::with_capacity(chunk_indices.len() * 2);
    for (i, idx) in chunk_indices.iter().enumerate() {
        if i > 0 {
            s.push(SEPARATOR);
        }
        write!(s, "{idx}").expect("writing to a String cannot fail");
    }
    s
}

pub fn encode_chunk_key(array_path: &str, chunk_indices: &[u64]) -> crate::Result<StoreKey> {
    node_key(array_path, &encode_chunk_name(chunk_indices))
}

/// Parse a chunk name; `None` if it is not a well-formed chunk name.
pub fn decode_chunk_name(name: &str) -> Option<Vec<u64>> {
    name.split(SEPARATOR)
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Split a chunk key into its array prefix and chunk indices.
pub fn decode_chunk_key(key: &str) -> Option<(&str, Vec<u64>)> {
    let (prefix, name) = key.rsplit_once('/').unwrap_or(("", key));
    decode_chunk_name(name).map(|indices| (prefix, indices))
}

/// Whether the key names a metadata document rather than a chunk.
pub fn is_metadata_key(key: &str, consolidated_key: Option<&str>) -> bool {
    let name = key.rsplit_once('/').map_or(key, |(_, name)| name);
    name == NODE_METADATA_KEY || name == CHUNK_INDEX_KEY || Some(key) == consolidated_key
}
