use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    chunk_key_encoding::{CHUNK_INDEX_KEY, decode_chunk_key, encode_chunk_key, node_prefix},
    source::{DatasetInfo, SourceContainer},
};

/// Byte range of one chunk in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub offset: u64,
    pub size: u64,
}

/// Which file, and which array, a chunk index belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub uri: String,
    pub array_name: String,
}

/// Chunk grid coordinates to byte ranges for one array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    source: SourceRecord,
    chunks: BTreeMap<Vec<u64>, ChunkLocation>,
}

#[derive(Serialize, Deserialize)]
struct SourceRecordBlob {
    uri: Option<String>,
    array_name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct LocationBlob {
    offset: Option<u64>,
    size: Option<u64>,
}

/// On-disk form: `source` plus one entry per full chunk key.
#[derive(Serialize, Deserialize)]
struct ChunkIndexBlob {
    source: Option<SourceRecordBlob>,
    #[serde(flatten)]
    chunks: BTreeMap<String, LocationBlob>,
}

impl ChunkIndex {
    pub fn new(source: SourceRecord) -> Self {
        Self {
            source,
            chunks: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> &SourceRecord {
        &self.source
    }

    pub fn insert(&mut self, coords: Vec<u64>, location: ChunkLocation) {
        self.chunks.insert(coords, location);
    }

    pub fn get(&self, coords: &[u64]) -> Option<&ChunkLocation> {
        self.chunks.get(coords)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u64>, &ChunkLocation)> {
        self.chunks.iter()
    }

    /// Serialize to the chunk-index document of the array at `array_path`.
    pub fn to_json(&self, array_path: &str) -> crate::Result<serde_json::Value> {
        if self.source.uri.is_empty() || self.source.array_name.is_empty() {
            return Err(crate::Error::incomplete(
                chunk_index_key(array_path),
                "chunk source information incomplete",
            ));
        }
        let chunks = self
            .chunks
            .iter()
            .map(|(coords, loc)| {
                let key = encode_chunk_key(array_path, coords)?;
                Ok((
                    key.as_str().to_string(),
                    LocationBlob {
                        offset: Some(loc.offset),
                        size: Some(loc.size),
                    },
                ))
            })
            .collect::<crate::Result<BTreeMap<_, _>>>()?;
        let blob = ChunkIndexBlob {
            source: Some(SourceRecordBlob {
                uri: Some(self.source.uri.clone()),
                array_name: Some(self.source.array_name.clone()),
            }),
            chunks,
        };
        Ok(serde_json::to_value(blob)?)
    }

    /// Parse and validate the chunk-index document of the array at `array_path`.
    pub fn from_json(array_path: &str, value: serde_json::Value) -> crate::Result<Self> {
        let doc_key = chunk_index_key(array_path);
        let blob: ChunkIndexBlob = serde_json::from_value(value)
            .map_err(|e| crate::Error::incomplete(&doc_key, format!("malformed: {e}")))?;
        let source = match blob.source {
            Some(SourceRecordBlob {
                uri: Some(uri),
                array_name: Some(array_name),
            }) => SourceRecord { uri, array_name },
            Some(_) => {
                return Err(crate::Error::incomplete(
                    doc_key,
                    "chunk source information incomplete",
                ));
            }
            None => {
                return Err(crate::Error::incomplete(
                    doc_key,
                    "chunk source information missing",
                ));
            }
        };
        let prefix = node_prefix(array_path);
        let mut index = Self::new(source);
        for (key, loc) in blob.chunks {
            let LocationBlob {
                offset: Some(offset),
                size: Some(size),
            } = loc
            else {
                return Err(crate::Error::incomplete(
                    key,
                    "incomplete chunk location information",
                ));
            };
            let coords = match decode_chunk_key(&key) {
                Some((p, coords)) if p == prefix => coords,
                _ => {
                    return Err(crate::Error::incomplete(
                        key,
                        format!("not a chunk key of {array_path}"),
                    ));
                }
            };
            index.insert(coords, ChunkLocation { offset, size });
        }
        Ok(index)
    }
}

/// Store key of the chunk-index document for an array path, as a string.
pub fn chunk_index_key(array_path: &str) -> String {
    let prefix = node_prefix(array_path);
    if prefix.is_empty() {
        CHUNK_INDEX_KEY.to_string()
    } else {
        format!("{prefix}/{CHUNK_INDEX_KEY}")
    }
}

/// Record the byte range of every physically written chunk of a dataset.
///
/// Only positional metadata is consulted; chunk payloads are never read.
/// Chunks that were never written are absent from the result.
pub fn build_chunk_index<C: SourceContainer + ?Sized>(
    source: &C,
    path: &str,
    info: &DatasetInfo,
) -> crate::Result<ChunkIndex> {
    let mut index = ChunkIndex::new(SourceRecord {
        uri: source.uri().to_string(),
        array_name: path.to_string(),
    });
    let Some(shape) = &info.shape else {
        // null dataspace: nothing addressable
        return Ok(index);
    };

    match &info.chunks {
        None => {
            if let Some(extent) = source.contiguous_extent(path)? {
                let coords = vec![0; shape.len().max(1)];
                index.insert(
                    coords,
                    ChunkLocation {
                        offset: extent.offset,
                        size: extent.size,
                    },
                );
            }
        }
        Some(chunk_shape) => {
            if chunk_shape.len() != shape.len() || chunk_shape.contains(&0) {
                return Err(crate::Error::structural(
                    path,
                    format!("chunk shape {chunk_shape:?} does not fit shape {shape:?}"),
                ));
            }
            for chunk in source.stored_chunks(path)? {
                if chunk.grid_offset.len() != chunk_shape.len() {
                    return Err(crate::Error::structural(
                        path,
                        format!("chunk offset {:?} has wrong rank", chunk.grid_offset),
                    ));
                }
                let coords = chunk
                    .grid_offset
                    .iter()
                    .zip(chunk_shape)
                    .map(|(offset, size)| offset / size)
                    .collect();
                index.insert(
                    coords,
                    ChunkLocation {
                        offset: chunk.byte_offset,
                        size: chunk.size,
                    },
                );
            }
        }
    }
    log::trace!("indexed {} chunks of {path}", index.len());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> SourceRecord {
        SourceRecord {
            uri: "data.h5".into(),
            array_name: "/g/x".into(),
        }
    }

    #[test]
    fn blob_uses_full_chunk_keys() {
        let mut index = ChunkIndex::new(record());
        index.insert(vec![1, 1], ChunkLocation { offset: 1100, size: 16 });
        let value = index.to_json("/g/x").unwrap();
        assert_eq!(
            value,
            json!({
                "source": {"uri": "data.h5", "array_name": "/g/x"},
                "g/x/1.1": {"offset": 1100, "size": 16},
            })
        );
        assert_eq!(ChunkIndex::from_json("/g/x", value).unwrap(), index);
    }

    #[test]
    fn missing_source_is_incomplete() {
        let err = ChunkIndex::from_json("/g/x", json!({"g/x/0": {"offset": 1, "size": 2}}))
            .unwrap_err();
        assert!(matches!(err, crate::Error::IncompleteMetadata { .. }));
    }

    #[test]
    fn missing_size_is_incomplete() {
        let err = ChunkIndex::from_json(
            "/g/x",
            json!({
                "source": {"uri": "data.h5", "array_name": "/g/x"},
                "g/x/0": {"offset": 1},
            }),
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::IncompleteMetadata { .. }));
    }

    #[test]
    fn empty_uri_cannot_be_written() {
        let index = ChunkIndex::new(SourceRecord {
            uri: String::new(),
            array_name: "/g/x".into(),
        });
        assert!(matches!(
            index.to_json("/g/x"),
            Err(crate::Error::IncompleteMetadata { .. })
        ));
    }
}
