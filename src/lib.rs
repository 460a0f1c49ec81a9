//! Zarr view of HDF5-style chunked containers without copying chunk data.
//!
//! A [`Walker`](walker::Walker) mirrors the group hierarchy of a
//! [`SourceContainer`](source::SourceContainer) into Zarr v3 metadata and
//! records, for each array, where every stored chunk lives in the source
//! file. A [`VirtualChunkStore`](storage::VirtualChunkStore) then serves
//! those byte ranges as Zarr chunks, so the arrays can be read with
//! [`zarrs`] directly. [`VirtualHierarchy`](bridge::VirtualHierarchy) ties
//! the two together.
pub mod attribute;
pub mod bridge;
pub mod chunk;
pub mod chunk_key_encoding;
pub mod codec;
pub mod config;
mod error;
pub mod manifest;
pub mod metadata;
pub mod source;
pub mod storage;
pub mod walker;

pub use zarrs;

pub use bridge::VirtualHierarchy;
pub use config::{BridgeOptions, StoreMode};
pub use error::{Error, Result};
