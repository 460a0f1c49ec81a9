//! Mirroring of the source hierarchy into Zarr metadata.

use std::collections::HashMap;

use bytes::Bytes;
use zarrs::{
    metadata::v3::NodeMetadataV3,
    storage::{ReadableStorageTraits, StorePrefix, WritableStorageTraits},
};

use crate::{
    attribute::{AttributeIssue, translate_attributes},
    chunk::build_chunk_index,
    chunk_key_encoding::{CHUNK_INDEX_KEY, NODE_METADATA_KEY, node_key, node_prefix},
    codec::{Codec, CodecRegistry, Resolution},
    metadata::{ArrayDescriptor, data_type_name, group_metadata},
    source::{
        ChildEntry, DatasetInfo, Link, NodeKind, SourceContainer, SourceType, base_name,
        join_path, parent_path,
    },
};

/// Name suffix given to a variable-length string dataset once a fixed-width
/// copy has taken its place.
pub const FIXED_LENGTH_SUFFIX: &str = "_fixedlen~";

/// A node or attribute that was left out of the target hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    ExternalLink {
        path: String,
        file: String,
        target: String,
    },
    DanglingLink {
        path: String,
        target: String,
    },
    UnsupportedType {
        path: String,
        reason: String,
    },
    MultipleFilters {
        path: String,
        count: usize,
    },
    UnsupportedFilter {
        path: String,
        id: u32,
        reason: String,
    },
    StringsNotMaterialized {
        path: String,
    },
    AliasedDataset {
        path: String,
        original: String,
    },
    DroppedAttribute {
        path: String,
        name: String,
        reason: String,
    },
}

impl Diagnostic {
    /// Path of the node concerned.
    pub fn path(&self) -> &str {
        match self {
            Diagnostic::ExternalLink { path, .. }
            | Diagnostic::DanglingLink { path, .. }
            | Diagnostic::UnsupportedType { path, .. }
            | Diagnostic::MultipleFilters { path, .. }
            | Diagnostic::UnsupportedFilter { path, .. }
            | Diagnostic::StringsNotMaterialized { path }
            | Diagnostic::AliasedDataset { path, .. }
            | Diagnostic::DroppedAttribute { path, .. } => path,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::ExternalLink { path, file, target } => {
                write!(f, "{path} is not processed: external link to {file}:{target}")
            }
            Diagnostic::DanglingLink { path, target } => {
                write!(f, "{path} is not processed: soft link to missing {target}")
            }
            Diagnostic::UnsupportedType { path, reason } => {
                write!(f, "dataset {path} is not processed: {reason}")
            }
            Diagnostic::MultipleFilters { path, count } => {
                write!(f, "dataset {path} is not processed: {count} filters")
            }
            Diagnostic::UnsupportedFilter { path, id, reason } => write!(
                f,
                "dataset {path} is not processed: hdf5 filter number {id}: {reason}"
            ),
            Diagnostic::StringsNotMaterialized { path } => write!(
                f,
                "dataset {path} is not processed: variable-length strings are not copied"
            ),
            Diagnostic::AliasedDataset { path, original } => {
                write!(f, "dataset {path} is not processed: hard link to {original}")
            }
            Diagnostic::DroppedAttribute { path, name, reason } => {
                write!(f, "attribute {name} of {path} is not processed: {reason}")
            }
        }
    }
}

/// Outcome of a completed walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub groups: usize,
    pub arrays: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Depth-first, pre-order traversal writing one Zarr node per source node.
///
/// Unsupported nodes and attributes are skipped with a [`Diagnostic`];
/// structural errors and storage failures abort the walk.
pub struct Walker<'a, C: ?Sized, S: ?Sized> {
    source: &'a mut C,
    store: &'a S,
    registry: &'a CodecRegistry,
    materialize_strings: bool,
    visited: HashMap<u64, String>,
    report: WalkReport,
}

impl<'a, C, S> Walker<'a, C, S>
where
    C: SourceContainer + ?Sized,
    S: ReadableStorageTraits + WritableStorageTraits + ?Sized,
{
    pub fn new(source: &'a mut C, store: &'a S, registry: &'a CodecRegistry) -> Self {
        Self {
            source,
            store,
            registry,
            materialize_strings: false,
            visited: HashMap::new(),
            report: WalkReport::default(),
        }
    }

    /// Allow writing fixed-width copies of variable-length string datasets
    /// into the source. Has no effect unless the source is writable.
    pub fn materialize_strings(mut self, allow: bool) -> Self {
        self.materialize_strings = allow;
        self
    }

    /// Mirror the group at `path` and everything below it.
    pub fn walk(mut self, path: &str) -> crate::Result<WalkReport> {
        if self.source.kind(path)? != Some(NodeKind::Group) {
            return Err(crate::Error::structural(path, "walk must start at a group"));
        }
        self.walk_group(path)?;
        log::debug!(
            "walked {path}: {} groups, {} arrays, {} diagnostics",
            self.report.groups,
            self.report.arrays,
            self.report.diagnostics.len()
        );
        Ok(self.report)
    }

    fn diagnose(&mut self, diagnostic: Diagnostic) {
        log::warn!("{diagnostic}");
        self.report.diagnostics.push(diagnostic);
    }

    fn walk_group(&mut self, path: &str) -> crate::Result<()> {
        let address = self.source.address(path)?;
        self.visited.insert(address, path.to_string());

        let attributes = self.attributes(path, path)?;
        self.write_node(path, &group_metadata(attributes))?;
        self.report.groups += 1;

        for child in self.source.children(path)? {
            self.visit(path, child)?;
        }
        Ok(())
    }

    fn visit(&mut self, parent: &str, child: ChildEntry) -> crate::Result<()> {
        match (&child.link, child.kind) {
            (Link::External { file, path }, _) => {
                let diagnostic = Diagnostic::ExternalLink {
                    path: child.path.clone(),
                    file: file.clone(),
                    target: path.clone(),
                };
                self.diagnose(diagnostic);
                Ok(())
            }
            (Link::Soft { target }, None) => {
                let diagnostic = Diagnostic::DanglingLink {
                    path: join_path(parent, &child.name),
                    target: target.clone(),
                };
                self.diagnose(diagnostic);
                Ok(())
            }
            (Link::Soft { target }, Some(NodeKind::Group)) => self.mirror_link(target),
            (Link::Hard, Some(NodeKind::Group)) => {
                let address = self.source.address(&child.path)?;
                match self.visited.get(&address).cloned() {
                    Some(original) if original == child.path => Ok(()),
                    Some(original) => {
                        log::debug!("{} is a hard link to group {original}", child.path);
                        self.mirror_link(&child.path)
                    }
                    None => self.walk_group(&child.path),
                }
            }
            (Link::Soft { .. } | Link::Hard, Some(NodeKind::Dataset)) => {
                self.visit_dataset(&child.path)
            }
            (Link::Hard, None) => Err(crate::Error::structural(
                &child.path,
                "member is neither a group nor a dataset",
            )),
        }
    }

    /// Create an empty group for a link unless a node already exists there.
    fn mirror_link(&mut self, path: &str) -> crate::Result<()> {
        if !self.node_exists(path)? {
            self.write_node(path, &group_metadata(Default::default()))?;
            self.report.groups += 1;
        }
        Ok(())
    }

    fn visit_dataset(&mut self, path: &str) -> crate::Result<()> {
        let address = self.source.address(path)?;
        if let Some(original) = self.visited.get(&address).cloned() {
            if original != path {
                let diagnostic = Diagnostic::AliasedDataset {
                    path: path.to_string(),
                    original: original.clone(),
                };
                self.diagnose(diagnostic);
            }
            return Ok(());
        }
        self.visited.insert(address, path.to_string());

        let info = self.source.dataset(path)?;
        if let Some(reason) = unsupported_type(&info) {
            self.diagnose(Diagnostic::UnsupportedType {
                path: path.to_string(),
                reason,
            });
            return Ok(());
        }
        let Some(codec) = self.resolve_codec(path, &info) else {
            return Ok(());
        };

        let (info, codec, attribute_path) = if info.dtype == SourceType::VarLenString {
            let Some((info, moved)) = self.materialize(path, &info)? else {
                return Ok(());
            };
            let Some(codec) = self.resolve_codec(path, &info) else {
                return Ok(());
            };
            (info, codec, moved)
        } else {
            (info, codec, path.to_string())
        };

        let descriptor = ArrayDescriptor::new(path, &info, codec)?;
        let metadata = match descriptor.to_metadata(serde_json::Map::new()) {
            Ok(metadata) => metadata,
            Err(e @ crate::Error::Structural { .. }) => return Err(e),
            Err(e) => {
                self.diagnose(Diagnostic::UnsupportedType {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };
        let index = build_chunk_index(&*self.source, path, &info)?;
        let attributes = self.attributes(&attribute_path, path)?;

        self.erase_node(path)?;
        let node = NodeMetadataV3::Array(metadata.with_attributes(attributes));
        self.write_node(path, &node)?;
        if index.is_empty() {
            log::debug!("{path} has no stored chunks");
        } else {
            let key = node_key(path, CHUNK_INDEX_KEY)?;
            let value = serde_json::to_vec(&index.to_json(path)?)?;
            self.store.set(&key, Bytes::from(value))?;
        }
        self.report.arrays += 1;
        Ok(())
    }

    /// `None` if the dataset was skipped; otherwise its optional codec.
    fn resolve_codec(&mut self, path: &str, info: &DatasetInfo) -> Option<Option<Codec>> {
        match info.filters.as_slice() {
            [] => Some(None),
            [filter] => match self.registry.resolve(filter, info.dtype.element_size()) {
                Resolution::Codec(codec) => Some(Some(codec)),
                Resolution::Unsupported { reason } => {
                    self.diagnose(Diagnostic::UnsupportedFilter {
                        path: path.to_string(),
                        id: filter.id,
                        reason,
                    });
                    None
                }
            },
            filters => {
                self.diagnose(Diagnostic::MultipleFilters {
                    path: path.to_string(),
                    count: filters.len(),
                });
                None
            }
        }
    }

    /// Replace a variable-length string dataset by a fixed-width copy.
    ///
    /// Returns the copy's info and the path the original was moved to, or
    /// `None` if the dataset is skipped.
    fn materialize(
        &mut self,
        path: &str,
        info: &DatasetInfo,
    ) -> crate::Result<Option<(DatasetInfo, String)>> {
        if base_name(path).ends_with(FIXED_LENGTH_SUFFIX) {
            log::debug!("{path} was already replaced by a fixed-width copy");
            return Ok(None);
        }
        if !(self.materialize_strings && self.source.is_writable()) {
            self.diagnose(Diagnostic::StringsNotMaterialized {
                path: path.to_string(),
            });
            return Ok(None);
        }

        let values = self.source.read_strings(path)?;
        let width = values.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let moved = format!("{path}{FIXED_LENGTH_SUFFIX}");
        self.source.rename(path, &moved)?;
        if let Err(e) = self.source.create_fixed_strings(path, info, width, &values) {
            if let Err(restore) = self.source.rename(&moved, path) {
                log::error!("could not move {moved} back to {path}: {restore}");
            }
            return Err(e);
        }
        log::info!("replaced {path} by fixed-width strings of {width} bytes");

        let address = self.source.address(path)?;
        self.visited.insert(address, path.to_string());
        Ok(Some((self.source.dataset(path)?, moved)))
    }

    /// Attributes of `source_path`, reporting drops against `target_path`.
    fn attributes(
        &mut self,
        source_path: &str,
        target_path: &str,
    ) -> crate::Result<serde_json::Map<String, serde_json::Value>> {
        let (map, dropped) = translate_attributes(&*self.source, source_path)?;
        for (name, issue) in dropped {
            let reason = match issue {
                AttributeIssue::RegionReference => issue.to_string(),
                AttributeIssue::Unrepresentable(reason) => reason,
            };
            self.diagnose(Diagnostic::DroppedAttribute {
                path: target_path.to_string(),
                name,
                reason,
            });
        }
        Ok(map)
    }

    fn node_exists(&self, path: &str) -> crate::Result<bool> {
        Ok(self
            .store
            .size_key(&node_key(path, NODE_METADATA_KEY)?)?
            .is_some())
    }

    fn write_node(&mut self, path: &str, node: &NodeMetadataV3) -> crate::Result<()> {
        self.ensure_parents(path)?;
        let key = node_key(path, NODE_METADATA_KEY)?;
        log::trace!("writing {key}");
        self.store
            .set(&key, Bytes::from(serde_json::to_vec(node)?))?;
        Ok(())
    }

    fn ensure_parents(&mut self, path: &str) -> crate::Result<()> {
        if path == "/" {
            return Ok(());
        }
        let parent = parent_path(path);
        if !self.node_exists(parent)? {
            self.ensure_parents(parent)?;
            let key = node_key(parent, NODE_METADATA_KEY)?;
            self.store.set(
                &key,
                Bytes::from(serde_json::to_vec(&group_metadata(Default::default()))?),
            )?;
            self.report.groups += 1;
        }
        Ok(())
    }

    fn erase_node(&self, path: &str) -> crate::Result<()> {
        let prefix =
            StorePrefix::new(format!("{}/", node_prefix(path))).map_err(crate::Error::wrap)?;
        self.store.erase_prefix(&prefix)?;
        Ok(())
    }
}

/// Why a dataset's shape or element type cannot be mirrored, if it cannot.
fn unsupported_type(info: &DatasetInfo) -> Option<String> {
    if info.shape.is_none() {
        return Some("null dataspace".to_string());
    }
    match &info.dtype {
        SourceType::Opaque { size } => Some(format!("opaque type of {size} bytes")),
        SourceType::Compound { fields } => Some(format!("compound type with fields {fields:?}")),
        SourceType::VarLen { base } => Some(format!("variable-length sequence of {base}")),
        SourceType::Reference => Some("reference type".to_string()),
        SourceType::VarLenString => None,
        dtype => data_type_name(dtype).err().map(|e| e.to_string()),
    }
}
