use std::collections::BTreeMap;

use bytes::Bytes;

use super::{
    AttributeValue, ChildEntry, DatasetInfo, Link, NodeKind, ObjectRef, SourceContainer,
    SourceType, StorageExtent, StoredChunk, base_name, join_path, parent_path,
};
use crate::{Error, Result};

const ROOT_ADDRESS: u64 = 0;
const MAX_LINK_DEPTH: usize = 16;

#[derive(Debug, Clone)]
enum MemoryLink {
    Hard(u64),
    Soft(String),
    External { file: String, path: String },
}

#[derive(Debug, Clone)]
enum Layout {
    Contiguous(Option<StorageExtent>),
    Chunked(Vec<StoredChunk>),
}

#[derive(Debug, Clone)]
enum Body {
    Group(BTreeMap<String, MemoryLink>),
    Dataset {
        info: DatasetInfo,
        layout: Layout,
        strings: Vec<Vec<u8>>,
    },
}

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Body,
    attributes: Vec<(String, AttributeValue)>,
}

/// An in-memory container: a link graph of groups and datasets over a byte buffer.
///
/// Members iterate in name order. Datasets created by
/// [`create_fixed_strings`](SourceContainer::create_fixed_strings) are stored
/// contiguously and unfiltered.
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    uri: String,
    writable: bool,
    data: Vec<u8>,
    objects: BTreeMap<u64, MemoryObject>,
    next_address: u64,
}

impl MemoryContainer {
    pub fn new(uri: impl Into<String>) -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(
            ROOT_ADDRESS,
            MemoryObject {
                body: Body::Group(BTreeMap::new()),
                attributes: Vec::new(),
            },
        );
        Self {
            uri: uri.into(),
            writable: false,
            data: Vec::new(),
            objects,
            next_address: ROOT_ADDRESS + 1,
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// The container's bytes, for serving chunk reads.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Pad the byte buffer to at least `len` bytes.
    pub fn reserve_bytes(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    fn append(&mut self, bytes: &[u8]) -> StorageExtent {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        StorageExtent {
            offset,
            size: bytes.len() as u64,
        }
    }

    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.insert_object(
            path,
            MemoryObject {
                body: Body::Group(BTreeMap::new()),
                attributes: Vec::new(),
            },
        )
    }

    /// Create a dataset with no storage allocated yet.
    pub fn create_dataset(&mut self, path: &str, info: DatasetInfo) -> Result<()> {
        let layout = if info.chunks.is_some() {
            Layout::Chunked(Vec::new())
        } else {
            Layout::Contiguous(None)
        };
        self.insert_object(
            path,
            MemoryObject {
                body: Body::Dataset {
                    info,
                    layout,
                    strings: Vec::new(),
                },
                attributes: Vec::new(),
            },
        )
    }

    /// Append raw bytes as the contiguous storage of a dataset.
    pub fn write_contiguous(&mut self, path: &str, bytes: &[u8]) -> Result<StorageExtent> {
        let extent = self.append(bytes);
        self.set_contiguous_extent(path, extent)?;
        Ok(extent)
    }

    pub fn set_contiguous_extent(&mut self, path: &str, extent: StorageExtent) -> Result<()> {
        let (_, layout, _) = self.dataset_body_mut(path)?;
        match layout {
            Layout::Contiguous(slot) => {
                *slot = Some(extent);
                Ok(())
            }
            Layout::Chunked(_) => Err(Error::general(format!("{path} is chunked"))),
        }
    }

    /// Append `bytes` as the chunk starting at element offset `grid_offset`.
    pub fn write_chunk(
        &mut self,
        path: &str,
        grid_offset: Vec<u64>,
        bytes: &[u8],
    ) -> Result<StoredChunk> {
        let extent = self.append(bytes);
        let chunk = StoredChunk {
            grid_offset,
            byte_offset: extent.offset,
            size: extent.size,
        };
        self.place_chunk(path, chunk.clone())?;
        Ok(chunk)
    }

    /// Record a chunk at an explicit file position.
    pub fn place_chunk(&mut self, path: &str, chunk: StoredChunk) -> Result<()> {
        match self.dataset_body_mut(path)? {
            (_, Layout::Chunked(chunks), _) => {
                chunks.push(chunk);
                Ok(())
            }
            _ => Err(Error::general(format!("{path} is not chunked"))),
        }
    }

    /// Set the elements of a variable-length string dataset.
    pub fn set_strings<S: AsRef<str>>(&mut self, path: &str, values: &[S]) -> Result<()> {
        let (_, _, strings) = self.dataset_body_mut(path)?;
        *strings = values
            .iter()
            .map(|s| s.as_ref().as_bytes().to_vec())
            .collect();
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        path: &str,
        name: impl Into<String>,
        value: AttributeValue,
    ) -> Result<()> {
        let address = self.require(path)?;
        let object = self
            .objects
            .get_mut(&address)
            .ok_or_else(|| Error::general(format!("dangling object {address}")))?;
        let name = name.into();
        object.attributes.retain(|(n, _)| n != &name);
        object.attributes.push((name, value));
        Ok(())
    }

    /// Add another hard link to the object at `target`.
    pub fn link_hard(&mut self, path: &str, target: &str) -> Result<()> {
        let address = self.require(target)?;
        self.insert_link(path, MemoryLink::Hard(address))
    }

    pub fn link_soft(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert_link(path, MemoryLink::Soft(target.to_string()))
    }

    pub fn link_external(&mut self, path: &str, file: &str, target: &str) -> Result<()> {
        self.insert_link(
            path,
            MemoryLink::External {
                file: file.to_string(),
                path: target.to_string(),
            },
        )
    }

    /// Object reference to whatever `path` resolves to.
    pub fn reference(&self, path: &str) -> Result<ObjectRef> {
        Ok(ObjectRef(Some(self.require(path)?)))
    }

    fn insert_object(&mut self, path: &str, object: MemoryObject) -> Result<()> {
        let address = self.next_address;
        self.insert_link(path, MemoryLink::Hard(address))?;
        self.next_address += 1;
        self.objects.insert(address, object);
        Ok(())
    }

    fn insert_link(&mut self, path: &str, link: MemoryLink) -> Result<()> {
        let parent = self.require(parent_path(path))?;
        let name = base_name(path);
        if name.is_empty() {
            return Err(Error::general(format!("invalid path {path:?}")));
        }
        let Some(MemoryObject {
            body: Body::Group(links),
            ..
        }) = self.objects.get_mut(&parent)
        else {
            return Err(Error::general(format!("parent of {path} is not a group")));
        };
        if links.contains_key(name) {
            return Err(Error::general(format!("{path} already exists")));
        }
        links.insert(name.to_string(), link);
        Ok(())
    }

    fn dataset_body_mut(
        &mut self,
        path: &str,
    ) -> Result<(&mut DatasetInfo, &mut Layout, &mut Vec<Vec<u8>>)> {
        let address = self.require(path)?;
        match self.objects.get_mut(&address) {
            Some(MemoryObject {
                body:
                    Body::Dataset {
                        info,
                        layout,
                        strings,
                    },
                ..
            }) => Ok((info, layout, strings)),
            _ => Err(Error::general(format!("{path} is not a dataset"))),
        }
    }

    fn resolve(&self, path: &str, depth: usize) -> Result<Option<u64>> {
        if depth > MAX_LINK_DEPTH {
            return Err(Error::general(format!("too many levels of links at {path}")));
        }
        let mut current = ROOT_ADDRESS;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let Some(MemoryObject {
                body: Body::Group(links),
                ..
            }) = self.objects.get(&current)
            else {
                return Ok(None);
            };
            current = match links.get(component) {
                Some(MemoryLink::Hard(address)) => *address,
                Some(MemoryLink::Soft(target)) => match self.resolve(target, depth + 1)? {
                    Some(address) => address,
                    None => return Ok(None),
                },
                Some(MemoryLink::External { .. }) | None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    fn require(&self, path: &str) -> Result<u64> {
        self.resolve(path, 0)?
            .ok_or_else(|| Error::general(format!("no object at {path}")))
    }

    fn object(&self, path: &str) -> Result<&MemoryObject> {
        let address = self.require(path)?;
        self.objects
            .get(&address)
            .ok_or_else(|| Error::general(format!("dangling object {address}")))
    }

    fn kind_of(&self, address: u64) -> Option<NodeKind> {
        self.objects.get(&address).map(|o| match o.body {
            Body::Group(_) => NodeKind::Group,
            Body::Dataset { .. } => NodeKind::Dataset,
        })
    }

    /// First hard-link path to `address`, searching breadth-first in name order.
    fn path_of(&self, address: u64) -> Option<String> {
        let mut queue = std::collections::VecDeque::from([("/".to_string(), ROOT_ADDRESS)]);
        let mut seen = std::collections::HashSet::new();
        while let Some((path, current)) = queue.pop_front() {
            if current == address {
                return Some(path);
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(MemoryObject {
                body: Body::Group(links),
                ..
            }) = self.objects.get(&current)
            {
                for (name, link) in links {
                    if let MemoryLink::Hard(child) = link {
                        queue.push_back((join_path(&path, name), *child));
                    }
                }
            }
        }
        None
    }
}

impl SourceContainer for MemoryContainer {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn kind(&self, path: &str) -> Result<Option<NodeKind>> {
        Ok(self.resolve(path, 0)?.and_then(|a| self.kind_of(a)))
    }

    fn address(&self, path: &str) -> Result<u64> {
        self.require(path)
    }

    fn attributes(&self, path: &str) -> Result<Vec<(String, AttributeValue)>> {
        Ok(self.object(path)?.attributes.clone())
    }

    fn children(&self, path: &str) -> Result<Vec<ChildEntry>> {
        let Body::Group(links) = &self.object(path)?.body else {
            return Err(Error::general(format!("{path} is not a group")));
        };
        links
            .iter()
            .map(|(name, link)| {
                let entry = match link {
                    MemoryLink::Hard(address) => ChildEntry {
                        name: name.clone(),
                        path: join_path(path, name),
                        link: Link::Hard,
                        kind: self.kind_of(*address),
                    },
                    MemoryLink::Soft(target) => ChildEntry {
                        name: name.clone(),
                        path: target.clone(),
                        link: Link::Soft {
                            target: target.clone(),
                        },
                        kind: self.kind(target)?,
                    },
                    MemoryLink::External { file, path: target } => ChildEntry {
                        name: name.clone(),
                        path: join_path(path, name),
                        link: Link::External {
                            file: file.clone(),
                            path: target.clone(),
                        },
                        kind: None,
                    },
                };
                Ok(entry)
            })
            .collect()
    }

    fn dataset(&self, path: &str) -> Result<DatasetInfo> {
        match &self.object(path)?.body {
            Body::Dataset { info, .. } => Ok(info.clone()),
            Body::Group(_) => Err(Error::general(format!("{path} is not a dataset"))),
        }
    }

    fn stored_chunks(&self, path: &str) -> Result<Vec<StoredChunk>> {
        match &self.object(path)?.body {
            Body::Dataset {
                layout: Layout::Chunked(chunks),
                ..
            } => Ok(chunks.clone()),
            Body::Dataset { .. } => Ok(Vec::new()),
            Body::Group(_) => Err(Error::general(format!("{path} is not a dataset"))),
        }
    }

    fn contiguous_extent(&self, path: &str) -> Result<Option<StorageExtent>> {
        match &self.object(path)?.body {
            Body::Dataset {
                layout: Layout::Contiguous(extent),
                ..
            } => Ok(*extent),
            Body::Dataset { .. } => Ok(None),
            Body::Group(_) => Err(Error::general(format!("{path} is not a dataset"))),
        }
    }

    fn dereference(&self, reference: ObjectRef) -> Result<Option<String>> {
        let Some(address) = reference.0 else {
            return Ok(None);
        };
        self.path_of(address)
            .map(Some)
            .ok_or_else(|| Error::general(format!("dangling object reference {address}")))
    }

    fn read_strings(&self, path: &str) -> Result<Vec<Vec<u8>>> {
        match &self.object(path)?.body {
            Body::Dataset {
                info:
                    DatasetInfo {
                        dtype: SourceType::VarLenString,
                        ..
                    },
                strings,
                ..
            } => Ok(strings.clone()),
            _ => Err(Error::general(format!(
                "{path} is not a variable-length string dataset"
            ))),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.writable {
            return Err(Error::general(format!(
                "cannot rename {from}: source container is read-only"
            )));
        }
        let parent = self.require(parent_path(from))?;
        let link = match self.objects.get_mut(&parent) {
            Some(MemoryObject {
                body: Body::Group(links),
                ..
            }) => links
                .remove(base_name(from))
                .ok_or_else(|| Error::general(format!("no link at {from}")))?,
            _ => return Err(Error::general(format!("parent of {from} is not a group"))),
        };
        if let Err(e) = self.insert_link(to, link.clone()) {
            // put the link back where it was
            if let Some(MemoryObject {
                body: Body::Group(links),
                ..
            }) = self.objects.get_mut(&parent)
            {
                links.insert(base_name(from).to_string(), link);
            }
            return Err(e);
        }
        Ok(())
    }

    fn create_fixed_strings(
        &mut self,
        path: &str,
        template: &DatasetInfo,
        width: usize,
        values: &[Vec<u8>],
    ) -> Result<()> {
        if !self.writable {
            return Err(Error::general(format!(
                "cannot create {path}: source container is read-only"
            )));
        }
        let mut info = template.clone();
        info.dtype = SourceType::FixedBytes { length: width };
        info.chunks = None;
        info.filters.clear();
        let mut raw = Vec::with_capacity(width * values.len());
        for value in values {
            let mut padded = value.clone();
            padded.resize(width, 0);
            raw.extend_from_slice(&padded);
        }
        self.create_dataset(path, info)?;
        self.write_contiguous(path, &raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ByteOrder;

    fn container() -> MemoryContainer {
        let mut c = MemoryContainer::new("memory://test").writable(true);
        c.create_group("/a").unwrap();
        c.create_dataset(
            "/a/x",
            DatasetInfo::new(vec![4], SourceType::UInt { size: 1, order: ByteOrder::Little }),
        )
        .unwrap();
        c.write_contiguous("/a/x", &[1, 2, 3, 4]).unwrap();
        c
    }

    #[test]
    fn links_resolve_to_the_same_address() {
        let mut c = container();
        c.link_hard("/alias", "/a").unwrap();
        c.link_soft("/soft", "/a/x").unwrap();
        assert_eq!(c.address("/alias").unwrap(), c.address("/a").unwrap());
        assert_eq!(c.kind("/soft").unwrap(), Some(NodeKind::Dataset));

        let children = c.children("/").unwrap();
        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "alias", "soft"]);
        assert_eq!(children[2].path, "/a/x");
    }

    #[test]
    fn dereference_finds_hard_path() {
        let c = container();
        let r = c.reference("/a/x").unwrap();
        assert_eq!(c.dereference(r).unwrap().as_deref(), Some("/a/x"));
        assert_eq!(c.dereference(ObjectRef(None)).unwrap(), None);
    }

    #[test]
    fn rename_moves_link() {
        let mut c = container();
        c.rename("/a/x", "/a/y").unwrap();
        assert_eq!(c.kind("/a/x").unwrap(), None);
        assert_eq!(
            c.contiguous_extent("/a/y").unwrap(),
            Some(StorageExtent { offset: 0, size: 4 })
        );
    }

    #[test]
    fn read_only_refuses_mutation() {
        let mut c = container().writable(false);
        assert!(c.rename("/a/x", "/a/y").is_err());
        assert_eq!(c.kind("/a/x").unwrap(), Some(NodeKind::Dataset));
    }
}
