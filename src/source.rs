//! The source container as seen by the hierarchy walker.
//!
//! Opening and parsing the container file is left to implementors of
//! [`SourceContainer`]; this crate only consumes hierarchy, attribute and
//! storage-layout information through it.
//! [`MemoryContainer`](memory::MemoryContainer) is an in-memory implementation.

pub mod memory;

use crate::Result;

/// Kind of object a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Dataset,
}

/// How a child is linked into its parent group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Hard,
    /// Symbolic link to an absolute path in the same container.
    Soft { target: String },
    /// Link into another container file.
    External { file: String, path: String },
}

/// One member of a group, as reported by child iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEntry {
    /// Link name within the parent.
    pub name: String,
    /// Absolute path through which the object should be addressed.
    ///
    /// For hard links this is `<parent>/<name>`; for soft links it is the link target.
    pub path: String,
    pub link: Link,
    /// Resolved object kind, `None` if the link cannot be followed.
    pub kind: Option<NodeKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Element type of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    Bool,
    Int { size: u8, order: ByteOrder },
    UInt { size: u8, order: ByteOrder },
    Float { size: u8, order: ByteOrder },
    /// Fixed-width byte string of `length` bytes.
    FixedBytes { length: usize },
    VarLenString,
    /// Variable-length sequence of a non-string base type.
    VarLen { base: String },
    Compound { fields: Vec<String> },
    Opaque { size: usize },
    /// Object or region references stored as elements.
    Reference,
}

impl SourceType {
    /// Size of one element in bytes, if fixed.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            SourceType::Bool => Some(1),
            SourceType::Int { size, .. }
            | SourceType::UInt { size, .. }
            | SourceType::Float { size, .. } => Some(*size as usize),
            SourceType::FixedBytes { length } => Some(*length),
            SourceType::Opaque { size } => Some(*size),
            _ => None,
        }
    }
}

/// A scalar value as stored natively, used for fill values.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

/// One entry of a dataset's filter pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u32,
    pub name: String,
    /// Filter client data (`cd_values`).
    pub client_data: Vec<u32>,
}

impl Filter {
    pub fn new(id: u32, name: impl Into<String>, client_data: Vec<u32>) -> Self {
        Self {
            id,
            name: name.into(),
            client_data,
        }
    }
}

/// Shape, type and storage properties of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    /// `None` for a null dataspace; empty for a scalar.
    pub shape: Option<Vec<u64>>,
    /// Maximum extents; `None` entries are unlimited.
    pub maxshape: Option<Vec<Option<u64>>>,
    pub dtype: SourceType,
    /// Chunk shape, `None` if the dataset is not chunked.
    pub chunks: Option<Vec<u64>>,
    pub fill_value: Option<Scalar>,
    pub filters: Vec<Filter>,
}

impl DatasetInfo {
    pub fn new(shape: Vec<u64>, dtype: SourceType) -> Self {
        Self {
            maxshape: Some(shape.iter().map(|&n| Some(n)).collect()),
            shape: Some(shape),
            dtype,
            chunks: None,
            fill_value: None,
            filters: Vec::new(),
        }
    }

    /// A dataset with no dataspace.
    pub fn null(dtype: SourceType) -> Self {
        Self {
            shape: None,
            maxshape: None,
            dtype,
            chunks: None,
            fill_value: None,
            filters: Vec::new(),
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<u64>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn with_fill_value(mut self, fill_value: Scalar) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_maxshape(mut self, maxshape: Vec<Option<u64>>) -> Self {
        self.maxshape = Some(maxshape);
        self
    }
}

/// A physically written chunk as reported by low-level chunk inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// Element offset of the chunk's first element, per dimension.
    pub grid_offset: Vec<u64>,
    /// Byte offset in the container file.
    pub byte_offset: u64,
    /// Stored (possibly compressed) size in bytes.
    pub size: u64,
}

/// Location of contiguously stored raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageExtent {
    pub offset: u64,
    pub size: u64,
}

/// Reference to an object in the container; `None` is an unset reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef(pub Option<u64>);

/// Attribute value in its native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Reference(ObjectRef),
    RegionReference,
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(AttributeArray),
    /// Any native value with no JSON form, described by its type name.
    Other(String),
}

/// N-dimensional attribute value, elements in C order.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeArray {
    pub shape: Vec<usize>,
    pub values: ArrayValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValues {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
    String(Vec<String>),
    Reference(Vec<ObjectRef>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Bool(v) => v.len(),
            ArrayValues::Int(v) => v.len(),
            ArrayValues::UInt(v) => v.len(),
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Bytes(v) => v.len(),
            ArrayValues::String(v) => v.len(),
            ArrayValues::Reference(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read access to a hierarchical chunked container, plus the narrow write
/// access needed to materialize fixed-width string copies.
///
/// All paths are absolute, `/`-separated, with `/` as the root group.
pub trait SourceContainer {
    /// URI of the file holding the container's bytes.
    fn uri(&self) -> &str;

    /// Whether [`rename`](Self::rename) and
    /// [`create_fixed_strings`](Self::create_fixed_strings) may succeed.
    fn is_writable(&self) -> bool {
        false
    }

    /// Resolve the kind of the object at `path`, following links.
    fn kind(&self, path: &str) -> Result<Option<NodeKind>>;

    /// Physical address of the object at `path`, identical for all hard links to it.
    fn address(&self, path: &str) -> Result<u64>;

    fn attributes(&self, path: &str) -> Result<Vec<(String, AttributeValue)>>;

    /// Members of the group at `path`, in iteration order.
    fn children(&self, path: &str) -> Result<Vec<ChildEntry>>;

    fn dataset(&self, path: &str) -> Result<DatasetInfo>;

    /// Every physically written chunk of a chunked dataset.
    fn stored_chunks(&self, path: &str) -> Result<Vec<StoredChunk>>;

    /// Raw storage of a contiguous dataset, `None` if never allocated.
    fn contiguous_extent(&self, path: &str) -> Result<Option<StorageExtent>>;

    /// Absolute path of the referenced object, `None` for an unset reference.
    fn dereference(&self, reference: ObjectRef) -> Result<Option<String>>;

    /// UTF-8 encoded elements of a variable-length string dataset, in C order.
    fn read_strings(&self, path: &str) -> Result<Vec<Vec<u8>>>;

    fn rename(&mut self, from: &str, _to: &str) -> Result<()> {
        Err(crate::Error::general(format!(
            "cannot rename {from}: source container is read-only"
        )))
    }

    /// Create a fixed-width byte-string dataset at `path` holding `values`,
    /// taking shape, maxshape, chunking, filters and fill value from `template`.
    fn create_fixed_strings(
        &mut self,
        path: &str,
        _template: &DatasetInfo,
        _width: usize,
        _values: &[Vec<u8>],
    ) -> Result<()> {
        Err(crate::Error::general(format!(
            "cannot create {path}: source container is read-only"
        )))
    }
}

/// Join a group path and a member name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent group of an absolute path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// Final component of an absolute path.
pub fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(base_name("/a/b"), "b");
    }
}
