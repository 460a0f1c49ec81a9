use std::{io::Write, sync::Arc};

use bytes::Bytes;
use zarrs::storage::{
    ReadableStorageTraits, StoreKey, StorePrefix, WritableStorageTraits, store::MemoryStore,
};
use zarrs_hdf5_ref::{
    BridgeOptions, Error, StoreMode, VirtualHierarchy,
    source::{ByteOrder, DatasetInfo, SourceType, memory::MemoryContainer},
    storage::{ByteSource, FileSource},
};

fn key(s: &str) -> StoreKey {
    StoreKey::new(s).unwrap()
}

/// Eight one-dimensional chunks of 64 distinct bytes each.
fn source() -> MemoryContainer {
    env_logger::try_init().ok();
    let mut c = MemoryContainer::new("memory://bridge");
    c.create_dataset(
        "/x",
        DatasetInfo::new(
            vec![512],
            SourceType::UInt {
                size: 1,
                order: ByteOrder::Little,
            },
        )
        .with_chunks(vec![64]),
    )
    .unwrap();
    for i in 0..8u8 {
        let chunk: Vec<u8> = (0..64).map(|j| i.wrapping_mul(64).wrapping_add(j)).collect();
        c.write_chunk("/x", vec![u64::from(i) * 64], &chunk).unwrap();
    }
    c
}

fn build(
    c: &mut MemoryContainer,
    store: Arc<MemoryStore>,
    options: &BridgeOptions,
) -> zarrs_hdf5_ref::Result<VirtualHierarchy<MemoryStore>> {
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());
    VirtualHierarchy::build(c, bytes, store, options)
}

#[test]
fn test_build_reports_and_counts() {
    let mut c = source();
    let hierarchy = build(&mut c, Arc::new(MemoryStore::new()), &BridgeOptions::default()).unwrap();
    let report = hierarchy.report().unwrap();
    assert_eq!((report.groups, report.arrays), (1, 1));

    let chunks = hierarchy.chunk_store();
    assert_eq!(chunks.count(), 8);
    let keys: Vec<_> = chunks.chunk_keys().collect();
    assert_eq!(keys.first().map(String::as_str), Some("x/0"));
    assert_eq!(keys.len(), 8);
    assert_eq!(chunks.chunk_keys().count(), 8);
}

#[test]
fn test_read_mode_cannot_build() {
    let mut c = source();
    let options = BridgeOptions::default().with_store_mode(StoreMode::Read);
    assert!(build(&mut c, Arc::new(MemoryStore::new()), &options).is_err());
}

#[test]
fn test_create_new_refuses_existing_hierarchy() {
    let store = Arc::new(MemoryStore::new());
    let options = BridgeOptions::default().with_store_mode(StoreMode::CreateNew);
    build(&mut source(), store.clone(), &options).unwrap();
    assert!(build(&mut source(), store, &options).is_err());
}

#[test]
fn test_overwrite_clears_store() {
    let store = Arc::new(MemoryStore::new());
    store.set(&key("stale/zarr.json"), Bytes::from_static(b"{}"))
        .unwrap();
    build(&mut source(), store.clone(), &BridgeOptions::default()).unwrap();
    assert_eq!(store.get(&key("stale/zarr.json")).unwrap(), None);
    assert!(store.get(&key(".zmetadata")).unwrap().is_some());
}

#[test]
fn test_open_uses_consolidated_metadata_only() {
    let store = Arc::new(MemoryStore::new());
    let mut c = source();
    build(&mut c, store.clone(), &BridgeOptions::default()).unwrap();

    // per-node documents are not consulted once consolidated
    store.erase_prefix(&StorePrefix::new("x/").unwrap()).unwrap();
    let options = BridgeOptions::default().with_store_mode(StoreMode::Read);
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());
    let hierarchy = VirtualHierarchy::open(bytes, store, &options).unwrap();
    assert!(hierarchy.report().is_none());

    let array = zarrs::array::Array::open(hierarchy.storage(), "/x").expect("open array");
    let data: Vec<u8> = array
        .retrieve_array_subset(&array.subset_all())
        .expect("retrieve all data");
    let expected: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
    assert_eq!(data, expected);
}

#[test]
fn test_open_without_consolidated_blob() {
    let store = Arc::new(MemoryStore::new());
    let mut c = source();
    let unconsolidated = BridgeOptions::default().with_consolidation(false);
    build(&mut c, store.clone(), &unconsolidated).unwrap();
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());

    assert!(
        VirtualHierarchy::open(bytes.clone(), store.clone(), &BridgeOptions::default()).is_err()
    );
    let hierarchy = VirtualHierarchy::open(bytes, store, &unconsolidated).unwrap();
    assert_eq!(hierarchy.chunk_store().count(), 8);
}

#[test]
fn test_custom_metadata_key() {
    let store = Arc::new(MemoryStore::new());
    let options = BridgeOptions::default().with_metadata_key("meta/consolidated");
    build(&mut source(), store.clone(), &options).unwrap();
    assert!(store.get(&key("meta/consolidated")).unwrap().is_some());
    assert!(store.get(&key(".zmetadata")).unwrap().is_none());
}

#[test]
fn test_store_is_immutable() {
    let hierarchy =
        build(&mut source(), Arc::new(MemoryStore::new()), &BridgeOptions::default()).unwrap();
    let chunks = hierarchy.chunk_store();
    let before = chunks.get(&key("x/1")).unwrap();

    let err = chunks.set(&key("x/1"), Bytes::from_static(b"new")).unwrap_err();
    assert!(matches!(err, Error::ImmutableStore { operation: "set", .. }));
    let err = chunks.erase(&key("x/1")).unwrap_err();
    assert!(matches!(err, Error::ImmutableStore { .. }));
    let err = chunks.erase_prefix(&StorePrefix::root()).unwrap_err();
    assert!(matches!(err, Error::ImmutableStore { .. }));

    assert_eq!(chunks.get(&key("x/1")).unwrap(), before);
}

#[test]
fn test_missing_chunk_is_not_found() {
    let mut c = source();
    c.create_dataset(
        "/sparse",
        DatasetInfo::new(
            vec![4],
            SourceType::UInt {
                size: 1,
                order: ByteOrder::Little,
            },
        )
        .with_chunks(vec![2]),
    )
    .unwrap();
    c.write_chunk("/sparse", vec![2], &[7, 8]).unwrap();
    let hierarchy = build(&mut c, Arc::new(MemoryStore::new()), &BridgeOptions::default()).unwrap();
    let chunks = hierarchy.chunk_store();
    assert!(chunks.read_chunk(&key("sparse/0")).unwrap_err().is_not_found());
    assert_eq!(chunks.read_chunk(&key("sparse/1")).unwrap().as_ref(), &[7, 8]);
    assert_eq!(chunks.get(&key("sparse/0")).unwrap(), None);
}

#[test]
fn test_concurrent_reads_from_file() {
    let mut c = source();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&c.bytes()).unwrap();
    file.flush().unwrap();
    let backing: Arc<dyn ByteSource> = Arc::new(FileSource::from_path(file.path()).unwrap());

    let options = BridgeOptions::default().with_lru(None);
    let hierarchy =
        VirtualHierarchy::build(&mut c, backing, Arc::new(MemoryStore::new()), &options).unwrap();
    let chunks = hierarchy.chunk_store();

    std::thread::scope(|scope| {
        for i in 0..8u8 {
            let chunks = chunks.clone();
            scope.spawn(move || {
                let expected: Vec<u8> =
                    (0..64).map(|j| i.wrapping_mul(64).wrapping_add(j)).collect();
                let key = key(&format!("x/{i}"));
                for _ in 0..200 {
                    let bytes = chunks.read_chunk(&key).unwrap();
                    assert_eq!(bytes.as_ref(), expected.as_slice());
                }
            });
        }
    });
}

#[test]
fn test_truncated_file_is_an_io_error() {
    let mut c = source();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&c.bytes()[..100]).unwrap();
    file.flush().unwrap();
    let backing: Arc<dyn ByteSource> = Arc::new(FileSource::from_path(file.path()).unwrap());
    let hierarchy = VirtualHierarchy::build(
        &mut c,
        backing,
        Arc::new(MemoryStore::new()),
        &BridgeOptions::default(),
    )
    .unwrap();

    let err = hierarchy.chunk_store().read_chunk(&key("x/7")).unwrap_err();
    assert!(matches!(err, Error::BackingStore(_)));
    assert!(hierarchy.storage().get(&key("x/7")).is_err());
}
