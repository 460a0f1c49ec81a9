use std::sync::Arc;

use bytes::Bytes;
use zarrs::{
    array::{Array, ArrayMetadata},
    storage::{ReadableListableStorage, ReadableStorageTraits, StoreKey, store::MemoryStore},
};
use zarrs_hdf5_ref::{
    BridgeOptions, VirtualHierarchy,
    codec::{CodecRegistry, Resolution},
    metadata::ArrayDescriptor,
    source::{ByteOrder, DatasetInfo, Filter, Scalar, SourceType, memory::MemoryContainer},
    storage::ByteSource,
};

fn f4() -> SourceType {
    SourceType::Float {
        size: 4,
        order: ByteOrder::Little,
    }
}

fn le(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A 4x4 float array in 2x2 chunks, with the lower-left chunk never written.
fn source() -> MemoryContainer {
    env_logger::try_init().ok();
    let mut c = MemoryContainer::new("memory://read");
    c.create_group("/g").unwrap();
    c.create_dataset(
        "/g/x",
        DatasetInfo::new(vec![4, 4], f4())
            .with_chunks(vec![2, 2])
            .with_fill_value(Scalar::Float(-1.0)),
    )
    .unwrap();
    c.write_chunk("/g/x", vec![0, 0], &le(&[0., 1., 4., 5.])).unwrap();
    c.write_chunk("/g/x", vec![0, 2], &le(&[2., 3., 6., 7.])).unwrap();
    c.write_chunk("/g/x", vec![2, 2], &le(&[10., 11., 14., 15.])).unwrap();

    c.create_dataset(
        "/g/contiguous",
        DatasetInfo::new(vec![2, 3], f4()),
    )
    .unwrap();
    c.write_contiguous("/g/contiguous", &le(&[1., 2., 3., 4., 5., 6.])).unwrap();

    c.create_dataset(
        "/big_endian",
        DatasetInfo::new(
            vec![3],
            SourceType::Int {
                size: 2,
                order: ByteOrder::Big,
            },
        ),
    )
    .unwrap();
    let raw: Vec<u8> = [1i16, -2, 300]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect();
    c.write_contiguous("/big_endian", &raw).unwrap();
    c
}

fn storage(options: &BridgeOptions) -> ReadableListableStorage {
    let mut c = source();
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());
    let hierarchy =
        VirtualHierarchy::build(&mut c, bytes, Arc::new(MemoryStore::new()), options).unwrap();
    hierarchy.storage()
}

fn read_f32(store: ReadableListableStorage, path: &str) -> (Vec<u64>, Vec<f32>) {
    let array = Array::open(store, path).expect("open array");
    let shape = array.shape().to_vec();
    let data: Vec<f32> = array
        .retrieve_array_subset(&array.subset_all())
        .expect("retrieve all data");
    (shape, data)
}

#[test]
fn test_chunked_with_missing_chunk() {
    let (shape, data) = read_f32(storage(&BridgeOptions::default()), "/g/x");
    assert_eq!(shape, vec![4, 4]);
    #[rustfmt::skip]
    let expected = vec![
        0., 1., 2., 3.,
        4., 5., 6., 7.,
        -1., -1., 10., 11.,
        -1., -1., 14., 15.,
    ];
    assert_eq!(data, expected);
}

#[test]
fn test_contiguous() {
    let (shape, data) = read_f32(storage(&BridgeOptions::default()), "/g/contiguous");
    assert_eq!(shape, vec![2, 3]);
    assert_eq!(data, vec![1., 2., 3., 4., 5., 6.]);
}

#[test]
fn test_big_endian() {
    let store = storage(&BridgeOptions::default());
    let array = Array::open(store, "/big_endian").expect("open array");
    let data: Vec<i16> = array
        .retrieve_array_subset(&array.subset_all())
        .expect("retrieve all data");
    assert_eq!(data, vec![1, -2, 300]);
}

#[test]
fn test_without_cache_or_consolidation() {
    let options = BridgeOptions::default()
        .with_lru(None)
        .with_consolidation(false);
    let (_, data) = read_f32(storage(&options), "/g/contiguous");
    assert_eq!(data, vec![1., 2., 3., 4., 5., 6.]);
}

#[test]
fn test_group_attributes() {
    let mut c = source();
    c.set_attribute(
        "/g",
        "title",
        zarrs_hdf5_ref::source::AttributeValue::String("demo".into()),
    )
    .unwrap();
    let bytes: Arc<dyn ByteSource> = Arc::new(Bytes::new());
    let hierarchy = VirtualHierarchy::build(
        &mut c,
        bytes,
        Arc::new(MemoryStore::new()),
        &BridgeOptions::default(),
    )
    .unwrap();
    let group = zarrs::group::Group::open(hierarchy.storage(), "/g").expect("open group");
    assert_eq!(group.attributes()["title"], "demo");
}

#[test]
fn test_empty_chunk_reads_as_fill() {
    env_logger::try_init().ok();
    let mut c = MemoryContainer::new("memory://empty");
    c.create_dataset(
        "/e",
        DatasetInfo::new(
            vec![4],
            SourceType::UInt {
                size: 1,
                order: ByteOrder::Little,
            },
        )
        .with_chunks(vec![2])
        .with_fill_value(Scalar::UInt(9)),
    )
    .unwrap();
    c.write_chunk("/e", vec![0], &[]).unwrap();
    c.write_chunk("/e", vec![2], &[1, 2]).unwrap();
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());
    let hierarchy = VirtualHierarchy::build(
        &mut c,
        bytes,
        Arc::new(MemoryStore::new()),
        &BridgeOptions::default(),
    )
    .unwrap();

    let array = Array::open(hierarchy.storage(), "/e").expect("open array");
    let data: Vec<u8> = array
        .retrieve_array_subset(&array.subset_all())
        .expect("retrieve all data");
    assert_eq!(data, vec![9, 9, 1, 2]);
}

/// Encode one chunk of an array described by `info` the way zarrs writes it.
fn encode_chunk(info: &DatasetInfo, filter: &Filter, values: &[f32]) -> Vec<u8> {
    let codec = match CodecRegistry::new().resolve(filter, Some(4)) {
        Resolution::Codec(codec) => codec,
        other => panic!("filter {} did not resolve: {other:?}", filter.id),
    };
    let descriptor = ArrayDescriptor::new("/scratch", info, Some(codec)).unwrap();
    let metadata = descriptor.to_metadata(serde_json::Map::new()).unwrap();
    let store = Arc::new(MemoryStore::new());
    let array =
        Array::new_with_metadata(store.clone(), "/scratch", ArrayMetadata::V3(metadata)).unwrap();
    array.store_chunk(&[0], values).unwrap();
    store
        .get(&StoreKey::new("scratch/0").unwrap())
        .unwrap()
        .expect("chunk written")
        .to_vec()
}

/// Read back a 16-element float array stored in two chunks compressed by `filter`.
fn check_compressed(filter: Filter) {
    env_logger::try_init().ok();
    let values: Vec<f32> = (0..16).map(|i| i as f32 * 0.5 - 3.0).collect();
    let info = DatasetInfo::new(vec![16], f4())
        .with_chunks(vec![8])
        .with_filter(filter.clone());

    let mut c = MemoryContainer::new("memory://compressed");
    c.create_dataset("/x", info.clone()).unwrap();
    for (i, chunk) in values.chunks(8).enumerate() {
        let encoded = encode_chunk(&info, &filter, chunk);
        assert_ne!(encoded, le(chunk));
        c.write_chunk("/x", vec![i as u64 * 8], &encoded).unwrap();
    }
    let bytes: Arc<dyn ByteSource> = Arc::new(c.bytes());
    let hierarchy = VirtualHierarchy::build(
        &mut c,
        bytes,
        Arc::new(MemoryStore::new()),
        &BridgeOptions::default(),
    )
    .unwrap();
    assert!(hierarchy.report().unwrap().diagnostics.is_empty());

    let (shape, data) = read_f32(hierarchy.storage(), "/x");
    assert_eq!(shape, vec![16]);
    assert_eq!(data, values);
}

#[test]
fn test_deflate() {
    check_compressed(Filter::new(1, "deflate", vec![5]));
}

#[test]
fn test_bz2() {
    check_compressed(Filter::new(307, "bzip2", vec![9]));
}

#[test]
fn test_zstd() {
    check_compressed(Filter::new(32015, "zstd", vec![3]));
}

#[test]
fn test_blosc() {
    // blosclz with byte shuffle over 4-byte elements
    check_compressed(Filter::new(32001, "blosc", vec![2, 2, 4, 0, 5, 1, 0]));
}
