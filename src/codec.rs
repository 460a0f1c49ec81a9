//! Translation of HDF5 compression filters to Zarr codecs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zarrs::metadata::v3::MetadataV3;

use crate::source::Filter;

/// Registered HDF5 filter identifiers.
pub mod filter_id {
    pub const DEFLATE: u32 = 1;
    pub const SHUFFLE: u32 = 2;
    pub const FLETCHER32: u32 = 3;
    pub const SZIP: u32 = 4;
    pub const NBIT: u32 = 5;
    pub const SCALEOFFSET: u32 = 6;
    pub const LZO: u32 = 305;
    pub const BZIP2: u32 = 307;
    pub const LZF: u32 = 32000;
    pub const BLOSC: u32 = 32001;
    pub const SNAPPY: u32 = 32003;
    pub const LZ4: u32 = 32004;
    pub const BITSHUFFLE: u32 = 32008;
    pub const JPEG_LS: u32 = 32012;
    pub const ZFP: u32 = 32013;
    pub const FPZIP: u32 = 32014;
    pub const ZSTD: u32 = 32015;
    pub const FCIDECOMP: u32 = 32018;
}

/// Shuffle mode of the blosc codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscShuffle {
    NoShuffle,
    Shuffle,
    BitShuffle,
}

/// A bytes-to-bytes Zarr codec equivalent to an HDF5 compression filter.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    Zlib {
        level: u32,
    },
    Bz2 {
        level: u32,
    },
    Blosc {
        cname: String,
        clevel: u32,
        shuffle: BloscShuffle,
        typesize: Option<usize>,
        blocksize: usize,
    },
    Lz4 {
        acceleration: u32,
    },
    Zstd {
        level: i32,
    },
}

#[derive(Serialize)]
struct LevelConfiguration {
    level: u32,
}

#[derive(Serialize)]
struct ZstdConfiguration {
    level: i32,
    checksum: bool,
}

#[derive(Serialize)]
struct Lz4Configuration {
    acceleration: u32,
}

#[derive(Serialize)]
struct BloscConfiguration<'a> {
    cname: &'a str,
    clevel: u32,
    shuffle: BloscShuffle,
    #[serde(skip_serializing_if = "Option::is_none")]
    typesize: Option<usize>,
    blocksize: usize,
}

impl Codec {
    /// Zarr v3 codec metadata for this codec.
    pub fn to_metadata(&self) -> crate::Result<MetadataV3> {
        let out = match self {
            Codec::Zlib { level } => MetadataV3::new_with_serializable_configuration(
                "numcodecs.zlib".to_string(),
                &LevelConfiguration { level: *level },
            )?,
            Codec::Bz2 { level } => MetadataV3::new_with_serializable_configuration(
                "numcodecs.bz2".to_string(),
                &LevelConfiguration { level: *level },
            )?,
            Codec::Blosc {
                cname,
                clevel,
                shuffle,
                typesize,
                blocksize,
            } => MetadataV3::new_with_serializable_configuration(
                "blosc".to_string(),
                &BloscConfiguration {
                    cname,
                    clevel: *clevel,
                    shuffle: *shuffle,
                    typesize: *typesize,
                    blocksize: *blocksize,
                },
            )?,
            Codec::Lz4 { acceleration } => MetadataV3::new_with_serializable_configuration(
                "numcodecs.lz4".to_string(),
                &Lz4Configuration {
                    acceleration: *acceleration,
                },
            )?,
            Codec::Zstd { level } => MetadataV3::new_with_serializable_configuration(
                "zstd".to_string(),
                &ZstdConfiguration {
                    level: *level,
                    checksum: false,
                },
            )?,
        };
        Ok(out)
    }
}

/// Outcome of looking up a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Codec(Codec),
    /// No faithful Zarr equivalent exists.
    Unsupported { reason: String },
}

type CodecConstructor = fn(&[u32], Option<usize>) -> Resolution;

#[derive(Clone, Copy)]
enum Entry {
    Supported(CodecConstructor),
    Unsupported(&'static str),
}

/// Immutable table from HDF5 filter id to Zarr codec.
#[derive(Clone)]
pub struct CodecRegistry {
    table: BTreeMap<u32, Entry>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("filters", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        use filter_id::*;
        let table = BTreeMap::from([
            (DEFLATE, Entry::Supported(deflate as CodecConstructor)),
            (SHUFFLE, Entry::Unsupported("shuffle")),
            (FLETCHER32, Entry::Unsupported("fletcher32")),
            (SZIP, Entry::Unsupported("szip")),
            (NBIT, Entry::Unsupported("nbit")),
            (SCALEOFFSET, Entry::Unsupported("scaleoffset")),
            (LZO, Entry::Unsupported("lzo")),
            (BZIP2, Entry::Supported(bzip2)),
            (LZF, Entry::Unsupported("lzf")),
            (BLOSC, Entry::Supported(blosc)),
            (SNAPPY, Entry::Unsupported("snappy")),
            (LZ4, Entry::Supported(lz4)),
            (BITSHUFFLE, Entry::Unsupported("bitshuffle")),
            (JPEG_LS, Entry::Unsupported("jpeg-ls")),
            (ZFP, Entry::Unsupported("zfp")),
            (FPZIP, Entry::Unsupported("fpzip")),
            (ZSTD, Entry::Supported(zstd)),
            (FCIDECOMP, Entry::Unsupported("fcidecomp")),
        ]);
        Self { table }
    }

    /// Look up the codec for one filter.
    ///
    /// `element_size` is the dataset's element size, used where a codec
    /// needs a type size.
    pub fn resolve(&self, filter: &Filter, element_size: Option<usize>) -> Resolution {
        match self.table.get(&filter.id) {
            Some(Entry::Supported(construct)) => construct(&filter.client_data, element_size),
            Some(Entry::Unsupported(name)) => Resolution::Unsupported {
                reason: format!("no Zarr codec for {name} (filter {})", filter.id),
            },
            None => Resolution::Unsupported {
                reason: format!("unknown filter {} ({:?})", filter.id, filter.name),
            },
        }
    }
}

fn deflate(cd_values: &[u32], _: Option<usize>) -> Resolution {
    let level = cd_values.first().copied().unwrap_or(6);
    if level > 9 {
        return Resolution::Unsupported {
            reason: format!("invalid deflate level {level}"),
        };
    }
    Resolution::Codec(Codec::Zlib { level })
}

fn bzip2(cd_values: &[u32], _: Option<usize>) -> Resolution {
    let level = cd_values.first().copied().unwrap_or(9);
    if !(1..=9).contains(&level) {
        return Resolution::Unsupported {
            reason: format!("invalid bzip2 block size {level}"),
        };
    }
    Resolution::Codec(Codec::Bz2 { level })
}

/// Client data layout: version, blosc version, typesize, buffer size,
/// clevel, shuffle, compressor code.
fn blosc(cd_values: &[u32], element_size: Option<usize>) -> Resolution {
    let typesize = cd_values
        .get(2)
        .map(|&n| n as usize)
        .filter(|&n| n > 0)
        .or(element_size);
    let clevel = cd_values.get(4).copied().unwrap_or(5);
    let shuffle = match cd_values.get(5).copied().unwrap_or(1) {
        0 => BloscShuffle::NoShuffle,
        1 => BloscShuffle::Shuffle,
        2 => BloscShuffle::BitShuffle,
        n => {
            return Resolution::Unsupported {
                reason: format!("unknown blosc shuffle mode {n}"),
            };
        }
    };
    let cname = match cd_values.get(6).copied().unwrap_or(0) {
        0 => "blosclz",
        1 => "lz4",
        2 => "lz4hc",
        3 => "snappy",
        4 => "zlib",
        5 => "zstd",
        n => {
            return Resolution::Unsupported {
                reason: format!("unknown blosc compressor {n}"),
            };
        }
    };
    if shuffle != BloscShuffle::NoShuffle && typesize.is_none() {
        return Resolution::Unsupported {
            reason: "blosc shuffle without a type size".into(),
        };
    }
    Resolution::Codec(Codec::Blosc {
        cname: cname.to_string(),
        clevel,
        shuffle,
        typesize,
        blocksize: 0,
    })
}

/// HDF5 lz4 frames chunks differently from `numcodecs.lz4`, and zarrs has
/// no decoder for the latter; such arrays are described but not readable
/// through zarrs.
fn lz4(_: &[u32], _: Option<usize>) -> Resolution {
    log::warn!("lz4 filter mapped to numcodecs.lz4, which zarrs cannot decode");
    Resolution::Codec(Codec::Lz4 { acceleration: 1 })
}

fn zstd(cd_values: &[u32], _: Option<usize>) -> Resolution {
    let level = cd_values.first().map_or(3, |&n| n as i32);
    Resolution::Codec(Codec::Zstd { level })
}
