use std::num::NonZeroU64;

use serde::Serialize;
use serde_json::{Map, Value};
use zarrs::{
    array::{ArrayMetadataV3, FillValueMetadata},
    group::GroupMetadataV3,
    metadata::v3::{MetadataV3, NodeMetadataV3},
};

use crate::{
    chunk_key_encoding::chunk_key_encoding_metadata,
    codec::Codec,
    source::{ByteOrder, DatasetInfo, Scalar, SourceType},
};

/// Everything needed to describe a dataset as a Zarr array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDescriptor {
    /// Empty for a scalar.
    pub shape: Vec<u64>,
    pub data_type: SourceType,
    /// `None` if the source is not chunked.
    pub chunk_shape: Option<Vec<u64>>,
    pub fill_value: Option<Scalar>,
    pub codec: Option<Codec>,
}

impl ArrayDescriptor {
    pub fn new(path: &str, info: &DatasetInfo, codec: Option<Codec>) -> crate::Result<Self> {
        let shape = info.shape.clone().ok_or_else(|| {
            crate::Error::structural(path, "dataset without a dataspace cannot be an array")
        })?;
        if let Some(chunks) = &info.chunks
            && chunks.len() != shape.len()
        {
            return Err(crate::Error::structural(
                path,
                format!("chunk shape {chunks:?} does not match shape {shape:?}"),
            ));
        }
        Ok(Self {
            shape,
            data_type: info.dtype.clone(),
            chunk_shape: info.chunks.clone(),
            fill_value: info.fill_value.clone(),
            codec,
        })
    }

    /// Chunk shape of the Zarr grid; a single chunk when the source is unchunked.
    pub fn grid_chunk_shape(&self) -> Vec<u64> {
        match &self.chunk_shape {
            Some(chunks) => chunks.clone(),
            None => self.shape.iter().map(|&n| n.max(1)).collect(),
        }
    }

    pub fn to_metadata(&self, attributes: Map<String, Value>) -> crate::Result<ArrayMetadataV3> {
        let chunk_grid = convert_chunk_grid(&self.grid_chunk_shape())?;
        let data_type = convert_data_type(&self.data_type)?;
        let fill_value = convert_fill_value(&self.data_type, self.fill_value.as_ref())?;
        let mut codecs = vec![convert_bytes_codec(&self.data_type)?];
        if let Some(codec) = &self.codec {
            codecs.push(codec.to_metadata()?);
        }
        let out =
            ArrayMetadataV3::new(self.shape.clone(), chunk_grid, data_type, fill_value, codecs)
                .with_chunk_key_encoding(chunk_key_encoding_metadata()?)
                .with_attributes(attributes);
        Ok(out)
    }
}

#[derive(Serialize)]
struct RegularChunkGridConfiguration {
    chunk_shape: Vec<NonZeroU64>,
}

#[derive(Serialize)]
struct BytesCodecConfiguration {
    endian: &'static str,
}

fn convert_chunk_grid(chunk_shape: &[u64]) -> crate::Result<MetadataV3> {
    let chunk_shape = chunk_shape
        .iter()
        .map(|&n| NonZeroU64::new(n).ok_or_else(|| crate::Error::general("zero chunk size")))
        .collect::<crate::Result<Vec<_>>>()?;
    let out = MetadataV3::new_with_serializable_configuration(
        "regular".to_string(),
        &RegularChunkGridConfiguration { chunk_shape },
    )?;
    Ok(out)
}

/// Zarr name of a fixed-size element type.
pub fn data_type_name(data_type: &SourceType) -> crate::Result<String> {
    let name = match data_type {
        SourceType::Bool => "bool".to_string(),
        SourceType::Int { size, .. } if matches!(size, 1 | 2 | 4 | 8) => {
            format!("int{}", u32::from(*size) * 8)
        }
        SourceType::UInt { size, .. } if matches!(size, 1 | 2 | 4 | 8) => {
            format!("uint{}", u32::from(*size) * 8)
        }
        SourceType::Float { size, .. } if matches!(size, 2 | 4 | 8) => {
            format!("float{}", u32::from(*size) * 8)
        }
        SourceType::FixedBytes { length } if *length > 0 => format!("r{}", length * 8),
        t => {
            return Err(crate::Error::general(format!(
                "unsupported data type: {t:?}"
            )));
        }
    };
    Ok(name)
}

fn convert_data_type(data_type: &SourceType) -> crate::Result<MetadataV3> {
    Ok(MetadataV3::new(data_type_name(data_type)?))
}

fn byte_order(data_type: &SourceType) -> Option<ByteOrder> {
    match data_type {
        SourceType::Int { size, order }
        | SourceType::UInt { size, order }
        | SourceType::Float { size, order }
            if *size > 1 =>
        {
            Some(*order)
        }
        _ => None,
    }
}

fn convert_bytes_codec(data_type: &SourceType) -> crate::Result<MetadataV3> {
    let out = match byte_order(data_type) {
        Some(order) => MetadataV3::new_with_serializable_configuration(
            "bytes".to_string(),
            &BytesCodecConfiguration {
                endian: match order {
                    ByteOrder::Little => "little",
                    ByteOrder::Big => "big",
                },
            },
        )?,
        None => MetadataV3::new("bytes".to_string()),
    };
    Ok(out)
}

/// Zarr JSON form of a fill value; zero of the type when absent.
pub fn fill_value_json(
    data_type: &SourceType,
    fill_value: Option<&Scalar>,
) -> crate::Result<Value> {
    let mismatch =
        || crate::Error::general(format!("fill value {fill_value:?} does not fit {data_type:?}"));
    let value = match (data_type, fill_value) {
        (SourceType::Bool, None) => Value::Bool(false),
        (SourceType::Bool, Some(Scalar::Bool(b))) => Value::Bool(*b),
        (SourceType::Bool, Some(Scalar::Int(n))) => Value::Bool(*n != 0),
        (SourceType::Bool, Some(Scalar::UInt(n))) => Value::Bool(*n != 0),
        (SourceType::Int { .. } | SourceType::UInt { .. }, None) => Value::from(0),
        (SourceType::Int { .. } | SourceType::UInt { .. }, Some(Scalar::Int(n))) => {
            integer_fill(data_type, i128::from(*n)).ok_or_else(mismatch)?
        }
        (SourceType::Int { .. } | SourceType::UInt { .. }, Some(Scalar::UInt(n))) => {
            integer_fill(data_type, i128::from(*n)).ok_or_else(mismatch)?
        }
        (SourceType::Float { .. }, None) => Value::from(0.0),
        (SourceType::Float { .. }, Some(Scalar::Float(x))) => float_fill(*x),
        (SourceType::Float { .. }, Some(Scalar::Int(n))) => float_fill(*n as f64),
        (SourceType::Float { .. }, Some(Scalar::UInt(n))) => float_fill(*n as f64),
        (SourceType::FixedBytes { length }, fill) => {
            let mut bytes = match fill {
                None => Vec::new(),
                Some(Scalar::Bytes(b)) => b.clone(),
                Some(_) => return Err(mismatch()),
            };
            bytes.resize(*length, 0);
            Value::Array(bytes.into_iter().map(Value::from).collect())
        }
        _ => return Err(mismatch()),
    };
    Ok(value)
}

/// `n` as a fill value of an integer type, if the type can hold it.
fn integer_fill(data_type: &SourceType, n: i128) -> Option<Value> {
    let fits = match data_type {
        SourceType::Int { size: 1, .. } => i8::try_from(n).is_ok(),
        SourceType::Int { size: 2, .. } => i16::try_from(n).is_ok(),
        SourceType::Int { size: 4, .. } => i32::try_from(n).is_ok(),
        SourceType::Int { size: 8, .. } => i64::try_from(n).is_ok(),
        SourceType::UInt { size: 1, .. } => u8::try_from(n).is_ok(),
        SourceType::UInt { size: 2, .. } => u16::try_from(n).is_ok(),
        SourceType::UInt { size: 4, .. } => u32::try_from(n).is_ok(),
        SourceType::UInt { size: 8, .. } => u64::try_from(n).is_ok(),
        _ => false,
    };
    if !fits {
        return None;
    }
    let value = match i64::try_from(n) {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(u64::try_from(n).ok()?),
    };
    Some(value)
}

fn float_fill(x: f64) -> Value {
    if x.is_nan() {
        Value::from("NaN")
    } else if x == f64::INFINITY {
        Value::from("Infinity")
    } else if x == f64::NEG_INFINITY {
        Value::from("-Infinity")
    } else {
        Value::from(x)
    }
}

fn convert_fill_value(
    data_type: &SourceType,
    fill_value: Option<&Scalar>,
) -> crate::Result<FillValueMetadata> {
    Ok(serde_json::from_value(fill_value_json(data_type, fill_value)?)?)
}

/// Group metadata carrying `attributes`.
pub fn group_metadata(attributes: Map<String, Value>) -> NodeMetadataV3 {
    NodeMetadataV3::Group(GroupMetadataV3::default().with_attributes(attributes))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn f4() -> SourceType {
        SourceType::Float {
            size: 4,
            order: ByteOrder::Little,
        }
    }

    #[test]
    fn chunked_array_metadata() {
        let info = DatasetInfo::new(vec![4, 4], f4()).with_chunks(vec![2, 2]);
        let descriptor =
            ArrayDescriptor::new("/x", &info, Some(Codec::Zlib { level: 4 })).unwrap();
        let meta = serde_json::to_value(descriptor.to_metadata(Map::new()).unwrap()).unwrap();
        assert_eq!(meta["shape"], json!([4, 4]));
        assert_eq!(meta["data_type"], "float32");
        assert_eq!(
            meta["chunk_grid"]["configuration"]["chunk_shape"],
            json!([2, 2])
        );
        assert_eq!(meta["chunk_key_encoding"]["name"], "v2");
        assert_eq!(
            meta["chunk_key_encoding"]["configuration"]["separator"],
            "."
        );
        assert_eq!(meta["codecs"][0]["configuration"]["endian"], "little");
        assert_eq!(meta["codecs"][1]["name"], "numcodecs.zlib");
    }

    #[test]
    fn unchunked_uses_single_chunk() {
        let info = DatasetInfo::new(vec![0, 3], f4());
        let descriptor = ArrayDescriptor::new("/x", &info, None).unwrap();
        assert_eq!(descriptor.grid_chunk_shape(), vec![1, 3]);
        let scalar = ArrayDescriptor::new("/s", &DatasetInfo::new(vec![], f4()), None).unwrap();
        assert!(scalar.grid_chunk_shape().is_empty());
    }

    #[test]
    fn fill_values() {
        assert_eq!(
            fill_value_json(&f4(), Some(&Scalar::Float(f64::NAN))).unwrap(),
            json!("NaN")
        );
        assert_eq!(
            fill_value_json(
                &SourceType::FixedBytes { length: 3 },
                Some(&Scalar::Bytes(b"a".to_vec()))
            )
            .unwrap(),
            json!([97, 0, 0])
        );
        assert!(fill_value_json(&SourceType::Bool, Some(&Scalar::Float(1.0))).is_err());
    }

    #[test]
    fn integer_fill_values_must_fit() {
        let u1 = SourceType::UInt {
            size: 1,
            order: ByteOrder::Little,
        };
        let i2 = SourceType::Int {
            size: 2,
            order: ByteOrder::Big,
        };
        let u8_ = SourceType::UInt {
            size: 8,
            order: ByteOrder::Little,
        };
        assert_eq!(fill_value_json(&u1, Some(&Scalar::UInt(255))).unwrap(), json!(255));
        assert!(fill_value_json(&u1, Some(&Scalar::UInt(256))).is_err());
        assert!(fill_value_json(&u1, Some(&Scalar::Int(-1))).is_err());
        assert_eq!(fill_value_json(&i2, Some(&Scalar::Int(-32768))).unwrap(), json!(-32768));
        assert!(fill_value_json(&i2, Some(&Scalar::UInt(40000))).is_err());
        assert_eq!(
            fill_value_json(&u8_, Some(&Scalar::UInt(u64::MAX))).unwrap(),
            json!(u64::MAX)
        );
        assert!(fill_value_json(&u1, Some(&Scalar::Float(0.5))).is_err());
    }

    #[test]
    fn data_type_names() {
        assert_eq!(
            data_type_name(&SourceType::Int {
                size: 2,
                order: ByteOrder::Big
            })
            .unwrap(),
            "int16"
        );
        assert_eq!(
            data_type_name(&SourceType::FixedBytes { length: 5 }).unwrap(),
            "r40"
        );
        assert!(data_type_name(&SourceType::VarLenString).is_err());
    }
}
