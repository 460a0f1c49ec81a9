//! Conversion of native attribute values to JSON.

use serde_json::{Map, Number, Value};

use crate::source::{ArrayValues, AttributeArray, AttributeValue, ObjectRef, SourceContainer};

/// Why an attribute could not be carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeIssue {
    RegionReference,
    Unrepresentable(String),
}

impl std::fmt::Display for AttributeIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeIssue::RegionReference => write!(f, "region references are not supported"),
            AttributeIssue::Unrepresentable(reason) => write!(f, "{reason}"),
        }
    }
}

type Translated = Result<Value, AttributeIssue>;

/// Convert one attribute value, dereferencing object references through `source`.
pub fn translate<C: SourceContainer + ?Sized>(value: &AttributeValue, source: &C) -> Translated {
    match value {
        AttributeValue::Reference(r) => reference(*r, source),
        AttributeValue::RegionReference => Err(AttributeIssue::RegionReference),
        AttributeValue::Bytes(b) => utf8(b),
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        AttributeValue::Int(n) => Ok(Value::from(*n)),
        AttributeValue::UInt(n) => Ok(Value::from(*n)),
        AttributeValue::Float(x) => float(*x),
        AttributeValue::String(s) => Ok(Value::String(s.clone())),
        AttributeValue::Array(array) => translate_array(array, source),
        AttributeValue::Other(type_name) => Err(AttributeIssue::Unrepresentable(format!(
            "values of type {type_name} have no JSON form"
        ))),
    }
}

/// Convert every attribute of the node at `path`.
///
/// Attributes that cannot be converted are left out and returned alongside
/// the map with the reason; this never fails for a single attribute.
pub fn translate_attributes<C: SourceContainer + ?Sized>(
    source: &C,
    path: &str,
) -> crate::Result<(Map<String, Value>, Vec<(String, AttributeIssue)>)> {
    let mut map = Map::new();
    let mut dropped = Vec::new();
    for (name, value) in source.attributes(path)? {
        match translate(&value, source) {
            Ok(v) => {
                map.insert(name, v);
            }
            Err(issue) => dropped.push((name, issue)),
        }
    }
    Ok((map, dropped))
}

fn reference<C: SourceContainer + ?Sized>(r: ObjectRef, source: &C) -> Translated {
    match source.dereference(r) {
        Ok(Some(path)) => Ok(Value::String(path)),
        Ok(None) => Ok(Value::Null),
        Err(e) => Err(AttributeIssue::Unrepresentable(format!(
            "object reference could not be resolved: {e}"
        ))),
    }
}

fn utf8(bytes: &[u8]) -> Translated {
    std::str::from_utf8(bytes)
        .map(|s| Value::String(s.to_string()))
        .map_err(|e| AttributeIssue::Unrepresentable(format!("byte string is not UTF-8: {e}")))
}

fn float(x: f64) -> Translated {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| AttributeIssue::Unrepresentable(format!("{x} has no JSON form")))
}

fn translate_array<C: SourceContainer + ?Sized>(array: &AttributeArray, source: &C) -> Translated {
    let expected: usize = array.shape.iter().product();
    if expected != array.values.len() {
        return Err(AttributeIssue::Unrepresentable(format!(
            "array of shape {:?} holds {} values",
            array.shape,
            array.values.len()
        )));
    }
    let flat: Vec<Value> = match &array.values {
        ArrayValues::Bool(v) => v.iter().map(|&b| Value::Bool(b)).collect(),
        ArrayValues::Int(v) => v.iter().map(|&n| Value::from(n)).collect(),
        ArrayValues::UInt(v) => v.iter().map(|&n| Value::from(n)).collect(),
        ArrayValues::Float(v) => v.iter().map(|&x| float(x)).collect::<Result<_, _>>()?,
        ArrayValues::Bytes(v) => v.iter().map(|b| utf8(b)).collect::<Result<_, _>>()?,
        ArrayValues::String(v) => v.iter().map(|s| Value::String(s.clone())).collect(),
        ArrayValues::Reference(v) => v
            .iter()
            .map(|&r| reference(r, source))
            .collect::<Result<_, _>>()?,
    };
    Ok(nest(&array.shape, &mut flat.into_iter()))
}

/// Rebuild nested lists from C-ordered values.
fn nest(shape: &[usize], values: &mut impl Iterator<Item = Value>) -> Value {
    match shape.split_first() {
        None => values.next().unwrap_or(Value::Null),
        Some((&n, rest)) => Value::Array((0..n).map(|_| nest(rest, values)).collect()),
    }
}
