//! # Dynamic Value & Type Tag Model
//!
//! The data model commands are described in terms of: a closed set of
//! portable type tags, and a dynamic `Value` that every codec
//! knows how to encode and decode. Keeping this model separate from `serde`'s
//! own data model is what lets `JsonCodec` and `MsgpackCodec` disagree about
//! how `Value::Bytes` is represented on the wire (base64 string vs. native
//! binary) without leaking that decision into the rest of the engine.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;

use crate::error::{ErrorKind, RpcError};

/// A portable, codec-neutral descriptor of a command parameter or return
/// value's shape. Type tags drive metadata rendering and argument binding;
/// the codec itself is free to ignore them when its own representation is
/// unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "of")]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    None,
    List(Box<TypeTag>),
    Map(Box<TypeTag>, Box<TypeTag>),
    Optional(Box<TypeTag>),
    Union(Vec<TypeTag>),
    Stream(Box<TypeTag>),
    Any,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Str => write!(f, "str"),
            TypeTag::Bytes => write!(f, "bytes"),
            TypeTag::None => write!(f, "none"),
            TypeTag::List(t) => write!(f, "list<{t}>"),
            TypeTag::Map(k, v) => write!(f, "map<{k},{v}>"),
            TypeTag::Optional(t) => write!(f, "optional<{t}>"),
            TypeTag::Union(ts) => {
                write!(f, "union<")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ">")
            }
            TypeTag::Stream(t) => write!(f, "stream<{t}>"),
            TypeTag::Any => write!(f, "any"),
        }
    }
}

/// A dynamic value flowing across the wire: arguments, return values, and
/// stream elements are all `Value`s. Map keys are restricted to strings,
/// which covers every shape the protocol actually needs (`kwargs`, and
/// `map<str, V>` return values) without requiring arbitrary-key maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    None,
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Looks up a field in a `Map` value, failing with `BadArguments` when
    /// the receiver isn't a map or the field is absent.
    pub fn field(&self, name: &str) -> crate::error::Result<&Value> {
        self.as_map()
            .and_then(|m| m.get(name))
            .ok_or_else(|| RpcError::Protocol(format!("missing field `{name}`")))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Converts a `Value` into `serde_json::Value`, encoding `Bytes` as a
/// base64 string per the JSON codec's wire convention.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        Value::Int(i) => J::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
        Value::Bool(b) => J::Bool(*b),
        Value::Str(s) => J::String(s.clone()),
        Value::Bytes(b) => J::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::None => J::Null,
        Value::List(items) => J::Array(items.iter().map(value_to_json).collect()),
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in m {
                obj.insert(k.clone(), value_to_json(v));
            }
            J::Object(obj)
        }
    }
}

/// The inverse of [`value_to_json`]. Since plain JSON cannot distinguish a
/// base64-encoded byte string from an ordinary string, this always decodes
/// JSON strings as `Value::Str`; callers that know a field is `bytes` by
/// its type tag should use [`coerce`] to reinterpret it.
pub fn value_from_json(value: &serde_json::Value) -> crate::error::Result<Value> {
    use serde_json::Value as J;
    Ok(match value {
        J::Null => Value::None,
        J::Bool(b) => Value::Bool(*b),
        J::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(RpcError::Codec(format!("unrepresentable number: {n}")));
            }
        }
        J::String(s) => Value::Str(s.clone()),
        J::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_from_json(item)?);
            }
            Value::List(out)
        }
        J::Object(obj) => {
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                out.insert(k.clone(), value_from_json(v)?);
            }
            Value::Map(out)
        }
    })
}

/// Converts a `Value` into `rmpv::Value`, encoding `Bytes` as a native
/// MessagePack `bin` object rather than going through a textual encoding.
pub fn value_to_msgpack(value: &Value) -> rmpv::Value {
    use rmpv::Value as M;
    match value {
        Value::Int(i) => M::Integer((*i).into()),
        Value::Float(f) => M::F64(*f),
        Value::Bool(b) => M::Boolean(*b),
        Value::Str(s) => M::String(s.clone().into()),
        Value::Bytes(b) => M::Binary(b.clone()),
        Value::None => M::Nil,
        Value::List(items) => M::Array(items.iter().map(value_to_msgpack).collect()),
        Value::Map(m) => M::Map(
            m.iter()
                .map(|(k, v)| (M::String(k.clone().into()), value_to_msgpack(v)))
                .collect(),
        ),
    }
}

/// The inverse of [`value_to_msgpack`].
pub fn value_from_msgpack(value: &rmpv::Value) -> crate::error::Result<Value> {
    use rmpv::Value as M;
    Ok(match value {
        M::Nil => Value::None,
        M::Boolean(b) => Value::Bool(*b),
        M::Integer(i) => Value::Int(
            i.as_i64()
                .ok_or_else(|| RpcError::Codec(format!("integer out of range: {i}")))?,
        ),
        M::F32(f) => Value::Float(*f as f64),
        M::F64(f) => Value::Float(*f),
        M::String(s) => Value::Str(
            s.as_str()
                .ok_or_else(|| RpcError::Codec("non-UTF8 string in msgpack payload".into()))?
                .to_string(),
        ),
        M::Binary(b) => Value::Bytes(b.clone()),
        M::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_from_msgpack(item)?);
            }
            Value::List(out)
        }
        M::Map(entries) => {
            let mut out = BTreeMap::new();
            for (k, v) in entries {
                let key = k
                    .as_str()
                    .ok_or_else(|| RpcError::Codec("non-string msgpack map key".into()))?
                    .to_string();
                out.insert(key, value_from_msgpack(v)?);
            }
            Value::Map(out)
        }
        M::Ext(_, _) => return Err(RpcError::Codec("unsupported msgpack extension type".into())),
    })
}

/// Reinterprets a decoded value against its declared type tag.
///
/// This exists because the JSON codec cannot natively distinguish `bytes`
/// from `str` (both round-trip as JSON strings) — a `str` field decodes as
/// `Value::Str` and a `bytes` field must be base64-decoded back into
/// `Value::Bytes`. MessagePack never needs this since it has a native
/// binary type, but running every value through `coerce` keeps both codecs
/// on the same code path.
pub fn coerce(value: Value, tag: &TypeTag) -> crate::error::Result<Value> {
    Ok(match (tag, value) {
        (TypeTag::Bytes, Value::Str(s)) => Value::Bytes(
            base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map_err(|e| RpcError::Codec(format!("invalid base64 for bytes field: {e}")))?,
        ),
        (TypeTag::Bytes, v @ Value::Bytes(_)) => v,
        (TypeTag::Optional(inner), Value::None) => {
            let _ = inner;
            Value::None
        }
        (TypeTag::Optional(inner), v) => coerce(v, inner)?,
        (TypeTag::List(inner), Value::List(items)) => Value::List(
            items
                .into_iter()
                .map(|i| coerce(i, inner))
                .collect::<crate::error::Result<Vec<_>>>()?,
        ),
        (TypeTag::Map(_, inner_v), Value::Map(m)) => Value::Map(
            m.into_iter()
                .map(|(k, v)| coerce(v, inner_v).map(|v| (k, v)))
                .collect::<crate::error::Result<BTreeMap<_, _>>>()?,
        ),
        (_, v) => v,
    })
}

/// Errors produced while validating a wire error kind string against the
/// closed taxonomy are themselves reported as `ErrorKind::ProtocolError`.
pub fn parse_error_kind(s: &str) -> ErrorKind {
    ErrorKind::from_wire_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<Value> {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Str("x".to_string()));
        vec![
            Value::Int(42),
            Value::Float(1.5),
            Value::Bool(true),
            Value::Str("hello".to_string()),
            Value::Bytes(vec![1, 2, 3, 4]),
            Value::None,
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Map(map),
        ]
    }

    #[test]
    fn json_round_trip_preserves_non_bytes_values() {
        for v in sample_values() {
            if matches!(v, Value::Bytes(_)) {
                continue; // bytes require the type tag to round-trip under JSON
            }
            let json = value_to_json(&v);
            let back = value_from_json(&json).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn json_bytes_round_trip_with_coercion() {
        let v = Value::Bytes(vec![9, 8, 7]);
        let json = value_to_json(&v);
        let back = value_from_json(&json).unwrap();
        let coerced = coerce(back, &TypeTag::Bytes).unwrap();
        assert_eq!(v, coerced);
    }

    #[test]
    fn msgpack_round_trip_preserves_all_sample_values() {
        for v in sample_values() {
            let packed = value_to_msgpack(&v);
            let back = value_from_msgpack(&packed).unwrap();
            assert_eq!(v, back);
        }
    }
}
