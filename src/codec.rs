//! # Codec Layer
//!
//! A codec turns a [`Frame`] into bytes and back. Codecs are
//! symmetric and self-delimiting within the bytes they're given — framing
//! (the length prefix on TCP/Unix, or the HTTP body boundary) is a transport
//! concern layered on top, not a codec one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, Result};
use crate::protocol::{kind_from_byte, kind_to_byte, Frame};
use crate::value::{value_from_json, value_from_msgpack, value_to_json, value_to_msgpack};

/// Bytes in, a [`Frame`] out, and back again. Implementations must be
/// deterministic and must not depend on any state beyond the bytes given to
/// `decode`.
pub trait Codec: Send + Sync + fmt::Debug {
    /// The short name exchanged during handshake (`"json"`, `"msgpack"`).
    fn name(&self) -> &'static str;
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Frame>;
}

/// Wire envelope shared by both codecs before the inner `Value` payload is
/// translated into the codec's own native representation.
#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    kind: u8,
    id: u64,
    payload: P,
}

/// Textual JSON codec. `bytes` values are base64-encoded strings; `none` is
/// JSON `null`.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let envelope = Envelope {
            kind: kind_to_byte(frame.kind),
            id: frame.id,
            payload: value_to_json(&frame.payload),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        let envelope: Envelope<serde_json::Value> = serde_json::from_slice(bytes)?;
        Ok(Frame {
            kind: kind_from_byte(envelope.kind)?,
            id: envelope.id,
            payload: value_from_json(&envelope.payload)?,
        })
    }
}

/// Binary MessagePack codec, preferred by default for size. `bytes` values
/// are encoded as native MessagePack `bin` objects.
#[derive(Debug, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let envelope = rmpv::Value::Map(vec![
            (rmpv::Value::from("kind"), rmpv::Value::from(kind_to_byte(frame.kind))),
            (rmpv::Value::from("id"), rmpv::Value::from(frame.id)),
            (rmpv::Value::from("payload"), value_to_msgpack(&frame.payload)),
        ]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope)
            .map_err(|e| RpcError::Codec(format!("msgpack encode failed: {e}")))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        let mut cursor = bytes;
        let envelope = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| RpcError::Codec(format!("msgpack decode failed: {e}")))?;
        let fields = envelope
            .as_map()
            .ok_or_else(|| RpcError::Codec("msgpack frame envelope must be a map".into()))?;
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v)
        };
        let kind = get("kind")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Codec("msgpack frame missing `kind`".into()))? as u8;
        let id = get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Codec("msgpack frame missing `id`".into()))?;
        let payload = get("payload")
            .map(value_from_msgpack)
            .transpose()?
            .unwrap_or(crate::value::Value::None);
        Ok(Frame {
            kind: kind_from_byte(kind)?,
            id,
            payload,
        })
    }
}

/// Looks up a codec by its handshake name.
pub fn by_name(name: &str) -> Option<Box<dyn Codec>> {
    match name {
        "json" => Some(Box::new(JsonCodec)),
        "msgpack" => Some(Box::new(MsgpackCodec)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn sample_frame() -> Frame {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("a".to_string(), Value::Int(2));
        kwargs.insert("b".to_string(), Value::Bytes(vec![1, 2, 3]));
        Frame::call(5, "math", "add", vec![Value::Int(1)], kwargs, false)
    }

    #[test]
    fn json_codec_round_trips_a_call_frame() {
        let codec = JsonCodec;
        let frame = sample_frame();
        let bytes = codec.encode(&frame).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.id, frame.id);
        assert_eq!(decoded.kind, frame.kind);
    }

    #[test]
    fn msgpack_codec_round_trips_a_call_frame() {
        let codec = MsgpackCodec;
        let frame = sample_frame();
        let bytes = codec.encode(&frame).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.id, frame.id);
        assert_eq!(decoded.kind, frame.kind);
        let original_payload = crate::value::value_to_msgpack(&frame.payload);
        let decoded_payload = crate::value::value_to_msgpack(&decoded.payload);
        assert_eq!(original_payload, decoded_payload);
    }

    #[test]
    fn by_name_resolves_both_known_codecs_and_rejects_unknown() {
        assert_eq!(by_name("json").unwrap().name(), "json");
        assert_eq!(by_name("msgpack").unwrap().name(), "msgpack");
        assert!(by_name("yaml").is_none());
    }
}
