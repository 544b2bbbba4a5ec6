//! # Wire Framing & Multiplex Protocol
//!
//! Every message on a connection is a `Frame { kind, id, payload }`.
//! `id` multiplexes concurrent calls on a single
//! connection; senders assign client-originated ids as odd numbers, leaving
//! even ids reserved for a future server-originated call feature that isn't
//! used yet.

use std::collections::BTreeMap;

use crate::error::{ErrorKind, RpcError, Result};
use crate::value::Value;

/// The closed set of message kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Hello,
    Welcome,
    Call,
    Reply,
    Chunk,
    End,
    Error,
    Cancel,
}

impl Kind {
    fn as_u8(self) -> u8 {
        match self {
            Kind::Hello => 0,
            Kind::Welcome => 1,
            Kind::Call => 2,
            Kind::Reply => 3,
            Kind::Chunk => 4,
            Kind::End => 5,
            Kind::Error => 6,
            Kind::Cancel => 7,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Kind::Hello,
            1 => Kind::Welcome,
            2 => Kind::Call,
            3 => Kind::Reply,
            4 => Kind::Chunk,
            5 => Kind::End,
            6 => Kind::Error,
            7 => Kind::Cancel,
            other => return Err(RpcError::Protocol(format!("unknown frame kind {other}"))),
        })
    }
}

/// Call id `0` is reserved for handshake and out-of-band (connection-level)
/// errors; every in-flight call uses a non-zero id.
pub const HANDSHAKE_ID: u64 = 0;

/// One wire message: `kind`, the multiplexing `id`, and a kind-specific
/// `payload` represented as a generic [`Value`] map.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: Kind,
    pub id: u64,
    pub payload: Value,
}

fn map(pairs: Vec<(&str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

impl Frame {
    pub fn hello(codecs: &[&str], version: &str) -> Frame {
        Frame {
            kind: Kind::Hello,
            id: HANDSHAKE_ID,
            payload: map(vec![
                (
                    "codecs",
                    Value::List(codecs.iter().map(|c| Value::Str(c.to_string())).collect()),
                ),
                ("version", Value::Str(version.to_string())),
            ]),
        }
    }

    pub fn welcome(codec: &str, version: &str) -> Frame {
        Frame {
            kind: Kind::Welcome,
            id: HANDSHAKE_ID,
            payload: map(vec![
                ("codec", Value::Str(codec.to_string())),
                ("version", Value::Str(version.to_string())),
            ]),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn call(
        id: u64,
        service: &str,
        command: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        has_input_stream: bool,
    ) -> Frame {
        Frame {
            kind: Kind::Call,
            id,
            payload: map(vec![
                ("service", Value::Str(service.to_string())),
                ("command", Value::Str(command.to_string())),
                ("args", Value::List(args)),
                ("kwargs", Value::Map(kwargs)),
                ("has_input_stream", Value::Bool(has_input_stream)),
            ]),
        }
    }

    pub fn reply(id: u64, value: Value) -> Frame {
        Frame {
            kind: Kind::Reply,
            id,
            payload: map(vec![("value", value)]),
        }
    }

    pub fn chunk(id: u64, value: Value) -> Frame {
        Frame {
            kind: Kind::Chunk,
            id,
            payload: map(vec![("value", value)]),
        }
    }

    pub fn end(id: u64) -> Frame {
        Frame {
            kind: Kind::End,
            id,
            payload: Value::Map(BTreeMap::new()),
        }
    }

    pub fn error(id: u64, kind: ErrorKind, message: &str, traceback: Option<&str>) -> Frame {
        Frame {
            kind: Kind::Error,
            id,
            payload: map(vec![
                ("kind", Value::Str(kind.as_wire_str().to_string())),
                ("message", Value::Str(message.to_string())),
                (
                    "traceback",
                    traceback.map(|t| Value::Str(t.to_string())).unwrap_or(Value::None),
                ),
            ]),
        }
    }

    pub fn from_error(id: u64, err: &RpcError, traceback_enabled: bool) -> Frame {
        let (message, traceback) = err.to_wire_message(traceback_enabled);
        Frame::error(id, err.kind(), &message, traceback.as_deref())
    }

    pub fn cancel(id: u64) -> Frame {
        Frame {
            kind: Kind::Cancel,
            id,
            payload: Value::Map(BTreeMap::new()),
        }
    }
}

/// Typed view of a `HELLO` payload.
pub struct HelloPayload {
    pub codecs: Vec<String>,
    pub version: String,
}

impl HelloPayload {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let codecs = frame
            .payload
            .field("codecs")?
            .as_list()
            .ok_or_else(|| RpcError::Protocol("HELLO.codecs must be a list".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| RpcError::Protocol("HELLO.codecs entries must be strings".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        let version = frame
            .payload
            .field("version")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(HelloPayload { codecs, version })
    }
}

/// Typed view of a `CALL` payload.
pub struct CallPayload {
    pub service: String,
    pub command: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
    pub has_input_stream: bool,
}

impl CallPayload {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let service = frame
            .payload
            .field("service")?
            .as_str()
            .ok_or_else(|| RpcError::Protocol("CALL.service must be a string".into()))?
            .to_string();
        let command = frame
            .payload
            .field("command")?
            .as_str()
            .ok_or_else(|| RpcError::Protocol("CALL.command must be a string".into()))?
            .to_string();
        let args = frame
            .payload
            .field("args")?
            .as_list()
            .ok_or_else(|| RpcError::Protocol("CALL.args must be a list".into()))?
            .to_vec();
        let kwargs = frame
            .payload
            .field("kwargs")?
            .as_map()
            .ok_or_else(|| RpcError::Protocol("CALL.kwargs must be a map".into()))?
            .clone();
        let has_input_stream = frame
            .payload
            .field("has_input_stream")?
            .as_bool()
            .unwrap_or(false);
        Ok(CallPayload {
            service,
            command,
            args,
            kwargs,
            has_input_stream,
        })
    }
}

/// Typed view of an `ERROR` payload.
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    pub traceback: Option<String>,
}

impl ErrorPayload {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let kind = ErrorKind::from_wire_str(
            frame
                .payload
                .field("kind")?
                .as_str()
                .ok_or_else(|| RpcError::Protocol("ERROR.kind must be a string".into()))?,
        );
        let message = frame
            .payload
            .field("message")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let traceback = frame
            .payload
            .field("traceback")
            .ok()
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(ErrorPayload {
            kind,
            message,
            traceback,
        })
    }

    pub fn into_error(self) -> RpcError {
        RpcError::from_wire(self.kind, self.message, self.traceback)
    }
}

/// Frame kind as a wire-representable byte, used by the length-delimited
/// framing helper shared by the TCP and Unix transports.
pub(crate) fn kind_to_byte(kind: Kind) -> u8 {
    kind.as_u8()
}

pub(crate) fn kind_from_byte(b: u8) -> Result<Kind> {
    Kind::from_u8(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_frame_round_trips_through_typed_payload() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("path".to_string(), Value::Str("/tmp/x".to_string()));
        let frame = Frame::call(
            3,
            "file",
            "upload",
            vec![Value::Int(1)],
            kwargs.clone(),
            true,
        );
        let parsed = CallPayload::from_frame(&frame).unwrap();
        assert_eq!(parsed.service, "file");
        assert_eq!(parsed.command, "upload");
        assert_eq!(parsed.args, vec![Value::Int(1)]);
        assert_eq!(parsed.kwargs, kwargs);
        assert!(parsed.has_input_stream);
    }

    #[test]
    fn error_frame_round_trips_kind() {
        let frame = Frame::error(7, ErrorKind::BadArguments, "missing value", None);
        let parsed = ErrorPayload::from_frame(&frame).unwrap();
        assert_eq!(parsed.kind, ErrorKind::BadArguments);
        assert_eq!(parsed.message, "missing value");
        assert!(parsed.traceback.is_none());
    }
}
