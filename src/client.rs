//! # Client Proxy
//!
//! Opens a transport, negotiates a codec, and exposes calls keyed by
//! `service.command`. A fully metadata-driven typed surface (one Rust
//! method per remote command, generated from `_meta.services()`) isn't
//! expressible without a build-time codegen step this engine doesn't have;
//! [`Client::services`] exposes that same metadata so a caller — or a
//! generated wrapper built on top of this crate — can still drive dispatch
//! generically.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::call::{MuxValueStream, ValueSequence};
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::handshake;
use crate::mux::Multiplexer;
use crate::protocol::{ErrorPayload, Frame, Kind};
use crate::transport::{self, TransportUrl};
use crate::value::{TypeTag, Value};

/// What a call returns once dispatched: either the single value of a unary
/// reply, or a lazy sequence for an output-streaming one.
pub enum CallOutcome {
    Value(Value),
    Stream(Box<dyn ValueSequence>),
}

impl CallOutcome {
    /// Unwraps a unary result, raising `ProtocolError` if the call was
    /// actually output-streaming.
    pub fn into_value(self) -> Result<Value> {
        match self {
            CallOutcome::Value(v) => Ok(v),
            CallOutcome::Stream(_) => Err(RpcError::Protocol("call returned a stream, not a value".into())),
        }
    }

    pub fn into_stream(self) -> Result<Box<dyn ValueSequence>> {
        match self {
            CallOutcome::Stream(s) => Ok(s),
            CallOutcome::Value(_) => Err(RpcError::Protocol("call returned a value, not a stream".into())),
        }
    }
}

/// A handshaked, multiplexed connection to a server.
pub struct Client {
    mux: Arc<Multiplexer>,
    next_id: AtomicU64,
}

impl Client {
    /// Establishes a connection, retrying only the connect step
    /// (`config.retry_count` times, `config.retry_interval` apart) — once a
    /// `CALL` is on the wire it is never retried.
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>> {
        let url = TransportUrl::parse(&config.url)?;
        let mut attempts_left = config.retry_count + 1;
        loop {
            attempts_left -= 1;
            let attempt = tokio::time::timeout(config.connect_timeout, transport::connect(&url)).await;
            let connection = match attempt {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) if attempts_left > 0 => {
                    warn!(error = %e, "connect failed, retrying");
                    tokio::time::sleep(config.retry_interval).await;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempts_left > 0 => {
                    warn!("connect timed out, retrying");
                    tokio::time::sleep(config.retry_interval).await;
                    continue;
                }
                Err(_) => return Err(RpcError::Timeout),
            };

            let codec = handshake::client_handshake(connection.as_ref(), &config.offered_codecs, crate::PROTOCOL_VERSION).await?;
            let (mux, mut unrouted) = Multiplexer::spawn(connection, codec);
            tokio::spawn(async move {
                // Server-originated calls aren't a feature this client
                // implements yet; a CALL with no matching client id is
                // simply unexpected here.
                while let Some((frame, _rx)) = unrouted.recv().await {
                    warn!(kind = ?frame.kind, id = frame.id, "unsolicited frame from server, dropping");
                }
            });
            return Ok(Arc::new(Client {
                mux,
                next_id: AtomicU64::new(1),
            }));
        }
    }

    /// Client-originated call ids are odd, leaving even ids reserved for a
    /// future server-originated call feature that isn't used yet.
    fn next_call_id(&self) -> u64 {
        self.next_id.fetch_add(2, Ordering::Relaxed)
    }

    /// Dispatches one call. `input_stream` is consumed and sent as
    /// `CHUNK…END` before a reply is awaited if present. `output_stream_tag`
    /// says whether to await a unary `REPLY` (`None`) or hand back a lazy
    /// sequence of `CHUNK`s (`Some(element_tag)`); `element_tag` is the
    /// stream's declared element type, used to reinterpret each chunk the
    /// same way bound arguments are (see [`crate::value::coerce`]) — without
    /// it, a `bytes` element sent over the JSON codec would come back as
    /// `Value::Str` instead of `Value::Bytes`.
    pub async fn invoke(
        &self,
        service: &str,
        command: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        input_stream: Option<Box<dyn ValueSequence>>,
        output_stream_tag: Option<TypeTag>,
    ) -> Result<CallOutcome> {
        let id = self.next_call_id();
        let mut rx = self.mux.register(id).await;
        self.mux
            .send(Frame::call(id, service, command, args, kwargs, input_stream.is_some()))
            .await?;

        if let Some(mut sequence) = input_stream {
            loop {
                match sequence.next().await {
                    Some(Ok(value)) => self.mux.send(Frame::chunk(id, value)).await?,
                    Some(Err(e)) => {
                        let _ = self.mux.send(Frame::from_error(id, &e, false)).await;
                        self.mux.unregister(id).await;
                        return Err(e);
                    }
                    None => {
                        self.mux.send(Frame::end(id)).await?;
                        break;
                    }
                }
            }
        }

        if let Some(element_tag) = output_stream_tag {
            return Ok(CallOutcome::Stream(Box::new(MuxValueStream::new(id, self.mux.clone(), rx, element_tag))));
        }

        let frame = rx
            .recv()
            .await
            .ok_or_else(|| RpcError::Protocol("connection closed before a reply arrived".into()))?;
        self.mux.unregister(id).await;
        match frame.kind {
            Kind::Reply => Ok(CallOutcome::Value(frame.payload.field("value")?.clone())),
            Kind::Error => Err(ErrorPayload::from_frame(&frame)?.into_error()),
            other => Err(RpcError::Protocol(format!("expected REPLY or ERROR, got {other:?}"))),
        }
    }

    /// A unary call with no input stream — the common case (`echo.echo`,
    /// `math.add`, `_meta.status`, …).
    pub async fn call(&self, service: &str, command: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke(service, command, args, BTreeMap::new(), None, None)
            .await?
            .into_value()
    }

    pub async fn call_kwargs(&self, service: &str, command: &str, args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Result<Value> {
        self.invoke(service, command, args, kwargs, None, None).await?.into_value()
    }

    /// An output-streaming call — the caller drives the returned sequence.
    /// `element_tag` is the `stream<T>`'s `T`, used to reinterpret each
    /// chunk against its declared type (e.g. `TypeTag::Bytes` for a byte
    /// stream); pass `TypeTag::Any` to take chunks as decoded, uncoerced.
    pub async fn call_stream(&self, service: &str, command: &str, args: Vec<Value>, element_tag: TypeTag) -> Result<Box<dyn ValueSequence>> {
        self.invoke(service, command, args, BTreeMap::new(), None, Some(element_tag))
            .await?
            .into_stream()
    }

    /// An input-streaming call: `input` is drained and sent before the
    /// (unary, for the worked examples) reply is awaited.
    pub async fn call_with_input(
        &self,
        service: &str,
        command: &str,
        input: Box<dyn ValueSequence>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value> {
        self.invoke(service, command, vec![], kwargs, Some(input), None)
            .await?
            .into_value()
    }

    /// Fetches every registered service's metadata via `_meta.services()`,
    /// letting a caller with no compile-time knowledge of the server's
    /// commands still discover and invoke them correctly.
    pub async fn services(&self) -> Result<Value> {
        self.call(crate::registry::META_SERVICE_NAME, "services", vec![]).await
    }
}
