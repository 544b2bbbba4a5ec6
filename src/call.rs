//! # Calls & Lazy Sequences
//!
//! A single pull-based trait, [`ValueSequence`], stands in for both
//! directions of streaming. A command that returns `stream<T>` hands the
//! dispatcher a `Box<dyn ValueSequence>` it drives by calling `next()`; a
//! command that consumes `stream<T>` is handed one built from the incoming
//! `CHUNK`/`END` frames of its call. The client proxy's output-streaming
//! return value is the same trait over the *client's* inbox. One
//! abstraction, reused on every side of the wire.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::error::Result;
use crate::mux::Multiplexer;
use crate::protocol::{Frame, Kind};
use crate::value::{coerce, TypeTag, Value};

/// A single-pass, pull-based sequence of values. `next()` returns `None`
/// once exhausted; a sequence that never yields an error and never returns
/// `None` again after doing so.
#[async_trait]
pub trait ValueSequence: Send {
    async fn next(&mut self) -> Option<Result<Value>>;

    /// Cooperative early termination. The default is a no-op; sequences
    /// backed by a connection override it to send `CANCEL`.
    async fn cancel(&mut self) {}
}

/// A [`ValueSequence`] backed by a call's inbox on a [`Multiplexer`]:
/// consumes `CHUNK`/`END`/`ERROR`/`CANCEL` frames arriving for `id`.
///
/// Used for both directions: the dispatcher wraps a call's inbox to hand a
/// command its input stream, and the client proxy wraps a call's inbox to
/// hand the caller an output stream. `element_tag` is the stream's declared
/// element type — each `CHUNK` value is reinterpreted against it, the same
/// way bound arguments are, so a JSON-encoded `bytes` chunk (round-tripped
/// as a base64 string, since JSON has no native binary type) comes back out
/// as `Value::Bytes` rather than `Value::Str`.
pub struct MuxValueStream {
    id: u64,
    mux: Arc<Multiplexer>,
    rx: mpsc::Receiver<Frame>,
    ended: Arc<AtomicBool>,
    element_tag: TypeTag,
}

impl MuxValueStream {
    pub fn new(id: u64, mux: Arc<Multiplexer>, rx: mpsc::Receiver<Frame>, element_tag: TypeTag) -> Self {
        MuxValueStream {
            id,
            mux,
            rx,
            ended: Arc::new(AtomicBool::new(false)),
            element_tag,
        }
    }
}

#[async_trait]
impl ValueSequence for MuxValueStream {
    async fn next(&mut self) -> Option<Result<Value>> {
        if self.ended.load(Ordering::Acquire) {
            return None;
        }
        let frame = self.rx.recv().await?;
        let result = match frame.kind {
            Kind::Chunk => match frame.payload.field("value") {
                Ok(v) => {
                    return Some(coerce(v.clone(), &self.element_tag));
                }
                Err(e) => Some(Err(e)),
            },
            Kind::End => None,
            Kind::Error => Some(match crate::protocol::ErrorPayload::from_frame(&frame) {
                Ok(payload) => Err(payload.into_error()),
                Err(e) => Err(e),
            }),
            Kind::Cancel => Some(Err(crate::error::RpcError::Cancelled)),
            other => Some(Err(crate::error::RpcError::Protocol(format!(
                "unexpected frame kind {other:?} on call {}",
                self.id
            )))),
        };
        self.ended.store(true, Ordering::Release);
        self.mux.unregister(self.id).await;
        result
    }

    async fn cancel(&mut self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            let _ = self.mux.send(Frame::cancel(self.id)).await;
            self.mux.unregister(self.id).await;
        }
    }
}

impl Drop for MuxValueStream {
    /// Dropping an output stream before it's exhausted sends `CANCEL{id}`.
    /// Async drop doesn't exist, so this detaches a task to do it; the mux
    /// outlives the stream as long as the connection is alive.
    fn drop(&mut self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            let mux = self.mux.clone();
            let id = self.id;
            tokio::spawn(async move {
                let _ = mux.send(Frame::cancel(id)).await;
                mux.unregister(id).await;
            });
        }
    }
}

/// A [`ValueSequence`] fed by a channel: a producer task pushes
/// `Result<Value>` items and closes the channel when done. This is what
/// worked-example services actually return.
pub struct ChannelSequence {
    rx: mpsc::Receiver<Result<Value>>,
}

impl ChannelSequence {
    pub fn new(rx: mpsc::Receiver<Result<Value>>) -> Self {
        ChannelSequence { rx }
    }

    /// Spawns `producer` on its own task, wired to a fresh `ChannelSequence`.
    pub fn spawn<Fut>(capacity: usize, producer: impl FnOnce(mpsc::Sender<Result<Value>>) -> Fut + Send + 'static) -> Self
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(producer(tx));
        ChannelSequence { rx }
    }
}

#[async_trait]
impl ValueSequence for ChannelSequence {
    async fn next(&mut self) -> Option<Result<Value>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sequence_yields_items_then_ends() {
        let mut seq = ChannelSequence::spawn(4, |tx| async move {
            for i in 0..3 {
                let _ = tx.send(Ok(Value::Int(i))).await;
            }
        });
        assert_eq!(seq.next().await.unwrap().unwrap(), Value::Int(0));
        assert_eq!(seq.next().await.unwrap().unwrap(), Value::Int(1));
        assert_eq!(seq.next().await.unwrap().unwrap(), Value::Int(2));
        assert!(seq.next().await.is_none());
    }
}
