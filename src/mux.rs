//! # Connection Multiplexer
//!
//! Sits between the transport/codec layers and everything that speaks in
//! [`Frame`]s (the dispatcher, the client proxy). Owns the reader/writer
//! split the concurrency model calls for: one task pumps decoded frames out
//! of the transport into per-call inboxes, one task drains an outbound
//! queue into the transport, and neither ever blocks on a slow call's
//! consumer — each inbox is its own bounded channel, so a slow call applies
//! backpressure only to itself.
//!
//! Grounded on the teacher's benchmark runner, which already split
//! producer/consumer work across tokio tasks joined by channels; this
//! generalizes that shape to frame-level multiplexing keyed by call id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::error::{ErrorKind, RpcError, Result};
use crate::protocol::{Frame, Kind};
use crate::transport::Connection;

const INBOX_CAPACITY: usize = 64;
const OUTBOX_CAPACITY: usize = 256;
const NEW_CALL_CAPACITY: usize = 64;

/// Shared handle to a connection's frame-level read/write plumbing.
///
/// Cloning is cheap (it's an `Arc` internally via `Multiplexer::send`'s
/// shared state); callers hold a `Arc<Multiplexer>` rather than cloning the
/// struct itself.
pub struct Multiplexer {
    outbound_tx: mpsc::Sender<Frame>,
    inboxes: Arc<Mutex<HashMap<u64, mpsc::Sender<Frame>>>>,
    codec_name: &'static str,
}

impl Multiplexer {
    /// Spawns the reader and writer tasks for `connection` under the
    /// already-negotiated `codec`. The returned receiver yields a `(frame,
    /// inbox)` pair for every brand-new `CALL`: the reader registers that
    /// call's inbox itself, in the same step that recognizes the id as
    /// unseen, so a `CHUNK`/`CANCEL` following right behind it is guaranteed
    /// to find the inbox already in place — the reader is one sequential
    /// task, so there is no window between "this is a new call" and "the
    /// inbox exists" for a later frame on the same id to fall through. A
    /// non-`CALL` frame bearing an unknown id gets an immediate `ERROR`
    /// reply and is otherwise dropped. The client never sees this channel:
    /// every id it cares about is registered before a frame bearing it can
    /// arrive.
    pub fn spawn(connection: Box<dyn Connection>, codec: Box<dyn Codec>) -> (Arc<Multiplexer>, mpsc::Receiver<(Frame, mpsc::Receiver<Frame>)>) {
        let connection: Arc<dyn Connection> = Arc::from(connection);
        let codec: Arc<dyn Codec> = Arc::from(codec);
        let codec_name = codec.name();

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (new_call_tx, new_call_rx) = mpsc::channel(NEW_CALL_CAPACITY);
        let inboxes: Arc<Mutex<HashMap<u64, mpsc::Sender<Frame>>>> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(reader_loop(connection.clone(), codec.clone(), inboxes.clone(), outbound_tx.clone(), new_call_tx));
        tokio::spawn(writer_loop(connection, codec, outbound_rx));

        let mux = Arc::new(Multiplexer {
            outbound_tx,
            inboxes,
            codec_name,
        });
        (mux, new_call_rx)
    }

    /// Registers an inbox for `id`, returning the receiving half. Must be
    /// called before any frame bearing `id` can arrive. The client does
    /// this itself immediately before sending a `CALL`, since it owns id
    /// allocation; inboxes for incoming server-side calls are instead
    /// registered by the reader task (see `spawn`) to avoid a handoff race.
    pub async fn register(&self, id: u64) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inboxes.lock().await.insert(id, tx);
        rx
    }

    pub async fn unregister(&self, id: u64) {
        self.inboxes.lock().await.remove(&id);
    }

    /// Enqueues `frame` for encoding and transmission. Ordering between
    /// distinct ids is not preserved; ordering within one id is, since this
    /// is the single writer for the connection.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| RpcError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection writer has stopped")))
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec_name
    }
}

async fn reader_loop(
    connection: Arc<dyn Connection>,
    codec: Arc<dyn Codec>,
    inboxes: Arc<Mutex<HashMap<u64, mpsc::Sender<Frame>>>>,
    outbound_tx: mpsc::Sender<Frame>,
    new_call_tx: mpsc::Sender<(Frame, mpsc::Receiver<Frame>)>,
) {
    loop {
        let bytes = match connection.recv().await {
            Ok(Some((_hint, bytes))) => bytes,
            Ok(None) => {
                debug!("connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(error = %e, "connection read failed");
                break;
            }
        };
        let frame = match codec.decode(&bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping frame that failed to decode");
                continue;
            }
        };

        let mut guard = inboxes.lock().await;
        if let Some(tx) = guard.get(&frame.id).cloned() {
            drop(guard);
            if tx.send(frame).await.is_err() {
                trace!("inbox receiver dropped; frame discarded");
            }
            continue;
        }
        if frame.kind != Kind::Call {
            drop(guard);
            warn!(kind = ?frame.kind, id = frame.id, "frame with no call in progress, dropping");
            let _ = outbound_tx
                .send(Frame::error(frame.id, ErrorKind::ProtocolError, "no call in progress for this id", None))
                .await;
            continue;
        }
        // Insert the new call's inbox before releasing the lock, so the
        // very next frame this loop reads — even if it's already sitting
        // in the socket buffer for this same id — finds it.
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        guard.insert(frame.id, tx);
        drop(guard);
        if new_call_tx.send((frame, rx)).await.is_err() {
            break;
        }
    }
    // The connection is gone: every registered inbox's sender is dropped so
    // its consumer sees a closed channel rather than hanging forever.
    inboxes.lock().await.clear();
}

async fn writer_loop(connection: Arc<dyn Connection>, codec: Arc<dyn Codec>, mut outbound_rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = outbound_rx.recv().await {
        let id = frame.id;
        let bytes = match codec.encode(&frame) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "dropping frame that failed to encode");
                continue;
            }
        };
        if let Err(e) = connection.send(id, codec.name(), bytes).await {
            warn!(error = %e, "connection write failed; writer stopping");
            break;
        }
    }
}
