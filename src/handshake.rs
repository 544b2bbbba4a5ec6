//! # Handshake
//!
//! `HELLO`/`WELCOME` always travel JSON-encoded, regardless
//! of which codec ends up negotiated for the rest of the connection — the
//! negotiation itself can't depend on a codec that hasn't been chosen yet.
//! This runs directly against a [`Connection`] before a [`Multiplexer`] is
//! ever spawned for it.

use std::time::Duration;

use tracing::warn;

use crate::codec::{self, Codec, JsonCodec};
use crate::error::{RpcError, Result};
use crate::protocol::{ErrorPayload, Frame, HelloPayload, Kind, HANDSHAKE_ID};
use crate::transport::Connection;

/// Grace period the server waits for the client's `HELLO` before giving up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

async fn send_json(connection: &dyn Connection, frame: &Frame) -> Result<()> {
    let bytes = JsonCodec.encode(frame)?;
    connection.send(HANDSHAKE_ID, "json", bytes).await
}

async fn recv_json(connection: &dyn Connection) -> Result<Frame> {
    let (id, bytes) = connection
        .recv()
        .await?
        .ok_or_else(|| RpcError::Protocol("connection closed during handshake".into()))?;
    if id != HANDSHAKE_ID {
        return Err(RpcError::Protocol(format!(
            "expected handshake frame on id {HANDSHAKE_ID}, got id {id}"
        )));
    }
    JsonCodec.decode(&bytes)
}

/// Server side of the handshake: waits for `HELLO`, picks the first codec
/// `supported` (in the server's preference order) that the client also
/// offered, and replies `WELCOME`. Returns the negotiated codec.
pub async fn server_handshake(connection: &dyn Connection, supported: &[String], version: &str) -> Result<Box<dyn Codec>> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, recv_json(connection))
        .await
        .map_err(|_| RpcError::Protocol("timed out waiting for HELLO".into()))??;
    if frame.kind != Kind::Hello {
        let err = Frame::error(HANDSHAKE_ID, crate::error::ErrorKind::ProtocolError, "expected HELLO", None);
        let _ = send_json(connection, &err).await;
        return Err(RpcError::Protocol(format!("expected HELLO, got {:?}", frame.kind)));
    }
    let hello = HelloPayload::from_frame(&frame)?;
    if hello.version.split('.').next() != version.split('.').next() {
        warn!(client_version = %hello.version, server_version = %version, "protocol version mismatch, continuing anyway");
    }

    let chosen = supported.iter().find(|name| hello.codecs.iter().any(|offered| offered == name.as_str()));
    match chosen {
        Some(name) => {
            let codec = codec::by_name(name).expect("supported codecs are always known names");
            send_json(connection, &Frame::welcome(name, version)).await?;
            Ok(codec)
        }
        None => {
            let err = Frame::error(HANDSHAKE_ID, crate::error::ErrorKind::CodecNegotiation, "no common codec", None);
            let _ = send_json(connection, &err).await;
            Err(RpcError::CodecNegotiation)
        }
    }
}

/// Client side of the handshake: sends `HELLO` offering `codecs` in
/// preference order, then waits for `WELCOME` (or a connection-level
/// `ERROR`). Returns the codec the server welcomed the connection under.
pub async fn client_handshake(connection: &dyn Connection, codecs: &[String], version: &str) -> Result<Box<dyn Codec>> {
    let offered: Vec<&str> = codecs.iter().map(String::as_str).collect();
    send_json(connection, &Frame::hello(&offered, version)).await?;
    let frame = recv_json(connection).await?;
    match frame.kind {
        Kind::Welcome => {
            let name = frame
                .payload
                .field("codec")?
                .as_str()
                .ok_or_else(|| RpcError::Protocol("WELCOME.codec must be a string".into()))?;
            codec::by_name(name).ok_or_else(|| RpcError::Protocol(format!("server welcomed unknown codec `{name}`")))
        }
        Kind::Error => Err(ErrorPayload::from_frame(&frame)?.into_error()),
        other => Err(RpcError::Protocol(format!("expected WELCOME, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// An in-memory `Connection` pair for handshake tests, standing in for a
    /// real transport.
    struct PipeEnd {
        tx: mpsc::Sender<(u64, Vec<u8>)>,
        rx: tokio::sync::Mutex<mpsc::Receiver<(u64, Vec<u8>)>>,
    }

    #[async_trait]
    impl Connection for PipeEnd {
        async fn send(&self, id: u64, _codec: &str, bytes: Vec<u8>) -> Result<()> {
            self.tx
                .send((id, bytes))
                .await
                .map_err(|_| RpcError::Protocol("peer dropped".into()))
        }
        async fn recv(&self) -> Result<Option<(u64, Vec<u8>)>> {
            Ok(self.rx.lock().await.recv().await)
        }
    }

    fn pipe() -> (PipeEnd, PipeEnd) {
        let (tx_a, rx_a) = mpsc::channel(8);
        let (tx_b, rx_b) = mpsc::channel(8);
        (
            PipeEnd {
                tx: tx_a,
                rx: tokio::sync::Mutex::new(rx_b),
            },
            PipeEnd {
                tx: tx_b,
                rx: tokio::sync::Mutex::new(rx_a),
            },
        )
    }

    #[tokio::test]
    async fn negotiates_the_clients_preferred_common_codec() {
        let (client, server) = pipe();
        let supported = vec!["msgpack".to_string(), "json".to_string()];
        let offered = vec!["json".to_string()];
        let (client_result, server_result) = tokio::join!(
            client_handshake(&client, &offered, "1.0.0"),
            server_handshake(&server, &supported, "1.0.0"),
        );
        assert_eq!(client_result.unwrap().name(), "json");
        assert_eq!(server_result.unwrap().name(), "json");
    }

    #[tokio::test]
    async fn fails_when_no_codec_is_shared() {
        let (client, server) = pipe();
        let supported = vec!["msgpack".to_string()];
        let offered = vec!["json".to_string()];
        let (client_result, server_result) = tokio::join!(
            client_handshake(&client, &offered, "1.0.0"),
            server_handshake(&server, &supported, "1.0.0"),
        );
        assert!(client_result.is_err());
        assert!(server_result.is_err());
    }
}
