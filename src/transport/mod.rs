//! # Transport Abstraction
//!
//! A transport accepts or establishes a bidirectional byte stream with
//! framed message boundaries. Everything above this layer
//! — codec, framing/multiplex, dispatcher, client proxy — is written
//! against [`Connection`] and never touches a concrete socket type, the way
//! the rest of the engine is written against `dyn Codec` rather than a
//! specific wire format.
//!
//! This module mirrors how the teacher organizes its transport
//! implementations: one file per concrete mechanism under this directory,
//! all implementing the same trait, selected through a small factory — here
//! keyed by URL scheme (`tcp`, `unix`, `http`) instead of a CLI enum.

mod http;
mod tcp;
mod unix;

pub use self::http::HttpTransport;
pub use tcp::TcpTransport;
pub use unix::UnixTransport;

use async_trait::async_trait;

use crate::error::{RpcError, Result};

/// A single bidirectional, message-framed connection. Ordering within a
/// connection is FIFO; each `send`/`recv` delivers exactly one whole
/// message.
///
/// Every message travels with the call `id` that the framing/multiplex
/// layer tags it with. TCP and Unix transports ignore it — ordering is free
/// on a raw byte stream, and `id` is already inside the codec-encoded bytes
/// for the multiplexer to read back out. The HTTP transport is the reason
/// this is part of the trait rather than plain `Vec<u8>`: it needs `id`
/// (and the negotiated codec name) to put in `X-Snekrpc-Call-Id` /
/// `X-Snekrpc-Codec` headers without decoding an opaque body it otherwise
/// never looks inside.
/// `send` and `recv` take `&self`, not `&mut self`: the multiplexer
/// (`crate::mux`) drives its reader and writer as two independent tasks
/// against the same `Connection`, so
/// each implementation owns whatever interior locking its concrete
/// mechanism needs — typically a split read half and write half, each
/// behind its own lock, so a blocked read never stalls a write.
#[async_trait]
pub trait Connection: Send + Sync {
    /// `codec` is the short handshake name (`"json"`, `"msgpack"`) of the
    /// codec that encoded `bytes`; TCP/Unix ignore it, HTTP reports it in
    /// `X-Snekrpc-Codec`.
    async fn send(&self, id: u64, codec: &str, bytes: Vec<u8>) -> Result<()>;

    /// Returns `Ok(None)` on a clean end-of-stream (the peer closed the
    /// connection), distinct from an error.
    async fn recv(&self) -> Result<Option<(u64, Vec<u8>)>>;
}

/// Accepts incoming connections (the server side of a transport).
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> Result<Box<dyn Connection>>;
}

/// Establishes a single outgoing connection (the client side).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// A parsed canonical transport URL: `<scheme>://<host-or-path>[:<port>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportUrl {
    Tcp { host: String, port: u16 },
    Unix { path: String },
    Http { host: String, port: u16 },
}

impl TransportUrl {
    pub const DEFAULT: &'static str = "tcp://127.0.0.1:12321";

    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| RpcError::Protocol(format!("invalid transport URL: {url}")))?;
        match scheme {
            "tcp" => {
                let (host, port) = split_host_port(rest)?;
                Ok(TransportUrl::Tcp { host, port })
            }
            "http" => {
                let (host, port) = split_host_port(rest)?;
                Ok(TransportUrl::Http { host, port })
            }
            "unix" => Ok(TransportUrl::Unix {
                path: rest.to_string(),
            }),
            other => Err(RpcError::Protocol(format!("unsupported transport scheme: {other}"))),
        }
    }
}

fn split_host_port(rest: &str) -> Result<(String, u16)> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| RpcError::Protocol(format!("missing port in transport URL: {rest}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RpcError::Protocol(format!("invalid port in transport URL: {port}")))?;
    Ok((host.to_string(), port))
}

/// Binds a listener for the given URL, selected by scheme.
pub async fn listen(url: &TransportUrl) -> Result<Box<dyn Listener>> {
    match url {
        TransportUrl::Tcp { host, port } => Ok(Box::new(TcpTransport::bind(host, *port).await?)),
        TransportUrl::Unix { path } => Ok(Box::new(UnixTransport::bind(path).await?)),
        TransportUrl::Http { host, port } => Ok(Box::new(HttpTransport::bind(host, *port).await?)),
    }
}

/// Establishes one connection for the given URL, selected by scheme.
pub async fn connect(url: &TransportUrl) -> Result<Box<dyn Connection>> {
    match url {
        TransportUrl::Tcp { host, port } => TcpTransport::connect(host, *port).await,
        TransportUrl::Unix { path } => UnixTransport::connect(path).await,
        TransportUrl::Http { host, port } => HttpTransport::connect(host, *port).await,
    }
}

/// Maximum accepted frame length. Guards against a corrupt or hostile
/// length prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Length-delimited framing shared by the TCP and Unix transports: a 4-byte
/// big-endian length prefix followed by that many bytes of codec-encoded
/// message.
pub(crate) mod length_delimited {
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    use super::MAX_FRAME_LEN;
    use crate::error::{RpcError, Result};

    pub async fn write<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| RpcError::Protocol("message too large to frame".into()))?;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Returns `Ok(None)` on a clean EOF before any bytes of the next
    /// length prefix arrive; any other truncation is a transport error.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_FRAME_LEN {
            return Err(RpcError::Protocol(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_unix_and_http_urls() {
        assert_eq!(
            TransportUrl::parse("tcp://127.0.0.1:12321").unwrap(),
            TransportUrl::Tcp {
                host: "127.0.0.1".to_string(),
                port: 12321
            }
        );
        assert_eq!(
            TransportUrl::parse("unix:///tmp/snekrpc.sock").unwrap(),
            TransportUrl::Unix {
                path: "/tmp/snekrpc.sock".to_string()
            }
        );
        assert_eq!(
            TransportUrl::parse("http://localhost:8080").unwrap(),
            TransportUrl::Http {
                host: "localhost".to_string(),
                port: 8080
            }
        );
        assert!(TransportUrl::parse("ftp://nope").is_err());
    }
}
