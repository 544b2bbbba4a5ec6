//! TCP transport: raw sockets framed with the shared length-delimited
//! helper. Grounded on the teacher's `ipc::tcp_socket` implementation, with
//! the length prefix switched to big-endian per the wire spec and the
//! benchmark-specific backpressure/connection-table bookkeeping dropped —
//! one `TcpStream` per `Connection` is all the multiplexed protocol needs,
//! since many calls already share a single connection. The stream is split
//! into owned halves so a reader task and a writer task can use the same
//! `Connection` concurrently without fighting over one lock.

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

use super::{length_delimited, Connection, Listener};
use crate::error::Result;

pub struct TcpTransport {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl Connection for TcpTransport {
    async fn send(&self, _id: u64, _codec: &str, bytes: Vec<u8>) -> Result<()> {
        let mut write = self.write.lock().await;
        length_delimited::write(&mut *write, &bytes).await
    }

    async fn recv(&self) -> Result<Option<(u64, Vec<u8>)>> {
        let mut read = self.read.lock().await;
        Ok(length_delimited::read(&mut *read).await?.map(|bytes| (0, bytes)))
    }
}

pub struct TcpListenerTransport {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpListenerTransport {
    async fn accept(&mut self) -> Result<Box<dyn Connection>> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(peer = %addr, "accepted TCP connection");
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        Ok(Box::new(TcpTransport {
            read: Mutex::new(read),
            write: Mutex::new(write),
        }))
    }
}

impl TcpTransport {
    pub async fn bind(host: &str, port: u16) -> Result<TcpListenerTransport> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(TcpListenerTransport { listener })
    }

    pub async fn connect(host: &str, port: u16) -> Result<Box<dyn Connection>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        Ok(Box::new(TcpTransport {
            read: Mutex::new(read),
            write: Mutex::new(write),
        }))
    }
}
