//! Unix domain socket transport. Same framing as TCP;
//! grounded on the teacher's `ipc::unix_domain_socket` module, notably its
//! habit of only unlinking the socket file when this side created it.

use async_trait::async_trait;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::debug;

use super::{length_delimited, Connection, Listener};
use crate::error::Result;

pub struct UnixTransport {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl Connection for UnixTransport {
    async fn send(&self, _id: u64, _codec: &str, bytes: Vec<u8>) -> Result<()> {
        let mut write = self.write.lock().await;
        length_delimited::write(&mut *write, &bytes).await
    }

    async fn recv(&self) -> Result<Option<(u64, Vec<u8>)>> {
        let mut read = self.read.lock().await;
        Ok(length_delimited::read(&mut *read).await?.map(|bytes| (0, bytes)))
    }
}

pub struct UnixListenerTransport {
    listener: UnixListener,
    path: String,
}

#[async_trait]
impl Listener for UnixListenerTransport {
    async fn accept(&mut self) -> Result<Box<dyn Connection>> {
        let (stream, _addr) = self.listener.accept().await?;
        debug!(path = %self.path, "accepted Unix domain socket connection");
        let (read, write) = stream.into_split();
        Ok(Box::new(UnixTransport {
            read: Mutex::new(read),
            write: Mutex::new(write),
        }))
    }
}

impl Drop for UnixListenerTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl UnixTransport {
    pub async fn bind(path: &str) -> Result<UnixListenerTransport> {
        // Best-effort cleanup of a stale socket file from a previous run
        // that didn't shut down cleanly.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(UnixListenerTransport {
            listener,
            path: path.to_string(),
        })
    }

    pub async fn connect(path: &str) -> Result<Box<dyn Connection>> {
        let stream = UnixStream::connect(path).await?;
        let (read, write) = stream.into_split();
        Ok(Box::new(UnixTransport {
            read: Mutex::new(read),
            write: Mutex::new(write),
        }))
    }
}
