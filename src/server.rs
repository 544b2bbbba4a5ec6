//! # Server Dispatcher
//!
//! Drives one accepted connection: handshake, then service calls for as
//! long as the connection stays open. Each `CALL` gets its own worker task
//! off the connection's reader, so a slow or streaming command never stalls
//! the reader or any other in-flight call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::call::{MuxValueStream, ValueSequence};
use crate::config::ServerConfig;
use crate::error::{Result, RpcError};
use crate::handshake;
use crate::meta;
use crate::mux::Multiplexer;
use crate::protocol::{CallPayload, Frame, Kind};
use crate::registry::{self, CommandReturn, Registry, RegistrationError, ServiceSpec};
use crate::transport::{self, Connection, TransportUrl};
use crate::value::TypeTag;

/// A running RPC server: an owned command registry plus the configuration
/// (transport URL, supported codecs, traceback policy) it was built with.
pub struct Server {
    registry: Arc<Registry>,
    config: ServerConfig,
}

impl Server {
    /// Builds a server and auto-registers `_meta` immediately, so it is
    /// always the first service in the registry — any later attempt to
    /// register a service literally named `_meta` surfaces as
    /// `RegistrationError::DuplicateService`.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let registry = Arc::new(Registry::new());
        let preferred_codec = config
            .supported_codecs
            .first()
            .cloned()
            .unwrap_or_else(|| crate::config::defaults::CODEC.to_string());
        let meta_service = meta::build(registry.clone(), preferred_codec, config.url.clone());
        registry
            .register(meta_service)
            .await
            .map_err(|e| RpcError::Internal(format!("failed to register _meta: {e}")))?;
        Ok(Arc::new(Server { registry, config }))
    }

    /// Registers an application service. Fails if its name collides with an
    /// existing one (including `_meta`, already taken by [`Server::new`]).
    pub async fn register(&self, service: ServiceSpec) -> std::result::Result<(), RegistrationError> {
        self.registry.register(service).await
    }

    /// Binds the configured transport and serves connections until the
    /// listener itself errors.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let url = TransportUrl::parse(&self.config.url)?;
        let mut listener = transport::listen(&url).await?;
        info!(url = %self.config.url, "listening");
        loop {
            let connection = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(connection).await {
                    debug!(error = %e, "connection ended");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, connection: Box<dyn Connection>) -> Result<()> {
        let codec = handshake::server_handshake(connection.as_ref(), &self.config.supported_codecs, crate::PROTOCOL_VERSION).await?;
        let (mux, mut new_calls) = Multiplexer::spawn(connection, codec);

        // The mux's reader task already registered `rx` as this call id's
        // inbox before handing it to us, closing the window a CHUNK/CANCEL
        // sent right after CALL would otherwise race through.
        while let Some((frame, rx)) = new_calls.recv().await {
            let id = frame.id;
            let server = self.clone();
            let mux = mux.clone();
            tokio::spawn(async move {
                server.handle_call(mux, id, frame, rx).await;
            });
        }
        Ok(())
    }

    async fn handle_call(self: Arc<Self>, mux: Arc<Multiplexer>, id: u64, frame: Frame, rx: mpsc::Receiver<Frame>) {
        let traceback_enabled = self.config.traceback_enabled;
        if let Err(err) = self.dispatch(&mux, id, frame, rx).await {
            let _ = mux.send(Frame::from_error(id, &err, traceback_enabled)).await;
        }
        mux.unregister(id).await;
    }

    async fn dispatch(&self, mux: &Arc<Multiplexer>, id: u64, frame: Frame, rx: mpsc::Receiver<Frame>) -> Result<()> {
        let call = CallPayload::from_frame(&frame)?;

        let lookup = self
            .registry
            .with_command(&call.service, &call.command, |c| (c.params.clone(), c.handler.clone(), c.input_streaming))
            .await;
        let (params, handler, input_streaming) = match lookup {
            Some(found) => found,
            None => {
                return Err(if self.registry.has_service(&call.service).await {
                    RpcError::UnknownCommand(call.service, call.command)
                } else {
                    RpcError::UnknownService(call.service)
                });
            }
        };
        if input_streaming != call.has_input_stream {
            return Err(RpcError::BadArguments(format!(
                "{}.{} {} an input stream",
                call.service,
                call.command,
                if input_streaming { "requires" } else { "does not accept" }
            )));
        }

        // `CANCEL` while a non-input-streaming call is producing output is
        // only observable through `rx`, which nobody else is draining; a
        // background watcher flips `cancelled` so the output loop notices it
        // at its next suspension point. Input-streaming calls hand `rx`
        // straight to the command instead — cancellation there is observed
        // by the input stream itself raising `Cancelled`.
        let cancelled = Arc::new(AtomicBool::new(false));
        let (watcher, input_stream) = if input_streaming {
            let element_tag = match &params[0].type_tag {
                TypeTag::Stream(inner) => (**inner).clone(),
                other => other.clone(),
            };
            (
                None,
                Some(Box::new(MuxValueStream::new(id, mux.clone(), rx, element_tag)) as Box<dyn ValueSequence>),
            )
        } else {
            let cancelled = cancelled.clone();
            let mut rx = rx;
            let handle = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if frame.kind == Kind::Cancel {
                        cancelled.store(true, Ordering::Release);
                        break;
                    }
                }
            });
            (Some(handle), None)
        };

        let stream_params = if input_streaming { &params[1..] } else { &params[..] };
        let values = registry::bind_arguments(stream_params, &call.args, &call.kwargs)?;
        let bound = registry::BoundArgs { values, input_stream };

        let outcome = handler.call(bound).await;
        if let Some(handle) = &watcher {
            handle.abort();
        }

        match outcome? {
            CommandReturn::Value(value) => {
                mux.send(Frame::reply(id, value)).await?;
            }
            CommandReturn::Stream(mut sequence) => loop {
                if cancelled.load(Ordering::Acquire) {
                    return Err(RpcError::Cancelled);
                }
                match sequence.next().await {
                    Some(Ok(value)) => mux.send(Frame::chunk(id, value)).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        mux.send(Frame::end(id)).await?;
                        break;
                    }
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_server_auto_registers_meta_first() {
        let server = Server::new(ServerConfig::default()).await.unwrap();
        assert!(server.registry.has_service(registry::META_SERVICE_NAME).await);
    }

    #[tokio::test]
    async fn registering_a_service_named_meta_is_rejected() {
        let server = Server::new(ServerConfig::default()).await.unwrap();
        let dup = ServiceSpec::new(registry::META_SERVICE_NAME);
        assert_eq!(
            server.register(dup).await.unwrap_err(),
            RegistrationError::DuplicateService(registry::META_SERVICE_NAME.to_string())
        );
    }
}
