//! # snekrpc
//!
//! A lightweight, transport-agnostic RPC engine: wire framing and
//! multiplexing, pluggable codecs, a command registry with a `_meta`
//! self-description service, a server dispatcher, and a client call proxy.
//!
//! Layering (lowest to highest): [`transport`] → [`codec`] → [`protocol`] /
//! [`mux`] → [`registry`] / [`call`] → [`server`] / [`client`].

pub mod call;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod meta;
pub mod mux;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod services;
pub mod transport;
pub mod value;

/// The crate's own semver, carried in `HELLO`/`WELCOME` payloads and
/// `_meta.status()`. A peer on a different major version is logged, not
/// rejected.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ErrorKind, Result, RpcError};
pub use server::Server;
pub use value::{TypeTag, Value};
