//! # `_meta` Service
//!
//! The self-description service every server auto-registers:
//! `status`, `service_names`, `services`, `service`. A client that
//! has only ever seen `_meta` can still construct correct calls against
//! every other service, which is what lets the client proxy build its
//! typed surface purely from metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RpcError, Result};
use crate::registry::{BoundArgs, CommandHandler, CommandReturn, CommandSpec, ParamSpec, Registry, ServiceSpec, META_SERVICE_NAME};
use crate::value::{TypeTag, Value};

/// Metadata for one parameter.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub type_tag: TypeTag,
    pub default: Option<Value>,
    pub hidden: bool,
    pub doc: Option<String>,
}

impl ParamInfo {
    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("name".to_string(), Value::Str(self.name.clone())),
            ("type".to_string(), Value::Str(self.type_tag.to_string())),
            ("default".to_string(), self.default.clone().unwrap_or(Value::None)),
            ("hidden".to_string(), Value::Bool(self.hidden)),
            (
                "doc".to_string(),
                self.doc.clone().map(Value::Str).unwrap_or(Value::None),
            ),
        ]))
    }
}

/// Metadata for one command.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub name: String,
    pub doc: Option<String>,
    pub params: Vec<ParamInfo>,
    pub returns: TypeTag,
    pub output_streaming: bool,
}

impl CommandInfo {
    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("name".to_string(), Value::Str(self.name.clone())),
            (
                "doc".to_string(),
                self.doc.clone().map(Value::Str).unwrap_or(Value::None),
            ),
            (
                "params".to_string(),
                Value::List(self.params.iter().map(ParamInfo::to_value).collect()),
            ),
            ("returns".to_string(), Value::Str(self.returns.to_string())),
            ("output_streaming".to_string(), Value::Bool(self.output_streaming)),
        ]))
    }
}

/// Metadata for one service.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub doc: Option<String>,
    pub commands: Vec<CommandInfo>,
}

impl ServiceInfo {
    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("name".to_string(), Value::Str(self.name.clone())),
            (
                "doc".to_string(),
                self.doc.clone().map(Value::Str).unwrap_or(Value::None),
            ),
            (
                "commands".to_string(),
                Value::List(self.commands.iter().map(CommandInfo::to_value).collect()),
            ),
        ]))
    }
}

async fn service_info(registry: &Registry, name: &str) -> Option<ServiceInfo> {
    let (doc, commands) = registry.service_snapshot(name).await?;
    let commands = commands
        .into_iter()
        .map(|(cmd_name, params, returns, _input_streaming, output_streaming, cmd_doc)| CommandInfo {
            name: cmd_name,
            doc: cmd_doc,
            params: params
                .into_iter()
                .map(|p| ParamInfo {
                    name: p.name,
                    type_tag: p.type_tag,
                    default: p.default,
                    hidden: p.hidden,
                    doc: p.doc,
                })
                .collect(),
            returns,
            output_streaming,
        })
        .collect();
    Some(ServiceInfo {
        name: name.to_string(),
        doc,
        commands,
    })
}

struct StatusHandler {
    codec: String,
    transport: String,
    version: &'static str,
}

#[async_trait]
impl CommandHandler for StatusHandler {
    /// Reports the server's *configured* defaults, not the calling
    /// connection's live negotiated state — two connections with different
    /// negotiated codecs must still see the same `_meta.status()`.
    async fn call(&self, _args: BoundArgs) -> Result<CommandReturn> {
        Ok(CommandReturn::Value(Value::Map(BTreeMap::from([
            ("codec".to_string(), Value::Str(self.codec.clone())),
            ("transport".to_string(), Value::Str(self.transport.clone())),
            ("version".to_string(), Value::Str(self.version.to_string())),
        ]))))
    }
}

struct ServiceNamesHandler {
    registry: Arc<Registry>,
}

#[async_trait]
impl CommandHandler for ServiceNamesHandler {
    async fn call(&self, _args: BoundArgs) -> Result<CommandReturn> {
        let mut names = self.registry.service_names().await;
        names.sort();
        Ok(CommandReturn::Value(Value::List(names.into_iter().map(Value::Str).collect())))
    }
}

struct ServicesHandler {
    registry: Arc<Registry>,
}

#[async_trait]
impl CommandHandler for ServicesHandler {
    async fn call(&self, _args: BoundArgs) -> Result<CommandReturn> {
        let mut names = self.registry.service_names().await;
        names.sort();
        let mut map = BTreeMap::new();
        for name in names {
            if let Some(info) = service_info(&self.registry, &name).await {
                map.insert(name, info.to_value());
            }
        }
        Ok(CommandReturn::Value(Value::Map(map)))
    }
}

struct ServiceHandler {
    registry: Arc<Registry>,
}

#[async_trait]
impl CommandHandler for ServiceHandler {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
        let name = args
            .get(0)
            .as_str()
            .ok_or_else(|| RpcError::BadArguments("`name` must be a string".into()))?;
        let info = service_info(&self.registry, name)
            .await
            .ok_or_else(|| RpcError::UnknownService(name.to_string()))?;
        Ok(CommandReturn::Value(info.to_value()))
    }
}

/// Builds the `_meta` service, closing over `registry` so its commands can
/// introspect the live registry (including services registered after
/// `_meta` itself, since lookups happen at call time).
pub fn build(registry: Arc<Registry>, default_codec: String, transport_url: String) -> ServiceSpec {
    ServiceSpec::new(META_SERVICE_NAME)
        .with_doc("Self-description service: status, and per-service metadata.")
        .with_command(
            CommandSpec::new(
                "status",
                vec![],
                TypeTag::Map(Box::new(TypeTag::Str), Box::new(TypeTag::Str)),
                StatusHandler {
                    codec: default_codec,
                    transport: transport_url,
                    version: crate::PROTOCOL_VERSION,
                },
            )
            .expect("status has no stream params")
            .with_doc("Server-configured codec, transport, and version."),
        )
        .expect("_meta.status is the first command")
        .with_command(
            CommandSpec::new(
                "service_names",
                vec![],
                TypeTag::List(Box::new(TypeTag::Str)),
                ServiceNamesHandler {
                    registry: registry.clone(),
                },
            )
            .expect("service_names has no stream params")
            .with_doc("Sorted names of every registered service."),
        )
        .expect("_meta.service_names is not yet registered")
        .with_command(
            CommandSpec::new(
                "services",
                vec![],
                TypeTag::Map(Box::new(TypeTag::Str), Box::new(TypeTag::Any)),
                ServicesHandler {
                    registry: registry.clone(),
                },
            )
            .expect("services has no stream params")
            .with_doc("Every registered service's metadata, keyed by name."),
        )
        .expect("_meta.services is not yet registered")
        .with_command(
            CommandSpec::new(
                "service",
                vec![ParamSpec::new("name", TypeTag::Str)],
                TypeTag::Any,
                ServiceHandler { registry },
            )
            .expect("service has no stream params")
            .with_doc("One service's metadata, or UnknownService."),
        )
        .expect("_meta.service is not yet registered")
}
