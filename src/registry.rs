//! # Command Registry
//!
//! Replaces dynamic command dispatch and decorator-registered commands
//! with an explicit, typed descriptor table built once at service
//! construction.
//! Invocation is a table lookup followed by a tag-driven argument bind —
//! no reflection over Rust function signatures.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::call::ValueSequence;
use crate::error::{RpcError, Result};
use crate::value::{coerce, TypeTag, Value};

/// Reserved service name the engine auto-registers.
pub const META_SERVICE_NAME: &str = "_meta";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("service name `{0}` is already registered")]
    DuplicateService(String),
    #[error("command name `{0}` is already registered in service `{1}`")]
    DuplicateCommand(String, String),
    #[error("command `{0}` has more than one stream<...> parameter, or it isn't first")]
    InvalidStreamParam(String),
}

/// One parameter in a command's signature.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub type_tag: TypeTag,
    pub default: Option<Value>,
    pub hidden: bool,
    pub doc: Option<String>,
}

impl ParamSpec {
    pub fn new(name: &str, type_tag: TypeTag) -> Self {
        ParamSpec {
            name: name.to_string(),
            type_tag,
            default: None,
            hidden: false,
            doc: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    fn is_stream(&self) -> bool {
        matches!(self.type_tag, TypeTag::Stream(_))
    }
}

/// A command's invocation result: a single value, or a lazy sequence for
/// `output_streaming` commands.
pub enum CommandReturn {
    Value(Value),
    Stream(Box<dyn ValueSequence>),
}

/// The bound, positionally-ordered arguments handed to a command's
/// implementation, plus its input stream if it declared one.
pub struct BoundArgs {
    pub values: Vec<Value>,
    pub input_stream: Option<Box<dyn ValueSequence>>,
}

impl BoundArgs {
    pub fn get(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// A command's implementation. Kept as a trait object rather than a bare
/// closure so services can hold state (e.g. `file`'s filesystem root)
/// behind `&self`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn>;
}

/// A registered command: its descriptor plus implementation.
pub struct CommandSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub return_tag: TypeTag,
    pub input_streaming: bool,
    pub output_streaming: bool,
    pub doc: Option<String>,
    pub(crate) handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new(
        name: &str,
        params: Vec<ParamSpec>,
        return_tag: TypeTag,
        handler: impl CommandHandler + 'static,
    ) -> std::result::Result<Self, RegistrationError> {
        let stream_positions: Vec<usize> = params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_stream())
            .map(|(i, _)| i)
            .collect();
        if stream_positions.len() > 1 || (stream_positions.len() == 1 && stream_positions[0] != 0) {
            return Err(RegistrationError::InvalidStreamParam(name.to_string()));
        }
        let input_streaming = stream_positions.len() == 1;
        let output_streaming = matches!(return_tag, TypeTag::Stream(_));

        Ok(CommandSpec {
            name: name.to_string(),
            params,
            return_tag,
            input_streaming,
            output_streaming,
            doc: None,
            handler: Arc::new(handler),
        })
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }
}

/// A named grouping of commands.
pub struct ServiceSpec {
    pub name: String,
    pub doc: Option<String>,
    pub commands: BTreeMap<String, CommandSpec>,
}

impl ServiceSpec {
    pub fn new(name: &str) -> Self {
        ServiceSpec {
            name: name.to_string(),
            doc: None,
            commands: BTreeMap::new(),
        }
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    pub fn with_command(mut self, command: CommandSpec) -> std::result::Result<Self, RegistrationError> {
        if self.commands.contains_key(&command.name) {
            return Err(RegistrationError::DuplicateCommand(command.name, self.name));
        }
        self.commands.insert(command.name.clone(), command);
        Ok(self)
    }
}

/// Maps `service-name -> {command-name -> command}`.
///
/// Read-mostly: lookups during dispatch take a read lock; `register` takes
/// the write lock, so readers always see a consistent snapshot of the
/// registry as it existed at some point in time.
pub struct Registry {
    services: RwLock<BTreeMap<String, ServiceSpec>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            services: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a service. `_meta` is reserved: the server always
    /// registers it first, so any later attempt to register
    /// a service under that name surfaces as `DuplicateService` rather than
    /// needing a separate check here.
    pub async fn register(&self, service: ServiceSpec) -> std::result::Result<(), RegistrationError> {
        let mut guard = self.services.write().await;
        if guard.contains_key(&service.name) {
            return Err(RegistrationError::DuplicateService(service.name));
        }
        guard.insert(service.name.clone(), service);
        Ok(())
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    pub async fn with_command<R>(
        &self,
        service: &str,
        command: &str,
        f: impl FnOnce(&CommandSpec) -> R,
    ) -> Option<R> {
        let guard = self.services.read().await;
        guard.get(service).and_then(|s| s.commands.get(command)).map(f)
    }

    pub async fn has_service(&self, service: &str) -> bool {
        self.services.read().await.contains_key(service)
    }

    pub async fn for_each_service<R>(&self, f: impl Fn(&ServiceSpec) -> R) -> Vec<R> {
        self.services.read().await.values().map(f).collect()
    }

    pub async fn service_snapshot(&self, name: &str) -> Option<(Option<String>, Vec<(String, Vec<ParamSpec>, TypeTag, bool, bool, Option<String>)>)> {
        let guard = self.services.read().await;
        guard.get(name).map(|s| {
            let commands = s
                .commands
                .values()
                .map(|c| {
                    (
                        c.name.clone(),
                        c.params.clone(),
                        c.return_tag.clone(),
                        c.input_streaming,
                        c.output_streaming,
                        c.doc.clone(),
                    )
                })
                .collect();
            (s.doc.clone(), commands)
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds `args`/`kwargs` from a `CALL` frame against `params`, in
/// positional-then-kwargs-then-default order, coercing each bound value
/// against its declared type tag. `params` should already exclude any
/// leading `stream<...>` parameter — that one is bound separately, from the
/// call's input stream, not from `args`/`kwargs`.
pub fn bind_arguments(params: &[ParamSpec], args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Vec<Value>> {
    if args.len() > params.len() {
        return Err(RpcError::BadArguments(format!(
            "expected at most {} positional arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    let mut bound = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let raw = if let Some(v) = args.get(i) {
            v.clone()
        } else if let Some(v) = kwargs.get(&param.name) {
            v.clone()
        } else if let Some(d) = &param.default {
            d.clone()
        } else {
            return Err(RpcError::BadArguments(format!("missing required parameter `{}`", param.name)));
        };
        bound.push(coerce(raw, &param.type_tag)?);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
            Ok(CommandReturn::Value(args.get(0).clone()))
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_service_names() {
        let registry = Registry::new();
        let svc = ServiceSpec::new("echo");
        registry.register(svc).await.unwrap();
        let dup = ServiceSpec::new("echo");
        assert_eq!(
            registry.register(dup).await.unwrap_err(),
            RegistrationError::DuplicateService("echo".to_string())
        );
    }

    #[test]
    fn command_spec_rejects_stream_param_not_first() {
        let params = vec![
            ParamSpec::new("path", TypeTag::Str),
            ParamSpec::new("data", TypeTag::Stream(Box::new(TypeTag::Bytes))),
        ];
        let err = CommandSpec::new("upload", params, TypeTag::None, Echo).unwrap_err();
        assert_eq!(err, RegistrationError::InvalidStreamParam("upload".to_string()));
    }

    #[tokio::test]
    async fn with_command_looks_up_registered_command() {
        let registry = Registry::new();
        let command = CommandSpec::new("echo", vec![ParamSpec::new("value", TypeTag::Str)], TypeTag::Str, Echo).unwrap();
        let svc = ServiceSpec::new("echo").with_command(command).unwrap();
        registry.register(svc).await.unwrap();
        let found = registry.with_command("echo", "echo", |c| c.name.clone()).await;
        assert_eq!(found.as_deref(), Some("echo"));
        let _ = RpcError::Internal("unused".into());
    }
}
