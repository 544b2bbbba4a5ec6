//! `echo.echo(value: str) -> str` — the simplest possible unary round trip.

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{BoundArgs, CommandHandler, CommandReturn, CommandSpec, ParamSpec, ServiceSpec};
use crate::value::TypeTag;

struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
        Ok(CommandReturn::Value(args.get(0).clone()))
    }
}

pub fn build() -> ServiceSpec {
    ServiceSpec::new("echo")
        .with_doc("Worked example: echoes its argument back unchanged.")
        .with_command(
            CommandSpec::new("echo", vec![ParamSpec::new("value", TypeTag::Str)], TypeTag::Str, EchoHandler)
                .expect("echo has no stream params")
                .with_doc("Returns `value` unchanged."),
        )
        .expect("echo.echo is the only command")
}
