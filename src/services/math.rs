//! `math.add(a: int, b: int) -> int` — a worked unary example over two
//! arguments instead of one.

use async_trait::async_trait;

use crate::error::{Result, RpcError};
use crate::registry::{BoundArgs, CommandHandler, CommandReturn, CommandSpec, ParamSpec, ServiceSpec};
use crate::value::{TypeTag, Value};

struct AddHandler;

#[async_trait]
impl CommandHandler for AddHandler {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
        let a = args.get(0).as_int().ok_or_else(|| RpcError::BadArguments("`a` must be an int".into()))?;
        let b = args.get(1).as_int().ok_or_else(|| RpcError::BadArguments("`b` must be an int".into()))?;
        let sum = a.checked_add(b).ok_or_else(|| RpcError::BadArguments(format!("{a} + {b} overflows i64")))?;
        Ok(CommandReturn::Value(Value::Int(sum)))
    }
}

pub fn build() -> ServiceSpec {
    ServiceSpec::new("math")
        .with_doc("Worked example: basic arithmetic.")
        .with_command(
            CommandSpec::new(
                "add",
                vec![ParamSpec::new("a", TypeTag::Int), ParamSpec::new("b", TypeTag::Int)],
                TypeTag::Int,
                AddHandler,
            )
            .expect("add has no stream params")
            .with_doc("Returns `a + b`."),
        )
        .expect("math.add is the only command")
}
