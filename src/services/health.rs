//! `health.ping` (output-streaming) and `health.status` (unary) — a worked
//! output-stream example plus the simplest possible unary check, distinct
//! from `_meta.status()`.

use std::time::Duration;

use async_trait::async_trait;

use crate::call::ChannelSequence;
use crate::error::Result;
use crate::registry::{BoundArgs, CommandHandler, CommandReturn, CommandSpec, ParamSpec, ServiceSpec};
use crate::value::{TypeTag, Value};

struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
        let count = args.get(0).as_int().unwrap_or(1).max(0) as u64;
        let interval_secs = match args.get(1) {
            Value::Float(f) => *f,
            Value::Int(i) => *i as f64,
            _ => 0.0,
        };
        let sequence = ChannelSequence::spawn(4, move |tx| async move {
            for _ in 0..count {
                if interval_secs > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(interval_secs)).await;
                }
                if tx.send(Ok(Value::Bool(true))).await.is_err() {
                    break;
                }
            }
        });
        Ok(CommandReturn::Stream(Box::new(sequence)))
    }
}

struct StatusHandler;

#[async_trait]
impl CommandHandler for StatusHandler {
    async fn call(&self, _args: BoundArgs) -> Result<CommandReturn> {
        Ok(CommandReturn::Value(Value::Str("ok".to_string())))
    }
}

pub fn build() -> ServiceSpec {
    ServiceSpec::new("health")
        .with_doc("Worked examples: an output-streaming and a unary health check.")
        .with_command(
            CommandSpec::new(
                "ping",
                vec![
                    ParamSpec::new("count", TypeTag::Int).with_default(Value::Int(1)),
                    ParamSpec::new("interval", TypeTag::Float).with_default(Value::Float(0.0)),
                ],
                TypeTag::Stream(Box::new(TypeTag::Bool)),
                PingHandler,
            )
            .expect("ping has no stream params")
            .with_doc("Streams `count` `true` values, `interval` seconds apart."),
        )
        .expect("health.ping is not yet registered")
        .with_command(
            CommandSpec::new("status", vec![], TypeTag::Str, StatusHandler)
                .expect("status has no stream params")
                .with_doc("Always returns \"ok\"."),
        )
        .expect("health.status is not yet registered")
}
