//! A worked example wiring the engine together: run as `--role server` to
//! host `echo`/`math`/`health`/`file`, or `--role client` to probe each of
//! them once. Plays the role of the teacher's `main.rs`, not a general CLI.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use snekrpc::call::ValueSequence;
use snekrpc::services::{echo, file, health, math};
use snekrpc::value::TypeTag;
use snekrpc::{Client, ClientConfig, Server, ServerConfig, Value};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Server,
    Client,
}

/// A worked-example server and client for snekrpc's RPC engine.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Transport URL (`tcp://host:port`, `unix:///path`, `http://host:port`).
    #[arg(long, default_value = "tcp://127.0.0.1:12321")]
    url: String,

    /// Preferred codec (`msgpack` or `json`).
    #[arg(long, default_value = "msgpack")]
    codec: String,

    /// Run as a server or as a one-shot client probe.
    #[arg(long, value_enum)]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<()> {
    snekrpc::logging::init(None);
    let args = Args::parse();
    match args.role {
        Role::Server => run_server(args).await,
        Role::Client => run_client(args).await,
    }
}

async fn run_server(args: Args) -> Result<()> {
    let config = ServerConfig {
        url: args.url.clone(),
        supported_codecs: vec![args.codec, "json".to_string(), "msgpack".to_string()],
        ..ServerConfig::default()
    };
    let server = Server::new(config).await.context("building server")?;
    server.register(echo::build()).await.context("registering echo")?;
    server.register(math::build()).await.context("registering math")?;
    server.register(health::build()).await.context("registering health")?;

    let sandbox = std::env::temp_dir().join("snekrpc-demo");
    tokio::fs::create_dir_all(&sandbox).await.context("creating sandbox directory")?;
    server.register(file::build(sandbox)).await.context("registering file")?;

    tracing::info!(url = %args.url, "snekrpc demo server starting");
    server.serve().await.map_err(Into::into)
}

async fn run_client(args: Args) -> Result<()> {
    let config = ClientConfig {
        url: args.url,
        offered_codecs: vec![args.codec],
        ..ClientConfig::default()
    };
    let client = Client::connect(config).await.context("connecting")?;

    let echoed = client.call("echo", "echo", vec![Value::Str("hello".to_string())]).await?;
    println!("echo.echo(\"hello\") = {echoed:?}");

    let sum = client.call("math", "add", vec![Value::Int(2), Value::Int(3)]).await?;
    println!("math.add(2, 3) = {sum:?}");

    let mut pings = client
        .call_stream("health", "ping", vec![Value::Int(3), Value::Float(0.0)], TypeTag::Bool)
        .await?;
    while let Some(item) = pings.next().await {
        println!("health.ping chunk = {:?}", item?);
    }

    let services = client.services().await?;
    println!("_meta.services() = {services:?}");

    Ok(())
}
