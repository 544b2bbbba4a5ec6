//! End-to-end round trips over a real in-process TCP listener, covering the
//! worked-example services and a call-isolation property.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};

use anyhow::Result;

use snekrpc::call::{ChannelSequence, ValueSequence};
use snekrpc::error::ErrorKind;
use snekrpc::services::{echo, file, health, math};
use snekrpc::value::{TypeTag, Value};
use snekrpc::{Client, ClientConfig, Server, ServerConfig};

static NEXT_PORT: AtomicU16 = AtomicU16::new(21000);

fn next_url() -> String {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    format!("tcp://127.0.0.1:{port}")
}

/// Spins up a server hosting every worked-example service and returns once
/// it has been handed off to its own task; the client's connect retries
/// absorb the race against the listener actually binding.
async fn spawn_demo_server(url: &str) -> Result<()> {
    let config = ServerConfig::default().with_url(url);
    let server = Server::new(config).await?;
    server.register(echo::build()).await.unwrap();
    server.register(math::build()).await.unwrap();
    server.register(health::build()).await.unwrap();
    let sandbox = tempfile::tempdir()?.into_path();
    server.register(file::build(sandbox)).await.unwrap();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    Ok(())
}

#[tokio::test]
async fn echo_unary_round_trip() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;
    let result = client.call("echo", "echo", vec![Value::Str("hello".into())]).await?;
    assert_eq!(result, Value::Str("hello".to_string()));
    Ok(())
}

#[tokio::test]
async fn add_ints_round_trip() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;
    let result = client.call("math", "add", vec![Value::Int(2), Value::Int(3)]).await?;
    assert_eq!(result, Value::Int(5));
    Ok(())
}

#[tokio::test]
async fn health_ping_streams_then_ends() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;
    let mut stream = client
        .call_stream("health", "ping", vec![Value::Int(3), Value::Float(0.0)], TypeTag::Bool)
        .await?;
    let mut count = 0;
    while let Some(item) = stream.next().await {
        assert_eq!(item?, Value::Bool(true));
        count += 1;
    }
    assert_eq!(count, 3);
    Ok(())
}

#[tokio::test]
async fn file_upload_then_download_round_trips_bytes() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url.clone())).await?;

    let chunks = vec![Value::Bytes(b"AB".to_vec()), Value::Bytes(b"CD".to_vec())];
    let input = ChannelSequence::spawn(4, move |tx| async move {
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
    });
    let mut kwargs = BTreeMap::new();
    kwargs.insert("path".to_string(), Value::Str("upload.bin".to_string()));
    let result = client.call_with_input("file", "upload", Box::new(input), kwargs).await?;
    assert_eq!(result, Value::None);

    let mut download = client
        .call_stream("file", "download", vec![Value::Str("upload.bin".to_string())], TypeTag::Bytes)
        .await?;
    let mut downloaded = Vec::new();
    while let Some(item) = download.next().await {
        if let Value::Bytes(bytes) = item? {
            downloaded.extend(bytes);
        }
    }
    assert_eq!(downloaded, b"ABCD");
    Ok(())
}

#[tokio::test]
async fn unknown_command_raises_unknown_command() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;
    let err = client.call("echo", "nope", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownCommand);
    Ok(())
}

#[tokio::test]
async fn missing_argument_raises_bad_arguments() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;
    let err = client.call("echo", "echo", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadArguments);
    Ok(())
}

#[tokio::test]
async fn concurrent_echo_calls_do_not_cross_wire() -> Result<()> {
    let url = next_url();
    spawn_demo_server(&url).await?;
    let client = Client::connect(ClientConfig::default().with_url(url)).await?;

    let mut handles = Vec::new();
    for i in 0..100 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let expected = format!("call-{i}");
            let result = client
                .call("echo", "echo", vec![Value::Str(expected.clone())])
                .await
                .unwrap();
            assert_eq!(result, Value::Str(expected));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    Ok(())
}
