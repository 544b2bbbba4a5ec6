//! `file.upload` (input-streaming) and `file.download` (output-streaming) —
//! a worked streaming-file-transfer example. Both are sandboxed to a root
//! directory handed in at construction; the demo binary and tests always
//! point this at a temp directory, never a caller-controlled absolute path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::call::ChannelSequence;
use crate::error::{Result, RpcError};
use crate::registry::{BoundArgs, CommandHandler, CommandReturn, CommandSpec, ParamSpec, ServiceSpec};
use crate::value::{TypeTag, Value};

fn sandbox_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let candidate = Path::new(requested);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RpcError::BadArguments(format!("path `{requested}` escapes the sandbox root")));
    }
    Ok(root.join(candidate))
}

struct UploadHandler {
    root: PathBuf,
}

#[async_trait]
impl CommandHandler for UploadHandler {
    async fn call(&self, mut args: BoundArgs) -> Result<CommandReturn> {
        let path = args
            .get(0)
            .as_str()
            .ok_or_else(|| RpcError::BadArguments("`path` must be a string".into()))?
            .to_string();
        let full = sandbox_path(&self.root, &path)?;
        let mut stream = args
            .input_stream
            .take()
            .ok_or_else(|| RpcError::Protocol("upload requires an input stream".into()))?;

        let mut contents = Vec::new();
        while let Some(item) = stream.next().await {
            let value = item?;
            let bytes = value
                .as_bytes()
                .ok_or_else(|| RpcError::BadArguments("upload stream elements must be bytes".into()))?;
            contents.extend_from_slice(bytes);
        }
        tokio::fs::write(&full, &contents).await.map_err(RpcError::Transport)?;
        Ok(CommandReturn::Value(Value::None))
    }
}

struct DownloadHandler {
    root: PathBuf,
}

#[async_trait]
impl CommandHandler for DownloadHandler {
    async fn call(&self, args: BoundArgs) -> Result<CommandReturn> {
        let path = args
            .get(0)
            .as_str()
            .ok_or_else(|| RpcError::BadArguments("`path` must be a string".into()))?
            .to_string();
        let full = sandbox_path(&self.root, &path)?;
        let contents = tokio::fs::read(&full).await.map_err(RpcError::Transport)?;

        let sequence = ChannelSequence::spawn(4, move |tx| async move {
            for chunk in contents.chunks(4096) {
                if tx.send(Ok(Value::Bytes(chunk.to_vec()))).await.is_err() {
                    break;
                }
            }
        });
        Ok(CommandReturn::Stream(Box::new(sequence)))
    }
}

/// Builds the `file` service sandboxed to `root`.
pub fn build(root: PathBuf) -> ServiceSpec {
    ServiceSpec::new("file")
        .with_doc("Worked examples: streaming file transfer, sandboxed to a root directory.")
        .with_command(
            CommandSpec::new(
                "upload",
                vec![
                    ParamSpec::new("data", TypeTag::Stream(Box::new(TypeTag::Bytes))),
                    ParamSpec::new("path", TypeTag::Str),
                ],
                TypeTag::None,
                UploadHandler { root: root.clone() },
            )
            .expect("data is the first and only stream param")
            .with_doc("Writes the streamed bytes to `path` under the sandbox root."),
        )
        .expect("file.upload is not yet registered")
        .with_command(
            CommandSpec::new(
                "download",
                vec![ParamSpec::new("path", TypeTag::Str)],
                TypeTag::Stream(Box::new(TypeTag::Bytes)),
                DownloadHandler { root },
            )
            .expect("download has no stream params")
            .with_doc("Streams the bytes of `path` under the sandbox root."),
        )
        .expect("file.download is not yet registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_path_rejects_absolute_and_parent_traversal() {
        let root = PathBuf::from("/tmp/snekrpc-sandbox");
        assert!(sandbox_path(&root, "/etc/passwd").is_err());
        assert!(sandbox_path(&root, "../escape").is_err());
        assert!(sandbox_path(&root, "nested/ok.txt").is_ok());
    }
}
