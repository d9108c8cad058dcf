//! Destinations for streamed exec output.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::core::types::ContainerId;
use crate::runtime::{OutputChunk, OutputStream};

/// Receives exec output as it is produced.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Handle one chunk of output from an exec running in `container`.
    async fn write(&self, container: &ContainerId, chunk: &OutputChunk);
}

/// Copies exec output to the process's own stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl OutputSink for StdoutSink {
    async fn write(&self, container: &ContainerId, chunk: &OutputChunk) {
        let result = match chunk.stream {
            OutputStream::Stderr => tokio::io::stderr().write_all(&chunk.data).await,
            OutputStream::Stdout | OutputStream::Console => {
                tokio::io::stdout().write_all(&chunk.data).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(container = %container.short(), error = %e, "Failed to forward exec output");
        }
    }
}

/// Discards exec output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn write(&self, _container: &ContainerId, _chunk: &OutputChunk) {}
}
