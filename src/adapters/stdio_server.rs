//! Line-delimited JSON transport for `serve --stdio`.
//!
//! One request per input line, one response per output line. Requests are
//! answered in order. Logging never touches stdout.
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    core::{GatewayService, protocol::GatewayResponse},
    utils::graceful_shutdown::ShutdownToken,
};

pub struct StdioServer {
    gateway: Arc<GatewayService>,
}

impl StdioServer {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    /// Serve the process's own stdin/stdout.
    pub async fn run(&self, shutdown: ShutdownToken) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer, shutdown).await
    }

    /// Serve until `reader` reaches EOF or shutdown is signalled.
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        mut shutdown: ShutdownToken,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("Serving tool calls over stdio");
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => read.wrap_err("Failed to read from stdin")?,
                reason = shutdown.wait_for_shutdown() => {
                    tracing::info!(?reason, "Stdio transport stopping");
                    break;
                }
            };
            if read == 0 {
                tracing::info!("Stdin closed");
                break;
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.gateway.handle_line(line).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding request line that is not UTF-8");
                    Some(GatewayResponse::error(
                        None,
                        format!("Parse error: request is not valid UTF-8: {e}"),
                    ))
                }
            };
            let Some(response) = response else {
                continue;
            };
            let mut encoded =
                serde_json::to_vec(&response).wrap_err("Failed to encode gateway response")?;
            encoded.push(b'\n');
            writer
                .write_all(&encoded)
                .await
                .wrap_err("Failed to write to stdout")?;
            writer.flush().await.wrap_err("Failed to flush stdout")?;
        }
        Ok(())
    }
}
