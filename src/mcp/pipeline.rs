// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pipe pumps for one backend process.
//!
//! Every pump reports into a single `mpsc` channel of [`UpstreamEvent`]s that
//! the process actor consumes, so all state changes for a process happen on
//! one task.

use crate::mcp::codec::{Frame, McpCodec};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

#[derive(Debug)]
pub enum UpstreamEvent {
    /// One decoded JSON-RPC message from backend stdout
    Message(Value),
    /// Unstructured log line from stderr
    Log(String),
    /// stdout reached EOF
    Closed,
    /// Framing or pipe I/O failure on either direction
    Broken(String),
    /// Process terminated with optional exit code
    Terminated(Option<i32>),
}

/// Spawns the read pump: decodes newline-delimited frames from backend stdout.
pub fn spawn_upstream_reader<R>(adapter: String, stream: R, tx: mpsc::Sender<UpstreamEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stream, McpCodec::new());

        while let Some(result) = framed.next().await {
            match result {
                Ok(Frame::Message(val)) => {
                    if tx.send(UpstreamEvent::Message(val)).await.is_err() {
                        return;
                    }
                }
                Ok(Frame::Noise(line)) => {
                    debug!(adapter = %adapter, line = %line, "Backend wrote non-JSON to stdout");
                }
                Err(e) => {
                    warn!(adapter = %adapter, error = %e, "Backend stdout framing error");
                    let _ = tx.send(UpstreamEvent::Broken(e.to_string())).await;
                    return;
                }
            }
        }
        let _ = tx.send(UpstreamEvent::Closed).await;
    });
}

/// Spawns the write pump: the only writer of the backend's stdin.
pub fn spawn_downstream_writer<W>(
    stream: W,
    mut outbound: mpsc::Receiver<Value>,
    tx: mpsc::Sender<UpstreamEvent>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedWrite::new(stream, McpCodec::new());

        while let Some(frame) = outbound.recv().await {
            if let Err(e) = framed.send(frame).await {
                let _ = tx
                    .send(UpstreamEvent::Broken(format!("stdin write failed: {e}")))
                    .await;
                return;
            }
        }
    });
}

/// Spawns a background task to drain backend stderr (log forwarding).
pub fn spawn_upstream_stderr_drain<R>(stream: R, tx: mpsc::Sender<UpstreamEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // Pipe closed
                Ok(_) => {
                    let log_msg = line.trim().to_string();
                    if !log_msg.is_empty() && tx.send(UpstreamEvent::Log(log_msg)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reader_emits_messages_then_closed() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel(8);
        spawn_upstream_reader("t".into(), server, tx);

        client.write_all(b"{\"id\":1}\nnot json\n").await.unwrap();
        drop(client);

        match rx.recv().await {
            Some(UpstreamEvent::Message(v)) => assert_eq!(v, json!({"id": 1})),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(UpstreamEvent::Closed)));
    }

    #[tokio::test]
    async fn test_writer_frames_each_message() {
        let (client, server) = tokio::io::duplex(1024);
        let (out_tx, out_rx) = mpsc::channel(8);
        let (ev_tx, _ev_rx) = mpsc::channel(8);
        spawn_downstream_writer(client, out_rx, ev_tx);

        out_tx.send(json!({"id": 1})).await.unwrap();
        out_tx.send(json!({"id": 2})).await.unwrap();
        drop(out_tx);

        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"id\":1}\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"id\":2}\n");
    }
}
