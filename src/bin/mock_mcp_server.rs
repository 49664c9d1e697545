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

//! Minimal MCP server over newline-delimited stdio, used as a backend fixture.
//!
//! Requests are handled concurrently so responses can complete out of order.

use anyhow::Result;
use clap::Parser;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(about = "MCP stdio test server")]
struct Cli {
    /// Append one line per process start to this file
    #[arg(long)]
    spawn_log: Option<PathBuf>,

    /// Delay every tools/list answer by this many milliseconds
    #[arg(long, default_value_t = 0)]
    list_delay_ms: u64,
}

struct Server {
    out: Mutex<Stdout>,
    tools_list_calls: AtomicU64,
    list_delay: Duration,
}

impl Server {
    async fn send(&self, message: &Value) {
        let mut line = message.to_string();
        line.push('\n');
        let mut out = self.out.lock().await;
        if out.write_all(line.as_bytes()).await.is_err() || out.flush().await.is_err() {
            std::process::exit(0);
        }
    }

    async fn reply(&self, id: Value, outcome: Result<Value, (i64, String)>) {
        let message = match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        };
        self.send(&message).await;
    }

    async fn handle(&self, request: Value) {
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return;
        };
        let Some(id) = request.get("id").cloned() else {
            // Notifications need no answer.
            return;
        };
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let outcome = match method {
            "initialize" => Ok(json!({
                "protocolVersion": params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or("2024-11-05"),
                "capabilities": {
                    "tools": {"listChanged": true},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {"name": "mock-mcp-server", "version": env!("CARGO_PKG_VERSION")}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => {
                self.tools_list_calls.fetch_add(1, Ordering::SeqCst);
                if !self.list_delay.is_zero() {
                    tokio::time::sleep(self.list_delay).await;
                }
                Ok(json!({"tools": tool_catalog()}))
            }
            "resources/list" => Ok(json!({
                "resources": [{"uri": "mock://readme", "name": "readme", "mimeType": "text/plain"}]
            })),
            "resources/read" => Ok(json!({
                "contents": [{
                    "uri": params.get("uri").cloned().unwrap_or(Value::Null),
                    "mimeType": "text/plain",
                    "text": "mock resource"
                }]
            })),
            "prompts/list" => Ok(json!({"prompts": [{"name": "greet"}]})),
            "prompts/get" => match params.get("name").and_then(Value::as_str) {
                Some("greet") => Ok(json!({
                    "messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}]
                })),
                _ => Err((-32602, "unknown prompt".to_string())),
            },
            "tools/call" => self.call_tool(&params).await,
            other => Err((-32601, format!("Method not found: {other}"))),
        };
        self.reply(id, outcome).await;
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, (i64, String)> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let text = match name {
            "echo" => args.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
            "sleep" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("slept {ms}")
            }
            "progress" => {
                let steps = args.get("steps").and_then(Value::as_u64).unwrap_or(3);
                if let Some(token) = params.pointer("/_meta/progressToken") {
                    for step in 1..=steps {
                        self.send(&json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/progress",
                            "params": {"progressToken": token, "progress": step, "total": steps}
                        }))
                        .await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
                format!("done {steps}")
            }
            "crash" => std::process::exit(1),
            "pid" => std::process::id().to_string(),
            "stats" => self.tools_list_calls.load(Ordering::SeqCst).to_string(),
            "notify" => {
                self.send(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": "tools changed"}
                }))
                .await;
                self.send(&json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}))
                    .await;
                "notified".to_string()
            }
            other => return Err((-32602, format!("Unknown tool: {other}"))),
        };
        Ok(json!({"content": [{"type": "text", "text": text}], "isError": false}))
    }
}

fn tool_catalog() -> Value {
    let tool = |name: &str, description: &str| {
        json!({"name": name, "description": description, "inputSchema": {"type": "object"}})
    };
    json!([
        tool("echo", "Echo the text argument"),
        tool("sleep", "Sleep for ms milliseconds"),
        tool("progress", "Emit progress notifications"),
        tool("crash", "Exit the process"),
        tool("pid", "Report the process id"),
        tool("stats", "Report how often tools/list was served"),
        tool("notify", "Announce a tool list change"),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.spawn_log {
        let mut log = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(log, "{}", std::process::id())?;
    }
    eprintln!("mock-mcp-server started (pid {})", std::process::id());

    let server = Arc::new(Server {
        out: Mutex::new(tokio::io::stdout()),
        tools_list_calls: AtomicU64::new(0),
        list_delay: Duration::from_millis(cli.list_delay_ms),
    });
    let mut handlers = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-mcp-server: ignoring non-JSON input");
            continue;
        };
        let server = server.clone();
        while handlers.try_join_next().is_some() {}
        handlers.spawn(async move { server.handle(message).await });
    }
    // Stdin closed: finish what is in flight before exiting.
    while handlers.join_next().await.is_some() {}
    Ok(())
}
