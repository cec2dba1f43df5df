//! Operator surface: JSON-RPC tool calls over stdio. Requests are handled
//! concurrently so a blocking call (`await_mission`) never starves the rest
//! of the channel; one writer task serializes responses back out.

pub mod tools;

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::agent::{protocol_codes, JsonRpcRequest, JsonRpcResponse};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::mission::MissionEngine;
use crate::ops::Operations;
use crate::steering::Steering;

/// Everything the operator tools can touch.
pub struct OperatorContext {
    pub ops: Operations,
    pub dispatcher: Dispatcher,
    pub engine: Arc<MissionEngine>,
    pub steering: Steering,
}

pub struct OperatorServer {
    ctx: Arc<OperatorContext>,
}

impl OperatorServer {
    pub fn new(ctx: OperatorContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Serves the channel until the reader closes (operator disconnect).
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let response =
                        JsonRpcResponse::err(None, protocol_codes::PARSE_ERROR, e.to_string());
                    let _ = tx.send(serde_json::to_string(&response)?);
                    continue;
                }
            };

            if request.is_notification() {
                debug!(method = %request.method, "Operator notification");
                continue;
            }

            let ctx = Arc::clone(&self.ctx);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = handle_request(&ctx, request).await;
                match serde_json::to_string(&response) {
                    Ok(line) => {
                        let _ = tx.send(line);
                    }
                    Err(e) => error!(error = %e, "Failed to serialize response"),
                }
            });
        }

        info!("Operator channel closed");
        drop(tx);
        let _ = writer_task.await;
        Ok(())
    }
}

async fn handle_request(ctx: &OperatorContext, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "squadron", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": tools::definitions() })),
        "tools/call" => {
            let Some(params) = request.params else {
                return JsonRpcResponse::err(
                    id,
                    protocol_codes::INVALID_PARAMS,
                    "tools/call requires params",
                );
            };
            let name = params
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            debug!(tool = %name, "Operator tool call");
            let result = match tools::dispatch(ctx, &name, args).await {
                Ok(value) => {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": false,
                    })
                }
                Err(e) => json!({
                    "content": [{ "type": "text", "text": format!("{}: {}", e.kind(), e) }],
                    "isError": true,
                }),
            };
            JsonRpcResponse::ok(id, result)
        }
        other => JsonRpcResponse::err(
            id,
            protocol_codes::METHOD_NOT_FOUND,
            format!("unknown method '{}'", other),
        ),
    }
}
