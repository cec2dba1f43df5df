//! The downstream session: one long-lived child process speaking
//! newline-delimited JSON-RPC over stdio. All agent threads share it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info};

use super::protocol::{extract_content, extract_continuation, JsonRpcRequest, JsonRpcResponse, StartParams};
use crate::error::{Result, SquadronError};

/// One downstream turn: the produced text plus the handle to resume the
/// thread with.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub continuation: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait Downstream: Send + Sync {
    async fn start(&self, params: StartParams) -> Result<AgentReply>;
    async fn reply(&self, continuation: &str, prompt: &str) -> Result<AgentReply>;
    async fn is_connected(&self) -> bool;
    /// Idempotent: returns immediately when the session is already up.
    /// Concurrent callers coalesce onto one spawn.
    async fn reconnect(&self) -> Result<()>;
    async fn close(&self);
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

struct Connection {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: PendingMap,
    alive: AtomicBool,
}

impl Connection {
    async fn spawn(program: &str, args: &[String]) -> Result<Arc<Self>> {
        info!(program, "Spawning downstream session");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SquadronError::Transport(format!("failed to spawn {}: {}", program, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SquadronError::Transport("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SquadronError::Transport("child has no stdout".into()))?;

        let conn = Arc::new(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending: Arc::new(Mutex::new(HashMap::new())),
            alive: AtomicBool::new(true),
        });

        let reader_conn = Arc::clone(&conn);
        let reader = BufReader::new(stdout);
        tokio::spawn(async move {
            reader_conn.read_loop(reader).await;
        });

        Ok(conn)
    }

    async fn read_loop(self: &Arc<Self>, mut reader: BufReader<tokio::process::ChildStdout>) {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let line = line.trim();
            if line.is_empty() || !line.starts_with('{') {
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, "Unparseable downstream line");
                    continue;
                }
            };

            let Some(id) = response.id.as_ref().and_then(Value::as_i64) else {
                debug!("Downstream notification ignored");
                continue;
            };

            let mut pending = self.pending.lock().await;
            if let Some(tx) = pending.remove(&id) {
                let outcome = match response.error {
                    Some(err) => Err(SquadronError::Remote(err.message)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
        }

        // Session gone: fail everything still in flight.
        self.alive.store(false, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(SquadronError::Transport(
                "downstream session closed".into(),
            )));
        }
        debug!("Downstream read loop ended");
    }

    async fn send_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SquadronError::Transport(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| SquadronError::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| SquadronError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

pub struct StdioDownstream {
    program: String,
    args: Vec<String>,
    next_id: AtomicI64,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl StdioDownstream {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            next_id: AtomicI64::new(1),
            conn: Mutex::new(None),
        }
    }

    async fn live_connection(&self) -> Result<Arc<Connection>> {
        let conn = self.conn.lock().await;
        match conn.as_ref() {
            Some(c) if c.alive.load(Ordering::SeqCst) => Ok(Arc::clone(c)),
            _ => Err(SquadronError::Transport("not connected".into())),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let conn = self.live_connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, Some(params));
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);

        debug!(id, method, "Downstream request");
        if let Err(e) = conn.send_line(&line).await {
            conn.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SquadronError::Transport("response channel dropped".into())),
        }
    }
}

#[async_trait]
impl Downstream for StdioDownstream {
    async fn start(&self, params: StartParams) -> Result<AgentReply> {
        let result = self.request("start", serde_json::to_value(&params)?).await?;
        Ok(AgentReply {
            continuation: extract_continuation(&result),
            content: extract_content(&result),
        })
    }

    async fn reply(&self, continuation: &str, prompt: &str) -> Result<AgentReply> {
        let result = self
            .request(
                "reply",
                json!({ "prompt": prompt, "continuation": continuation }),
            )
            .await?;
        Ok(AgentReply {
            continuation: extract_continuation(&result).or(Some(continuation.to_string())),
            content: extract_content(&result),
        })
    }

    async fn is_connected(&self) -> bool {
        let conn = self.conn.lock().await;
        conn.as_ref()
            .is_some_and(|c| c.alive.load(Ordering::SeqCst))
    }

    async fn reconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if let Some(existing) = conn.as_ref()
            && existing.alive.load(Ordering::SeqCst)
        {
            return Ok(());
        }
        *conn = Some(Connection::spawn(&self.program, &self.args).await?);
        Ok(())
    }

    async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(c) = conn.take() {
            c.shutdown().await;
        }
    }
}
