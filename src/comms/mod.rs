//! Agent-facing comms service: a loopback HTTP endpoint speaking JSON-RPC,
//! where each session is bound to one agent identity at handshake.

mod handlers;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::agent::{JsonRpcRequest, JsonRpcResponse, TokenStore};
use crate::bus::MessageBus;
use crate::config::CommsConfig;
use crate::error::{Result, SquadronError};
use crate::state::TeamStore;

pub use handlers::agent_tool_definitions;

const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Clone)]
pub struct CommsState {
    pub store: Arc<TeamStore>,
    pub bus: Arc<MessageBus>,
    pub tokens: Arc<TokenStore>,
    pub config: CommsConfig,
    /// Session id -> bound agent id. The binding is fixed at handshake;
    /// later requests cannot re-point it via query parameters.
    sessions: Arc<RwLock<HashMap<String, String>>>,
    draining: Arc<AtomicBool>,
}

pub struct CommsService {
    state: CommsState,
}

impl CommsService {
    pub fn new(
        store: Arc<TeamStore>,
        bus: Arc<MessageBus>,
        tokens: Arc<TokenStore>,
        config: CommsConfig,
    ) -> Self {
        Self {
            state: CommsState {
                store,
                bus,
                tokens,
                config,
                sessions: Arc::new(RwLock::new(HashMap::new())),
                draining: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds to an ephemeral loopback port and serves until the handle is
    /// dropped or aborted.
    pub async fn serve(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        info!(%addr, "Comms service listening");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok((addr, handle))
    }

    /// Stop admitting new sessions; existing ones keep working while the
    /// process drains.
    pub fn drain(&self) {
        self.state.draining.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    agent: Option<String>,
    token: Option<String>,
}

/// Authenticates the query credentials; both absence and mismatch are
/// terminal for the request.
fn authenticate(state: &CommsState, query: &HandshakeQuery) -> Result<String> {
    let (agent, token) = match (&query.agent, &query.token) {
        (Some(agent), Some(token)) if !agent.is_empty() && !token.is_empty() => (agent, token),
        _ => {
            return Err(SquadronError::Unauthenticated(
                "agent id and token required in the session URL".into(),
            ))
        }
    };
    if !state.tokens.verify(agent, token) {
        return Err(SquadronError::Forbidden(format!(
            "token does not match agent '{}'",
            agent
        )));
    }
    Ok(agent.clone())
}

async fn handle_mcp(
    State(state): State<CommsState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return rpc_response(
                StatusCode::BAD_REQUEST,
                None,
                JsonRpcResponse::err(None, crate::agent::protocol_codes::PARSE_ERROR, e.to_string()),
            );
        }
    };
    let id = request.id.clone();

    let authed_agent = match authenticate(&state, &query) {
        Ok(agent) => agent,
        Err(e) => {
            let status = match &e {
                SquadronError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::FORBIDDEN,
            };
            return rpc_response(
                status,
                None,
                JsonRpcResponse::err(
                    id,
                    crate::agent::protocol_codes::INVALID_PARAMS,
                    e.to_string(),
                ),
            );
        }
    };

    match request.method.as_str() {
        "initialize" => {
            if state.draining.load(Ordering::SeqCst) {
                return rpc_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    None,
                    JsonRpcResponse::err(
                        id,
                        crate::agent::protocol_codes::INTERNAL_ERROR,
                        "shutting down; no new sessions",
                    ),
                );
            }

            let session_id = uuid::Uuid::new_v4().simple().to_string();
            state
                .sessions
                .write()
                .insert(session_id.clone(), authed_agent.clone());
            debug!(agent = %authed_agent, session = %session_id, "Comms session opened");

            let result = json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "squadron-comms", "version": env!("CARGO_PKG_VERSION") },
            });
            rpc_response(
                StatusCode::OK,
                Some(session_id),
                JsonRpcResponse::ok(id, result),
            )
        }
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => rpc_response(
            StatusCode::OK,
            None,
            JsonRpcResponse::ok(id, json!({ "tools": agent_tool_definitions() })),
        ),
        "tools/call" => {
            // The session binding is authoritative; the query only proves
            // possession of the token.
            let session_agent = headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|sid| state.sessions.read().get(sid).cloned());
            let Some(agent_id) = session_agent else {
                return rpc_response(
                    StatusCode::UNAUTHORIZED,
                    None,
                    JsonRpcResponse::err(
                        id,
                        crate::agent::protocol_codes::INVALID_PARAMS,
                        "unknown or missing session; initialize first",
                    ),
                );
            };

            let (name, args) = match parse_tool_call(request.params) {
                Ok(pair) => pair,
                Err(e) => {
                    return rpc_response(
                        StatusCode::OK,
                        None,
                        JsonRpcResponse::err(
                            id,
                            crate::agent::protocol_codes::INVALID_PARAMS,
                            e.to_string(),
                        ),
                    );
                }
            };

            let outcome = handlers::dispatch(&state, &agent_id, &name, args).await;
            let result = match outcome {
                Ok(value) => json!({
                    "content": [{ "type": "text", "text": stringify(value) }],
                    "isError": false,
                }),
                Err(e) => json!({
                    "content": [{ "type": "text", "text": format!("{}: {}", e.kind(), e) }],
                    "isError": true,
                }),
            };
            rpc_response(StatusCode::OK, None, JsonRpcResponse::ok(id, result))
        }
        other => rpc_response(
            StatusCode::OK,
            None,
            JsonRpcResponse::err(
                id,
                crate::agent::protocol_codes::METHOD_NOT_FOUND,
                format!("unknown method '{}'", other),
            ),
        ),
    }
}

fn parse_tool_call(params: Option<Value>) -> Result<(String, Value)> {
    let params = params.ok_or_else(|| {
        SquadronError::InvalidArgument("tools/call requires params".into())
    })?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SquadronError::InvalidArgument("missing tool name".into()))?
        .to_string();
    let args = params.get("arguments").cloned().unwrap_or(json!({}));
    Ok((name, args))
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn rpc_response(
    status: StatusCode,
    session_id: Option<String>,
    payload: JsonRpcResponse,
) -> Response {
    let mut response = (status, Json(payload)).into_response();
    if let Some(sid) = session_id
        && let Ok(value) = sid.parse::<axum::http::HeaderValue>()
    {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
