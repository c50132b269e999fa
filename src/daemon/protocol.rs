//! JSON-RPC 2.0 wire types and the tool surface exposed over `POST /mcp`
//!
//! Three tools drive a connection's session: `start`, `heartbeat` and
//! `end`. Their arguments are validated here so malformed input is rejected
//! with [`INVALID_PARAMS`] before anything reaches the hash chain.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::daemon::manager::SessionManager;
use crate::error::ProofworkError;
use crate::session::EndRequest;
use crate::storage::{MilestoneInput, SessionEvaluation};

pub const JSONRPC_VERSION: &str = "2.0";

/// Newest protocol revision this server speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26"];

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

pub const TOOL_START: &str = "start";
pub const TOOL_HEARTBEAT: &str = "heartbeat";
pub const TOOL_END: &str = "end";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Request names a connection the daemon does not know
pub const UNKNOWN_CONNECTION: i64 = -32001;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request; `id` is absent for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response; exactly one of `result` or `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Displays as `"JSON-RPC error {code}: {message}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Tool arguments
// ---------------------------------------------------------------------------

/// Arguments of the `start` tool
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartArgs {
    #[serde(default)]
    pub task_type: Option<String>,
}

impl StartArgs {
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        validate_non_blank("task_type", self.task_type.as_deref())
    }
}

/// Arguments of the `end` tool
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndArgs {
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub files_touched_count: Option<u32>,
    #[serde(default)]
    pub milestones: Option<Vec<MilestoneInput>>,
    #[serde(default)]
    pub evaluation: Option<SessionEvaluation>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub private_title: Option<String>,
}

impl EndArgs {
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        validate_non_blank("task_type", self.task_type.as_deref())?;

        if let Some(evaluation) = &self.evaluation {
            for (name, rating) in [
                ("prompt_quality", evaluation.prompt_quality),
                ("context_provided", evaluation.context_provided),
                ("independence_level", evaluation.independence_level),
                ("scope_quality", evaluation.scope_quality),
            ] {
                if !(1..=5).contains(&rating) {
                    return Err(JsonRpcError::invalid_params(format!(
                        "evaluation.{} must be between 1 and 5, got {}",
                        name, rating
                    )));
                }
            }
        }

        for (i, milestone) in self.milestones.iter().flatten().enumerate() {
            if milestone.title.trim().is_empty() {
                return Err(JsonRpcError::invalid_params(format!(
                    "milestones[{}].title must not be empty",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn into_request(self) -> EndRequest {
        EndRequest {
            task_type: self.task_type,
            languages: self.languages.unwrap_or_default(),
            files_touched_count: self.files_touched_count,
            milestones: self.milestones.unwrap_or_default(),
            evaluation: self.evaluation,
            model: self.model,
            project: self.project,
            title: self.title,
            private_title: self.private_title,
        }
    }
}

fn validate_non_blank(field: &str, value: Option<&str>) -> Result<(), JsonRpcError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(JsonRpcError::invalid_params(format!(
            "{} must not be empty",
            field
        ))),
        _ => Ok(()),
    }
}

/// Deserialize tool arguments, treating a missing object as `{}`.
fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Option<Value>) -> Result<T, JsonRpcError> {
    let value = match arguments {
        None | Some(Value::Null) => json!({}),
        Some(v) => v,
    };
    serde_json::from_value(value)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid arguments: {}", e)))
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Client name from the `clientInfo` of `initialize` params.
pub fn client_name_from_initialize(params: Option<&Value>) -> Option<String> {
    params?
        .get("clientInfo")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Result of `initialize`: the client's protocol version when supported,
/// otherwise the latest one.
pub fn initialize_result(params: Option<&Value>) -> Value {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str);
    let version = match requested {
        Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
        _ => LATEST_PROTOCOL_VERSION,
    };
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Tool definitions returned by `tools/list`.
pub fn tool_definitions() -> Value {
    let rating = json!({ "type": "integer", "minimum": 1, "maximum": 5 });
    json!({
        "tools": [
            {
                "name": TOOL_START,
                "description": "Start a tracked session. Starting while a session is active nests the new one inside it.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "task_type": { "type": "string" } },
                    "additionalProperties": false,
                },
            },
            {
                "name": TOOL_HEARTBEAT,
                "description": "Record continued activity in the current session.",
                "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false },
            },
            {
                "name": TOOL_END,
                "description": "End and seal the current session.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "task_type": { "type": "string" },
                        "languages": { "type": "array", "items": { "type": "string" } },
                        "files_touched_count": { "type": "integer", "minimum": 0 },
                        "milestones": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "title": { "type": "string", "minLength": 1 },
                                    "category": { "type": "string" },
                                    "complexity": { "type": "string" },
                                    "private_title": { "type": "string" },
                                },
                                "required": ["title", "category"],
                            },
                        },
                        "evaluation": {
                            "type": "object",
                            "properties": {
                                "prompt_quality": rating,
                                "context_provided": rating,
                                "independence_level": rating,
                                "scope_quality": rating,
                                "task_outcome": {
                                    "type": "string",
                                    "enum": ["completed", "partial", "abandoned", "blocked"],
                                },
                                "iteration_count": { "type": "integer", "minimum": 0 },
                                "tools_leveraged": { "type": "integer", "minimum": 0 },
                            },
                            "required": ["prompt_quality", "context_provided", "independence_level", "scope_quality"],
                        },
                        "model": { "type": "string" },
                        "project": { "type": "string" },
                        "title": { "type": "string" },
                        "private_title": { "type": "string" },
                    },
                    "additionalProperties": false,
                },
            },
        ]
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Handle one request on a registered connection.
///
/// Returns `None` for notifications. `initialize` is answered here as well
/// so a client may repeat it on an existing connection.
pub async fn handle_request(
    manager: &Arc<SessionManager>,
    connection_id: &str,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    debug!(connection_id, method = %request.method, "Handling request");

    if request.jsonrpc != JSONRPC_VERSION {
        return request.id.map(|id| {
            JsonRpcResponse::failure(id, JsonRpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""))
        });
    }

    let outcome = match request.method.as_str() {
        METHOD_INITIALIZE => Ok(initialize_result(request.params.as_ref())),
        METHOD_INITIALIZED => return None,
        METHOD_PING => Ok(json!({})),
        METHOD_TOOLS_LIST => Ok(tool_definitions()),
        METHOD_TOOLS_CALL => call_tool(manager, connection_id, request.params).await,
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("method not found: {}", other),
        )),
    };

    let id = request.id?;
    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

async fn call_tool(
    manager: &Arc<SessionManager>,
    connection_id: &str,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    let params: CallToolParams = parse_args(params)?;

    let result = match params.name.as_str() {
        TOOL_START => {
            let args: StartArgs = parse_args(params.arguments)?;
            args.validate()?;
            start_tool(manager, connection_id, args).await
        }
        TOOL_HEARTBEAT => {
            let _: NoArgs = parse_args(params.arguments)?;
            heartbeat_tool(manager, connection_id).await
        }
        TOOL_END => {
            let args: EndArgs = parse_args(params.arguments)?;
            args.validate()?;
            end_tool(manager, connection_id, args.into_request()).await
        }
        other => {
            return Err(JsonRpcError::invalid_params(format!("unknown tool: {}", other)));
        }
    };

    match result {
        Ok(value) => Ok(tool_result(value)),
        Err(e) => tool_failure(e),
    }
}

/// Arguments of the `heartbeat` tool; it takes none.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

async fn start_tool(
    manager: &Arc<SessionManager>,
    connection_id: &str,
    args: StartArgs,
) -> crate::error::Result<Value> {
    let receipt = manager.start(connection_id, args.task_type).await?;
    let session = &receipt.session;
    Ok(json!({
        "session_id": session.session_id,
        "client": session.client,
        "task_type": session.task_type,
        "conversation_index": session.conversation_index,
        "nested": session.parent_depth > 0,
        "seq": receipt.record.seq,
        "hash": receipt.record.hash,
    }))
}

async fn heartbeat_tool(
    manager: &Arc<SessionManager>,
    connection_id: &str,
) -> crate::error::Result<Value> {
    let receipt = manager.heartbeat(connection_id).await?;
    Ok(json!({
        "session_id": receipt.session.session_id,
        "heartbeat_count": receipt.session.heartbeat_count,
        "seq": receipt.record.seq,
        "hash": receipt.record.hash,
    }))
}

async fn end_tool(
    manager: &Arc<SessionManager>,
    connection_id: &str,
    request: EndRequest,
) -> crate::error::Result<Value> {
    let outcome = manager.end(connection_id, request).await?;
    Ok(json!({
        "session_id": outcome.seal.session_id(),
        "duration_seconds": outcome.seal.summary.duration_seconds,
        "record_count": outcome.seal.summary.record_count,
        "chain_end_hash": outcome.seal.summary.chain_end_hash,
        "signed": outcome.seal.is_signed(),
        "milestones": outcome.milestones.len(),
        "relocated": outcome.relocated,
    }))
}

fn tool_result(value: Value) -> Value {
    let text = value.to_string();
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": value,
        "isError": false,
    })
}

/// Map a manager error onto the wire. Session state errors are tool
/// results with `isError`, everything else is a JSON-RPC error.
fn tool_failure(error: anyhow::Error) -> Result<Value, JsonRpcError> {
    match error.downcast_ref::<ProofworkError>() {
        Some(ProofworkError::SessionNotActive) => Ok(json!({
            "content": [{ "type": "text", "text": error.to_string() }],
            "isError": true,
        })),
        Some(ProofworkError::UnknownConnection(_)) => {
            Err(JsonRpcError::new(UNKNOWN_CONNECTION, error.to_string()))
        }
        _ => {
            warn!(error = %error, "Tool call failed");
            Err(JsonRpcError::new(INTERNAL_ERROR, error.to_string()))
        }
    }
}
