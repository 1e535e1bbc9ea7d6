//! Tool Protocol Implementations
//!
//! - **McpClientProtocol**: JSON-RPC client for MCP servers over streamable HTTP
//! - **LocalToolProtocol**: in-process Rust closures (sync and async)
//!
//! # Example
//!
//! ```rust,no_run
//! use agentry::tool_protocols::McpClientProtocol;
//! use agentry::tool_protocol::list_tools_scoped;
//!
//! # async {
//! let mcp = McpClientProtocol::new("http://localhost:8001/mcp");
//! let tools = list_tools_scoped(&mcp).await.unwrap();
//! # };
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::agentry::http_client_pool::get_or_create_client;
use crate::agentry::tool_protocol::{
    ToolConnection, ToolError, ToolProtocol, ToolSpec, NO_RESULT,
};

/// JSON-RPC version spoken by MCP.
const JSONRPC_VERSION: &str = "2.0";
/// MCP revision announced during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<JsonValue>,
    #[serde(default)]
    is_error: bool,
}

impl From<McpTool> for ToolSpec {
    fn from(tool: McpTool) -> Self {
        ToolSpec::new(tool.name, tool.description.unwrap_or_default())
            .with_parameters(tool.input_schema.unwrap_or(JsonValue::Null))
    }
}

/// Text of the first understood content part.
///
/// `text` parts yield their text, `resource_link` parts their URI. Anything else is
/// reported as [`NO_RESULT`].
pub fn extract_content_text(content: &[JsonValue]) -> String {
    for part in content {
        match part.get("type").and_then(JsonValue::as_str) {
            Some("text") => {
                if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
                    return text.to_string();
                }
            }
            Some("resource_link") => {
                if let Some(uri) = part.get("uri").and_then(JsonValue::as_str) {
                    return uri.to_string();
                }
            }
            _ => {}
        }
    }
    log::warn!("unknown MCP tool response content: {}", JsonValue::from(content.to_vec()));
    NO_RESULT.to_string()
}

/// Pull the JSON-RPC message with the given id out of a `text/event-stream` body.
fn parse_event_stream(body: &str, id: u64) -> Option<JsonRpcResponse> {
    let mut data = String::new();
    let mut found = None;
    let mut flush = |data: &mut String| {
        if data.is_empty() {
            return;
        }
        if let Ok(message) = serde_json::from_str::<JsonRpcResponse>(data) {
            if message.id.as_ref().and_then(JsonValue::as_u64) == Some(id) {
                found = Some(message);
            }
        }
        data.clear();
    };
    for line in body.lines() {
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);
    found
}

/// MCP (Model Context Protocol) client over streamable HTTP.
///
/// Every [`connect`](ToolProtocol::connect) performs the `initialize` handshake and
/// returns a connection bound to the server-issued session id; closing it sends the
/// session `DELETE`.
pub struct McpClientProtocol {
    endpoint: String,
    timeout: Duration,
    client_name: String,
}

impl McpClientProtocol {
    /// Client for the MCP endpoint at `endpoint` (e.g. `http://localhost:8001/mcp`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            client_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name announced in `clientInfo`.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolProtocol for McpClientProtocol {
    async fn connect(&self) -> Result<Box<dyn ToolConnection>, Box<dyn Error + Send + Sync>> {
        let mut connection = McpConnection {
            endpoint: self.endpoint.clone(),
            client: get_or_create_client(&self.endpoint),
            timeout: self.timeout,
            session_id: None,
            next_id: AtomicU64::new(1),
        };
        connection.initialize(&self.client_name).await?;
        Ok(Box::new(connection))
    }

    fn protocol_name(&self) -> &str {
        "mcp"
    }
}

struct McpConnection {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl McpConnection {
    fn post(&self) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, MCP_PROTOCOL_VERSION);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }
        request
    }

    async fn initialize(&mut self, client_name: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": client_name, "version": env!("CARGO_PKG_VERSION")},
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .post()
            .json(&JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION,
                method: "initialize",
                params: Some(params),
                id: Some(id),
            })
            .send()
            .await
            .map_err(|e| ToolError::Unreachable(format!("{}: {}", self.endpoint, e)))?;

        self.session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self::read_result(response, id).await?;
        log::debug!(
            "MCP session opened at {} (session id: {:?})",
            self.endpoint,
            self.session_id
        );

        let notified = self
            .post()
            .json(&JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION,
                method: "notifications/initialized",
                params: None,
                id: None,
            })
            .send()
            .await
            .map_err(|e| ToolError::Unreachable(format!("{}: {}", self.endpoint, e)))?;
        if !notified.status().is_success() {
            return Err(Box::new(ToolError::ProtocolError(format!(
                "initialized notification rejected with status {}",
                notified.status()
            ))));
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: JsonValue,
    ) -> Result<JsonValue, Box<dyn Error + Send + Sync>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .post()
            .json(&JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION,
                method,
                params: Some(params),
                id: Some(id),
            })
            .send()
            .await
            .map_err(|e| ToolError::Unreachable(format!("{}: {}", self.endpoint, e)))?;
        Self::read_result(response, id).await
    }

    async fn read_result(
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonValue, Box<dyn Error + Send + Sync>> {
        let status = response.status();
        if !status.is_success() {
            return Err(Box::new(ToolError::ProtocolError(format!(
                "MCP server returned status: {}",
                status
            ))));
        }
        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        let message = if is_event_stream {
            parse_event_stream(&body, id).ok_or_else(|| {
                ToolError::ProtocolError(format!("no response with id {} in event stream", id))
            })?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)
                .map_err(|e| ToolError::ProtocolError(format!("invalid JSON-RPC response: {}", e)))?
        };

        if let Some(error) = message.error {
            return Err(Box::new(ToolError::ExecutionFailed(format!(
                "{} (code {})",
                error.message, error.code
            ))));
        }
        message.result.ok_or_else(|| {
            Box::new(ToolError::ProtocolError(
                "JSON-RPC response carries neither result nor error".to_string(),
            )) as Box<dyn Error + Send + Sync>
        })
    }
}

#[async_trait]
impl ToolConnection for McpConnection {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, Box<dyn Error + Send + Sync>> {
        log::info!("listing tools from MCP server {}", self.endpoint);
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => serde_json::json!({ "cursor": cursor }),
                None => serde_json::json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result).map_err(|e| {
                ToolError::ProtocolError(format!("invalid tools/list result: {}", e))
            })?;
            tools.extend(page.tools.into_iter().map(ToolSpec::from));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        log::debug!("MCP server {} exposes {} tools", self.endpoint, tools.len());
        Ok(tools)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        log::info!("calling MCP tool {} with args {}", tool_name, arguments);
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": tool_name, "arguments": arguments }),
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| ToolError::ProtocolError(format!("invalid tools/call result: {}", e)))?;
        let text = extract_content_text(&result.content);
        if result.is_error {
            return Err(Box::new(ToolError::ExecutionFailed(text)));
        }
        Ok(text)
    }

    async fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let session_id = match &self.session_id {
            Some(session_id) => session_id,
            None => return Ok(()),
        };
        let response = self
            .client
            .delete(&self.endpoint)
            .timeout(self.timeout)
            .header(SESSION_HEADER, session_id)
            .send()
            .await?;
        // servers that do not support explicit termination answer 405
        if !response.status().is_success()
            && response.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED
        {
            return Err(Box::new(ToolError::ProtocolError(format!(
                "session termination returned status: {}",
                response.status()
            ))));
        }
        log::debug!("MCP session {} closed", session_id);
        Ok(())
    }
}

/// Type alias for synchronous tool functions exposed via the local adapter.
pub type ToolFunction =
    Arc<dyn Fn(JsonValue) -> Result<String, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Type alias for asynchronous tool functions exposed via the local adapter.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<Output = Result<String, Box<dyn Error + Send + Sync>>>
                    + Send,
            >,
        > + Send
        + Sync,
>;

#[derive(Clone)]
enum LocalFunction {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

#[derive(Default)]
struct LocalTools {
    // registration order is kept so listings are stable
    specs: Vec<ToolSpec>,
    functions: HashMap<String, LocalFunction>,
}

impl LocalTools {
    fn insert(&mut self, spec: ToolSpec, function: LocalFunction) {
        self.specs.retain(|existing| existing.name != spec.name);
        self.functions.insert(spec.name.clone(), function);
        self.specs.push(spec);
    }
}

/// In-process tools backed by Rust closures.
///
/// ```rust
/// use agentry::tool_protocols::LocalToolProtocol;
/// use agentry::tool_protocol::ToolSpec;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let local = LocalToolProtocol::new();
/// local
///     .register_tool(
///         ToolSpec::new("echo", "Echo the `text` argument"),
///         Arc::new(|args| Ok(args["text"].as_str().unwrap_or_default().to_string())),
///     )
///     .await;
/// # }
/// ```
#[derive(Clone, Default)]
pub struct LocalToolProtocol {
    tools: Arc<RwLock<LocalTools>>,
}

impl LocalToolProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous tool. Replaces any tool with the same name.
    pub async fn register_tool(&self, spec: ToolSpec, function: ToolFunction) {
        self.tools
            .write()
            .await
            .insert(spec, LocalFunction::Sync(function));
    }

    /// Register an asynchronous tool. Replaces any tool with the same name.
    pub async fn register_async_tool(&self, spec: ToolSpec, function: AsyncToolFunction) {
        self.tools
            .write()
            .await
            .insert(spec, LocalFunction::Async(function));
    }

    /// Remove a tool.
    pub async fn unregister_tool(&self, name: &str) {
        let mut tools = self.tools.write().await;
        tools.specs.retain(|spec| spec.name != name);
        tools.functions.remove(name);
    }
}

#[async_trait]
impl ToolProtocol for LocalToolProtocol {
    async fn connect(&self) -> Result<Box<dyn ToolConnection>, Box<dyn Error + Send + Sync>> {
        Ok(Box::new(self.clone()))
    }

    fn protocol_name(&self) -> &str {
        "local"
    }
}

#[async_trait]
impl ToolConnection for LocalToolProtocol {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, Box<dyn Error + Send + Sync>> {
        Ok(self.tools.read().await.specs.clone())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        // clone the function out so the lock is not held while it runs
        let function = self.tools.read().await.functions.get(tool_name).cloned();
        match function {
            Some(LocalFunction::Sync(function)) => function(arguments),
            Some(LocalFunction::Async(function)) => function(arguments).await,
            None => Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_content() {
        let content = vec![serde_json::json!({"type": "text", "text": "4"})];
        assert_eq!(extract_content_text(&content), "4");
    }

    #[test]
    fn test_extract_resource_link_uri() {
        let content = vec![
            serde_json::json!({"type": "image", "data": "..."}),
            serde_json::json!({
                "type": "resource_link",
                "uri": "file:///tmp/report.pdf",
                "name": "report"
            }),
        ];
        assert_eq!(extract_content_text(&content), "file:///tmp/report.pdf");
    }

    #[test]
    fn test_unknown_content_degrades_to_sentinel() {
        let content = vec![serde_json::json!({"type": "audio", "data": "..."})];
        assert_eq!(extract_content_text(&content), NO_RESULT);
        assert_eq!(extract_content_text(&[]), NO_RESULT);
    }

    #[test]
    fn test_parse_event_stream_picks_matching_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\n\
                    \n";
        let message = parse_event_stream(body, 7).unwrap();
        assert!(message.result.is_some());
        assert!(parse_event_stream(body, 8).is_none());
    }

    #[test]
    fn test_mcp_tool_converts_to_spec() {
        let tool: McpTool = serde_json::from_value(serde_json::json!({
            "name": "calculator",
            "description": "Evaluate an expression",
            "inputSchema": {"type": "object", "properties": {"expr": {"type": "string"}}}
        }))
        .unwrap();
        let spec = ToolSpec::from(tool);
        assert_eq!(spec.name, "calculator");
        assert_eq!(spec.parameters["properties"]["expr"]["type"], "string");

        let bare: McpTool = serde_json::from_value(serde_json::json!({"name": "ping"})).unwrap();
        assert_eq!(ToolSpec::from(bare).parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_local_protocol_lists_and_invokes() {
        let local = LocalToolProtocol::new();
        local
            .register_tool(
                ToolSpec::new("upper", "Uppercase text"),
                Arc::new(|args| Ok(args["text"].as_str().unwrap_or_default().to_uppercase())),
            )
            .await;
        local
            .register_async_tool(
                ToolSpec::new("later", "Answer after a pause"),
                Arc::new(|_args| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok("done".to_string())
                    })
                }),
            )
            .await;

        let connection = local.connect().await.unwrap();
        let names: Vec<String> = connection
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["upper", "later"]);
        assert_eq!(
            connection
                .invoke("upper", serde_json::json!({"text": "abc"}))
                .await
                .unwrap(),
            "ABC"
        );
        assert_eq!(connection.invoke("later", serde_json::json!({})).await.unwrap(), "done");
        assert!(connection.invoke("missing", serde_json::json!({})).await.is_err());
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_protocol_unregister() {
        let local = LocalToolProtocol::new();
        local
            .register_tool(ToolSpec::new("a", ""), Arc::new(|_| Ok(String::new())))
            .await;
        local.unregister_tool("a").await;
        assert!(local.list_tools().await.unwrap().is_empty());
    }
}
