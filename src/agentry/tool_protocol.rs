//! Tool Protocol Abstraction Layer
//!
//! Agents reach their tools through a [`ToolProtocol`]. A protocol hands out short-lived
//! [`ToolConnection`]s: one connection per logical unit of work (listing the tools, or
//! running one turn's tool phase), closed afterwards whether the work succeeded or not.
//!
//! # Architecture
//!
//! ```text
//! AgentOrchestrator → ToolProtocol::connect → ToolConnection → [MCP | Local | User-defined]
//!                                               ├─ list_tools
//!                                               ├─ invoke (xN, concurrently)
//!                                               └─ close
//! ```
//!
//! Implementations shipped with the crate live in [`tool_protocols`](crate::tool_protocols).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Text returned for tool output whose content type is not understood.
pub const NO_RESULT: &str = "no result";

/// Name, description and parameter schema of a tool, as shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolSpec {
    /// Tool without parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
        }
    }

    /// Replace the argument schema. `null` falls back to an empty object schema.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = if parameters.is_null() {
            empty_object_schema()
        } else {
            parameters
        };
        self
    }

    /// First line of the description, used in prompt listings.
    pub fn summary(&self) -> &str {
        self.description.lines().next().unwrap_or("")
    }

    /// OpenAI function-tool representation.
    pub fn to_openai_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Keep the tools named in `allowed`, preserving the protocol's order.
///
/// `None` or an empty list allows nothing.
pub fn filter_allowed(tools: Vec<ToolSpec>, allowed: Option<&[String]>) -> Vec<ToolSpec> {
    match allowed {
        Some(allowed) if !allowed.is_empty() => tools
            .into_iter()
            .filter(|tool| allowed.iter().any(|name| name == &tool.name))
            .collect(),
        _ => Vec::new(),
    }
}

/// Error types for tool operations
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Requested tool is not provided by the protocol.
    NotFound(String),
    /// The tool ran and reported a failure.
    ExecutionFailed(String),
    /// The server could not be reached or the transport failed.
    Unreachable(String),
    /// The server answered with something that is not valid protocol traffic.
    ProtocolError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::Unreachable(msg) => write!(f, "Tool server unreachable: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// An open session with a tool provider.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Every tool the provider exposes.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, Box<dyn Error + Send + Sync>>;

    /// Run one tool and return its textual output.
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Release the session. Called once, after the last `list_tools`/`invoke`; the
    /// connection is dropped right after.
    async fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Trait for implementing tool execution protocols
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Open a connection for one unit of work.
    async fn connect(&self) -> Result<Box<dyn ToolConnection>, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g., "mcp", "local")
    fn protocol_name(&self) -> &str;
}

/// Connect, list every tool, and close again.
pub async fn list_tools_scoped(
    protocol: &dyn ToolProtocol,
) -> Result<Vec<ToolSpec>, Box<dyn Error + Send + Sync>> {
    let connection = protocol.connect().await?;
    let listed = connection.list_tools().await;
    if let Err(err) = connection.close().await {
        log::warn!(
            "closing {} connection after listing tools failed: {}",
            protocol.protocol_name(),
            err
        );
    }
    listed
}
