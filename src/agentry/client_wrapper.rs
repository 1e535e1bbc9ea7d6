//! Chat message types and the [`CompletionClient`] capability.
//!
//! A `CompletionClient` is a wrapper around a specific chat-completion service. It does
//! not keep track of the conversation; that is the job of
//! [`ConversationMemory`](crate::memory::ConversationMemory), which produces the full
//! message list handed to [`CompletionClient::complete`] on every call.
//!
//! Messages serialise to the OpenAI chat wire format so they can be forwarded verbatim:
//!
//! ```rust
//! use agentry::client_wrapper::Message;
//!
//! let msg = Message::user("2+2?");
//! let json = serde_json::to_value(&msg).unwrap();
//! assert_eq!(json["role"], "user");
//! assert_eq!(json["content"], "2+2?");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::agentry::tool_protocol::ToolSpec;

/// Function name and raw argument payload of a requested tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments exactly as the model produced them. Usually a JSON object encoded as a
    /// string, but nothing guarantees it parses.
    #[serde(default)]
    pub arguments: String,
}

/// A tool invocation requested by the model inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Build a function tool call.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: default_tool_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the argument payload into a JSON object.
    ///
    /// Empty, malformed or non-object payloads degrade to an empty object so a sloppy
    /// model output never fails the turn.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return serde_json::json!({});
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(other) => {
                log::warn!(
                    "tool call {} ({}) sent non-object arguments {}, using empty arguments",
                    self.id,
                    self.function.name,
                    other
                );
                serde_json::json!({})
            }
            Err(err) => {
                log::warn!(
                    "tool call {} ({}) sent malformed arguments: {}",
                    self.id,
                    self.function.name,
                    err
                );
                serde_json::json!({})
            }
        }
    }
}

/// One entry of a conversation, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// Steers the model; always the first message sent.
    System { content: String },
    /// Text typed by the human (or app) user.
    User { content: String },
    /// Model output: optional text plus any tool calls it requested.
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call, pointing back at the call that produced it.
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Assistant message carrying text only.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Assistant message requesting tool calls.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Wire name of the role.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Text content, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Tool { content, .. } => Some(content.as_str()),
            Message::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls requested by an assistant message; empty for every other role.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }
}

/// Whether the model may request tools on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides between answering and calling tools.
    Auto,
    /// The model must answer with text.
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        }
    }
}

/// Structured-output contract passed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    /// Schema name reported to the provider.
    pub name: String,
    /// JSON schema the final content must satisfy.
    pub schema: serde_json::Value,
}

/// Everything a single model call needs.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub response_format: Option<ResponseFormat>,
}

/// What the model sent back: text, requested tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    /// Plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Reply that only requests tools.
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    /// Convert into the assistant message stored in memory.
    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

/// Failure of a completion call.
#[derive(Debug, Clone)]
pub enum CompletionError {
    /// The provider rejected the request as too large (context window, payload size).
    RequestTooLarge(String),
    /// Any other failure: transport, authentication, timeout, malformed reply.
    Failed(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::RequestTooLarge(msg) => write!(f, "Request too large: {}", msg),
            CompletionError::Failed(msg) => write!(f, "Completion failed: {}", msg),
        }
    }
}

impl Error for CompletionError {}

/// Trait defining the interface to a chat-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the full message list plus tool schema and wait for the assistant reply.
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantReply, CompletionError>;

    /// Identifier of the model behind this client, for logs.
    fn model_name(&self) -> &str;
}
