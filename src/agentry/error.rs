//! Error types surfaced by agents, the session store and the service layer.

use std::error::Error;
use std::fmt;

/// Why a turn was abandoned.
///
/// Conversation memory is left as it was when the failure happened, so a caller can
/// inspect it or retry the whole request.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFailure {
    /// The model rejected the request as too large even after a forced shrink.
    RequestTooLarge(String),
    /// The model call failed for any other reason (transport, auth, timeout).
    Completion(String),
    /// The tool server could not list its tools.
    ToolListing(String),
    /// A tool call failed: unreachable server, protocol error, or a tool-side error.
    ToolInvocation { tool: String, message: String },
    /// The final answer did not match the expected response shape.
    ResponseParse(String),
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnFailure::RequestTooLarge(msg) => {
                write!(f, "request too large after forced shrink: {}", msg)
            }
            TurnFailure::Completion(msg) => write!(f, "model call failed: {}", msg),
            TurnFailure::ToolListing(msg) => write!(f, "listing tools failed: {}", msg),
            TurnFailure::ToolInvocation { tool, message } => {
                write!(f, "tool '{}' failed: {}", tool, message)
            }
            TurnFailure::ResponseParse(msg) => write!(f, "unexpected response shape: {}", msg),
        }
    }
}

/// Errors returned by the public agent API.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// Missing template variable, malformed descriptor, missing agent files. Fatal and
    /// never retried.
    Configuration(String),
    /// The current request could not be completed.
    TurnFailed(TurnFailure),
    /// No conversation is stored under this key.
    SessionNotFound {
        agent_key: String,
        correlation_id: String,
    },
    /// No agent is registered under this key.
    UnknownAgent(String),
}

impl AgentError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        AgentError::Configuration(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AgentError::SessionNotFound { .. } | AgentError::UnknownAgent(_)
        )
    }

    pub fn is_turn_failure(&self) -> bool {
        matches!(self, AgentError::TurnFailed(_))
    }
}

impl From<TurnFailure> for AgentError {
    fn from(failure: TurnFailure) -> Self {
        AgentError::TurnFailed(failure)
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AgentError::TurnFailed(failure) => write!(f, "Turn failed: {}", failure),
            AgentError::SessionNotFound {
                agent_key,
                correlation_id,
            } => write!(
                f,
                "Session not found: agent '{}', correlation id '{}'",
                agent_key, correlation_id
            ),
            AgentError::UnknownAgent(key) => write!(f, "Unknown agent: {}", key),
        }
    }
}

impl Error for AgentError {}
