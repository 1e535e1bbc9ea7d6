//! Agent and session event system.
//!
//! Implement [`EventHandler`] to be notified about what a turn is doing:
//!
//! - **Model calls**: when each phase starts and what it produced
//! - **Tool operations**: calls requested by the model and their outcomes
//! - **Memory pressure**: forced shrinks and too-large retries
//! - **Sessions**: conversations evicted or deleted by the service
//!
//! Both handler methods default to no-ops, so only the interesting ones need overriding.
//!
//! # Event Flow (during a typical turn)
//!
//! ```text
//! TurnStarted
//!   └─ ModelCallStarted { phase: Initial }
//!   └─ ModelCallCompleted { phase: Initial, tool_calls: 1 }
//!   └─ (if the model requested tools)
//!       ├─ ToolCallDetected (one per call, in request order)
//!       ├─ ToolExecutionCompleted (one per call, in request order)
//!       ├─ ModelCallStarted { phase: Final }
//!       └─ ModelCallCompleted { phase: Final, tool_calls: 0 }
//! TurnCompleted
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agentry::event::{AgentEvent, EventHandler};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::RequestTooLargeRetry { agent_key, phase, .. } = event {
//!             println!("{} shrank its memory during the {} call", agent_key, phase);
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::fmt;

/// Which of the two model calls of a turn an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// First call, tool choice `auto`.
    Initial,
    /// Follow-up after the tool phase, tool choice `none`.
    Final,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPhase::Initial => write!(f, "initial"),
            CallPhase::Final => write!(f, "final"),
        }
    }
}

/// Events emitted by an [`AgentOrchestrator`](crate::orchestrator::AgentOrchestrator)
/// while it runs a turn.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStarted {
        agent_key: String,
        /// First ~120 characters of the user query.
        query_preview: String,
    },
    TurnCompleted {
        agent_key: String,
        /// Tool calls executed during the turn.
        tool_calls_made: usize,
        response_length: usize,
    },
    /// The turn was abandoned; memory keeps whatever was appended so far.
    TurnFailed { agent_key: String, error: String },
    ModelCallStarted { agent_key: String, phase: CallPhase },
    ModelCallCompleted {
        agent_key: String,
        phase: CallPhase,
        /// Tool calls requested by this reply.
        tool_calls: usize,
        /// Character length of the textual content, 0 when absent.
        response_length: usize,
    },
    /// The model rejected a call as too large; memory was force-shrunk before the retry.
    RequestTooLargeRetry {
        agent_key: String,
        phase: CallPhase,
        /// Tool messages removed by the forced shrink.
        removed_messages: usize,
    },
    ToolCallDetected {
        agent_key: String,
        tool_call_id: String,
        tool_name: String,
        /// Arguments after parsing (malformed payloads show up as `{}`).
        arguments: serde_json::Value,
    },
    ToolExecutionCompleted {
        agent_key: String,
        tool_call_id: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
    },
}

/// Conversation lifecycle events emitted by the [`AgentService`](crate::service::AgentService).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created {
        agent_key: String,
        correlation_id: String,
    },
    Deleted {
        agent_key: String,
        correlation_id: String,
    },
    /// Idle conversations dropped by a sweep.
    Evicted { count: usize },
}

/// Trait for receiving agent and session events.
///
/// The `Send + Sync` bound lets one handler be shared as `Arc<dyn EventHandler>` by every
/// agent of a service.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when an agent emits an event.
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    /// Called when the service creates, deletes or evicts a conversation.
    async fn on_session_event(&self, _event: &SessionEvent) {}
}

/// Shorten `text` to at most `max_chars` characters for logs and event previews.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("short", 120), "short");
    }
}
