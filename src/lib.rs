//! # agentry
//!
//! agentry runs configurable chat agents: a system prompt, a model and a restricted set of
//! tools served over MCP. One user query becomes zero or more tool invocations and exactly
//! one final answer, while conversation history is kept per correlation id across requests.
//!
//! The crate provides:
//!
//! * **Orchestration**: [`AgentOrchestrator`] drives the two-phase call protocol (a
//!   tool-enabled call, concurrent tool execution, a text-only follow-up) and recovers once
//!   from "request too large" rejections by shrinking memory.
//! * **Memory**: [`ConversationMemory`] holds the message history under a token budget;
//!   [`SessionStore`] maps `(agent, correlation id)` to memories and evicts idle ones.
//! * **Capabilities**: [`client_wrapper::CompletionClient`] for models and
//!   [`tool_protocol::ToolProtocol`] for tools, with an OpenAI-compatible client, an MCP
//!   client and in-process closure tools shipped in [`clients`] and [`tool_protocols`].
//! * **Configuration**: YAML agent descriptors layered over global defaults, agent folders
//!   loaded by [`library`], prompt templating in [`prompt`].
//! * **Serving**: [`AgentService`] as the request surface, and axum routes in `http`
//!   behind the `http-server` feature.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use agentry::config::Settings;
//! use agentry::library::load_library;
//! use agentry::prompt::SessionVariables;
//! use agentry::AgentService;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agentry::init_logger();
//!
//!     let settings = Settings::from_env();
//!     let agents = load_library("agents", &settings)?;
//!     let service = AgentService::from_library(agents, &settings, Some(Arc::new(SessionVariables)))?;
//!
//!     let (answer, correlation_id) = service.respond("helper", None, "2+2?").await?;
//!     println!("[{}] {}", correlation_id, answer);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding agentry opt in to `RUST_LOG` driven diagnostics with one call.
///
/// ```rust
/// agentry::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agentry` module.
pub mod agentry;

// Re-exporting key items for easier external access.
pub use agentry::client_wrapper;
pub use agentry::client_wrapper::{
    AssistantReply, CompletionClient, CompletionError, CompletionRequest, Message, ToolCall,
    ToolChoice,
};
pub use agentry::clients;
pub use agentry::config;
pub use agentry::config::{AgentDescriptor, Settings};
pub use agentry::error;
pub use agentry::error::{AgentError, TurnFailure};
pub use agentry::event;
pub use agentry::event::{AgentEvent, EventHandler, SessionEvent};
pub use agentry::http_client_pool;
pub use agentry::library;
pub use agentry::memory;
pub use agentry::memory::ConversationMemory;
pub use agentry::orchestrator;
pub use agentry::orchestrator::{AgentOrchestrator, BaseChatResponse, ChatResponse};
pub use agentry::prompt;
pub use agentry::service;
pub use agentry::service::AgentService;
pub use agentry::session_store;
pub use agentry::session_store::SessionStore;
pub use agentry::tool_protocol;
pub use agentry::tool_protocols;

#[cfg(feature = "http-server")]
pub use agentry::http;
