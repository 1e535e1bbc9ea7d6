// src/agentry/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod http_client_pool;
pub mod library;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod session_store;
pub mod tool_protocol;
pub mod tool_protocols;

#[cfg(feature = "http-server")]
pub mod http;

pub use memory::ConversationMemory;
pub use orchestrator::AgentOrchestrator;
pub use session_store::SessionStore;
