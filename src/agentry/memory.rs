//! Per-conversation message history with a token budget.
//!
//! [`ConversationMemory`] owns everything the model sees about one conversation: the
//! raw message history, any summaries of earlier turns, and a budget that bounds how
//! large the history may grow. Token counts are a whitespace-split approximation, not
//! a model tokenizer; the budget is a pressure signal, not an exact context limit.
//!
//! When the history is over budget, [`ConversationMemory::shrink`] removes tool results
//! first (oldest first). They are the bulkiest and least important part of a
//! conversation, so user and assistant turns stay intact for coherence.
//!
//! ```rust
//! use agentry::memory::ConversationMemory;
//!
//! let mut memory = ConversationMemory::new();
//! memory.add_user("hello there");
//! let input = memory.build_model_input("You are terse.");
//! assert_eq!(input.len(), 2);
//! assert_eq!(input[0].role(), "system");
//! ```

use chrono::{DateTime, Utc};

use crate::agentry::client_wrapper::Message;

/// Default token budget per conversation.
pub const DEFAULT_TOKEN_BUDGET: usize = 1_000;

/// Ordered conversation history plus summaries and a token budget.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    token_budget: usize,
    messages: Vec<Message>,
    summaries: Vec<String>,
    created_at: DateTime<Utc>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationMemory {
    /// Empty memory with the default budget.
    pub fn new() -> Self {
        Self::with_token_budget(DEFAULT_TOKEN_BUDGET)
    }

    /// Empty memory with a custom budget.
    pub fn with_token_budget(token_budget: usize) -> Self {
        Self {
            token_budget,
            messages: Vec::new(),
            summaries: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a user message, shrinking first if the history is already over budget.
    pub fn add_user(&mut self, text: impl Into<String>) {
        self.shrink(false);
        self.messages.push(Message::user(text));
    }

    /// Append an assistant message as-is.
    ///
    /// No shrink here: the tool results that follow must find their tool calls.
    pub fn add_assistant(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append the result of a tool call.
    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, result: impl Into<String>) {
        self.messages.push(Message::tool(tool_call_id, result));
    }

    /// Messages to send to the model: system prompt, one assistant message per summary,
    /// then the full history, all in insertion order.
    pub fn build_model_input(&self, system_prompt: &str) -> Vec<Message> {
        let mut input = Vec::with_capacity(1 + self.summaries.len() + self.messages.len());
        input.push(Message::system(system_prompt));
        for summary in &self.summaries {
            input.push(Message::assistant(format!("(summary) {}", summary)));
        }
        input.extend(self.messages.iter().cloned());
        input
    }

    /// Save a summary of older turns and drop every message before `drop_until`.
    pub fn incorporate_summary(&mut self, summary: impl Into<String>, drop_until: usize) {
        self.summaries.push(summary.into());
        let drop_until = drop_until.min(self.messages.len());
        self.messages.drain(..drop_until);
    }

    /// Forget the history and the summaries. The budget is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summaries.clear();
    }

    /// Prune tool results until the history fits the budget.
    ///
    /// Runs only when the history is over budget or `force` is set. Removes the earliest
    /// tool-role message before the last message, repeatedly, until the count fits
    /// (non-forced) or no such message is left. A forced pass removes every tool result
    /// except a trailing one and may still leave the history over budget.
    ///
    /// Returns the number of removed messages.
    pub fn shrink(&mut self, force: bool) -> usize {
        let before = self.token_count();
        if before <= self.token_budget && !force {
            return 0;
        }
        log::info!(
            "shrinking conversation memory (force: {}): {} tokens, budget {}",
            force,
            before,
            self.token_budget
        );

        let mut removed = 0;
        while force || self.token_count() > self.token_budget {
            let last = self.messages.len().saturating_sub(1);
            match self.messages[..last].iter().position(Message::is_tool) {
                Some(idx) => {
                    self.messages.remove(idx);
                    removed += 1;
                }
                None => break,
            }
        }

        log::info!(
            "conversation memory shrunk: removed {} tool messages, {} -> {} tokens",
            removed,
            before,
            self.token_count()
        );
        removed
    }

    /// Approximate token count: whitespace-separated words over every non-empty content.
    pub fn token_count(&self) -> usize {
        self.messages
            .iter()
            .filter_map(Message::content)
            .map(|content| content.split_whitespace().count())
            .sum()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn summaries(&self) -> &[String] {
        &self.summaries
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.summaries.is_empty()
    }
}
