//! Time-evicted store of conversation memories.
//!
//! The [`SessionStore`] maps `(agent key, correlation id)` to a shared
//! [`ConversationMemory`]. Entries are created on first use, refreshed on every lookup
//! and swept once they have been idle longer than the retention window.
//!
//! The store guards only entry lifecycle (lookup, insert, delete, sweep). Turns of the
//! same conversation are serialised by the memory handle's own async mutex, which the
//! orchestrator holds for the whole turn.
//!
//! ```rust
//! use agentry::session_store::SessionStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SessionStore::new();
//! let (memory, cid) = store.get_or_create("support", None);
//! memory.lock().await.add_user("hi");
//!
//! let (same, same_cid) = store.get_or_create("support", Some(&cid));
//! assert_eq!(cid, same_cid);
//! assert_eq!(same.lock().await.messages().len(), 1);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::agentry::error::AgentError;
use crate::agentry::memory::{ConversationMemory, DEFAULT_TOKEN_BUDGET};

/// Default idle time after which a conversation is forgotten.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Handle to a conversation memory shared between the store and a running turn.
pub type SharedMemory = Arc<tokio::sync::Mutex<ConversationMemory>>;

struct SessionEntry {
    memory: SharedMemory,
    last_access: Instant,
}

/// Conversation memories keyed by agent and correlation id.
pub struct SessionStore {
    entries: Mutex<HashMap<String, HashMap<String, SessionEntry>>>,
    retention: Duration,
    token_budget: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Empty store with a one hour retention window.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention: DEFAULT_RETENTION,
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    /// Override the idle retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Override the token budget given to newly created memories.
    pub fn with_token_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = token_budget;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, SessionEntry>>> {
        // A panic while holding the lock cannot leave the map half-updated; every
        // critical section is a single insert/remove/retain.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the memory for a known correlation id, or create a fresh one.
    ///
    /// An absent id gets a new UUID; a supplied but unknown id is adopted as-is. The
    /// access timestamp is refreshed either way.
    pub fn get_or_create(
        &self,
        agent_key: &str,
        correlation_id: Option<&str>,
    ) -> (SharedMemory, String) {
        let now = Instant::now();
        let mut entries = self.lock();
        let agent_entries = entries.entry(agent_key.to_string()).or_default();

        if let Some(cid) = correlation_id {
            if let Some(entry) = agent_entries.get_mut(cid) {
                entry.last_access = now;
                return (Arc::clone(&entry.memory), cid.to_string());
            }
        }

        let cid = match correlation_id {
            Some(cid) => cid.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let memory: SharedMemory = Arc::new(tokio::sync::Mutex::new(
            ConversationMemory::with_token_budget(self.token_budget),
        ));
        agent_entries.insert(
            cid.clone(),
            SessionEntry {
                memory: Arc::clone(&memory),
                last_access: now,
            },
        );
        log::debug!("created conversation {} for agent {}", cid, agent_key);
        (memory, cid)
    }

    /// Forget a conversation.
    pub fn delete(&self, agent_key: &str, correlation_id: &str) -> Result<(), AgentError> {
        let mut entries = self.lock();
        let removed = entries
            .get_mut(agent_key)
            .and_then(|agent_entries| agent_entries.remove(correlation_id));
        match removed {
            Some(_) => {
                log::info!("deleted conversation {} for agent {}", correlation_id, agent_key);
                Ok(())
            }
            None => Err(AgentError::SessionNotFound {
                agent_key: agent_key.to_string(),
                correlation_id: correlation_id.to_string(),
            }),
        }
    }

    /// Drop every entry idle for longer than the retention window. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock reading.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let retention = self.retention;
        let mut entries = self.lock();
        let mut removed = 0;
        for (agent_key, agent_entries) in entries.iter_mut() {
            agent_entries.retain(|cid, entry| {
                let keep = now.saturating_duration_since(entry.last_access) <= retention;
                if !keep {
                    log::debug!("evicting idle conversation {} for agent {}", cid, agent_key);
                    removed += 1;
                }
                keep
            });
        }
        entries.retain(|_, agent_entries| !agent_entries.is_empty());
        if removed > 0 {
            log::info!("evicted {} idle conversations", removed);
        }
        removed
    }

    /// Last access time of a conversation, if it exists.
    pub fn last_access(&self, agent_key: &str, correlation_id: &str) -> Option<Instant> {
        self.lock()
            .get(agent_key)
            .and_then(|agent_entries| agent_entries.get(correlation_id))
            .map(|entry| entry.last_access)
    }

    pub fn contains(&self, agent_key: &str, correlation_id: &str) -> bool {
        self.last_access(agent_key, correlation_id).is_some()
    }

    /// Number of live conversations across all agents.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_id_gets_fresh_memory() {
        let store = SessionStore::new();
        let (memory, cid) = store.get_or_create("agent", None);
        assert!(!cid.is_empty());
        assert!(memory.lock().await.is_empty());

        let (memory, adopted) = store.get_or_create("agent", Some("caller-id"));
        assert_eq!(adopted, "caller-id");
        assert!(memory.lock().await.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_known_id_returns_same_instance_and_refreshes() {
        let store = SessionStore::new();
        let (first, cid) = store.get_or_create("agent", None);
        let before = store.last_access("agent", &cid).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (second, same) = store.get_or_create("agent", Some(&cid));
        assert_eq!(same, cid);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.last_access("agent", &cid).unwrap() > before);
    }

    #[test]
    fn test_ids_are_scoped_per_agent() {
        let store = SessionStore::new();
        let (a, _) = store.get_or_create("a", Some("shared"));
        let (b, _) = store.get_or_create("b", Some("shared"));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_delete_unknown_is_not_found() {
        let store = SessionStore::new();
        let err = store.delete("agent", "nope").unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound { .. }));
    }

    #[test]
    fn test_delete_removes_entry() {
        let store = SessionStore::new();
        let (_, cid) = store.get_or_create("agent", None);
        store.delete("agent", &cid).unwrap();
        assert!(!store.contains("agent", &cid));
        assert!(store.delete("agent", &cid).is_err());
    }

    #[test]
    fn test_sweep_keeps_entry_idle_exactly_for_window() {
        let store = SessionStore::new().with_retention(Duration::from_secs(60));
        let (_, cid) = store.get_or_create("agent", None);
        let accessed = store.last_access("agent", &cid).unwrap();

        assert_eq!(store.sweep_expired_at(accessed + Duration::from_secs(60)), 0);
        assert!(store.contains("agent", &cid));

        assert_eq!(store.sweep_expired_at(accessed + Duration::from_secs(61)), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_entries() {
        let store = SessionStore::new().with_retention(Duration::from_millis(50));
        store.get_or_create("agent", Some("old"));
        store.get_or_create("other", Some("old"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.get_or_create("agent", Some("fresh"));

        assert_eq!(store.sweep_expired(), 2);
        assert!(!store.contains("agent", "old"));
        assert!(!store.contains("other", "old"));
        assert!(store.contains("agent", "fresh"));
    }
}
