//! Request-handling surface over many agents.
//!
//! [`AgentService`] owns the [`SessionStore`] and one [`AgentOrchestrator`] per agent
//! key. Every request sweeps idle conversations first, then runs the turn against the
//! conversation named by the correlation id (creating it when needed).
//!
//! ```rust,no_run
//! use agentry::config::Settings;
//! use agentry::library::load_library;
//! use agentry::prompt::SessionVariables;
//! use agentry::service::AgentService;
//! use std::sync::Arc;
//!
//! # async {
//! let settings = Settings::from_env();
//! let agents = load_library("agents", &settings).unwrap();
//! let service = AgentService::from_library(agents, &settings, Some(Arc::new(SessionVariables))).unwrap();
//!
//! let (answer, cid) = service.respond("helper", None, "2+2?").await.unwrap();
//! let (follow_up, _) = service.respond("helper", Some(&cid), "and times 3?").await.unwrap();
//! service.delete_session("helper", &cid).await.unwrap();
//! # };
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agentry::clients::openai::OpenAICompatibleClient;
use crate::agentry::config::Settings;
use crate::agentry::error::AgentError;
use crate::agentry::event::{EventHandler, SessionEvent};
use crate::agentry::library::AgentDefinition;
use crate::agentry::orchestrator::AgentOrchestrator;
use crate::agentry::prompt::{DynamicVariableResolver, SessionContext};
use crate::agentry::session_store::SessionStore;
use crate::agentry::tool_protocol::ToolProtocol;
use crate::agentry::tool_protocols::McpClientProtocol;

/// A suggested first message shown by front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionPrompt {
    pub title: String,
    pub prompt: String,
}

/// Public description of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub display_name: String,
    /// Routing key.
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initial_actions: Vec<ActionPrompt>,
}

/// Agents plus the conversations they hold.
pub struct AgentService {
    agents: BTreeMap<String, Arc<AgentOrchestrator>>,
    action_prompts: BTreeMap<String, Vec<ActionPrompt>>,
    store: SessionStore,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl AgentService {
    pub fn new(store: SessionStore) -> Self {
        Self {
            agents: BTreeMap::new(),
            action_prompts: BTreeMap::new(),
            store,
            event_handler: None,
        }
    }

    /// Build a service for loaded agent folders.
    ///
    /// Every agent talks to its model through an [`OpenAICompatibleClient`] and shares one
    /// MCP client pointed at `settings.mcp_server_url`.
    pub fn from_library(
        definitions: Vec<AgentDefinition>,
        settings: &Settings,
        resolver: Option<Arc<dyn DynamicVariableResolver>>,
    ) -> Result<Self, AgentError> {
        let tools: Arc<dyn ToolProtocol> =
            Arc::new(McpClientProtocol::new(settings.mcp_server_url.clone()));
        let store = SessionStore::new()
            .with_retention(settings.session_retention)
            .with_token_budget(settings.token_budget);
        let mut service = Self::new(store);
        let session = SessionContext::default();

        for definition in definitions {
            let client = Arc::new(OpenAICompatibleClient::from_descriptor(&definition.descriptor)?);
            let prompts = definition
                .action_prompts(resolver.as_deref(), &session)?
                .into_iter()
                .map(|(title, prompt)| ActionPrompt { title, prompt })
                .collect();

            let mut orchestrator = AgentOrchestrator::new(
                definition.key.clone(),
                definition.descriptor,
                definition.system_prompt,
                client,
                Arc::clone(&tools),
            )
            .with_session_context(session.clone())
            .with_tool_cache_ttl(settings.tool_cache_ttl);
            if let Some(resolver) = &resolver {
                orchestrator = orchestrator.with_resolver(Arc::clone(resolver));
            }
            service.action_prompts.insert(definition.key, prompts);
            service.register(orchestrator);
        }
        Ok(service)
    }

    /// Receive session events; agent events are configured per orchestrator.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Add an agent under its own key, replacing any agent with the same key.
    pub fn register(&mut self, orchestrator: AgentOrchestrator) {
        let key = orchestrator.agent_key().to_string();
        if self.agents.insert(key.clone(), Arc::new(orchestrator)).is_some() {
            log::warn!("agent {} registered twice; keeping the last one", key);
        }
    }

    pub fn agent(&self, agent_key: &str) -> Option<&Arc<AgentOrchestrator>> {
        self.agents.get(agent_key)
    }

    pub fn agent_keys(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Every agent with its display name, description and action prompts.
    pub fn agent_infos(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|(key, agent)| AgentInfo {
                display_name: agent.descriptor().name.clone(),
                name: key.clone(),
                description: agent.descriptor().description.clone(),
                initial_actions: self.action_prompts.get(key).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&event).await;
        }
    }

    /// Answer `query` as `agent_key`, returning `(answer, correlation id)`.
    ///
    /// Without a correlation id a new conversation is started; an unknown id starts a new
    /// conversation under that id.
    pub async fn respond(
        &self,
        agent_key: &str,
        correlation_id: Option<&str>,
        query: &str,
    ) -> Result<(String, String), AgentError> {
        let agent = self
            .agents
            .get(agent_key)
            .ok_or_else(|| AgentError::UnknownAgent(agent_key.to_string()))?;

        let evicted = self.store.sweep_expired();
        if evicted > 0 {
            self.emit(SessionEvent::Evicted { count: evicted }).await;
        }

        let known = correlation_id
            .map(|cid| self.store.contains(agent_key, cid))
            .unwrap_or(false);
        let (memory, cid) = self.store.get_or_create(agent_key, correlation_id);
        if !known {
            self.emit(SessionEvent::Created {
                agent_key: agent_key.to_string(),
                correlation_id: cid.clone(),
            })
            .await;
        }

        let answer = agent.respond(&memory, query).await?;
        Ok((answer, cid))
    }

    /// Forget a conversation. Unknown ids are [`AgentError::SessionNotFound`].
    pub async fn delete_session(
        &self,
        agent_key: &str,
        correlation_id: &str,
    ) -> Result<(), AgentError> {
        self.store.delete(agent_key, correlation_id)?;
        self.emit(SessionEvent::Deleted {
            agent_key: agent_key.to_string(),
            correlation_id: correlation_id.to_string(),
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentry::config::AgentDescriptor;
    use crate::agentry::library::load_library;

    #[tokio::test]
    async fn test_unknown_agent_does_not_touch_store() {
        let service = AgentService::new(SessionStore::new());
        let err = service.respond("ghost", None, "hi").await.unwrap_err();
        assert_eq!(err, AgentError::UnknownAgent("ghost".into()));
        assert!(service.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_not_found() {
        let service = AgentService::new(SessionStore::new());
        let err = service.delete_session("helper", "never-created").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_library_lists_agents_with_actions() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("helper");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("agent_config.yaml"),
            "name: Helper\ndescription: Helps\nmodel: openai/gpt-4o\n",
        )
        .unwrap();
        std::fs::write(dir.join("system_prompt.md"), "Be helpful.").unwrap();
        std::fs::write(dir.join("initial_action_prompts.md"), "# Start\nHello!\n").unwrap();

        let settings = Settings::default();
        let definitions = load_library(root.path(), &settings).unwrap();
        let service = AgentService::from_library(definitions, &settings, None).unwrap();
        let infos = service.agent_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "helper");
        assert_eq!(infos[0].display_name, "Helper");
        assert_eq!(
            infos[0].initial_actions,
            vec![ActionPrompt {
                title: "Start".into(),
                prompt: "Hello!".into()
            }]
        );
    }

    #[test]
    fn test_from_library_rejects_agent_without_endpoint() {
        let definition = AgentDefinition {
            key: "azure".into(),
            path: "agents/azure".into(),
            descriptor: AgentDescriptor {
                name: "A".into(),
                description: "B".into(),
                model: "azure/deployment".into(),
                ..Default::default()
            },
            system_prompt: String::new(),
            action_prompts_template: None,
        };
        assert!(matches!(
            AgentService::from_library(vec![definition], &Settings::default(), None),
            Err(AgentError::Configuration(_))
        ));
    }
}
