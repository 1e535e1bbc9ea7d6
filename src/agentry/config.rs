//! Agent descriptors and process-wide settings.
//!
//! An agent is described by an `agent_config.yaml` file. Global defaults live in
//! [`Settings::agent_defaults`]; the agent file overrides them field by field, so an agent
//! only spells out what differs from the defaults.
//!
//! ```rust
//! use agentry::config::{AgentDescriptor, Settings};
//!
//! let settings = Settings::default();
//! let descriptor = AgentDescriptor::from_yaml_str(
//!     "name: Helper\ndescription: Answers questions\nmodel: openai/gpt-4o-mini\nmy_mcp_tools: [calculator]\n",
//!     &settings,
//! )
//! .unwrap();
//! assert_eq!(descriptor.max_tokens, 1000);
//! assert_eq!(descriptor.allowed_tools(), Some(&["calculator".to_string()][..]));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::agentry::error::AgentError;
use crate::agentry::memory::DEFAULT_TOKEN_BUDGET;
use crate::agentry::session_store::DEFAULT_RETENTION;

/// MCP endpoint used when `MCP_SERVER_URL` is not set.
pub const DEFAULT_MCP_SERVER_URL: &str = "http://localhost:8001/mcp";
/// Environment variable overriding the MCP endpoint.
pub const MCP_SERVER_URL_ENV: &str = "MCP_SERVER_URL";
/// How long a filtered tool list is reused before the tool server is asked again.
pub const DEFAULT_TOOL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Amount of web context a search-capable model may pull in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchContextSize {
    Low,
    Medium,
    High,
}

impl SearchContextSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchContextSize::Low => "low",
            SearchContextSize::Medium => "medium",
            SearchContextSize::High => "high",
        }
    }
}

/// Accept any YAML scalar as a variable value (`year: 2024` is as valid as `year: "2024"`).
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    let mut map = BTreeMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let value = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => {
                return Err(D::Error::custom(format!(
                    "replace_variables.{} must be a scalar",
                    key
                )))
            }
        };
        map.insert(key, value);
    }
    Ok(map)
}

/// Immutable per-agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDescriptor {
    /// Human-friendly agent name. Required.
    pub name: String,
    /// Short purpose of the agent. Required.
    pub description: String,
    /// Provider-prefixed model id, e.g. `openai/gpt-4o`. Required.
    pub model: String,
    /// Custom API base URL; empty means the provider default.
    pub endpoint: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Option<String>,
    /// Accepted so existing agent files still load. Responses are never streamed.
    pub stream: bool,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Tool names the agent may use. `None` or empty offers no tools.
    pub my_mcp_tools: Option<Vec<String>>,
    pub search_context_size: Option<SearchContextSize>,
    /// Prompt placeholders: literal values, or `"..."` for a dynamically resolved value.
    #[serde(deserialize_with = "scalar_map")]
    pub replace_variables: BTreeMap<String, String>,
}

impl Default for AgentDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            model: String::new(),
            endpoint: String::new(),
            max_tokens: 1000,
            temperature: 0.3,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
            stream: false,
            timeout: 60,
            my_mcp_tools: None,
            search_context_size: None,
            replace_variables: BTreeMap::new(),
        }
    }
}

impl AgentDescriptor {
    /// Load `path`, layering it over `settings.agent_defaults`.
    pub fn load(path: impl AsRef<Path>, settings: &Settings) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text, settings).map_err(|e| match e {
            AgentError::Configuration(msg) => {
                AgentError::configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse agent YAML and layer it over `settings.agent_defaults`.
    pub fn from_yaml_str(text: &str, settings: &Settings) -> Result<Self, AgentError> {
        let overrides: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| AgentError::configuration(format!("invalid agent YAML: {}", e)))?;
        let overrides = match overrides {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            _ => {
                return Err(AgentError::configuration(
                    "agent YAML must be a mapping of fields",
                ))
            }
        };

        let mut merged = settings.agent_defaults.clone();
        for (key, value) in overrides {
            merged.insert(key, value);
        }

        let descriptor: AgentDescriptor =
            serde_yaml::from_value(serde_yaml::Value::Mapping(merged))
                .map_err(|e| AgentError::configuration(format!("malformed descriptor: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), AgentError> {
        for (field, value) in [
            ("name", &self.name),
            ("description", &self.description),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::configuration(format!(
                    "required field '{}' is missing",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Provider prefix of the model id (`openai` in `openai/gpt-4o`).
    pub fn provider(&self) -> &str {
        match self.model.split_once('/') {
            Some((provider, _)) => provider,
            None => "openai",
        }
    }

    /// Model id without its provider prefix, as the provider API expects it.
    pub fn model_id(&self) -> &str {
        match self.model.split_once('/') {
            Some((_, model)) => model,
            None => &self.model,
        }
    }

    /// Environment variable holding the API key for this model's provider.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        if self.model.starts_with("openai") {
            Some("OPEN_API_KEY")
        } else if self.model.starts_with("azure") {
            Some("AZURE_API_KEY")
        } else if self.model.starts_with("anthropic") {
            Some("ANTHROPIC_API_KEY")
        } else if self.model.starts_with("google") {
            Some("GOOGLE_API_KEY")
        } else {
            None
        }
    }

    /// API key read from the environment; never stored in YAML.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    /// Search models get web context instead of tools.
    pub fn is_search_model(&self) -> bool {
        self.model.to_lowercase().contains("search")
    }

    pub fn allowed_tools(&self) -> Option<&[String]> {
        self.my_mcp_tools.as_deref()
    }

    /// True when the agent is allowed at least one tool.
    pub fn uses_tools(&self) -> bool {
        self.allowed_tools().map(|t| !t.is_empty()).unwrap_or(false)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Process-wide settings shared by every agent.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Streamable-HTTP endpoint of the MCP server.
    pub mcp_server_url: String,
    /// Descriptor fields every agent inherits unless its own YAML overrides them.
    pub agent_defaults: serde_yaml::Mapping,
    pub tool_cache_ttl: Duration,
    pub session_retention: Duration,
    pub token_budget: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mcp_server_url: DEFAULT_MCP_SERVER_URL.to_string(),
            agent_defaults: serde_yaml::Mapping::new(),
            tool_cache_ttl: DEFAULT_TOOL_CACHE_TTL,
            session_retention: DEFAULT_RETENTION,
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

impl Settings {
    /// Defaults, with the MCP endpoint taken from `MCP_SERVER_URL` when set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = std::env::var(MCP_SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                settings.mcp_server_url = url;
            }
        }
        settings
    }

    pub fn with_mcp_server_url(mut self, url: impl Into<String>) -> Self {
        self.mcp_server_url = url.into();
        self
    }

    /// Replace the global agent defaults with a YAML mapping.
    pub fn with_agent_defaults_yaml(mut self, text: &str) -> Result<Self, AgentError> {
        self.agent_defaults = match serde_yaml::from_str(text) {
            Ok(serde_yaml::Value::Mapping(mapping)) => mapping,
            Ok(serde_yaml::Value::Null) => serde_yaml::Mapping::new(),
            Ok(_) => {
                return Err(AgentError::configuration(
                    "agent defaults must be a mapping of fields",
                ))
            }
            Err(e) => {
                return Err(AgentError::configuration(format!(
                    "invalid agent defaults YAML: {}",
                    e
                )))
            }
        };
        Ok(self)
    }

    pub fn with_tool_cache_ttl(mut self, ttl: Duration) -> Self {
        self.tool_cache_ttl = ttl;
        self
    }

    pub fn with_session_retention(mut self, retention: Duration) -> Self {
        self.session_retention = retention;
        self
    }

    pub fn with_token_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = token_budget;
        self
    }
}
