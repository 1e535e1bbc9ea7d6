//! Agent folders on disk.
//!
//! Every sub-directory of the library root is one agent, served under its directory
//! name:
//!
//! ```text
//! agents/
//! └── helper/
//!     ├── agent_config.yaml          (required)
//!     ├── system_prompt.md           (required)
//!     └── initial_action_prompts.md  (optional)
//! ```

use std::path::{Path, PathBuf};

use crate::agentry::config::{AgentDescriptor, Settings};
use crate::agentry::error::AgentError;
use crate::agentry::prompt::{
    parse_action_prompts, replace_variables, AgentContext, DynamicVariableResolver,
    SessionContext,
};

pub const AGENT_CONFIG_FILE: &str = "agent_config.yaml";
pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.md";
pub const ACTION_PROMPTS_FILE: &str = "initial_action_prompts.md";

/// One agent folder, fully loaded.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    /// Directory name; the agent's routing key.
    pub key: String,
    pub path: PathBuf,
    pub descriptor: AgentDescriptor,
    /// Raw `system_prompt.md`, placeholders not yet substituted.
    pub system_prompt: String,
    /// Raw `initial_action_prompts.md`, if the agent has one.
    pub action_prompts_template: Option<String>,
}

impl AgentDefinition {
    /// Load the agent stored in `dir`.
    pub fn load(dir: impl AsRef<Path>, settings: &Settings) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        let key = dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                AgentError::configuration(format!("invalid agent directory: {}", dir.display()))
            })?
            .to_string();

        let config_path = dir.join(AGENT_CONFIG_FILE);
        let prompt_path = dir.join(SYSTEM_PROMPT_FILE);
        if !config_path.is_file() || !prompt_path.is_file() {
            return Err(AgentError::configuration(format!(
                "missing {} or {} in {}",
                AGENT_CONFIG_FILE,
                SYSTEM_PROMPT_FILE,
                dir.display()
            )));
        }

        let descriptor = AgentDescriptor::load(&config_path, settings)?;
        let system_prompt = read(&prompt_path)?;
        let actions_path = dir.join(ACTION_PROMPTS_FILE);
        let action_prompts_template = if actions_path.is_file() {
            Some(read(&actions_path)?)
        } else {
            log::info!("{} not found at {}", ACTION_PROMPTS_FILE, actions_path.display());
            None
        };

        Ok(Self {
            key,
            path: dir.to_path_buf(),
            descriptor,
            system_prompt,
            action_prompts_template,
        })
    }

    /// Initial action prompts as `(header, body)` pairs, placeholders substituted.
    ///
    /// Empty when the agent has no `initial_action_prompts.md`.
    pub fn action_prompts(
        &self,
        resolver: Option<&dyn DynamicVariableResolver>,
        session: &SessionContext,
    ) -> Result<Vec<(String, String)>, AgentError> {
        let template = match &self.action_prompts_template {
            Some(template) => template,
            None => return Ok(Vec::new()),
        };
        let context = AgentContext {
            agent_key: &self.key,
            session,
        };
        let content = replace_variables(
            template,
            &self.descriptor.replace_variables,
            resolver,
            &context,
        )?;
        Ok(parse_action_prompts(&content))
    }
}

fn read(path: &Path) -> Result<String, AgentError> {
    std::fs::read_to_string(path)
        .map_err(|e| AgentError::configuration(format!("cannot read {}: {}", path.display(), e)))
}

/// Agent directories under `root`, sorted by name.
pub fn agent_paths(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, AgentError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(AgentError::configuration(format!(
            "agents root not found: {}",
            root.display()
        )));
    }
    let entries = std::fs::read_dir(root).map_err(|e| {
        AgentError::configuration(format!("cannot list {}: {}", root.display(), e))
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Load every agent under `root`. Any malformed folder fails the whole load.
pub fn load_library(
    root: impl AsRef<Path>,
    settings: &Settings,
) -> Result<Vec<AgentDefinition>, AgentError> {
    let definitions = agent_paths(root)?
        .iter()
        .map(|path| AgentDefinition::load(path, settings))
        .collect::<Result<Vec<_>, _>>()?;
    for definition in &definitions {
        log::info!("loaded agent {} from {}", definition.key, definition.path.display());
    }
    Ok(definitions)
}
