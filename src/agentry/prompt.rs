//! System prompt assembly.
//!
//! The system prompt is the agent's static template with two augmentations:
//!
//! 1. `{key}` placeholders replaced from the descriptor's `replace_variables`. A value of
//!    `"..."` marks a variable supplied at runtime by a [`DynamicVariableResolver`].
//! 2. An `## AVAILABLE TOOLS:` section listing `* name: first line of description` for
//!    every tool currently offered.
//!
//! ```rust
//! use agentry::prompt::inject_tools_section;
//! use agentry::tool_protocol::ToolSpec;
//!
//! let prompt = inject_tools_section(
//!     "You are a calculator.",
//!     &[ToolSpec::new("calculator", "Evaluate an arithmetic expression\nDetails...")],
//! );
//! assert_eq!(
//!     prompt,
//!     "You are a calculator.\n\n## AVAILABLE TOOLS:\n* calculator: Evaluate an arithmetic expression\n"
//! );
//! ```

use std::collections::BTreeMap;

use crate::agentry::error::AgentError;
use crate::agentry::tool_protocol::ToolSpec;

/// Heading of the generated tools section.
pub const TOOLS_SECTION_HEADER: &str = "## AVAILABLE TOOLS:";
/// Binding value meaning "resolved at runtime".
pub const DYNAMIC_MARKER: &str = "...";

/// Per-chat values available to dynamic variable resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub bot_user_name: String,
    pub session_id: String,
    pub topic_id: String,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            bot_user_name: "TestBot".to_string(),
            session_id: "session_123".to_string(),
            topic_id: "topic_abc".to_string(),
        }
    }
}

/// What a resolver knows about the prompt being rendered.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext<'a> {
    /// Directory name the agent is served under.
    pub agent_key: &'a str,
    pub session: &'a SessionContext,
}

/// Supplies the values of variables bound to `"..."`.
pub trait DynamicVariableResolver: Send + Sync {
    /// Value for `key`, or `None` if this resolver does not know it.
    fn resolve(&self, key: &str, context: &AgentContext<'_>) -> Option<String>;
}

impl<F> DynamicVariableResolver for F
where
    F: Fn(&str, &AgentContext<'_>) -> Option<String> + Send + Sync,
{
    fn resolve(&self, key: &str, context: &AgentContext<'_>) -> Option<String> {
        self(key, context)
    }
}

/// Resolver for the stock dynamic variables: `bot_user_name`, `session_id`, `topic_id`
/// and `date_now` (today's date, ISO 8601).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionVariables;

impl DynamicVariableResolver for SessionVariables {
    fn resolve(&self, key: &str, context: &AgentContext<'_>) -> Option<String> {
        match key {
            "bot_user_name" => Some(context.session.bot_user_name.clone()),
            "session_id" => Some(context.session.session_id.clone()),
            "topic_id" => Some(context.session.topic_id.clone()),
            "date_now" => Some(chrono::Local::now().date_naive().to_string()),
            _ => None,
        }
    }
}

/// How a template variable gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableBinding {
    Literal(String),
    Dynamic,
}

impl VariableBinding {
    pub fn parse(value: &str) -> Self {
        if value.trim() == DYNAMIC_MARKER {
            VariableBinding::Dynamic
        } else {
            VariableBinding::Literal(value.to_string())
        }
    }
}

/// Replace every `{key}` with its bound value.
///
/// A dynamic binding with no resolver, or one the resolver cannot answer, is a
/// configuration error.
pub fn replace_variables(
    template: &str,
    bindings: &BTreeMap<String, String>,
    resolver: Option<&dyn DynamicVariableResolver>,
    context: &AgentContext<'_>,
) -> Result<String, AgentError> {
    let mut content = template.to_string();
    for (key, raw) in bindings {
        let value = match VariableBinding::parse(raw) {
            VariableBinding::Literal(value) => value,
            VariableBinding::Dynamic => resolver
                .and_then(|resolver| resolver.resolve(key, context))
                .ok_or_else(|| {
                    AgentError::configuration(format!(
                        "replace_variables has '...' for key '{}' but no dynamic value was provided",
                        key
                    ))
                })?,
        };
        content = content.replace(&format!("{{{}}}", key), &value);
    }
    Ok(content)
}

/// Add one `* name: summary` line per tool under [`TOOLS_SECTION_HEADER`].
///
/// An existing section keeps its body and gets the lines appended after it (the body
/// ends at the next `\n## ` heading). Without the heading, the section is appended to
/// the end of the prompt. No tools leaves the prompt untouched.
pub fn inject_tools_section(content: &str, tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return content.to_string();
    }
    let lines: Vec<String> = tools
        .iter()
        .map(|tool| format!("* {}: {}", tool.name, tool.summary()))
        .collect();
    let listing = lines.join("\n");

    match content.find(TOOLS_SECTION_HEADER) {
        Some(header_idx) => {
            let body_start = header_idx + TOOLS_SECTION_HEADER.len();
            let body_end = content[body_start..]
                .find("\n## ")
                .map(|offset| body_start + offset)
                .unwrap_or(content.len());
            let mut section = content[body_start..body_end].to_string();
            if !section.ends_with('\n') {
                section.push('\n');
            }
            section.push_str(&listing);
            section.push('\n');
            format!("{}{}{}", &content[..body_start], section, &content[body_end..])
        }
        None => {
            let mut out = content.to_string();
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("\n{}\n{}\n", TOOLS_SECTION_HEADER, listing));
            out
        }
    }
}

/// Split markdown into `(header, body)` pairs, in document order.
///
/// Any line starting with `#` opens a section; its text without the hashes is the
/// header. Bodies are trimmed. Text before the first header is ignored.
pub fn parse_action_prompts(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in content.lines() {
        let stripped = line.trim_start();
        if stripped.starts_with('#') {
            if let Some((header, body)) = current.take() {
                sections.push((header, body.join("\n").trim().to_string()));
            }
            let header = stripped.trim_start_matches('#').trim().to_string();
            current = Some((header, Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((header, body)) = current {
        sections.push((header, body.join("\n").trim().to_string()));
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_literal_and_dynamic_substitution() {
        let session = SessionContext::default();
        let ctx = AgentContext {
            agent_key: "helper",
            session: &session,
        };
        let out = replace_variables(
            "Hi, I am {bot_user_name} from {team}. {unknown}",
            &bindings(&[("bot_user_name", "..."), ("team", "Support")]),
            Some(&SessionVariables),
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "Hi, I am TestBot from Support. {unknown}");
    }

    #[test]
    fn test_dynamic_without_resolver_is_configuration_error() {
        let session = SessionContext::default();
        let ctx = AgentContext {
            agent_key: "helper",
            session: &session,
        };
        let err = replace_variables("{x}", &bindings(&[("x", " ... ")]), None, &ctx).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(ref m) if m.contains("'x'")));

        let err = replace_variables(
            "{x}",
            &bindings(&[("x", "...")]),
            Some(&SessionVariables),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    fn agent_name(key: &str, ctx: &AgentContext<'_>) -> Option<String> {
        (key == "agent").then(|| ctx.agent_key.to_string())
    }

    #[test]
    fn test_function_resolver() {
        let session = SessionContext::default();
        let ctx = AgentContext {
            agent_key: "helper",
            session: &session,
        };
        let out = replace_variables(
            "{agent}",
            &bindings(&[("agent", "...")]),
            Some(&agent_name),
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "helper");
    }

    #[test]
    fn test_tools_appended_to_existing_section_body() {
        let template = "Intro\n## AVAILABLE TOOLS:\n* manual: keep me\n## RULES\nBe nice";
        let out = inject_tools_section(template, &[ToolSpec::new("calc", "Math\nmore")]);
        assert_eq!(
            out,
            "Intro\n## AVAILABLE TOOLS:\n* manual: keep me\n* calc: Math\n\n## RULES\nBe nice"
        );
    }

    #[test]
    fn test_tools_section_at_end_of_text() {
        let out = inject_tools_section("Intro\n## AVAILABLE TOOLS:", &[ToolSpec::new("a", "A")]);
        assert_eq!(out, "Intro\n## AVAILABLE TOOLS:\n* a: A\n");
    }

    #[test]
    fn test_no_tools_leaves_prompt_unchanged() {
        assert_eq!(inject_tools_section("Intro", &[]), "Intro");
    }

    #[test]
    fn test_parse_action_prompts() {
        let text = "preamble\n# Summarize\nSummarize the doc.\n\n## Translate\n  Translate it\nplease\n# Empty\n";
        let sections = parse_action_prompts(text);
        assert_eq!(
            sections,
            vec![
                ("Summarize".to_string(), "Summarize the doc.".to_string()),
                ("Translate".to_string(), "Translate it\nplease".to_string()),
                ("Empty".to_string(), String::new()),
            ]
        );
        assert!(parse_action_prompts("no headers").is_empty());
    }
}
