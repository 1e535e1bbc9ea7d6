//! [`CompletionClient`] for OpenAI-compatible chat-completion endpoints.
//!
//! OpenAI itself, Azure deployments, and the OpenAI-compatible gateways of Anthropic and
//! Google all accept the same `POST {base}/chat/completions` body, so one client covers
//! every provider prefix an [`AgentDescriptor`] can name.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentry::clients::openai::OpenAICompatibleClient;
//! use agentry::config::{AgentDescriptor, Settings};
//!
//! let settings = Settings::from_env();
//! let descriptor = AgentDescriptor::load("agents/helper/agent_config.yaml", &settings).unwrap();
//! let client = OpenAICompatibleClient::from_descriptor(&descriptor).unwrap();
//! ```
//!
//! # Note
//!
//! The API key is read from the environment variable matching the model prefix
//! (`OPEN_API_KEY`, `AZURE_API_KEY`, `ANTHROPIC_API_KEY`, `GOOGLE_API_KEY`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::agentry::client_wrapper::{
    AssistantReply, CompletionClient, CompletionError, CompletionRequest, ToolCall,
};
use crate::agentry::config::AgentDescriptor;
use crate::agentry::error::AgentError;
use crate::agentry::http_client_pool::get_or_create_client;

/// Default API base for a provider prefix; `None` when the endpoint must be configured.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "google" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAICompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    descriptor: AgentDescriptor,
}

impl OpenAICompatibleClient {
    /// Build a client for the descriptor's model, endpoint and sampling settings.
    ///
    /// Fails with a configuration error when no endpoint is set and the provider has no
    /// well-known default (Azure deployments, unknown prefixes).
    pub fn from_descriptor(descriptor: &AgentDescriptor) -> Result<Self, AgentError> {
        let base_url = if descriptor.endpoint.trim().is_empty() {
            default_base_url(descriptor.provider()).ok_or_else(|| {
                AgentError::configuration(format!(
                    "model '{}' needs an explicit endpoint",
                    descriptor.model
                ))
            })?
        } else {
            descriptor.endpoint.trim()
        };
        let base_url = base_url.trim_end_matches('/').to_string();

        let api_key = descriptor.api_key();
        if api_key.is_none() {
            log::warn!(
                "no API key found for model {} (expected {})",
                descriptor.model,
                descriptor.api_key_env_var().unwrap_or("a provider prefix")
            );
        }

        Ok(Self {
            client: get_or_create_client(&base_url),
            base_url,
            api_key,
            descriptor: descriptor.clone(),
        })
    }

    /// Override the API key resolved from the environment.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// JSON body for one request.
    pub fn build_body(&self, request: &CompletionRequest) -> JsonValue {
        let d = &self.descriptor;
        let mut body = json!({
            "model": d.model_id(),
            "messages": request.messages,
            "max_tokens": d.max_tokens,
        });

        if d.is_search_model() {
            // search models reject tools and sampling knobs
            if let Some(size) = d.search_context_size {
                body["web_search_options"] = json!({ "search_context_size": size.as_str() });
            }
        } else {
            body["temperature"] = json!(d.temperature);
            body["top_p"] = json!(d.top_p);
            body["frequency_penalty"] = json!(d.frequency_penalty);
            body["presence_penalty"] = json!(d.presence_penalty);
            if !request.tools.is_empty() {
                body["tools"] = JsonValue::Array(
                    request.tools.iter().map(|tool| tool.to_openai_tool()).collect(),
                );
                body["tool_choice"] = json!(request.tool_choice.as_str());
            }
        }

        if let Some(stop) = &d.stop {
            body["stop"] = json!(stop);
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "schema": format.schema,
                }
            });
        }
        body
    }

    fn parse_reply(body: &str) -> Result<AssistantReply, CompletionError> {
        let completion: ChatCompletion = serde_json::from_str(body)
            .map_err(|e| CompletionError::Failed(format!("invalid completion body: {}", e)))?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| CompletionError::Failed("completion carried no choices".to_string()))?;
        Ok(AssistantReply {
            content: message.content,
            tool_calls: message.tool_calls.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<AssistantReply, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut http = self
            .client
            .post(&url)
            .timeout(self.descriptor.request_timeout())
            .json(&self.build_body(&request));
        if let Some(key) = &self.api_key {
            http = if self.descriptor.provider() == "azure" {
                http.header("api-key", key)
            } else {
                http.bearer_auth(key)
            };
        }

        let response = http.send().await.map_err(|e| {
            log::error!("agentry::clients::openai: request to {} failed: {}", url, e);
            CompletionError::Failed(e.to_string())
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Failed(e.to_string()))?;

        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::PAYLOAD_TOO_LARGE
        {
            log::warn!("{} rejected the request ({}): {}", self.descriptor.model, status, body);
            return Err(CompletionError::RequestTooLarge(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            log::error!("agentry::clients::openai: {} returned {}: {}", url, status, body);
            return Err(CompletionError::Failed(format!("{}: {}", status, body)));
        }
        Self::parse_reply(&body)
    }

    fn model_name(&self) -> &str {
        &self.descriptor.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentry::client_wrapper::{Message, ResponseFormat, ToolChoice};
    use crate::agentry::config::SearchContextSize;
    use crate::agentry::tool_protocol::ToolSpec;

    fn descriptor(model: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: "a".into(),
            description: "b".into(),
            model: model.into(),
            ..Default::default()
        }
    }

    fn request(tools: Vec<ToolSpec>, tool_choice: ToolChoice) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("2+2?")],
            tools,
            tool_choice,
            response_format: Some(ResponseFormat {
                name: "BaseChatResponse".into(),
                schema: json!({"type": "object"}),
            }),
        }
    }

    #[test]
    fn test_body_carries_tools_and_choice() {
        let client = OpenAICompatibleClient::from_descriptor(&descriptor("openai/gpt-4o")).unwrap();
        let body = client.build_body(&request(
            vec![ToolSpec::new("calculator", "math")],
            ToolChoice::None,
        ));
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][1]["content"], "2+2?");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
        assert_eq!(body["tool_choice"], "none");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn test_body_without_tools_omits_tool_choice() {
        let client = OpenAICompatibleClient::from_descriptor(&descriptor("openai/gpt-4o")).unwrap();
        let body = client.build_body(&request(Vec::new(), ToolChoice::Auto));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_search_model_gets_web_search_options_not_tools() {
        let mut d = descriptor("openai/gpt-4o-search-preview");
        d.search_context_size = Some(SearchContextSize::High);
        let client = OpenAICompatibleClient::from_descriptor(&d).unwrap();
        let body = client.build_body(&request(vec![ToolSpec::new("x", "")], ToolChoice::Auto));
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body["web_search_options"]["search_context_size"], "high");
    }

    #[test]
    fn test_stream_flag_loads_but_is_never_sent() {
        let d = AgentDescriptor::from_yaml_str(
            "name: a\ndescription: b\nmodel: openai/gpt-4o\nstream: true\n",
            &crate::agentry::config::Settings::default(),
        )
        .unwrap();
        assert!(d.stream);
        let client = OpenAICompatibleClient::from_descriptor(&d).unwrap();
        let body = client.build_body(&request(Vec::new(), ToolChoice::Auto));
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_azure_requires_endpoint() {
        assert!(matches!(
            OpenAICompatibleClient::from_descriptor(&descriptor("azure/my-deployment")),
            Err(AgentError::Configuration(_))
        ));
        let mut d = descriptor("azure/my-deployment");
        d.endpoint = "https://example.openai.azure.com/openai/deployments/x/".into();
        let client = OpenAICompatibleClient::from_descriptor(&d).unwrap();
        assert_eq!(
            client.base_url(),
            "https://example.openai.azure.com/openai/deployments/x"
        );
    }

    #[test]
    fn test_parse_reply_with_tool_calls() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_1","type":"function",
            "function":{"name":"calculator","arguments":"{\"expr\":\"2+2\"}"}}]}}]}"#;
        let reply = OpenAICompatibleClient::parse_reply(body).unwrap();
        assert!(reply.content.is_none());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].function.name, "calculator");

        assert!(OpenAICompatibleClient::parse_reply(r#"{"choices":[]}"#).is_err());
    }
}
