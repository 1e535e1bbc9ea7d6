//! The agent orchestration loop.
//!
//! An [`AgentOrchestrator`] turns one user query into exactly one final answer. A turn
//! walks a small state machine:
//!
//! ```text
//! AwaitingUser ─► ModelCallInitial ─┬─────────────────────────────────► Done
//!                  (tool choice auto)│ tool calls requested               ▲
//!                                    └─► ToolExecution ─► ModelCallFinal ┘
//!                                        (concurrent)     (tool choice none)
//! ```
//!
//! * Only offered tools run. A call naming any other tool fails the turn before the tool
//!   server is contacted, and an agent with no tools treats its first reply as final.
//! * Tool results are appended in the order the model requested them, whatever order
//!   the calls finish in.
//! * A "request too large" rejection at either model call forces a memory shrink and
//!   repeats that call once. A second rejection fails the turn.
//! * A failed turn leaves memory exactly as far as it got; the caller may retry the
//!   whole request.
//!
//! The final assistant content must deserialize into the turn's [`ChatResponse`] type
//! ([`BaseChatResponse`] by default); its `textResponse` is the answer.

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::agentry::client_wrapper::{
    AssistantReply, CompletionClient, CompletionError, CompletionRequest, Message,
    ResponseFormat, ToolCall, ToolChoice,
};
use crate::agentry::config::{AgentDescriptor, DEFAULT_TOOL_CACHE_TTL};
use crate::agentry::error::{AgentError, TurnFailure};
use crate::agentry::event::{preview, AgentEvent, CallPhase, EventHandler};
use crate::agentry::memory::ConversationMemory;
use crate::agentry::prompt::{
    inject_tools_section, replace_variables, AgentContext, DynamicVariableResolver,
    SessionContext,
};
use crate::agentry::session_store::SharedMemory;
use crate::agentry::tool_protocol::{filter_allowed, list_tools_scoped, ToolProtocol, ToolSpec};

/// Shape the final assistant content must have.
pub trait ChatResponse: DeserializeOwned + Send + 'static {
    /// The answer text handed back to the caller.
    fn text_response(&self) -> &str;

    /// Schema name reported to the model provider.
    fn schema_name() -> &'static str;

    /// JSON schema of the expected content.
    fn json_schema() -> serde_json::Value;

    fn response_format() -> ResponseFormat {
        ResponseFormat {
            name: Self::schema_name().to_string(),
            schema: Self::json_schema(),
        }
    }
}

/// Default response shape: `{"textResponse": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseChatResponse {
    #[serde(rename = "textResponse", alias = "text_response")]
    pub text_response: String,
}

impl ChatResponse for BaseChatResponse {
    fn text_response(&self) -> &str {
        &self.text_response
    }

    fn schema_name() -> &'static str {
        "BaseChatResponse"
    }

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"textResponse": {"type": "string"}},
            "required": ["textResponse"],
            "additionalProperties": false
        })
    }
}

enum TurnState {
    AwaitingUser,
    ModelCallInitial,
    ToolExecution(Vec<ToolCall>),
    ModelCallFinal,
    Done,
}

struct CachedTools {
    fetched_at: Instant,
    tools: Vec<ToolSpec>,
}

/// Drives turns for one configured agent.
///
/// The orchestrator holds no conversation state of its own; every turn runs against a
/// [`ConversationMemory`] handed in by the caller, usually from a
/// [`SessionStore`](crate::session_store::SessionStore).
pub struct AgentOrchestrator {
    agent_key: String,
    descriptor: Arc<AgentDescriptor>,
    prompt_template: String,
    client: Arc<dyn CompletionClient>,
    tool_protocol: Arc<dyn ToolProtocol>,
    resolver: Option<Arc<dyn DynamicVariableResolver>>,
    session: SessionContext,
    event_handler: Option<Arc<dyn EventHandler>>,
    tool_cache_ttl: Duration,
    tool_cache: RwLock<Option<CachedTools>>,
}

impl AgentOrchestrator {
    pub fn new(
        agent_key: impl Into<String>,
        descriptor: AgentDescriptor,
        prompt_template: impl Into<String>,
        client: Arc<dyn CompletionClient>,
        tool_protocol: Arc<dyn ToolProtocol>,
    ) -> Self {
        Self {
            agent_key: agent_key.into(),
            descriptor: Arc::new(descriptor),
            prompt_template: prompt_template.into(),
            client,
            tool_protocol,
            resolver: None,
            session: SessionContext::default(),
            event_handler: None,
            tool_cache_ttl: DEFAULT_TOOL_CACHE_TTL,
            tool_cache: RwLock::new(None),
        }
    }

    /// Supply values for variables bound to `"..."`.
    pub fn with_resolver(mut self, resolver: Arc<dyn DynamicVariableResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_session_context(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// How long a fetched tool list is reused. Zero disables caching.
    pub fn with_tool_cache_ttl(mut self, ttl: Duration) -> Self {
        self.tool_cache_ttl = ttl;
        self
    }

    pub fn agent_key(&self) -> &str {
        &self.agent_key
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    /// Tools offered to the model: the protocol's tools filtered by the allow-list.
    ///
    /// An agent without allowed tools never contacts the tool protocol.
    pub async fn offered_tools(&self) -> Result<Vec<ToolSpec>, AgentError> {
        if !self.descriptor.uses_tools() {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.tool_cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.tool_cache_ttl {
                return Ok(cached.tools.clone());
            }
        }

        let listed = list_tools_scoped(self.tool_protocol.as_ref())
            .await
            .map_err(|e| TurnFailure::ToolListing(e.to_string()))?;
        let tools = filter_allowed(listed, self.descriptor.allowed_tools());
        log::debug!(
            "agent {} offers {} tools via {}",
            self.agent_key,
            tools.len(),
            self.tool_protocol.protocol_name()
        );
        *self.tool_cache.write().await = Some(CachedTools {
            fetched_at: Instant::now(),
            tools: tools.clone(),
        });
        Ok(tools)
    }

    /// Forget the cached tool list so the next turn asks the tool server again.
    pub async fn invalidate_tool_cache(&self) {
        *self.tool_cache.write().await = None;
    }

    /// Render the system prompt for the given tool set.
    pub fn system_prompt(&self, tools: &[ToolSpec]) -> Result<String, AgentError> {
        let context = AgentContext {
            agent_key: &self.agent_key,
            session: &self.session,
        };
        let content = replace_variables(
            &self.prompt_template,
            &self.descriptor.replace_variables,
            self.resolver.as_deref(),
            &context,
        )?;
        Ok(inject_tools_section(&content, tools))
    }

    /// Answer `query` in the conversation behind `memory`, returning the answer text.
    ///
    /// The memory lock is held for the whole turn, so concurrent turns of the same
    /// conversation run one after another.
    pub async fn respond(
        &self,
        memory: &SharedMemory,
        query: &str,
    ) -> Result<String, AgentError> {
        let response: BaseChatResponse = self.respond_with(memory, query).await?;
        Ok(response.text_response)
    }

    /// [`respond`](Self::respond) with a custom response shape.
    pub async fn respond_with<R: ChatResponse>(
        &self,
        memory: &SharedMemory,
        query: &str,
    ) -> Result<R, AgentError> {
        let mut memory = memory.lock().await;
        self.run_turn(&mut memory, query).await
    }

    /// Run one turn against a memory the caller already has exclusive access to.
    pub async fn run_turn<R: ChatResponse>(
        &self,
        memory: &mut ConversationMemory,
        query: &str,
    ) -> Result<R, AgentError> {
        self.emit(AgentEvent::TurnStarted {
            agent_key: self.agent_key.clone(),
            query_preview: preview(query, 120),
        })
        .await;

        match self.drive::<R>(memory, query).await {
            Ok((response, tool_calls_made)) => {
                self.emit(AgentEvent::TurnCompleted {
                    agent_key: self.agent_key.clone(),
                    tool_calls_made,
                    response_length: response.text_response().len(),
                })
                .await;
                Ok(response)
            }
            Err(err) => {
                log::error!("agent {} turn failed: {}", self.agent_key, err);
                self.emit(AgentEvent::TurnFailed {
                    agent_key: self.agent_key.clone(),
                    error: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn drive<R: ChatResponse>(
        &self,
        memory: &mut ConversationMemory,
        query: &str,
    ) -> Result<(R, usize), AgentError> {
        let format = R::response_format();
        let mut tools: Vec<ToolSpec> = Vec::new();
        let mut system_prompt = String::new();
        let mut tool_calls_made = 0;
        let mut state = TurnState::AwaitingUser;

        loop {
            state = match state {
                TurnState::AwaitingUser => {
                    memory.add_user(query);
                    TurnState::ModelCallInitial
                }
                TurnState::ModelCallInitial => {
                    tools = self.offered_tools().await?;
                    system_prompt = self.system_prompt(&tools)?;
                    log::info!(
                        "agent {}: initial call to {}",
                        self.agent_key,
                        self.client.model_name()
                    );
                    let mut reply = self
                        .call_model(
                            memory,
                            &system_prompt,
                            &tools,
                            ToolChoice::Auto,
                            CallPhase::Initial,
                            &format,
                        )
                        .await?;
                    if tools.is_empty() && !reply.tool_calls.is_empty() {
                        // nothing was offered, so the reply is the answer
                        log::warn!(
                            "agent {} has no tools but the model requested {}; ignoring",
                            self.agent_key,
                            tool_names(&reply.tool_calls)
                        );
                        reply.tool_calls.clear();
                    }
                    let tool_calls = reply.tool_calls.clone();
                    memory.add_assistant(reply.into_message());
                    if tool_calls.is_empty() {
                        TurnState::Done
                    } else {
                        TurnState::ToolExecution(tool_calls)
                    }
                }
                TurnState::ToolExecution(tool_calls) => {
                    let results = self.execute_tools(&tool_calls, &tools).await?;
                    for (call, result) in tool_calls.iter().zip(results) {
                        memory.add_tool_result(call.id.clone(), result);
                    }
                    tool_calls_made += tool_calls.len();
                    TurnState::ModelCallFinal
                }
                TurnState::ModelCallFinal => {
                    log::info!("agent {}: final call after tool calls", self.agent_key);
                    let reply = self
                        .call_model(
                            memory,
                            &system_prompt,
                            &tools,
                            ToolChoice::None,
                            CallPhase::Final,
                            &format,
                        )
                        .await?;
                    memory.add_assistant(reply.into_message());
                    TurnState::Done
                }
                TurnState::Done => break,
            };
        }

        Ok((parse_final_response(memory)?, tool_calls_made))
    }

    /// One model call, with a single forced-shrink retry on "request too large".
    async fn call_model(
        &self,
        memory: &mut ConversationMemory,
        system_prompt: &str,
        tools: &[ToolSpec],
        tool_choice: ToolChoice,
        phase: CallPhase,
        format: &ResponseFormat,
    ) -> Result<AssistantReply, AgentError> {
        let mut retried = false;
        loop {
            self.emit(AgentEvent::ModelCallStarted {
                agent_key: self.agent_key.clone(),
                phase,
            })
            .await;

            let request = CompletionRequest {
                messages: memory.build_model_input(system_prompt),
                tools: tools.to_vec(),
                tool_choice,
                response_format: Some(format.clone()),
            };
            match self.client.complete(request).await {
                Ok(reply) => {
                    self.emit(AgentEvent::ModelCallCompleted {
                        agent_key: self.agent_key.clone(),
                        phase,
                        tool_calls: reply.tool_calls.len(),
                        response_length: reply.content.as_deref().map(str::len).unwrap_or(0),
                    })
                    .await;
                    return Ok(reply);
                }
                Err(CompletionError::RequestTooLarge(msg)) if !retried => {
                    log::warn!(
                        "agent {}: {} call rejected as too large ({}); shrinking and retrying",
                        self.agent_key,
                        phase,
                        msg
                    );
                    retried = true;
                    let removed_messages = memory.shrink(true);
                    self.emit(AgentEvent::RequestTooLargeRetry {
                        agent_key: self.agent_key.clone(),
                        phase,
                        removed_messages,
                    })
                    .await;
                }
                Err(CompletionError::RequestTooLarge(msg)) => {
                    return Err(TurnFailure::RequestTooLarge(msg).into());
                }
                Err(CompletionError::Failed(msg)) => {
                    return Err(TurnFailure::Completion(msg).into());
                }
            }
        }
    }

    /// Run every requested call concurrently on one connection.
    ///
    /// Calls naming a tool that was not offered are refused before connecting. All calls
    /// are awaited even when one fails. Results come back in request order; any failure
    /// fails the whole phase.
    async fn execute_tools(
        &self,
        tool_calls: &[ToolCall],
        offered: &[ToolSpec],
    ) -> Result<Vec<String>, AgentError> {
        if let Some(call) = tool_calls
            .iter()
            .find(|call| !offered.iter().any(|tool| tool.name == call.function.name))
        {
            log::error!(
                "agent {}: model requested tool {} which is not offered",
                self.agent_key,
                call.function.name
            );
            return Err(TurnFailure::ToolInvocation {
                tool: call.function.name.clone(),
                message: "tool is not offered to this agent".to_string(),
            }
            .into());
        }

        let connection = self.tool_protocol.connect().await.map_err(|e| {
            TurnFailure::ToolInvocation {
                tool: tool_names(tool_calls),
                message: e.to_string(),
            }
        })?;

        let mut invocations = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            let arguments = call.parsed_arguments();
            log::info!("calling tool {} with args {}", call.function.name, arguments);
            self.emit(AgentEvent::ToolCallDetected {
                agent_key: self.agent_key.clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                arguments: arguments.clone(),
            })
            .await;
            invocations.push(connection.invoke(&call.function.name, arguments));
        }
        let results = join_all(invocations).await;

        if let Err(e) = connection.close().await {
            log::warn!(
                "closing {} connection after tool phase failed: {}",
                self.tool_protocol.protocol_name(),
                e
            );
        }

        let mut outputs = Vec::with_capacity(results.len());
        let mut failure = None;
        for (call, result) in tool_calls.iter().zip(results) {
            let (success, error) = match result {
                Ok(text) => {
                    outputs.push(text);
                    (true, None)
                }
                Err(e) => {
                    let message = e.to_string();
                    log::error!("tool {} ({}) failed: {}", call.function.name, call.id, message);
                    if failure.is_none() {
                        failure = Some(TurnFailure::ToolInvocation {
                            tool: call.function.name.clone(),
                            message: message.clone(),
                        });
                    }
                    (false, Some(message))
                }
            };
            self.emit(AgentEvent::ToolExecutionCompleted {
                agent_key: self.agent_key.clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                success,
                error,
            })
            .await;
        }

        match failure {
            Some(failure) => Err(failure.into()),
            None => Ok(outputs),
        }
    }
}

fn tool_names(tool_calls: &[ToolCall]) -> String {
    tool_calls
        .iter()
        .map(|call| call.function.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Deserialize the last assistant message's content as `R`.
fn parse_final_response<R: ChatResponse>(memory: &ConversationMemory) -> Result<R, AgentError> {
    let content = memory
        .last_message()
        .and_then(Message::content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| {
            TurnFailure::ResponseParse("final assistant message has no content".to_string())
        })?;
    serde_json::from_str::<R>(content).map_err(|e| {
        TurnFailure::ResponseParse(format!("{} in {:?}", e, preview(content, 200))).into()
    })
}
