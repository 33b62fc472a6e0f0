//! The agent reasoning loop implementation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use toolwright_config::AppConfig;
use toolwright_core::content::flatten_value;
use toolwright_core::error::{ProviderError, ToolError, causal_chain};
use toolwright_core::message::{ConversationThread, Message, MessageToolCall, ThreadId};
use toolwright_core::provider::{Provider, ProviderRequest, ToolSchema};
use toolwright_core::tool::ToolCallRequest;
use toolwright_security::{redact_text, redact_value};
use toolwright_telemetry::{Trace, TraceKind, TraceRecord, TraceSink, TracingSink};
use toolwright_tools::{Dispatcher, observation, summarize};
use tracing::{debug, error, info, warn};

use crate::prompt;
use crate::session::{EvictionPolicy, InMemorySessionStore, SessionStore};
use crate::stream_event::{ClientError, StreamEvent};

/// Shown when the recursion limit ends a turn that produced nothing else.
pub const LIMIT_NOTICE: &str = "Ich habe die maximale Anzahl an Werkzeugaufrufen \
für diese Anfrage erreicht. Bitte präzisiere die Anfrage oder gib mir weitere Hinweise.";

const EVENT_BUFFER: usize = 128;
const ERROR_CHAIN_DEPTH: usize = 5;

/// The agent loop: model rounds and tool dispatch for one thread at a time.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<dyn SessionStore>,
    sink: Arc<dyn TraceSink>,

    model: String,
    temperature: f32,
    max_tokens: Option<u32>,

    /// Maximum reasoning ↔ tool-call cycles per turn
    recursion_limit: usize,

    /// Replaces the built-in system prompt instructions
    instructions: Option<String>,

    /// Send the collected trace before `End`
    trace_enabled: bool,

    /// Tools exposed to the model; empty exposes all
    allowlist: Vec<String>,
}

/// What a turn produced, used to pick a fallback.
#[derive(Debug, Default)]
struct TurnState {
    streamed_chars: usize,
    last_return: Option<String>,
    last_observation: Option<String>,
    limit_hit: bool,
}

/// One model round after its stream was drained.
struct Round {
    text: String,
    tool_calls: Vec<MessageToolCall>,
    return_value: Option<Value>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        dispatcher: Arc<Dispatcher>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            sessions: Arc::new(InMemorySessionStore::new(EvictionPolicy::default())),
            sink: Arc::new(TracingSink),
            model: model.into(),
            temperature: 0.3,
            max_tokens: None,
            recursion_limit: 15,
            instructions: None,
            trace_enabled: false,
            allowlist: Vec::new(),
        }
    }

    /// Wire the loop from `[provider]`, `[agent]`, `[session]` and `[tools]`.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let policy = EvictionPolicy::from_max_threads(config.session.max_threads);
        let mut agent = Self::new(provider, dispatcher, config.provider.model.clone())
            .with_temperature(config.provider.temperature)
            .with_recursion_limit(config.agent.recursion_limit)
            .with_trace(config.agent.trace_enabled)
            .with_allowlist(config.tools.allowlist.clone())
            .with_sessions(Arc::new(InMemorySessionStore::new(policy)));
        if let Some(max) = config.provider.max_tokens {
            agent = agent.with_max_tokens(max);
        }
        if let Some(instructions) = &config.agent.system_prompt {
            agent = agent.with_instructions(instructions.clone());
        }
        agent
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn with_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run one turn on `thread_id` in the background.
    ///
    /// The receiver yields the turn's events and always ends with
    /// [`StreamEvent::End`]. Dropping it cancels the turn at the next await.
    pub fn run_stream(
        self: &Arc<Self>,
        thread_id: ThreadId,
        prompt: impl Into<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let agent = Arc::clone(self);
        let prompt = prompt.into();

        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    info!(thread_id = %thread_id, "Client disconnected, turn cancelled");
                }
                _ = agent.run_turn(thread_id.clone(), prompt, &tx) => {}
            }
        });

        rx
    }

    async fn run_turn(&self, thread_id: ThreadId, prompt: String, tx: &mpsc::Sender<StreamEvent>) {
        let req_id = uuid::Uuid::new_v4().to_string();
        let mut trace = Trace::new();

        let _turn = self.sessions.lock(&thread_id).await;
        let mut thread = self
            .sessions
            .load(&thread_id)
            .await
            .unwrap_or_else(|| ConversationThread::new(thread_id.clone()));

        info!(
            req_id = %req_id,
            thread_id = %thread_id,
            model = %self.model,
            provider = self.provider.name(),
            history = thread.messages.len(),
            "Agent turn started"
        );
        self.record(
            &mut trace,
            TraceRecord::new(TraceKind::Start)
                .with("reqId", req_id.clone())
                .with("threadId", thread_id.to_string())
                .with("provider", self.provider.name())
                .with("model", self.model.clone())
                .with_preview("prompt", &prompt),
        );

        let system = prompt::system_prompt(Utc::now(), self.instructions.as_deref());
        if thread.inject_system_prompt(system) {
            debug!(thread_id = %thread_id, "System prompt injected");
        }
        thread.push(Message::user(prompt));

        let outcome = self.reason(&mut thread, &mut trace, tx).await;

        // Checkpoint whatever the turn produced, including failed turns.
        self.sessions.save(thread).await;

        match outcome {
            Ok(state) => self.finish_answer(state, &req_id, &mut trace, tx).await,
            Err(err) => {
                let chain = redacted_chain(&err);
                error!(req_id = %req_id, chain = ?chain, "Agent turn failed");
                self.record(
                    &mut trace,
                    TraceRecord::new(TraceKind::LlmError)
                        .with_preview("message", &redact_text(&err.to_string())),
                );
                let client_error = ClientError::from_provider(&err, &req_id);
                let _ = tx.send(StreamEvent::Error(client_error)).await;
            }
        }

        info!(req_id = %req_id, elapsed_ms = trace.elapsed_ms(), "Agent turn finished");
        if self.trace_enabled && !trace.is_empty() {
            let _ = tx.send(StreamEvent::Trace(trace.into_records())).await;
        }
        let _ = tx.send(StreamEvent::End).await;
    }

    /// Reasoning ↔ tool-call cycles until the model answers or the limit hits.
    async fn reason(
        &self,
        thread: &mut ConversationThread,
        trace: &mut Trace,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<TurnState, ProviderError> {
        let tools: Vec<ToolSchema> = self
            .dispatcher
            .definitions_for_model(&self.allowlist)
            .iter()
            .map(|d| d.to_schema())
            .collect();
        let mut state = TurnState::default();
        let mut cycles = 0;

        loop {
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: thread.messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tools.clone(),
                stream: true,
            };
            let last_text = thread.messages.last().map(Message::text).unwrap_or_default();
            self.record(
                trace,
                TraceRecord::new(TraceKind::LlmStart)
                    .with("messages", thread.messages.len())
                    .with_preview("preview", &last_text),
            );

            let round = self.stream_round(request, &mut state, tx).await?;
            self.record(
                trace,
                TraceRecord::new(TraceKind::LlmEnd)
                    .with("chars", round.text.chars().count())
                    .with("toolCalls", round.tool_calls.len()),
            );

            if let Some(value) = &round.return_value {
                let text = flatten_value(value);
                if !text.trim().is_empty() {
                    state.last_return = Some(text);
                }
            }

            if round.tool_calls.is_empty() {
                thread.push(Message::assistant(round.text));
                return Ok(state);
            }

            if cycles >= self.recursion_limit {
                warn!(limit = self.recursion_limit, "Recursion limit reached, ending turn");
                self.record(
                    trace,
                    TraceRecord::new(TraceKind::Limit).with("limit", self.recursion_limit),
                );
                state.limit_hit = true;
                // Unanswered tool calls would poison the next turn's history.
                thread.push(Message::assistant(round.text));
                return Ok(state);
            }
            cycles += 1;

            thread.push(Message::assistant(round.text).with_tool_calls(round.tool_calls.clone()));
            for call in &round.tool_calls {
                let content = self.run_tool(call, &mut state, trace).await;
                thread.push(Message::tool_result(call.id.clone(), content));
            }
        }
    }

    /// Drain one model stream, forwarding text as it arrives.
    async fn stream_round(
        &self,
        request: ProviderRequest,
        state: &mut TurnState,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Round, ProviderError> {
        let mut rx = self.provider.stream(request).await?;
        let mut round = Round {
            text: String::new(),
            tool_calls: Vec::new(),
            return_value: None,
        };

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                round.text.push_str(&content);
                state.streamed_chars += content.chars().count();
                let _ = tx.send(StreamEvent::Delta(content)).await;
            }
            round.tool_calls.extend(chunk.tool_calls);
            if chunk.return_value.is_some() {
                round.return_value = chunk.return_value;
            }
            if chunk.done {
                break;
            }
        }
        Ok(round)
    }

    /// Dispatch one tool call and return the observation for the model.
    async fn run_tool(
        &self,
        call: &MessageToolCall,
        state: &mut TurnState,
        trace: &mut Trace,
    ) -> String {
        let arguments = parse_arguments(call);
        let mut logged_args = arguments.as_ref().ok().cloned().unwrap_or(Value::Null);
        redact_value(&mut logged_args);
        debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
        self.record(
            trace,
            TraceRecord::new(TraceKind::ToolStart)
                .with("tool", call.name.clone())
                .with_preview("inputPreview", &logged_args.to_string()),
        );

        let result = match arguments {
            Ok(args) => self
                .dispatcher
                .call_tool(ToolCallRequest::new(call.name.clone(), args.clone()))
                .await
                .map(|result| (args, result)),
            Err(e) => Err(e),
        };

        match result {
            Ok((args, result)) => {
                let text = observation(&result);
                let summary = summarize(&call.name, &args, &result);
                self.record(
                    trace,
                    TraceRecord::new(TraceKind::ToolEnd)
                        .with("tool", call.name.clone())
                        .with_preview("outputPreview", &text),
                );
                state.last_observation = Some(if summary.trim().is_empty() {
                    text.clone()
                } else {
                    summary
                });
                text
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call returned an error observation");
                self.record(
                    trace,
                    TraceRecord::new(TraceKind::ToolError)
                        .with("tool", call.name.clone())
                        .with_preview("message", &e.to_string()),
                );
                let text = format!("Error: {e}");
                state.last_observation = Some(text.clone());
                text
            }
        }
    }

    /// Make sure the client sees text, or an explicit error.
    async fn finish_answer(
        &self,
        state: TurnState,
        req_id: &str,
        trace: &mut Trace,
        tx: &mpsc::Sender<StreamEvent>,
    ) {
        if state.streamed_chars > 0 {
            return;
        }

        let fallback = state
            .last_return
            .map(|text| ("return_value", text))
            .or_else(|| state.last_observation.map(|text| ("observation", text)))
            .or_else(|| state.limit_hit.then(|| ("limit", LIMIT_NOTICE.to_string())));

        match fallback {
            Some((source, text)) => {
                info!(req_id = %req_id, source, "No text streamed, using fallback");
                self.record(trace, TraceRecord::new(TraceKind::Fallback).with("source", source));
                let _ = tx.send(StreamEvent::Delta(text)).await;
            }
            None => {
                warn!(req_id = %req_id, "Model produced no content");
                let err = ClientError::new("The model returned an empty response")
                    .with_code("empty_response")
                    .with_status(502)
                    .with_req_id(req_id);
                let _ = tx.send(StreamEvent::Error(err)).await;
            }
        }
    }

    fn record(&self, trace: &mut Trace, record: TraceRecord) {
        self.sink.record(&record);
        if self.trace_enabled {
            trace.push(record);
        }
    }
}

/// Tool-call arguments as JSON. Blank means "no arguments".
fn parse_arguments(call: &MessageToolCall) -> Result<Value, ToolError> {
    if call.arguments.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&call.arguments).map_err(|e| ToolError::Validation {
        tool_name: call.name.clone(),
        errors: vec![format!("arguments are not valid JSON: {e}")],
    })
}

/// Error chain for logs. Provider error bodies may echo credentials.
fn redacted_chain(err: &ProviderError) -> Vec<String> {
    causal_chain(err, ERROR_CHAIN_DEPTH)
        .iter()
        .map(|entry| redact_text(entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use serde_json::json;
    use std::time::Duration;
    use toolwright_core::message::Role;
    use toolwright_core::provider::StreamChunk;
    use toolwright_core::tool::{Manifest, ToolDefinition, ToolMetadata, handler_fn};
    use toolwright_telemetry::CollectingSink;

    fn definition(name: &str, input_schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema,
            output_schema: json!({"type": "object"}),
            metadata: ToolMetadata {
                category: "test".into(),
                deterministic: true,
                scopes: vec![],
                resource: "test://".into(),
            },
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let manifest = Manifest {
            namespace: "test".into(),
            version: "0.1.0".into(),
            tools: vec![
                definition(
                    "notes.add",
                    json!({
                        "type": "object",
                        "required": ["text"],
                        "properties": {"text": {"type": "string"}}
                    }),
                ),
                definition("status.check", json!({"type": "object", "properties": {}})),
            ],
        };
        let dispatcher = Dispatcher::builder(manifest)
            .handler(
                "notes.add",
                handler_fn(|args: Value| async move {
                    Ok(json!({"status": "stored", "noteId": "n-1", "text": args["text"]}))
                }),
            )
            .handler(
                "status.check",
                handler_fn(|_| async { Ok(json!({"message": "Alles im grünen Bereich"})) }),
            )
            .build()
            .unwrap();
        Arc::new(dispatcher)
    }

    fn agent(provider: SequentialMockProvider) -> (Arc<AgentLoop>, Arc<SequentialMockProvider>) {
        let provider = Arc::new(provider);
        let agent = AgentLoop::new(provider.clone(), dispatcher(), "mock-model");
        (Arc::new(agent), provider)
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn text_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn simple_text_response() {
        let (agent, provider) =
            agent(SequentialMockProvider::single_text("Hallo! Wie kann ich helfen?"));
        let thread_id = ThreadId::from("t-simple");

        let events = collect(agent.run_stream(thread_id.clone(), "Hallo")).await;
        assert_eq!(text_of(&events), "Hallo! Wie kann ich helfen?");
        assert_eq!(events.last(), Some(&StreamEvent::End));
        assert_eq!(provider.call_count(), 1);

        // System + User + Assistant
        let thread = agent.sessions().load(&thread_id).await.unwrap();
        assert_eq!(thread.messages.len(), 3);
        assert_eq!(thread.messages[0].role, Role::System);
        assert!(thread.messages[0].text().starts_with("Aktuelle UTC-Zeit: "));

        // Tools are advertised to the model.
        let request = &provider.requests()[0];
        assert!(request.stream);
        assert_eq!(request.tools.len(), 2);
    }

    #[tokio::test]
    async fn deltas_are_forwarded_as_they_stream() {
        let (agent, _) = agent(SequentialMockProvider::new([Step::Chunks(vec![
            text_chunk("Guten "),
            text_chunk(""),
            text_chunk("Tag"),
            StreamChunk {
                done: true,
                ..StreamChunk::default()
            },
        ])]));

        let events = collect(agent.run_stream(ThreadId::new(), "Hi")).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Guten ".into()),
                StreamEvent::Delta("Tag".into()),
                StreamEvent::End
            ]
        );
    }

    #[tokio::test]
    async fn system_prompt_is_injected_once_per_thread() {
        let (agent, provider) = agent(SequentialMockProvider::from_responses(vec![
            make_text_response("Erste Antwort"),
            make_text_response("Zweite Antwort"),
        ]));
        let thread_id = ThreadId::from("t-resume");

        collect(agent.run_stream(thread_id.clone(), "Frage 1")).await;
        collect(agent.run_stream(thread_id.clone(), "Frage 2")).await;

        let second = &provider.requests()[1];
        let system_count = second.messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
        // system, user, assistant, user
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[3].text(), "Frage 2");
    }

    #[tokio::test]
    async fn tool_result_becomes_observation() {
        let (agent, provider) = agent(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("notes.add", json!({"text": "Milch kaufen"}))],
            "",
            "Notiz gespeichert.",
        ));
        let thread_id = ThreadId::from("t-tool");

        let events = collect(agent.run_stream(thread_id.clone(), "Merke: Milch kaufen")).await;
        assert_eq!(text_of(&events), "Notiz gespeichert.");

        let second = &provider.requests()[1];
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_notes.add"));
        let observed: Value = serde_json::from_str(&tool_msg.text()).unwrap();
        assert_eq!(observed["noteId"], "n-1");

        // system, user, assistant(tool calls), tool, assistant
        let thread = agent.sessions().load(&thread_id).await.unwrap();
        assert_eq!(thread.messages.len(), 5);
        assert_eq!(thread.messages[2].tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn validation_errors_are_observations_not_failures() {
        let (agent, provider) = agent(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("notes.add", json!({"txt": "typo"}))],
            "",
            "Ich versuche es anders.",
        ));

        let events = collect(agent.run_stream(ThreadId::new(), "Merke etwas")).await;
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error(_))));

        let second = &provider.requests()[1];
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.text().starts_with("Error: Invalid arguments for notes.add"));
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_json_are_observations() {
        let bad_json = MessageToolCall {
            id: "call_bad".into(),
            name: "notes.add".into(),
            arguments: "{not json".into(),
        };
        let (agent, provider) = agent(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("files.delete", json!({})), bad_json],
            "",
            "Fertig.",
        ));

        collect(agent.run_stream(ThreadId::new(), "Los")).await;

        let second = &provider.requests()[1];
        let tool_texts: Vec<String> = second
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(Message::text)
            .collect();
        assert_eq!(tool_texts.len(), 2);
        assert_eq!(tool_texts[0], "Error: Unknown tool: files.delete");
        assert!(tool_texts[1].contains("not valid JSON"));
    }

    #[tokio::test]
    async fn return_value_is_the_first_fallback() {
        let response =
            make_return_value_response(json!({"output": "Antwort aus dem Rückgabewert"}));
        let (agent, _) = agent(SequentialMockProvider::from_responses(vec![response]));

        let events = collect(agent.run_stream(ThreadId::new(), "Frage")).await;
        assert_eq!(text_of(&events), "Antwort aus dem Rückgabewert");
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error(_))));
    }

    #[tokio::test]
    async fn observation_summary_is_the_second_fallback() {
        let (agent, _) = agent(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("status.check", json!({}))],
            "",
            "",
        ));

        let events = collect(agent.run_stream(ThreadId::new(), "Status?")).await;
        assert_eq!(text_of(&events), "Alles im grünen Bereich");
    }

    #[tokio::test]
    async fn recursion_limit_still_yields_text() {
        let steps = (0..5).map(|_| {
            let call = make_tool_call("status.check", json!({}));
            Step::from(make_tool_call_response(vec![call], ""))
        });
        let provider = Arc::new(SequentialMockProvider::new(steps));
        let sink = Arc::new(CollectingSink::new());
        let agent = Arc::new(
            AgentLoop::new(provider.clone(), dispatcher(), "mock-model")
                .with_recursion_limit(2)
                .with_sink(sink.clone()),
        );
        let thread_id = ThreadId::from("t-limit");

        let events = collect(agent.run_stream(thread_id.clone(), "Endlosschleife")).await;
        assert_eq!(text_of(&events), "Alles im grünen Bereich");
        assert_eq!(events.last(), Some(&StreamEvent::End));
        // Two tool cycles plus the round that hit the limit.
        assert_eq!(provider.call_count(), 3);
        assert_eq!(sink.records().iter().filter(|r| r.kind == TraceKind::Limit).count(), 1);

        // No dangling tool calls in the checkpoint.
        let thread = agent.sessions().load(&thread_id).await.unwrap();
        assert!(thread.messages.last().unwrap().tool_calls.is_empty());
    }

    #[tokio::test]
    async fn limit_without_observation_sends_notice() {
        let provider = Arc::new(SequentialMockProvider::from_responses(vec![make_tool_call_response(
            vec![make_tool_call("status.check", json!({}))],
            "",
        )]));
        let agent =
            Arc::new(AgentLoop::new(provider, dispatcher(), "mock-model").with_recursion_limit(0));

        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        assert_eq!(text_of(&events), LIMIT_NOTICE);
    }

    #[tokio::test]
    async fn provider_failure_is_one_error_then_end() {
        let (agent, _) = agent(SequentialMockProvider::new([Step::Fail(ProviderError::ApiError {
            status_code: 503,
            message: "Service Unavailable".into(),
        })]));

        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Error(err) => {
                assert_eq!(err.status, Some(503));
                assert_eq!(err.code.as_deref(), Some("provider_api_error"));
                assert!(err.req_id.is_some());
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events[1], StreamEvent::End);
    }

    #[tokio::test]
    async fn provider_error_body_is_masked_before_logging() {
        let leaky = || ProviderError::ApiError {
            status_code: 400,
            message: r#"{"error":"bad header Authorization: Bearer sk-live-abc123"}"#.into(),
        };
        let chain = redacted_chain(&leaky());
        assert!(!chain.is_empty());
        assert!(chain.iter().all(|entry| !entry.contains("sk-live-abc123")));
        assert!(chain[0].contains("Bearer ***"));

        let provider = Arc::new(SequentialMockProvider::new([Step::Fail(leaky())]));
        let sink = Arc::new(CollectingSink::new());
        let agent =
            Arc::new(AgentLoop::new(provider, dispatcher(), "mock-model").with_sink(sink.clone()));
        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        assert_eq!(events.last(), Some(&StreamEvent::End));

        let records = sink.records();
        let llm_error = records.iter().find(|r| r.kind == TraceKind::LlmError).unwrap();
        let message = llm_error.fields["message"].as_str().unwrap();
        assert!(!message.contains("sk-live-abc123"));
        assert!(message.contains("Bearer ***"));
    }

    #[tokio::test]
    async fn from_config_caps_completion_tokens() {
        let mut config = AppConfig::default();
        config.provider.max_tokens = Some(512);
        let provider = Arc::new(SequentialMockProvider::single_text("Ok."));
        let agent = Arc::new(AgentLoop::from_config(&config, provider.clone(), dispatcher()));

        let _ = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        assert_eq!(provider.requests()[0].max_tokens, Some(512));
    }

    #[tokio::test]
    async fn empty_response_is_an_explicit_error() {
        let (agent, _) = agent(SequentialMockProvider::single_text(""));

        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        match &events[0] {
            StreamEvent::Error(err) => assert_eq!(err.code.as_deref(), Some("empty_response")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events.last(), Some(&StreamEvent::End));
    }

    #[tokio::test]
    async fn trace_is_sent_before_end_when_enabled() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("notes.add", json!({"text": "x", "token": "secret-value"}))],
            "",
            "Ok.",
        ));
        let agent = Arc::new(AgentLoop::new(provider, dispatcher(), "mock-model").with_trace(true));

        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        let n = events.len();
        assert_eq!(events[n - 1], StreamEvent::End);
        let StreamEvent::Trace(records) = &events[n - 2] else {
            panic!("expected trace before end");
        };
        let kinds: Vec<TraceKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds[0], TraceKind::Start);
        assert!(kinds.contains(&TraceKind::LlmStart));
        assert!(kinds.contains(&TraceKind::ToolStart));
        assert!(kinds.contains(&TraceKind::ToolEnd));

        let tool_start = records.iter().find(|r| r.kind == TraceKind::ToolStart).unwrap();
        let preview = tool_start.fields["inputPreview"].as_str().unwrap();
        assert!(!preview.contains("secret-value"));
    }

    #[tokio::test]
    async fn trace_is_not_sent_by_default() {
        let (agent, _) = agent(SequentialMockProvider::single_text("Ok."));
        let events = collect(agent.run_stream(ThreadId::new(), "Hallo")).await;
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Trace(_))));
    }

    #[tokio::test]
    async fn dropping_the_receiver_cancels_the_tool_call() {
        struct DropSignal(Option<tokio::sync::oneshot::Sender<()>>);
        impl Drop for DropSignal {
            fn drop(&mut self) {
                if let Some(tx) = self.0.take() {
                    let _ = tx.send(());
                }
            }
        }

        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel();
        let signal = Arc::new(std::sync::Mutex::new(Some(dropped_tx)));
        let manifest = Manifest {
            namespace: "test".into(),
            version: "0.1.0".into(),
            tools: vec![definition("slow.run", json!({"type": "object"}))],
        };
        let dispatcher = Dispatcher::builder(manifest)
            .handler(
                "slow.run",
                handler_fn(move |_| {
                    let signal = signal.clone();
                    async move {
                        let _guard = DropSignal(signal.lock().unwrap().take());
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(json!({}))
                    }
                }),
            )
            .build()
            .unwrap();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("slow.run", json!({}))],
            "Moment ...",
            "never",
        ));
        let agent = Arc::new(AgentLoop::new(provider, Arc::new(dispatcher), "mock-model"));

        let mut rx = agent.run_stream(ThreadId::new(), "Los");
        assert_eq!(rx.recv().await, Some(StreamEvent::Delta("Moment ...".into())));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("tool call was not cancelled")
            .unwrap();
    }
}
