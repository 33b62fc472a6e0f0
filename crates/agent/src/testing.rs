//! Scripted providers for tests and local demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use toolwright_core::error::ProviderError;
use toolwright_core::message::{Message, MessageToolCall};
use toolwright_core::provider::{
    Provider, ProviderRequest, ProviderResponse, RETURN_VALUE_KEY, StreamChunk, Usage,
};

/// One scripted model round.
#[derive(Debug, Clone)]
pub enum Step {
    /// A complete response, streamed as a single chunk.
    Response(ProviderResponse),
    /// Raw stream chunks, sent as given.
    Chunks(Vec<StreamChunk>),
    Fail(ProviderError),
}

impl From<ProviderResponse> for Step {
    fn from(response: ProviderResponse) -> Self {
        Self::Response(response)
    }
}

/// A provider that plays back a script, one step per call.
///
/// Every request is recorded so tests can inspect what the loop sent.
/// Once the script is used up, calls fail with `NotConfigured`.
#[derive(Debug, Default)]
pub struct SequentialMockProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Step::Response))
    }

    /// A single text answer.
    pub fn single_text(text: &str) -> Self {
        Self::from_responses(vec![make_text_response(text)])
    }

    /// First the tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::from_responses(vec![
            make_tool_call_response(tool_calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_step(&self, request: ProviderRequest) -> Result<Step, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len()
        };
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("script exhausted at call #{call}"))
            })
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_step(request)? {
            Step::Response(response) => Ok(response),
            Step::Chunks(chunks) => {
                let text: String = chunks.iter().filter_map(|c| c.content.as_deref()).collect();
                let tool_calls = chunks.into_iter().flat_map(|c| c.tool_calls).collect();
                Ok(ProviderResponse {
                    message: Message::assistant(text).with_tool_calls(tool_calls),
                    usage: None,
                    model: "mock-model".into(),
                    metadata: serde_json::Map::new(),
                })
            }
            Step::Fail(err) => Err(err),
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let chunks = match self.next_step(request)? {
            Step::Response(response) => {
                let content = response.message.text();
                vec![StreamChunk {
                    content: (!content.is_empty()).then_some(content),
                    tool_calls: response.message.tool_calls,
                    done: true,
                    usage: response.usage,
                    return_value: response.metadata.get(RETURN_VALUE_KEY).cloned(),
                }]
            }
            Step::Chunks(chunks) => chunks,
            Step::Fail(err) => return Err(err),
        };

        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// A plain text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// A response with tool calls and optional thought content.
pub fn make_tool_call_response(
    tool_calls: Vec<MessageToolCall>,
    thought: &str,
) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(thought).with_tool_calls(tool_calls),
        usage: usage(),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// An empty message that only carries a structured return value.
pub fn make_return_value_response(value: serde_json::Value) -> ProviderResponse {
    let mut metadata = serde_json::Map::new();
    metadata.insert(RETURN_VALUE_KEY.into(), value);
    ProviderResponse {
        message: Message::assistant(""),
        usage: usage(),
        model: "mock-model".into(),
        metadata,
    }
}

/// A tool call with id `call_<name>`.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// A text-only stream chunk.
pub fn text_chunk(text: &str) -> StreamChunk {
    StreamChunk {
        content: Some(text.to_string()),
        ..StreamChunk::default()
    }
}
