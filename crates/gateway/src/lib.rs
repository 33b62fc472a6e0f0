//! HTTP gateway for Toolwright.
//!
//! Streams agent turns to clients as server-sent events and exposes the tool
//! manifest and a health probe.
//!
//! Built on Axum; frames are produced by [`SseEncoder`].

pub mod sse;

pub use sse::SseEncoder;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use toolwright_agent::{AgentLoop, ClientError, StreamEvent};
use toolwright_config::GatewayConfig;
use toolwright_core::message::ThreadId;
use toolwright_core::tool::Manifest;

/// Response header carrying the thread a turn ran on.
pub const THREAD_ID_HEADER: &str = "x-thread-id";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
    pub encoder: SseEncoder,
}

impl GatewayState {
    pub fn new(agent: Arc<AgentLoop>, encoder: SseEncoder) -> Self {
        Self { agent, encoder }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static(THREAD_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/agent/stream", post(agent_stream_handler))
        .route("/health", get(health_handler))
        .route("/tools/manifest", get(manifest_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: SharedState, config: &GatewayConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config.body_limit);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Handlers ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    thread_id: Option<String>,
}

/// `POST /agent/stream` runs one turn and streams it back as SSE.
async fn agent_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StreamRequest>,
) -> Response {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        let err = ClientError::new("Prompt is required")
            .with_code("invalid_request")
            .with_status(400);
        let mut body = Vec::new();
        body.extend_from_slice(&state.encoder.encode(&StreamEvent::Error(err)));
        body.extend_from_slice(&state.encoder.encode(&StreamEvent::End));
        return sse_response(StatusCode::BAD_REQUEST, Body::from(body), None);
    }

    let thread_id = payload
        .thread_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ThreadId::from)
        .unwrap_or_default();
    info!(thread_id = %thread_id, prompt_len = prompt.len(), "Agent stream requested");

    let rx = state.agent.run_stream(thread_id.clone(), prompt);
    let encoder = state.encoder;
    let frames = ReceiverStream::new(rx)
        .map(move |event| Ok::<_, Infallible>(encoder.encode(&event)))
        .filter(|frame| frame.as_ref().is_ok_and(|bytes| !bytes.is_empty()));

    sse_response(StatusCode::OK, Body::from_stream(frames), Some(&thread_id))
}

fn sse_response(status: StatusCode, body: Body, thread_id: Option<&ThreadId>) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    if let Some(value) = thread_id.and_then(|id| HeaderValue::from_str(id.as_str()).ok()) {
        headers.insert(THREAD_ID_HEADER, value);
    }
    response
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.agent.dispatcher().len(),
    })
}

/// `GET /tools/manifest` returns the static tool manifest.
async fn manifest_handler(State(state): State<SharedState>) -> Json<Manifest> {
    Json(state.agent.dispatcher().list_tools().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use toolwright_agent::testing::{SequentialMockProvider, Step, make_tool_call, text_chunk};
    use toolwright_core::tool::{ToolDefinition, ToolMetadata, handler_fn};
    use toolwright_tools::Dispatcher;
    use tower::ServiceExt;

    fn echo_manifest() -> Manifest {
        Manifest {
            namespace: "test".into(),
            version: "0.1.0".into(),
            tools: vec![ToolDefinition {
                name: "echo".into(),
                description: "Echo the input".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
                output_schema: json!({"type": "object"}),
                metadata: ToolMetadata {
                    category: "test".into(),
                    deterministic: true,
                    scopes: vec![],
                    resource: "echo".into(),
                },
            }],
        }
    }

    fn test_state(provider: SequentialMockProvider) -> SharedState {
        let dispatcher = Dispatcher::builder(echo_manifest())
            .handler(
                "echo",
                handler_fn(|args: serde_json::Value| async move {
                    Ok(json!({"message": args["text"]}))
                }),
            )
            .build()
            .unwrap();
        let agent = AgentLoop::new(Arc::new(provider), Arc::new(dispatcher), "mock-model");
        Arc::new(GatewayState::new(Arc::new(agent), SseEncoder::default()))
    }

    fn app(provider: SequentialMockProvider) -> Router {
        build_router(test_state(provider), 1024 * 1024)
    }

    fn stream_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/agent/stream")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let response = app(SequentialMockProvider::default())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tools"], 1);
    }

    #[tokio::test]
    async fn manifest_endpoint_is_camel_case() {
        let response = app(SequentialMockProvider::default())
            .oneshot(Request::builder().uri("/tools/manifest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["namespace"], "test");
        assert_eq!(body["tools"][0]["name"], "echo");
        assert!(body["tools"][0]["inputSchema"].is_object());
        assert!(body["tools"][0]["outputSchema"].is_object());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_with_error_frame() {
        let provider = SequentialMockProvider::single_text("unused");
        let response = app(provider)
            .oneshot(stream_request(json!({"prompt": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let body = body_text(response).await;
        assert_eq!(
            body,
            "event: error\ndata: {\"message\":\"Prompt is required\",\
             \"code\":\"invalid_request\",\"status\":400}\n\n\
             event: end\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn stream_sends_deltas_then_end() {
        let provider = SequentialMockProvider::new([Step::Chunks(vec![
            text_chunk("Hallo "),
            text_chunk("Welt"),
        ])]);
        let response = app(provider)
            .oneshot(stream_request(json!({"prompt": "Hi", "threadId": "t-42"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(headers[THREAD_ID_HEADER], "t-42");

        let body = body_text(response).await;
        assert_eq!(body, "data: Hallo \n\ndata: Welt\n\nevent: end\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn missing_thread_id_gets_fresh_one() {
        let response = app(SequentialMockProvider::single_text("ok"))
            .oneshot(stream_request(json!({"prompt": "Hi"})))
            .await
            .unwrap();
        let thread_id = response.headers()[THREAD_ID_HEADER].to_str().unwrap().to_string();
        assert!(!thread_id.is_empty());
        assert!(body_text(response).await.ends_with("event: end\ndata: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn tool_turn_streams_final_answer() {
        let provider = SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("echo", json!({"text": "pong"}))],
            "",
            "Fertig.",
        );
        let body = body_text(
            app(provider)
                .oneshot(stream_request(json!({"prompt": "ping"})))
                .await
                .unwrap(),
        )
        .await;
        assert!(body.contains("data: Fertig.\n\n"), "{body}");
        assert!(!body.contains("event: error"));
    }

    #[tokio::test]
    async fn provider_failure_becomes_error_event() {
        let provider = SequentialMockProvider::new([Step::Fail(
            toolwright_core::error::ProviderError::AuthenticationFailed("Bearer sk-secret".into()),
        )]);
        let body = body_text(
            app(provider)
                .oneshot(stream_request(json!({"prompt": "Hi"})))
                .await
                .unwrap(),
        )
        .await;
        let error_at = body.find("event: error").unwrap();
        let end_at = body.find("event: end").unwrap();
        assert!(error_at < end_at);
        assert!(!body.contains("sk-secret"));
    }
}
