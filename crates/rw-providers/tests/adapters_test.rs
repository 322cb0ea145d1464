//! Adapters against in-process HTTP servers speaking each backend's wire
//! format.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use rw_providers::anthropic::AnthropicAdapter;
use rw_providers::gemini::GeminiAdapter;
use rw_providers::ollama::OllamaAdapter;
use rw_providers::openai::OpenAiAdapter;
use rw_providers::{
    CompletionRequest, Message, ProviderAdapter, ProviderError, StreamChunk,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Captured {
    fn record(&self, headers: HeaderMap, body: Value) {
        self.headers.lock().unwrap().push(headers);
        self.bodies.lock().unwrap().push(body);
    }

    fn last_body(&self) -> Value {
        self.bodies.lock().unwrap().last().cloned().unwrap()
    }

    fn last_header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .unwrap()
            .last()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn sse(events: &[Value]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

fn sse_response(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

fn request(model: &str) -> CompletionRequest {
    CompletionRequest::new(
        model,
        vec![Message::system("be terse"), Message::user("hello")],
    )
    .with_max_tokens(64)
    .with_timeout(Duration::from_secs(5))
}

async fn collect(stream: rw_providers::ChunkStream) -> (String, Option<StreamChunk>, Vec<ProviderError>) {
    let items: Vec<_> = stream.collect().await;
    let mut text = String::new();
    let mut done = None;
    let mut errors = Vec::new();
    for item in items {
        match item {
            Ok(StreamChunk::Delta(t)) => text.push_str(&t),
            Ok(d @ StreamChunk::Done { .. }) => done = Some(d),
            Err(e) => errors.push(e),
        }
    }
    (text, done, errors)
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

async fn openai_chat(
    State(cap): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    cap.record(headers, body);
    if streaming {
        let events = sse(&[
            json!({"choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]}),
            json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 2}}),
        ]) + "data: [DONE]\n\n";
        sse_response(events).into_response()
    } else {
        Json(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {"role": "assistant", "content": "Hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        }))
        .into_response()
    }
}

async fn openai_models(headers: HeaderMap) -> StatusCode {
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Bearer good-key") => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

async fn openai_server() -> (String, Captured) {
    let cap = Captured::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/models", get(openai_models))
        .with_state(cap.clone());
    (spawn(app).await, cap)
}

#[tokio::test]
async fn test_openai_complete_normalizes_response() {
    let (url, cap) = openai_server().await;
    let adapter = OpenAiAdapter::new("sk-test").with_base_url(&url);

    let resp = adapter.complete(&request("gpt-4o")).await.unwrap();
    assert_eq!(resp.text(), "Hello");
    assert_eq!(resp.finish_reason, "stop");
    assert_eq!(resp.usage.input_tokens, 9);
    assert_eq!(resp.usage.output_tokens, 2);
    assert_eq!(resp.usage.total_tokens, 11);

    assert_eq!(cap.last_header("authorization").as_deref(), Some("Bearer sk-test"));
    let body = cap.last_body();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["max_tokens"], 64);
}

#[tokio::test]
async fn test_openai_stream_yields_deltas_then_done() {
    let (url, cap) = openai_server().await;
    let adapter = OpenAiAdapter::new("sk-test").with_base_url(&url);

    let (text, done, errors) = collect(adapter.stream(&request("gpt-4o")).await.unwrap()).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(text, "Hello");
    match done {
        Some(StreamChunk::Done { usage, finish_reason }) => {
            assert_eq!(usage.total_tokens, 11);
            assert_eq!(finish_reason, "stop");
        }
        other => panic!("expected Done, got {other:?}"),
    }
    assert_eq!(cap.last_body()["stream_options"]["include_usage"], true);
}

#[tokio::test]
async fn test_openai_validate_key() {
    let (url, _) = openai_server().await;
    let adapter = OpenAiAdapter::new("unused").with_base_url(&url);
    assert!(adapter.validate_key("good-key").await.is_ok());
    let err = adapter.validate_key("bad-key").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}

/// Sets its flag when the server drops the response body.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// An SSE body that never ends on its own: one delta every 20ms.
async fn endless_chat(State(dropped): State<Arc<AtomicBool>>) -> axum::response::Response {
    let guard = DropFlag(dropped);
    let events = futures_util::stream::unfold((0u64, guard), |(n, guard)| async move {
        if n > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let event = json!({"choices": [{"delta": {"content": "tick"}, "finish_reason": null}]});
        Some((Ok::<_, Infallible>(format!("data: {event}\n\n")), (n + 1, guard)))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        axum::body::Body::from_stream(events),
    )
        .into_response()
}

#[tokio::test]
async fn test_abandoned_stream_releases_the_connection() {
    let dropped = Arc::new(AtomicBool::new(false));
    let app = Router::new()
        .route("/v1/chat/completions", post(endless_chat))
        .with_state(Arc::clone(&dropped));
    let url = spawn(app).await;
    let adapter = OpenAiAdapter::new("sk-test").with_base_url(&url);

    let mut stream = adapter.stream(&request("gpt-4o")).await.unwrap();
    match stream.next().await {
        Some(Ok(StreamChunk::Delta(t))) => assert_eq!(t, "tick"),
        other => panic!("expected a delta, got {other:?}"),
    }
    assert!(!dropped.load(Ordering::SeqCst));
    drop(stream);

    for _ in 0..250 {
        if dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server kept streaming after the client dropped the stream");
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

async fn anthropic_messages(
    State(cap): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    cap.record(headers, body);
    if streaming {
        let events = sse(&[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi "}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "there"}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 3}}),
            json!({"type": "message_stop"}),
        ]);
        sse_response(events).into_response()
    } else {
        Json(json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Hi there"},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }))
        .into_response()
    }
}

async fn anthropic_server() -> (String, Captured) {
    let cap = Captured::default();
    let app = Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .with_state(cap.clone());
    (spawn(app).await, cap)
}

#[tokio::test]
async fn test_anthropic_complete_lifts_system_and_parses_tools() {
    let (url, cap) = anthropic_server().await;
    let adapter = AnthropicAdapter::new("ak-test").with_base_url(&url);

    let resp = adapter
        .complete(&request("claude-sonnet-4-20250514"))
        .await
        .unwrap();
    assert_eq!(resp.text(), "Hi there");
    assert_eq!(resp.finish_reason, "tool_use");
    assert_eq!(resp.tool_calls.len(), 1);
    assert_eq!(resp.tool_calls[0].name, "lookup");
    assert_eq!(resp.usage.total_tokens, 15);

    assert_eq!(cap.last_header("x-api-key").as_deref(), Some("ak-test"));
    assert_eq!(cap.last_header("anthropic-version").as_deref(), Some("2023-06-01"));
    let body = cap.last_body();
    assert_eq!(body["system"], "be terse");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_anthropic_stream_tracks_usage_across_events() {
    let (url, _) = anthropic_server().await;
    let adapter = AnthropicAdapter::new("ak-test").with_base_url(&url);

    let (text, done, errors) =
        collect(adapter.stream(&request("claude-sonnet-4-20250514")).await.unwrap()).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(text, "Hi there");
    match done {
        Some(StreamChunk::Done { usage, finish_reason }) => {
            assert_eq!(usage.input_tokens, 12);
            assert_eq!(usage.output_tokens, 3);
            assert_eq!(finish_reason, "end_turn");
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

async fn gemini_generate(
    State(cap): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    cap.record(headers, body);
    Json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "Bon"}, {"text": "jour"}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 4, "totalTokenCount": 11},
        "modelVersion": "gemini-2.5-flash"
    }))
}

async fn gemini_stream(headers: HeaderMap, Json(_body): Json<Value>) -> impl IntoResponse {
    let _ = headers;
    sse_response(sse(&[
        json!({"candidates": [{"content": {"parts": [{"text": "Bon"}]}}]}),
        json!({
            "candidates": [{"content": {"parts": [{"text": "jour"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 4}
        }),
    ]))
}

async fn gemini_server() -> (String, Captured) {
    let cap = Captured::default();
    let app = Router::new()
        .route(
            "/v1beta/models/gemini-2.5-flash:generateContent",
            post(gemini_generate),
        )
        .route(
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
            post(gemini_stream),
        )
        .with_state(cap.clone());
    (spawn(app).await, cap)
}

#[tokio::test]
async fn test_gemini_complete_joins_parts() {
    let (url, cap) = gemini_server().await;
    let adapter = GeminiAdapter::new("g-key").with_base_url(&url);

    let resp = adapter.complete(&request("gemini-2.5-flash")).await.unwrap();
    assert_eq!(resp.text(), "Bonjour");
    assert_eq!(resp.finish_reason, "STOP");
    assert_eq!(resp.usage.total_tokens, 11);
    assert_eq!(cap.last_header("x-goog-api-key").as_deref(), Some("g-key"));
    assert_eq!(
        cap.last_body()["systemInstruction"]["parts"][0]["text"],
        "be terse"
    );
}

#[tokio::test]
async fn test_gemini_stream_emits_done_after_finish_reason() {
    let (url, _) = gemini_server().await;
    let adapter = GeminiAdapter::new("g-key").with_base_url(&url);

    let (text, done, errors) =
        collect(adapter.stream(&request("gemini-2.5-flash")).await.unwrap()).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(text, "Bonjour");
    assert!(matches!(done, Some(StreamChunk::Done { usage, .. }) if usage.total_tokens == 11));
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

async fn ollama_chat(
    State(cap): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    cap.record(headers, body);
    if streaming {
        let lines = [
            json!({"model": "llama3.1:8b", "message": {"role": "assistant", "content": "Yo"}, "done": false}),
            json!({"model": "llama3.1:8b", "message": {"role": "assistant", "content": "!"}, "done": false}),
            json!({"model": "llama3.1:8b", "message": {"role": "assistant", "content": ""}, "done": true,
                   "done_reason": "stop", "prompt_eval_count": 20, "eval_count": 2}),
        ];
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
    } else {
        Json(json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": "Yo!"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 20,
            "eval_count": 2
        }))
        .into_response()
    }
}

async fn ollama_tags() -> Json<Value> {
    Json(json!({"models": [{"name": "llama3.1:8b"}, {"name": "phi4:latest"}]}))
}

async fn ollama_server() -> (String, Captured) {
    let cap = Captured::default();
    let app = Router::new()
        .route("/api/chat", post(ollama_chat))
        .route("/api/tags", get(ollama_tags))
        .with_state(cap.clone());
    (spawn(app).await, cap)
}

#[tokio::test]
async fn test_ollama_complete_and_stream() {
    let (url, cap) = ollama_server().await;
    let adapter = OllamaAdapter::new(None).with_base_url(&url);

    let resp = adapter.complete(&request("llama3.1:8b")).await.unwrap();
    assert_eq!(resp.text(), "Yo!");
    assert_eq!(resp.usage.total_tokens, 22);
    assert!(cap.last_header("authorization").is_none());

    let (text, done, errors) = collect(adapter.stream(&request("llama3.1:8b")).await.unwrap()).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(text, "Yo!");
    assert!(matches!(done, Some(StreamChunk::Done { usage, .. }) if usage.output_tokens == 2));
}

#[tokio::test]
async fn test_ollama_models_come_from_tags() {
    let (url, _) = ollama_server().await;
    let adapter = OllamaAdapter::new(None).with_base_url(&url);
    let models = adapter.models().await.unwrap();
    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["llama3.1:8b", "phi4:latest"]);
}

#[tokio::test]
async fn test_ollama_models_fall_back_to_catalog_when_unreachable() {
    let adapter = OllamaAdapter::new(None).with_base_url("http://127.0.0.1:9");
    let models = adapter.models().await.unwrap();
    assert_eq!(models, adapter.catalog());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

async fn rate_limited() -> (StatusCode, String) {
    (StatusCode::TOO_MANY_REQUESTS, "x".repeat(4096))
}

async fn server_error() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(3)).await;
    Json(json!({}))
}

#[tokio::test]
async fn test_non_success_status_carries_bounded_excerpt() {
    let app = Router::new()
        .route("/v1/chat/completions", post(rate_limited))
        .route("/v1/messages", post(server_error));
    let url = spawn(app).await;

    let err = OpenAiAdapter::new("k")
        .with_base_url(&url)
        .complete(&request("gpt-4o"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert!(err.is_retryable());
    match &err {
        ProviderError::Backend { excerpt, .. } => {
            assert!(excerpt.len() <= rw_providers::error::EXCERPT_LIMIT + "…".len())
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = AnthropicAdapter::new("k")
        .with_base_url(&url)
        .complete(&request("claude-sonnet-4-20250514"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("upstream exploded"));
}

#[tokio::test]
async fn test_deadline_surfaces_as_timeout() {
    let app = Router::new().route("/v1/chat/completions", post(slow));
    let url = spawn(app).await;

    let req = request("gpt-4o").with_timeout(Duration::from_millis(100));
    let err = OpenAiAdapter::new("k")
        .with_base_url(&url)
        .complete(&req)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let err = OpenAiAdapter::new("k")
        .with_base_url("http://127.0.0.1:9")
        .complete(&request("gpt-4o"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Backend {
            kind: rw_providers::FailureKind::Network,
            ..
        }
    ));
}
