#![allow(dead_code)]

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use chatrelay::app::{AppState, RuntimeConfig};
use chatrelay::config::{RoutingConfig, UpstreamConfig};
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_KEY: &str = "test-key";

/// How long `pause-*` and `stall-*` upstreams sit idle.
pub const UPSTREAM_PAUSE: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub shape: &'static str,
    pub model: String,
    pub authorization: Option<String>,
    pub api_key: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

pub type CallLog = Arc<Mutex<Vec<UpstreamCall>>>;

#[derive(Clone, Default)]
pub struct MockUpstream {
    pub calls: CallLog,
    /// Set once a `slow-*` response stream has been dropped by the server.
    pub stream_dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub fn conversation_sse(model: &str) -> String {
    format!(
        "event: message.output.delta\ndata: {}\n\nevent: conversation.response.done\ndata: {}\n\n",
        json!({"type": "message.output.delta", "content": format!("hello from {model}")}),
        json!({"type": "conversation.response.done"}),
    )
}

pub fn completions_sse(model: &str) -> String {
    format!(
        "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"role": "assistant", "content": "hello "}}]}),
        json!({"choices": [{"delta": {"content": [{"text": "from "}, {"text": model}]}}]}),
    )
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Behaviour is driven by the requested model name:
/// `fail-*` answers 500 with a JSON error naming the model and shape,
/// `json-*` answers 200 with a non-streaming JSON body,
/// `convonly-*` only streams on the conversation shape,
/// `slow-*` sends one delta and then never finishes,
/// `pause-*` goes quiet for [`UPSTREAM_PAUSE`] between two deltas,
/// `stall-*` waits [`UPSTREAM_PAUSE`] before sending headers,
/// anything else streams a short reply.
async fn respond(mock: &MockUpstream, shape: &'static str, model: &str) -> Response {
    if model.starts_with("fail-") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("{model} on {shape} failed")})),
        )
            .into_response();
    }
    if model.starts_with("json-") {
        return Json(json!({"error": {"message": format!("{model} cannot stream")}}))
            .into_response();
    }
    if model.starts_with("convonly-") && shape == "completions" {
        return (StatusCode::NOT_FOUND, "no such route").into_response();
    }
    if model.starts_with("stall-") {
        tokio::time::sleep(UPSTREAM_PAUSE).await;
    }
    if model.starts_with("slow-") {
        let first = format!(
            "data: {}\n\n",
            json!({"type": "message.output.delta", "content": "partial"})
        );
        let flag = DropFlag(mock.stream_dropped.clone());
        let stream = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(first))])
            .chain(futures_util::stream::pending())
            .map(move |item| {
                let _flag = &flag;
                item
            });
        return event_stream(Body::from_stream(stream));
    }
    if model.starts_with("pause-") {
        let frames = vec![
            (Duration::ZERO, paused_sse_part(0)),
            (UPSTREAM_PAUSE, paused_sse_part(1)),
            (Duration::ZERO, paused_sse_part(2)),
        ];
        let stream = futures_util::stream::iter(frames).then(|(delay, frame)| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Infallible>(Bytes::from(frame))
        });
        return event_stream(Body::from_stream(stream));
    }
    let body = if shape == "conversation" {
        conversation_sse(model)
    } else {
        completions_sse(model)
    };
    ([(CONTENT_TYPE, "text/event-stream; charset=utf-8")], body).into_response()
}

/// The three pieces a `pause-*` upstream sends, in order.
pub fn paused_sse_part(index: usize) -> String {
    match index {
        0 => format!(
            "data: {}\n\n",
            json!({"type": "message.output.delta", "content": "first "})
        ),
        1 => format!(
            "data: {}\n\n",
            json!({"type": "message.output.delta", "content": "second"})
        ),
        _ => format!(
            "data: {}\n\n",
            json!({"type": "conversation.response.done"})
        ),
    }
}

fn event_stream(body: Body) -> Response {
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn record(
    mock: &MockUpstream,
    shape: &'static str,
    headers: &HeaderMap,
    body: Value,
) -> Response {
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if let Ok(mut lock) = mock.calls.lock() {
        lock.push(UpstreamCall {
            shape,
            model: model.clone(),
            authorization: header(headers, "authorization"),
            api_key: header(headers, "x-api-key"),
            accept: header(headers, "accept"),
            body,
        });
    }
    respond(mock, shape, &model).await
}

pub async fn start_upstream() -> (SocketAddr, MockUpstream) {
    let mock = MockUpstream::default();

    async fn completions(
        axum::extract::State(mock): axum::extract::State<MockUpstream>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        record(&mock, "completions", &headers, body).await
    }

    async fn conversations(
        axum::extract::State(mock): axum::extract::State<MockUpstream>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        record(&mock, "conversation", &headers, body).await
    }

    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route("/v1/conversations", post(conversations))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, mock)
}

pub fn test_routing() -> RoutingConfig {
    let aliases = BTreeMap::from([
        (
            "chain".to_string(),
            vec![
                "fail-a".to_string(),
                "fail-b".to_string(),
                "ok-c".to_string(),
                "ok-d".to_string(),
            ],
        ),
        (
            "all-fail".to_string(),
            vec!["fail-x".to_string(), "fail-y".to_string()],
        ),
        (
            "not-streaming".to_string(),
            vec!["json-a".to_string(), "ok-z".to_string()],
        ),
        ("preferred".to_string(), vec!["ok-pref".to_string()]),
        (
            "conv-only".to_string(),
            vec!["convonly-m".to_string()],
        ),
    ]);
    RoutingConfig {
        default_model: "ok-default".to_string(),
        aliases,
        completions_first: BTreeSet::from(["ok-pref".to_string(), "convonly-m".to_string()]),
    }
}

pub fn test_runtime(base_url: String, api_key: Option<&str>) -> RuntimeConfig {
    test_runtime_with_timeout(base_url, api_key, 5_000)
}

pub fn test_runtime_with_timeout(
    base_url: String,
    api_key: Option<&str>,
    request_timeout_ms: u64,
) -> RuntimeConfig {
    RuntimeConfig {
        listen: "127.0.0.1:0".to_string(),
        metrics_path: "/metrics".to_string(),
        routing_file: None,
        upstream: UpstreamConfig {
            base_url,
            api_key: api_key.map(str::to_string),
            request_timeout_ms,
            ..UpstreamConfig::default()
        },
        attachments: Default::default(),
    }
}

pub struct TestContext {
    pub router: Router,
    pub state: AppState,
    pub calls: CallLog,
    pub upstream: MockUpstream,
    pub upstream_addr: SocketAddr,
}

impl TestContext {
    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn attempted(&self) -> Vec<(String, &'static str)> {
        self.calls()
            .into_iter()
            .map(|c| (c.model, c.shape))
            .collect()
    }

    pub fn upstream_stream_dropped(&self) -> bool {
        self.upstream.stream_dropped.load(Ordering::SeqCst)
    }
}

async fn setup_with(api_key: Option<&str>, request_timeout_ms: u64) -> TestContext {
    let (upstream_addr, upstream) = start_upstream().await;
    let runtime = test_runtime_with_timeout(
        format!("http://{upstream_addr}"),
        api_key,
        request_timeout_ms,
    );
    let state =
        chatrelay::app::state_with_routing(runtime, test_routing()).expect("build state");
    let router = chatrelay::app::build_app(state.clone());
    TestContext {
        router,
        state,
        calls: upstream.calls.clone(),
        upstream,
        upstream_addr,
    }
}

pub async fn setup_with_key(api_key: Option<&str>) -> TestContext {
    setup_with(api_key, 5_000).await
}

pub async fn setup_with_timeout(request_timeout_ms: u64) -> TestContext {
    setup_with(Some(TEST_KEY), request_timeout_ms).await
}

pub async fn setup() -> TestContext {
    setup_with_key(Some(TEST_KEY)).await
}
