use crate::config::UpstreamConfig;
use crate::resolver::Shape;
use axum::http::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;

/// Result of a single (candidate, shape) attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Streamable(reqwest::Response),
    /// 2xx without an event-stream content type.
    NotStreamable(String),
    Http { status: StatusCode, message: String },
    Transport(String),
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Streamable(_) => "streamable",
            AttemptOutcome::NotStreamable(_) => "not_streamable",
            AttemptOutcome::Http { .. } => "http_error",
            AttemptOutcome::Transport(_) => "transport_error",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Streamable(_) => None,
            AttemptOutcome::NotStreamable(message)
            | AttemptOutcome::Http { message, .. }
            | AttemptOutcome::Transport(message) => Some(message),
        }
    }
}

pub fn shape_path(config: &UpstreamConfig, shape: Shape) -> &str {
    match shape {
        Shape::Completions => &config.completions_path,
        Shape::Conversation => &config.conversation_path,
    }
}

/// Issues one streaming request. Never errors: every failure mode is folded
/// into an [`AttemptOutcome`]. `request_timeout_ms` bounds the wait for the
/// response head (and for reading a failed attempt's body), never the relayed
/// stream itself.
pub async fn call_streaming(
    client: &reqwest::Client,
    config: &UpstreamConfig,
    api_key: &str,
    shape: Shape,
    body: &Value,
) -> AttemptOutcome {
    let url = join_url(&config.base_url, shape_path(config, shape));
    let wait = Duration::from_millis(config.request_timeout_ms);
    let req = client
        .post(url)
        .bearer_auth(api_key)
        .header(config.api_key_header.as_str(), api_key)
        .header(ACCEPT, mime::TEXT_EVENT_STREAM.as_ref())
        .json(body);

    let resp = match tokio::time::timeout(wait, req.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(err)) => return AttemptOutcome::Transport(err.to_string()),
        Err(_) => {
            return AttemptOutcome::Transport(format!(
                "no response within {}ms",
                config.request_timeout_ms
            ));
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let text = read_body(resp, wait).await;
        let message = extract_error_message(&text)
            .unwrap_or_else(|| fallback_status_message(status, &text));
        return AttemptOutcome::Http { status, message };
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !is_event_stream(&content_type) {
        let text = read_body(resp, wait).await;
        let message = extract_error_message(&text).unwrap_or_else(|| {
            format!("upstream returned a non-streaming response ({content_type})")
        });
        return AttemptOutcome::NotStreamable(message);
    }

    AttemptOutcome::Streamable(resp)
}

async fn read_body(resp: reqwest::Response, wait: Duration) -> String {
    match tokio::time::timeout(wait, resp.text()).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) | Err(_) => String::new(),
    }
}

pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .to_ascii_lowercase()
        .contains(mime::TEXT_EVENT_STREAM.essence_str())
}

/// Reads the `error` field of a JSON error body; objects are stringified.
pub fn extract_error_message(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn fallback_status_message(status: StatusCode, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        format!("upstream status {status}")
    } else {
        format!("upstream status {status}: {text}")
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if path == "v1" {
            path = "";
        } else if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
