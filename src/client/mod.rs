pub mod framer;

use crate::chat::ChatRequest;
use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use framer::{FramerOptions, StreamEvent, StreamFramer};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use framer::StreamState;

/// How a streamed reply ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done,
    Errored(String),
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Drives `stream` through SSE parsing and a fresh framer, calling
/// `on_token` for each delta in arrival order. `cancel` is checked at every
/// event await.
pub async fn consume_stream<S, E, F>(
    stream: S,
    options: FramerOptions,
    cancel: &CancellationToken,
    mut on_token: F,
) -> StreamOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(&str),
{
    let mut events = Box::pin(stream.eventsource());
    let mut framer = StreamFramer::new(options);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                framer.abort();
                return StreamOutcome::Aborted;
            }
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(ev)) => framer.event(&ev.event, &ev.data),
            Some(Err(EventStreamError::Transport(err))) => {
                tracing::warn!("relay stream read failed: {err}");
                return StreamOutcome::Errored(err.to_string());
            }
            Some(Err(_)) => {
                tracing::debug!("skipping undecodable relay event");
                continue;
            }
            None => framer.finish(),
        };

        match event {
            Some(StreamEvent::Token(text)) => on_token(&text),
            Some(StreamEvent::Done) => return StreamOutcome::Done,
            Some(StreamEvent::Error(message)) => return StreamOutcome::Errored(message),
            Some(StreamEvent::Aborted) => return StreamOutcome::Aborted,
            None => {}
        }
    }
}

/// Minimal client for the relay's chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    options: FramerOptions,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatrelay-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http(http, endpoint))
    }

    pub fn with_http(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            options: FramerOptions::default(),
        }
    }

    pub fn strict_termination(mut self, strict: bool) -> Self {
        self.options.strict_termination = strict;
        self
    }

    /// Sends `req` and streams the reply into `on_token`. Cancelling
    /// `cancel` stops both the pending request and the read loop.
    pub async fn stream_chat<F>(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
        on_token: F,
    ) -> StreamOutcome
    where
        F: FnMut(&str),
    {
        let send = self.http.post(&self.endpoint).json(req).send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Aborted,
            resp = send => resp,
        };
        let resp = match resp {
            Ok(resp) => resp,
            Err(err) => return StreamOutcome::Errored(err.to_string()),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Aborted,
                text = resp.text() => text.unwrap_or_default(),
            };
            return StreamOutcome::Errored(relay_error_message(status, &text));
        }

        consume_stream(resp.bytes_stream(), self.options, cancel, on_token).await
    }
}

fn relay_error_message(status: reqwest::StatusCode, text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| match v.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| format!("relay returned {status}"))
}
