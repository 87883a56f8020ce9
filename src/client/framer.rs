//! Classification of the relayed event stream.
//!
//! SSE framing and UTF-8 decoding are done by `eventsource-stream`; this
//! module turns each event payload into token deltas and at most one
//! terminal event. Both upstream event shapes are normalized: conversation
//! events (`message.output.delta` / `conversation.response.done`) and
//! completions events (`choices[0].delta.content`).

use serde::Deserialize;
use serde_json::Value;

const DONE_SENTINEL: &str = "[DONE]";
const DEFAULT_EVENT_NAME: &str = "message";

const CONVERSATION_DELTA: &str = "message.output.delta";
const CONVERSATION_DONE: &str = "conversation.response.done";
const CONVERSATION_ERROR: &str = "conversation.response.error";

pub const UNTERMINATED_STREAM_MESSAGE: &str = "stream ended before a completion marker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
    Aborted,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Done,
    Errored,
    Aborted,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Done | StreamState::Errored | StreamState::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FramerOptions {
    /// Report end-of-input without a completion marker as an error instead
    /// of a normal finish. A completions `[DONE]` sentinel counts as a marker.
    pub strict_termination: bool,
}

/// One decoded frame, in classification priority order.
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Delta(Option<String>),
    Completed,
    Failed(String),
    Choices(String),
    Ignored,
}

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    choices: Option<Vec<RawChoice>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChoice {
    #[serde(default)]
    delta: Option<RawDelta>,
    #[serde(default)]
    message: Option<RawDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDelta {
    #[serde(default)]
    content: Option<Value>,
}

impl RawFrame {
    fn classify(self) -> Frame {
        match self.kind.as_deref() {
            Some(CONVERSATION_DELTA) => {
                let text = match self.content {
                    Some(Value::String(s)) => Some(s),
                    Some(other) => segment_text(&other),
                    None => None,
                };
                return Frame::Delta(text.filter(|t| !t.is_empty()));
            }
            Some(CONVERSATION_DONE) => return Frame::Completed,
            _ => {}
        }
        if let Some(error) = self.error.filter(|e| !e.is_null()) {
            return Frame::Failed(value_to_message(error));
        }
        if self.kind.as_deref() == Some(CONVERSATION_ERROR) {
            let message = self
                .message
                .map(value_to_message)
                .unwrap_or_else(|| "upstream reported an error".to_string());
            return Frame::Failed(message);
        }
        if let Some(choice) = self.choices.and_then(|c| c.into_iter().next()) {
            let content = choice
                .delta
                .and_then(|d| d.content)
                .or_else(|| choice.message.and_then(|m| m.content));
            let text = match content {
                Some(Value::String(s)) => s,
                Some(other) => segment_text(&other).unwrap_or_default(),
                None => String::new(),
            };
            return Frame::Choices(text);
        }
        Frame::Ignored
    }
}

fn value_to_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Concatenates the `text` of each `{text}` segment in an array.
fn segment_text(value: &Value) -> Option<String> {
    let segments = value.as_array()?;
    let mut out = String::new();
    for segment in segments {
        if let Some(text) = segment.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    Some(out)
}

/// Decodes one event payload. Events without a `type` field take it from
/// the SSE event name.
fn parse_frame(event_name: &str, data: &str) -> Option<Frame> {
    let mut raw: RawFrame = serde_json::from_str(data).ok()?;
    if raw.kind.is_none() && !event_name.is_empty() && event_name != DEFAULT_EVENT_NAME {
        raw.kind = Some(event_name.to_string());
    }
    Some(raw.classify())
}

/// `Idle -> Streaming -> {Done | Errored | Aborted}`; a framer is single-use.
#[derive(Debug)]
pub struct StreamFramer {
    options: FramerOptions,
    state: StreamState,
    saw_sentinel: bool,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new(FramerOptions::default())
    }
}

impl StreamFramer {
    pub fn new(options: FramerOptions) -> Self {
        Self {
            options,
            state: StreamState::Idle,
            saw_sentinel: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Classifies one SSE event. Returns nothing once the framer is
    /// terminal, for `[DONE]`, and for payloads that are not JSON.
    pub fn event(&mut self, event_name: &str, data: &str) -> Option<StreamEvent> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = StreamState::Streaming;

        let data = data.trim();
        if data.is_empty() {
            return None;
        }
        if data == DONE_SENTINEL {
            self.saw_sentinel = true;
            return None;
        }
        match parse_frame(event_name, data)? {
            Frame::Delta(Some(text)) => Some(StreamEvent::Token(text)),
            Frame::Choices(text) if !text.is_empty() => Some(StreamEvent::Token(text)),
            Frame::Completed => {
                self.state = StreamState::Done;
                Some(StreamEvent::Done)
            }
            Frame::Failed(message) => {
                self.state = StreamState::Errored;
                Some(StreamEvent::Error(message))
            }
            Frame::Delta(None) | Frame::Choices(_) | Frame::Ignored => None,
        }
    }

    /// Upstream closed the connection.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.state.is_terminal() {
            return None;
        }
        if self.options.strict_termination && !self.saw_sentinel {
            self.state = StreamState::Errored;
            Some(StreamEvent::Error(UNTERMINATED_STREAM_MESSAGE.to_string()))
        } else {
            self.state = StreamState::Done;
            Some(StreamEvent::Done)
        }
    }

    /// User-initiated stop. Yields `Aborted` only if the stream was still
    /// live; later calls return `None`.
    pub fn abort(&mut self) -> Option<StreamEvent> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = StreamState::Aborted;
        Some(StreamEvent::Aborted)
    }
}
