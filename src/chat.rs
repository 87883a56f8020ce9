use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IMAGE_PLACEHOLDER: &str = "[image]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text { text: String },
    /// `image_url` is either a URL string or `{ "url": ... }`; both are
    /// forwarded untouched.
    ImageUrl { image_url: Value },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<ContentSegment>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Flattens structured content to plain text: text segments are
    /// concatenated, images become a placeholder.
    pub fn flatten(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Segments(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        ContentSegment::Text { text } => out.push_str(text),
                        ContentSegment::ImageUrl { .. } => out.push_str(IMAGE_PLACEHOLDER),
                    }
                }
                out
            }
        }
    }

    pub fn has_images(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Segments(segments) => segments
                .iter()
                .any(|s| matches!(s, ContentSegment::ImageUrl { .. })),
        }
    }

    pub fn push_text(&mut self, extra: &str) {
        match self {
            MessageContent::Text(text) => text.push_str(extra),
            MessageContent::Segments(segments) => match segments.last_mut() {
                Some(ContentSegment::Text { text }) => text.push_str(extra),
                _ => segments.push(ContentSegment::Text {
                    text: extra.to_string(),
                }),
            },
        }
    }

    pub fn push_segment(&mut self, segment: ContentSegment) {
        match self {
            MessageContent::Text(text) => {
                let mut segments = Vec::with_capacity(2);
                if !text.is_empty() {
                    segments.push(ContentSegment::Text {
                        text: std::mem::take(text),
                    });
                }
                segments.push(segment);
                *self = MessageContent::Segments(segments);
            }
            MessageContent::Segments(segments) => segments.push(segment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CompletionArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl CompletionArgs {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none() && self.top_p.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.kind.eq_ignore_ascii_case("image") || self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "CompletionArgs::is_empty")]
    pub completion_args: CompletionArgs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatRequest {
    /// Requested model, or `default_model` when unset or blank.
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default_model)
    }
}
