use crate::chat::{ChatMessage, ChatRequest, ContentSegment, MessageContent};
use crate::encode::{insert_tools, role_to_str};
use serde_json::{Map, Value, json};

pub fn encode_request(req: &ChatRequest, upstream_model: &str) -> Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(instructions) = req
        .instructions
        .as_deref()
        .filter(|text| !text.trim().is_empty())
    {
        messages.push(json!({"role": "system", "content": instructions}));
    }
    messages.extend(req.messages.iter().map(encode_message));

    let mut obj = Map::new();
    obj.insert(
        "model".to_string(),
        Value::String(upstream_model.to_string()),
    );
    obj.insert("messages".to_string(), Value::Array(messages));
    obj.insert("stream".to_string(), Value::Bool(true));

    let args = &req.completion_args;
    if let Some(temp) = args.temperature {
        obj.insert("temperature".to_string(), Value::from(temp));
    }
    if let Some(top_p) = args.top_p {
        obj.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(max) = args.max_tokens {
        obj.insert("max_tokens".to_string(), Value::from(max));
    }
    insert_tools(&mut obj, &req.tools);
    Value::Object(obj)
}

fn encode_message(message: &ChatMessage) -> Value {
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Segments(segments) => {
            Value::Array(segments.iter().map(encode_segment).collect())
        }
    };
    json!({
        "role": role_to_str(message.role),
        "content": content,
    })
}

fn encode_segment(segment: &ContentSegment) -> Value {
    match segment {
        ContentSegment::Text { text } => json!({"type": "text", "text": text}),
        ContentSegment::ImageUrl { image_url } => {
            json!({"type": "image_url", "image_url": image_url})
        }
    }
}
