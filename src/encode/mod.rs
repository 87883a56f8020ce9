pub mod completions;
pub mod conversation;

use crate::chat::{ChatRequest, Role};
use crate::resolver::Shape;
use serde_json::{Map, Value};

/// Builds the upstream body for `shape`, addressed to `upstream_model`.
pub fn encode_request(shape: Shape, req: &ChatRequest, upstream_model: &str) -> Value {
    match shape {
        Shape::Completions => completions::encode_request(req, upstream_model),
        Shape::Conversation => conversation::encode_request(req, upstream_model),
    }
}

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub fn insert_tools(obj: &mut Map<String, Value>, tools: &[Value]) {
    if !tools.is_empty() {
        obj.insert("tools".to_string(), Value::Array(tools.to_vec()));
    }
}
