use crate::chat::ChatRequest;
use crate::encode::{insert_tools, role_to_str};
use serde_json::{Map, Value, json};

/// Conversation inputs only carry plain text, so structured content is
/// flattened and images are replaced by a placeholder.
pub fn encode_request(req: &ChatRequest, upstream_model: &str) -> Value {
    let inputs: Vec<Value> = req
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": role_to_str(message.role),
                "content": message.content.flatten(),
            })
        })
        .collect();

    let mut obj = Map::new();
    obj.insert(
        "model".to_string(),
        Value::String(upstream_model.to_string()),
    );
    obj.insert("inputs".to_string(), Value::Array(inputs));
    obj.insert("stream".to_string(), Value::Bool(true));
    if let Some(instructions) = &req.instructions {
        obj.insert(
            "instructions".to_string(),
            Value::String(instructions.clone()),
        );
    }

    let args = &req.completion_args;
    let mut completion_args = Map::new();
    if let Some(temp) = args.temperature {
        completion_args.insert("temperature".to_string(), Value::from(temp));
    }
    if let Some(max) = args.max_tokens {
        completion_args.insert("max_tokens".to_string(), Value::from(max));
    }
    if let Some(top_p) = args.top_p {
        completion_args.insert("top_p".to_string(), Value::from(top_p));
    }
    obj.insert(
        "completion_args".to_string(),
        Value::Object(completion_args),
    );
    insert_tools(&mut obj, &req.tools);
    Value::Object(obj)
}
