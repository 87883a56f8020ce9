use crate::config::RoutingConfig;
use std::fmt;

/// Upstream request/response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Flat chat messages, `choices[].delta` events.
    Completions,
    /// Structured input items, typed `message.output.delta` events.
    Conversation,
}

impl Shape {
    pub fn as_str(self) -> &'static str {
        match self {
            Shape::Completions => "completions",
            Shape::Conversation => "conversation",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub candidate: String,
    pub shape: Shape,
}

impl Attempt {
    fn new(candidate: &str, shape: Shape) -> Self {
        Self {
            candidate: candidate.to_string(),
            shape,
        }
    }
}

/// Expands `model` into the ordered (candidate, shape) attempts. Unknown
/// models are tried as-is; the result is never empty.
pub fn resolve_attempts(routing: &RoutingConfig, model: &str) -> Vec<Attempt> {
    let fallback = [model.to_string()];
    let candidates: &[String] = match routing.aliases.get(model) {
        Some(list) if !list.is_empty() => list,
        _ => &fallback,
    };

    let mut attempts = Vec::with_capacity(candidates.len() * 2);
    for candidate in candidates {
        let order = if routing.prefers_completions(candidate) {
            [Shape::Completions, Shape::Conversation]
        } else {
            [Shape::Conversation, Shape::Completions]
        };
        for shape in order {
            attempts.push(Attempt::new(candidate, shape));
        }
    }
    attempts
}
