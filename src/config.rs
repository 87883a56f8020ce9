use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const DEFAULT_MODEL: &str = "mistral-medium-latest";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read routing file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse routing file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid routing config: {0}")]
    Invalid(String),
}

/// Alias table and shape preferences. Loaded once at startup and shared
/// read-only between requests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub completions_first: BTreeSet<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        for name in [
            "mistral-large-latest",
            "mistral-medium-latest",
            "mistral-small-latest",
            "pixtral-large-latest",
            "codestral-latest",
            "ministral-8b-latest",
            "ministral-3b-latest",
            "open-mistral-nemo",
        ] {
            aliases.insert(name.to_string(), vec![name.to_string()]);
        }
        // The API only publishes size-qualified magistral variants, and the
        // "-latest" spellings come and go.
        aliases.insert(
            "magistral-latest".to_string(),
            vec![
                "magistral-medium-latest".to_string(),
                "magistral-small-latest".to_string(),
                "magistral-medium".to_string(),
                "magistral-small".to_string(),
            ],
        );
        aliases.insert(
            "magistral-medium-latest".to_string(),
            vec!["magistral-medium-latest".to_string()],
        );
        aliases.insert(
            "magistral-small-latest".to_string(),
            vec!["magistral-small-latest".to_string()],
        );

        let completions_first = [
            "magistral-latest",
            "magistral-medium-latest",
            "magistral-small-latest",
            "magistral-medium",
            "magistral-small",
            "codestral-latest",
            "pixtral-large-latest",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            default_model: default_model(),
            aliases,
            completions_first,
        }
    }
}

impl RoutingConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: RoutingConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::Invalid("default_model is empty".to_string()));
        }
        for (alias, candidates) in &self.aliases {
            if candidates.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "alias {alias} has no candidates"
                )));
            }
            if candidates.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "alias {alias} has a blank candidate"
                )));
            }
        }
        Ok(())
    }

    pub fn prefers_completions(&self, model: &str) -> bool {
        self.completions_first.contains(model)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub completions_path: String,
    pub conversation_path: String,
    pub request_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            api_key: None,
            api_key_header: "x-api-key".to_string(),
            completions_path: "/v1/chat/completions".to_string(),
            conversation_path: "/v1/conversations".to_string(),
            request_timeout_ms: 60_000,
        }
    }
}

impl UpstreamConfig {
    /// Blank keys count as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub per_file_chars: usize,
    pub total_chars: usize,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            per_file_chars: 50_000,
            total_chars: 150_000,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
