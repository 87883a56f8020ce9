use crate::config::{AttachmentLimits, ConfigError, RoutingConfig, UpstreamConfig};
use crate::error::{AppError, AppResult};
use axum::Router;
use axum::http::{HeaderName, Method};
use axum::routing::{any, get};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::{Arc, Once, OnceLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub routing: Arc<RoutingConfig>,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
    /// Cancelled when the server begins shutting down; every request's
    /// token is a child of it.
    pub shutdown: CancellationToken,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub routing_file: Option<PathBuf>,
    pub upstream: UpstreamConfig,
    pub attachments: AttachmentLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            routing_file: None,
            upstream: UpstreamConfig::default(),
            attachments: AttachmentLimits::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = RuntimeConfig::default();
        let upstream_defaults = defaults.upstream.clone();
        let attachment_defaults = defaults.attachments;

        let api_key = env_string("CHATRELAY_API_KEY").or_else(|| env_string("MISTRAL_API_KEY"));
        let upstream = UpstreamConfig {
            base_url: env_string("CHATRELAY_UPSTREAM_BASE_URL")
                .unwrap_or(upstream_defaults.base_url),
            api_key,
            api_key_header: env_string("CHATRELAY_API_KEY_HEADER")
                .unwrap_or(upstream_defaults.api_key_header),
            completions_path: env_string("CHATRELAY_COMPLETIONS_PATH")
                .unwrap_or(upstream_defaults.completions_path),
            conversation_path: env_string("CHATRELAY_CONVERSATION_PATH")
                .unwrap_or(upstream_defaults.conversation_path),
            request_timeout_ms: env_parse("CHATRELAY_REQUEST_TIMEOUT_MS")
                .unwrap_or(upstream_defaults.request_timeout_ms)
                .max(1),
        };
        let attachments = AttachmentLimits {
            per_file_chars: env_parse("CHATRELAY_ATTACHMENT_PER_FILE_CHARS")
                .unwrap_or(attachment_defaults.per_file_chars),
            total_chars: env_parse("CHATRELAY_ATTACHMENT_TOTAL_CHARS")
                .unwrap_or(attachment_defaults.total_chars),
        };

        Self {
            listen: env_string("CHATRELAY_LISTEN").unwrap_or(defaults.listen),
            metrics_path: env_string("CHATRELAY_METRICS_PATH").unwrap_or(defaults.metrics_path),
            routing_file: env_string("CHATRELAY_ROUTING_FILE").map(PathBuf::from),
            upstream,
            attachments,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let routing = match &runtime.routing_file {
        Some(path) => RoutingConfig::from_file(path).map_err(routing_error)?,
        None => RoutingConfig::default(),
    };
    state_with_routing(runtime, routing)
}

pub fn state_with_routing(runtime: RuntimeConfig, routing: RoutingConfig) -> AppResult<AppState> {
    routing.validate().map_err(routing_error)?;
    if runtime.upstream.api_key().is_none() {
        tracing::warn!("no upstream api key configured; chat requests will be rejected");
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| AppError::internal("http_client_init_failed", err.to_string()))?;

    let metrics = init_metrics()?;

    tracing::info!(
        aliases = routing.aliases.len(),
        completions_first = routing.completions_first.len(),
        default_model = %routing.default_model,
        upstream = %runtime.upstream.base_url,
        "routing loaded"
    );

    Ok(AppState {
        runtime: Arc::new(runtime),
        routing: Arc::new(routing),
        http,
        metrics,
        shutdown: CancellationToken::new(),
    })
}

fn routing_error(err: ConfigError) -> AppError {
    AppError::internal("routing_config_invalid", err.to_string())
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::internal(
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::internal("metrics_init_failed", "metrics recorder not available")
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/api/chat", any(crate::handlers::chat))
        .route("/chat", any(crate::handlers::chat))
        .route(&metrics_path, get(crate::handlers::metrics))
        .with_state(state)
        .layer(cors)
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(TraceLayer::new_for_http())
}
