use crate::app::AppState;
use crate::attachments;
use crate::chat::ChatRequest;
use crate::dispatch::{self, DispatchError};
use crate::error::{AppError, AppResult};
use crate::resolver;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// Chat relay endpoint. Resolves the requested model, walks the attempt
/// list, and pipes the first event stream back untouched.
pub async fn chat(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::POST {
        return AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed",
        )
        .into_response();
    }
    match relay_chat(&state, &body).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn relay_chat(state: &AppState, body: &[u8]) -> AppResult<Response> {
    let upstream = &state.runtime.upstream;
    let api_key = upstream.api_key().ok_or_else(|| {
        AppError::internal(
            "server_misconfigured",
            "Server configuration error: upstream API key is not set",
        )
    })?;

    let mut req: ChatRequest = serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request("invalid_json", format!("Invalid JSON body: {err}")))?;
    attachments::fold_attachments(&mut req, &state.runtime.attachments);

    let model = req.model_or(&state.routing.default_model).to_string();
    let attempts = resolver::resolve_attempts(&state.routing, &model);
    tracing::info!(
        model = %model,
        messages = req.messages.len(),
        attempts = attempts.len(),
        "relaying chat request"
    );

    let cancel = state.shutdown.child_token();
    let winner = dispatch::dispatch(&state.http, upstream, api_key, &attempts, &req, &cancel)
        .await
        .map_err(|err| match err {
            DispatchError::Exhausted { attempts, message } => {
                metrics::counter!("chatrelay_exhausted_total").increment(1);
                tracing::error!(model = %model, attempts, "all upstream attempts failed: {message}");
                AppError::bad_gateway("upstream_exhausted", message)
            }
            DispatchError::Cancelled => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                "Server is shutting down",
            ),
        })?;

    metrics::counter!(
        "chatrelay_relays_total",
        "shape" => winner.attempt.shape.as_str()
    )
    .increment(1);
    tracing::debug!(
        model = %model,
        candidate = %winner.attempt.candidate,
        shape = %winner.attempt.shape,
        attempt = winner.index,
        "relay started"
    );

    let stream = dispatch::relay_stream(winner.response, cancel);
    let mut resp = Body::from_stream(stream).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(resp)
}
