use crate::chat::ChatRequest;
use crate::config::UpstreamConfig;
use crate::encode;
use crate::resolver::Attempt;
use crate::upstream::{self, AttemptOutcome};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub const EXHAUSTED_FALLBACK_MESSAGE: &str = "all upstream attempts failed";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Every attempt failed; carries the most recent error only.
    #[error("{message}")]
    Exhausted { attempts: usize, message: String },
    #[error("dispatch cancelled")]
    Cancelled,
}

/// The attempt that won, with its still-unread streaming response.
#[derive(Debug)]
pub struct Winner {
    pub attempt: Attempt,
    pub index: usize,
    pub response: reqwest::Response,
}

/// Tries `attempts` strictly in order and returns the first streamable
/// response. Each attempt is issued exactly once.
pub async fn dispatch(
    client: &reqwest::Client,
    config: &UpstreamConfig,
    api_key: &str,
    attempts: &[Attempt],
    req: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<Winner, DispatchError> {
    let mut last_error: Option<String> = None;

    for (index, attempt) in attempts.iter().enumerate() {
        let body = encode::encode_request(attempt.shape, req, &attempt.candidate);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(attempt = index, "dispatch cancelled by caller");
                return Err(DispatchError::Cancelled);
            }
            outcome = upstream::call_streaming(client, config, api_key, attempt.shape, &body) => outcome,
        };

        metrics::counter!(
            "chatrelay_upstream_attempts_total",
            "shape" => attempt.shape.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);

        match outcome {
            AttemptOutcome::Streamable(response) => {
                tracing::info!(
                    candidate = %attempt.candidate,
                    shape = %attempt.shape,
                    attempt = index,
                    "upstream stream accepted"
                );
                return Ok(Winner {
                    attempt: attempt.clone(),
                    index,
                    response,
                });
            }
            failed => {
                let message = failed.error_message().unwrap_or_default().to_string();
                tracing::warn!(
                    candidate = %attempt.candidate,
                    shape = %attempt.shape,
                    attempt = index,
                    outcome = failed.label(),
                    "upstream attempt failed: {message}"
                );
                last_error = Some(message);
            }
        }
    }

    let message = last_error
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| EXHAUSTED_FALLBACK_MESSAGE.to_string());
    Err(DispatchError::Exhausted {
        attempts: attempts.len(),
        message,
    })
}

/// Forwards the upstream body chunk-by-chunk. Dropping the returned stream
/// (caller went away) cancels `cancel` and drops the upstream connection;
/// cancelling `cancel` from elsewhere ends the relay.
pub fn relay_stream(
    response: reqwest::Response,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let guard = cancel.clone().drop_guard();
    response
        .bytes_stream()
        .take_until(cancel.cancelled_owned())
        .map(move |chunk| {
            let _relay_guard = &guard;
            chunk.map_err(|err| {
                tracing::warn!("upstream stream ended with error: {err}");
                std::io::Error::other(err)
            })
        })
}
