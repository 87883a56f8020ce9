use chatrelay::error::AppError;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chatrelay=debug")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let state = chatrelay::app::load_state().await?;
    let addr: std::net::SocketAddr = state.runtime.listen.parse().map_err(
        |err: std::net::AddrParseError| AppError::internal("listen_invalid", err.to_string()),
    )?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::internal("listen_failed", err.to_string()))?;

    tokio::spawn(cancel_on_signal(state.shutdown.clone()));
    tracing::info!(
        %addr,
        upstream = %state.runtime.upstream.base_url,
        metrics_path = %state.runtime.metrics_path,
        "chatrelay listening"
    );

    let shutdown = state.shutdown.clone();
    axum::serve(listener, chatrelay::app::build_app(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|err| AppError::internal("serve_failed", err.to_string()))?;
    tracing::info!("chatrelay stopped");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then cancels `shutdown`. In-flight
/// dispatches answer 503 and open relays end, so the graceful drain finishes.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

