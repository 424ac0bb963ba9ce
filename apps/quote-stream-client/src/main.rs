//! Quote Stream Client Binary
//!
//! Connects to the quote service, logs its info and optionally follows one
//! swap quote stream until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_CLIENT_URL`: WebSocket endpoint
//!
//! ## Optional
//! - `QUOTE_CLIENT_TOKEN`: Bearer token for the handshake
//! - `QUOTE_CLIENT_COMPRESSION`: Offered compression, most preferred first
//!   (default: zstd,brotli,gzip,none)
//! - `QUOTE_CLIENT_CONNECT_TIMEOUT_SECS`: Handshake timeout (default: 10)
//! - `QUOTE_CLIENT_METRICS_PORT`: Prometheus metrics port (default: 0 = disabled)
//! - `QUOTE_CLIENT_INPUT_MINT`, `QUOTE_CLIENT_OUTPUT_MINT`, `QUOTE_CLIENT_AMOUNT`,
//!   `QUOTE_CLIENT_USER`: Quote stream to follow
//! - `OTEL_ENABLED`: Export spans over OTLP (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-stream-client)
//! - `RUST_LOG`: Extra log filter directives

use std::path::PathBuf;

use anyhow::Context as _;
use futures::StreamExt;
use quote_stream_client::{
    ClientConfig, Payload, QuoteClient, StreamTarget, SwapParams, SwapQuoteRequest,
    TransactionParams, init_metrics, init_telemetry,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("a rustls crypto provider is already installed");
    }

    let dotenv_path = load_dotenv();

    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!(dotenv = ?dotenv_path, "Starting Quote Stream Client");

    let config = ClientConfig::from_env()?;
    let target = StreamTarget::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        init_metrics(config.metrics_port).context("failed to start metrics exporter")?;
        tracing::info!(port = config.metrics_port, "Metrics exporter listening");
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let client = QuoteClient::connect(&config).await?;

    let info = client.get_info().await?;
    tracing::info!(info = %render(&info), "Service info");

    if let Some(target) = target {
        follow_quotes(&client, target, &shutdown_token).await?;
    } else {
        tracing::info!("No quote stream configured, waiting for shutdown");
        tokio::select! {
            () = shutdown_token.cancelled() => {}
            info = client.closed() => tracing::warn!(%info, "Connection closed by server"),
        }
    }

    let outcome = client.close().await;
    tracing::info!(close = %outcome, "Quote Stream Client stopped");
    Ok(())
}

/// Open a quote stream and log updates until shutdown or stream end.
async fn follow_quotes(
    client: &QuoteClient,
    target: StreamTarget,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<()> {
    let request = SwapQuoteRequest::new(
        SwapParams::new(target.input_mint, target.output_mint, target.amount),
        TransactionParams::new(target.user),
    );

    let opened = client.new_swap_quote_stream(request).await?;
    tracing::info!(
        stream_id = opened.stream_id,
        response = %render(&opened.response),
        "Following quote stream"
    );

    let mut stream = opened.stream;
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => {
                stream.cancel().await?;
                tracing::info!(stream_id = stream.stream_id(), "Quote stream cancelled");
                return Ok(());
            }
            item = stream.next() => match item {
                Some(Ok(quote)) => tracing::info!(quote = %render(&quote), "Quote update"),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    tracing::info!(stream_id = stream.stream_id(), "Quote stream ended");
                    return Ok(());
                }
            },
        }
    }
}

/// Render a payload as JSON for logging.
fn render(payload: &Payload) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| format!("{:?}", payload.as_value()))
}

fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.url,
        authenticated = config.token.is_some(),
        connect_timeout_secs = config.connect_timeout.as_secs(),
        metrics_port = config.metrics_port,
        subprotocols = ?config.subprotocols(),
        "Client settings"
    );
}

/// Load the nearest `.env`, searching the working directory and its
/// ancestors. Returns the file that was loaded.
fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let path = cwd
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())?;
    dotenvy::from_path(&path).ok()?;
    Some(path)
}

/// Cancel `shutdown_token` on Ctrl+C or SIGTERM.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let signal = match wait_for_signal().await {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signals");
            return;
        }
    };
    tracing::info!(signal, "Shutdown requested");
    shutdown_token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
}
