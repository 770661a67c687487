#![doc = include_str!("../README.md")]

mod config;
mod input;
mod telemetry;

use backflow::{BoxError, Call, Dispatcher, HttpClient, StreamSource};
use clap::Parser;
use config::{CliArgs, CliConfig};
use input::Items;
use serde_json::Value;
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    let timeout = config.dispatch.request_timeout;
    let dispatcher = Dispatcher::new(config.dispatch.clone(), |_, address| {
        HttpClient::new(address, timeout)
    })?
    .with_cancellation(shutdown.clone());

    let reader = input::open(config.input.as_deref()).await?;
    let source = input::ndjson(reader);

    let signals = tokio::spawn(shutdown_signal(shutdown.clone()));
    let result = drain(&dispatcher, source, &config).await;
    signals.abort();

    match &result {
        Ok(items) => tracing::info!(items, "Input drained successfully"),
        Err(e) => tracing::error!("Dispatch failed: {e}"),
    }

    providers.shutdown();
    result.map(|_| ()).map_err(Into::into)
}

async fn drain(
    dispatcher: &Dispatcher<HttpClient>,
    source: StreamSource<Items>,
    config: &CliConfig,
) -> backflow::Result<usize> {
    let function = config.function.as_str();
    if config.is_batched() {
        dispatcher
            .process_batches_with(
                source,
                |batch| Some(Call::with_param(function, "items", Value::Array(batch))),
                log_response,
            )
            .await
    } else {
        dispatcher
            .process_stream_with(
                source,
                |item| Some(Call::with_param(function, "item", item)),
                log_response,
            )
            .await
    }
}

#[allow(clippy::unused_async)]
async fn log_response(response: Value) -> Result<(), BoxError> {
    tracing::debug!(%response, "Received response");
    Ok(())
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting dispatch with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting dispatch of `{}` across {} endpoints ({} in flight each, {} selection)",
            config.function,
            config.dispatch.endpoint_count,
            config.dispatch.maximum_request_per_client,
            config.dispatch.strategy,
        );
    }
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, cancelling dispatch...");
    token.cancel();
}
