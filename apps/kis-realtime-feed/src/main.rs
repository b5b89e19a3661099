//! KIS Realtime Feed Binary
//!
//! Starts the realtime feed, subscribes the configured symbols and logs
//! every broadcast event.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kis-realtime-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIS_APPROVAL_KEY`: Realtime approval key issued by the REST token endpoint
//!
//! ## Optional
//! - `KIS_ENV`: REAL | DEMO (default: REAL)
//! - `KIS_WS_URL`: Feed URL (default: per environment)
//! - `KIS_CUSTTYPE`: P | B (default: P)
//! - `KIS_HTS_ID`: HTS id; enables execution notices
//! - `KIS_USER_ID`: User id for logging
//! - `KIS_SYMBOLS`: Comma separated symbols subscribed at startup
//! - `KIS_TR_ID_TICK`, `KIS_TR_ID_ASK_BID`, `KIS_TR_ID_NOTICE`,
//!   `KIS_TR_ID_NOTICE_DEMO`, `KIS_TR_ID_PING`: Transaction code overrides
//! - `FEED_CONNECT_MAX_RETRIES` / `FEED_CONNECT_RETRY_DELAY_MS`: Connect retry (default: 3 / 1000)
//! - `FEED_SEND_MAX_RETRIES` / `FEED_SEND_RETRY_DELAY_MS`: Send retry (default: 3 / 1000)
//! - `FEED_IDLE_TIMEOUT_SECS`: Idle watchdog, 0 disables (default: 120)
//! - `FEED_EVENT_QUEUE_CAPACITY`: Logged event queue size (default: 4096)
//! - `FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: kis-realtime-feed)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kis_realtime_feed::infrastructure::telemetry;
use kis_realtime_feed::{
    Broadcaster, ChannelSink, FeedConfig, FeedConnection, FeedEvent, FeedSupervisor,
    FeedSupervisorConfig, FrameDecoder, HealthServer, HealthServerState, ListenerFilter,
    WebSocketConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting KIS realtime feed");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = FeedConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Broadcaster with one logging listener
    let broadcaster = Arc::new(Broadcaster::new());
    let (sink, events) = ChannelSink::channel(config.event_queue_capacity);
    broadcaster.register(ListenerFilter::All, Arc::new(sink));
    let logger = tokio::spawn(log_events(events));

    // Feed connection and supervisor
    let decoder = FrameDecoder::new(config.message_types.clone());
    let connection = FeedConnection::new(
        config.connection_config(),
        Arc::new(WebSocketConnector::new()),
        decoder,
    );
    let supervisor = FeedSupervisor::new(
        connection,
        Arc::clone(&broadcaster),
        FeedSupervisorConfig {
            send_retry: config.send_retry(),
            recovery_retry: config.recovery_retry(),
            message_types: config.message_types.clone(),
        },
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        supervisor.clone(),
    ));
    let health_server = HealthServer::new(
        config.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Register symbols before starting so the first reconciliation covers them
    for symbol in &config.symbols {
        if let Err(e) = supervisor.subscribe(symbol).await {
            tracing::warn!(symbol = %symbol, error = %e, "Skipping configured symbol");
        }
    }

    supervisor
        .start(&config.principal())
        .await
        .context("failed to start realtime feed")?;

    tracing::info!(
        symbols = supervisor.subscribed_symbols().len(),
        "Realtime feed ready"
    );

    await_shutdown(shutdown_token).await;

    let shutdown = async {
        supervisor.stop().await;
        let _ = health.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        tracing::warn!("Shutdown timed out");
    }
    drop(supervisor);
    logger.abort();

    tracing::info!("Realtime feed stopped");
    Ok(())
}

/// Log every broadcast event.
async fn log_events(mut events: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            FeedEvent::Tick(tick) => tracing::info!(
                symbol = %tick.symbol,
                price = %tick.price,
                change = %tick.price_change,
                direction = tick.change_type.as_str(),
                volume = tick.volume,
                total_volume = tick.total_volume,
                "Tick"
            ),
            FeedEvent::Execution(notice) => tracing::info!(
                order_id = %notice.order_id,
                instrument = %notice.instrument,
                filled = notice.filled_quantity,
                price = %notice.fill_price,
                status = %notice.status,
                "Execution"
            ),
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        ws_url = %config.ws_url,
        symbols = config.symbols.len(),
        notices = config.hts_id.is_some(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(config = ?config, "Full configuration");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
