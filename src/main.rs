use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wadesk::api::{self, AdminAuth};
use wadesk::config::DeskConfig;
use wadesk::desk::Desk;
use wadesk::store::{ConversationStore, LibSqlBackend};
use wadesk::transport::BridgeTransport;

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Console logging always; a daily-rolling file as well when `log_dir` is set.
/// The guard must live as long as the process or buffered lines are lost.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = vec![fmt::layer().with_target(false).boxed()];
    let mut guard = None;

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "wadesk.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = DeskConfig::from_env();
    let _log_guard = init_tracing(config.log_dir.as_deref())?;

    let book = config.load_rule_book().context("loading triage rules")?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let store: Arc<dyn ConversationStore> = Arc::new(
        LibSqlBackend::new_local(&db_path)
            .await
            .with_context(|| format!("opening store at {}", db_path.display()))?,
    );

    let transport = Arc::new(BridgeTransport::new(&config.bridge_url));
    let desk = Desk::new(&config, store, transport, book);
    let auth = AdminAuth::new(config.admin_token.take());
    if !auth.is_configured() {
        tracing::warn!("ADMIN_TOKEN not set, operator endpoints will reject every request");
    }

    let (listener, port) = api::bind_with_retry("0.0.0.0", config.port, config.port_retry_attempts)
        .await
        .context("binding HTTP port")?;

    eprintln!("📱 wadesk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/health", port);
    eprintln!("   Events: ws://0.0.0.0:{}/ws", port);
    eprintln!("   Bridge: {}", config.bridge_url);
    eprintln!("   Database: {}", db_path.display());
    eprintln!(
        "   Tenants: {}",
        desk.triage
            .book()
            .tenants
            .iter()
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!(
        "   Delivery: {}-{} ms spacing, {} per minute\n",
        config.delivery.min_delay.as_millis(),
        config.delivery.max_delay.as_millis(),
        config.delivery.max_per_minute,
    );

    desk.launch()
        .await
        .context("starting WhatsApp bridge transport")?;

    let app = api::router(desk.app_state(auth));
    tracing::info!(port, "HTTP server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}
