use stream_relay::{
    api::{build_router, AppState},
    config::Config,
    consumers,
    messaging::StreamContext,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration; a broken profile must not fall back to another binder
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "stream_relay={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting stream relay v{}", env!("CARGO_PKG_VERSION"));

    // Build binder registry, bindings, error router and dispatcher
    let context = StreamContext::from_config(&config.stream).await?;
    tracing::info!(binder = %context.binder_id(), "Active binder ready");

    consumers::register(context.dispatcher(), context.router()).await?;

    let app_state = AppState::new(context.dispatcher().clone())
        .with_context(context.clone())
        .with_prometheus(config.observability.prometheus_enabled);
    let app = build_router(app_state);

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP server listening on http://{}", http_addr);
    tracing::info!("   Invoice producer: POST http://{}/sendInvoice", http_addr);
    tracing::info!("   Payment producer: POST http://{}/sendPayment", http_addr);

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down stream relay");
    context.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
