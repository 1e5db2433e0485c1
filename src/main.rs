use axum::http::{header, HeaderValue, Method};
use chrono::FixedOffset;
use clap::Parser;
use inferlens::backend::{HttpMetricsSource, MetricsSource};
use inferlens::config::AppConfig;
use inferlens::handler::{self, AppState};
use inferlens::views::ViewRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Parser)]
#[command(
    name = "inferlens",
    about = "Metrics aggregation service for model-serving dashboards"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inferlens=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        backend = %config.backend.base_url,
        ordering = ?config.views.response_ordering,
        "starting inferlens"
    );

    let source: Arc<dyn MetricsSource> = Arc::new(HttpMetricsSource::new(&config.backend)?);
    let default_zone = FixedOffset::east_opt(config.aggregation.default_tz_offset_minutes * 60)
        .ok_or("aggregation.default_tz_offset_minutes out of range")?;
    let state = Arc::new(AppState {
        registry: ViewRegistry::new(source, &config.views),
        default_zone,
    });

    let allow_origin = match &config.server.cors_origin {
        Some(origin) => AllowOrigin::exact(origin.parse::<HeaderValue>()?),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = handler::router(state)
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
