use anyhow::{Context, Result};
use tokio::net::TcpListener;

use smtp_bridge::api::{self, AppState};
use smtp_bridge::config::Settings;
use smtp_bridge::smtp::Dispatcher;
use smtp_bridge::telemetry;

fn main() -> Result<()> {
    let settings = Settings::from_env().context("failed to load settings")?;
    telemetry::init(&settings)?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.workers.max(1))
        .enable_all()
        .build()?
        .block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    tracing::info!("Starting {} application", settings.app_name);
    tracing::info!("SMTP Host: {}:{}", settings.smtp_host, settings.smtp_port);
    tracing::info!(
        "API Key Authentication: {}",
        if settings.api_key().is_some() {
            "Enabled"
        } else {
            "Disabled"
        }
    );

    let dispatcher = Dispatcher::from_settings(&settings.smtp())?;

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on: {}", addr);

    let app = api::router(AppState::new(settings, dispatcher));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down SMTP Bridge application");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
