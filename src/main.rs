use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};

use ara_dashboard_service::config::Settings;
use ara_dashboard_service::feed::create_feed_backend;
use ara_dashboard_service::server::{create_app, AppState};
use ara_dashboard_service::session::DashboardSession;
use ara_dashboard_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    init_telemetry(&settings.log)?;
    tracing::info!("Configuration loaded");

    let backend = create_feed_backend(&settings.feeds, &settings.redis);
    let backend_type = backend.backend_type();

    let session = DashboardSession::from_settings(backend, &settings)?;
    let state = AppState::new(settings.clone(), &session, backend_type);
    tracing::info!(backend = backend_type.as_str(), "Dashboard session created");

    // Upstream authorization signal; held until shutdown
    let (auth_tx, auth_rx) = watch::channel(settings.dashboard.authorized);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let session_shutdown = shutdown_tx.subscribe();
    let session_handle = tokio::spawn(session.run(auth_rx, session_shutdown));

    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    tracing::info!("Waiting for dashboard session to stop...");
    match session_handle.await {
        Ok(state) => tracing::info!(state = %state, "Dashboard session ended"),
        Err(e) => tracing::error!(error = %e, "Dashboard session task failed"),
    }
    drop(auth_tx);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Tell the session to tear down its subscriptions
    let _ = shutdown_tx.send(());
}
