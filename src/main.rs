use search_bridge::{api, config, logging, queue, service_pool};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let pool = service_pool::get_service_pool()
        .await
        .expect("Failed to initialize service pool");
    let job_queue = Arc::new(
        queue::JobQueue::connect()
            .await
            .expect("Failed to connect to job queue"),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_handle = tokio::spawn(queue::run_worker(
        job_queue.clone(),
        pool.clone(),
        shutdown_rx,
    ));

    let app = api::create_router(pool.clone(), job_queue.clone());

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://{}:{}", config::get_config().host, port);

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %error, "HTTP server exited with error");
    }

    let _ = shutdown_tx.send(true);
    if let Err(error) = worker_handle.await {
        tracing::error!(error = %error, "Worker task failed to shut down cleanly");
    }
}

/// Wait for either Ctrl+C or, on Unix, SIGTERM, so orchestrators that send
/// SIGTERM on redeploy get the same graceful drain as a local Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received; draining in-flight work");
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    let config = config::get_config();
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    Ok((listener, config.port))
}
