use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use huddle_api::{create_router, AppState};
use huddle_core::{Config, SignalingServer};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HuddleServer {
    config: Arc<Config>,
    signaling: Arc<SignalingServer>,
}

impl HuddleServer {
    pub fn new(config: Config, signaling: Arc<SignalingServer>) -> Self {
        Self {
            config: Arc::new(config),
            signaling,
        }
    }

    /// Start the HTTP server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(Arc::clone(&self.signaling), Arc::clone(&self.config));
        let limiters = state.rate_limiters.clone();
        let signaling = Arc::clone(&self.signaling);
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(limiters) = &limiters {
                            limiters.prune();
                        }
                        debug!(
                            rooms = signaling.room_count(),
                            participants = signaling.participant_count(),
                            "Signaling stats"
                        );
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        let mut http_handle = self.start_http_server(state, shutdown_rx).await?;

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        if shutdown_tx.send(true).is_err() {
            warn!("No shutdown listeners left");
        }

        // Closing every signaling connection lets upgraded sockets finish
        self.signaling.shutdown().await;

        if !http_handle.is_finished() {
            match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut http_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server task failed: {}", e),
                Err(_) => {
                    warn!("HTTP server did not drain in {}s, aborting", HTTP_DRAIN_TIMEOUT.as_secs());
                    http_handle.abort();
                }
            }
        }

        info!("Huddle server stopped");
        Ok(())
    }

    async fn start_http_server(
        &self,
        state: AppState,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(state);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(graceful)
            .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
