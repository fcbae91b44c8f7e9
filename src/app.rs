use crate::cache::ForecastCache;
use crate::config::Config;
use crate::forecast::{ForecastService, HttpForecastSource};
use crate::keys::FilterParams;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web::create_router;
use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Wire the store, cache, upstream client and forecast service together.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let upstream_url = config
            .upstream_url
            .clone()
            .context("UPSTREAM_URL must be set to serve forecasts")?;

        let store = config.open_store().context("Failed to open cache store")?;
        let cache = Arc::new(ForecastCache::new(store, config.cache_config()));
        let source = HttpForecastSource::new(upstream_url.clone(), config.upstream_timeout)
            .context("Failed to create upstream client")?;
        let forecast = Arc::new(ForecastService::new(cache, Arc::new(source)));

        info!(
            upstream = %upstream_url,
            backend = ?config.cache_backend,
            ttl = fmt_duration(config.cache_ttl),
            max_size = config.cache_max_size,
            "forecast service configured"
        );

        Ok(App {
            app_state: AppState::new(forecast),
            config,
        })
    }

    /// Warm the cache with each configured state's full-history view in the background.
    fn spawn_preload(&self) {
        if self.config.preload_states.is_empty() {
            return;
        }

        let views: Vec<FilterParams> = self
            .config
            .preload_states
            .iter()
            .map(|state| FilterParams {
                states: vec![state.clone()],
                ..Default::default()
            })
            .collect();
        let forecast = Arc::clone(&self.app_state.forecast);
        tokio::spawn(async move {
            forecast.preload_common_views(&views).await;
        });
    }

    /// Serve HTTP until a shutdown signal arrives, then drain within `shutdown_timeout`.
    pub async fn run(self) -> ExitCode {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, %addr, "failed to bind web server");
                return ExitCode::FAILURE;
            }
        };
        info!(%addr, "web server listening");

        self.spawn_preload();

        let router = create_router(self.app_state.clone(), self.config.upstream_timeout * 2);
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal_rx.await;
                })
                .await
        });

        wait_for_shutdown_signal().await;
        let _ = signal_tx.send(());

        let timeout = self.config.shutdown_timeout;
        info!(timeout = fmt_duration(timeout), "shutting down web server");
        match tokio::time::timeout(timeout, server).await {
            Ok(Ok(Ok(()))) => {
                info!("web server stopped");
                ExitCode::SUCCESS
            }
            Ok(Ok(Err(e))) => {
                error!(error = %e, "web server exited with error");
                ExitCode::FAILURE
            }
            Ok(Err(e)) => {
                error!(error = %e, "web server task panicked");
                ExitCode::FAILURE
            }
            Err(_) => {
                warn!(
                    timeout = fmt_duration(timeout),
                    "graceful shutdown timed out, exiting"
                );
                ExitCode::FAILURE
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
