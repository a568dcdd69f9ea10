//! Long-running mode: harvest scheduler plus the optional read API.
//!
//! Both components share one shutdown channel. On SIGINT or SIGTERM the
//! channel flips, the scheduler drains its in-flight cycle, and the HTTP
//! server finishes open requests. Each gets at most `shutdown_grace`.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::PipelineError;
use crate::harvest::Pipeline;
use crate::migrate;
use crate::scheduler::HarvestScheduler;
use crate::server;
use crate::store::ImportStore;

pub struct Daemon {
    scheduler: Arc<HarvestScheduler>,
    store: ImportStore,
    /// Address for the read API; `None` runs the scheduler alone.
    bind: Option<String>,
    shutdown_grace: Duration,
}

impl Daemon {
    pub fn new(
        scheduler: Arc<HarvestScheduler>,
        store: ImportStore,
        bind: Option<String>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            bind,
            shutdown_grace,
        }
    }

    /// Wire a daemon from configuration.
    pub async fn from_config(config: &Config, with_server: bool) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::from_config(config).await?);
        migrate::apply_schema(pipeline.store().pool()).await?;
        let store = pipeline.store().clone();
        let scheduler = Arc::new(HarvestScheduler::new(
            pipeline,
            config.scheduler.interval(),
            config.scheduler.shutdown_grace(),
        ));
        let bind = with_server.then(|| config.server.bind.clone());
        Ok(Self::new(
            scheduler,
            store,
            bind,
            config.scheduler.shutdown_grace(),
        ))
    }

    /// Run until `signal` resolves, then shut everything down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (tx, rx) = watch::channel(false);

        let mut server_task = self.bind.map(|bind| {
            let store = self.store.clone();
            let rx = rx.clone();
            tokio::spawn(async move { server::serve(store, &bind, rx).await })
        });

        let scheduler = self.scheduler.clone();
        let scheduler_rx = rx.clone();
        let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_rx).await });

        let server_exit = async {
            match server_task.as_mut() {
                Some(handle) => Some(handle.await),
                None => std::future::pending().await,
            }
        };

        let early_server_exit = tokio::select! {
            _ = signal => {
                tracing::info!("shutdown signal received");
                None
            }
            exit = server_exit => exit,
        };

        let _ = tx.send(true);

        let scheduler_result = scheduler_task
            .await
            .map_err(|e| anyhow::anyhow!("scheduler task failed: {}", e))?;

        let server_result = match (early_server_exit, server_task) {
            (Some(joined), _) => flatten_server(joined),
            (None, Some(mut handle)) => {
                match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
                    Ok(joined) => flatten_server(joined),
                    Err(_) => {
                        handle.abort();
                        Err(PipelineError::ShutdownTimeout(self.shutdown_grace).into())
                    }
                }
            }
            (None, None) => Ok(()),
        };

        scheduler_result?;
        server_result?;
        tracing::info!("daemon stopped");
        Ok(())
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }
}

fn flatten_server(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("server task failed: {}", e)),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
