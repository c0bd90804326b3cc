//! Runtime assembly and lifecycle.
//!
//! [`GuardRuntime::builder`] connects the config store, brings up every node binding, wires the
//! failover engine and admin surface into a [`GuardPipeline`], and starts the [`WorkerPool`].
//!
//! # Example
//!
//! ```no_run
//! use guard_core::{config::AppConfig, runtime::GuardRuntime};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let mut runtime = GuardRuntime::builder(config).build().await?;
//!
//! let pool = runtime.pool_handle();
//! // ... hand `pool` to the HTTP layer ...
//!
//! if let Some(fatal) = runtime.take_fatal_receiver() {
//!     // ... one consumer watches for unrecoverable transport errors ...
//! #   drop(fatal);
//! }
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod pipeline;
pub mod pool;

pub use pipeline::{strip_local_prefix, GuardPipeline, Route};
pub use pool::{JobHandler, PoolError, PoolHandle, WorkerPool};

use crate::{
    admin::AdminSurface,
    config::AppConfig,
    middleware::RequestValidator,
    node::NodeBinding,
    proxy::{fatal_channel, FailoverEngine, FatalError, FatalSender},
    store::{ConfigStore, SqliteConfigStore, StoreError},
    types::NodeRole,
    upstream::{Director, UpstreamClient, UpstreamClientConfig, UpstreamError},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bring up node {key}: {source}")]
    Binding {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("no primary node configured")]
    NoPrimary,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub struct GuardRuntimeBuilder {
    config: AppConfig,
    store: Option<Arc<dyn ConfigStore>>,
    client: UpstreamClientConfig,
}

impl GuardRuntimeBuilder {
    /// Uses `store` instead of connecting to `config.store.server`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_client_config(mut self, client: UpstreamClientConfig) -> Self {
        self.client = client;
        self
    }

    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the store cannot be reached, a binding cannot be brought up, or
    /// the HTTP client cannot be built.
    pub async fn build(self) -> Result<GuardRuntime, RuntimeError> {
        let config = self.config;

        let store: Arc<dyn ConfigStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteConfigStore::from_config(&config.store).await?),
        };

        let mut bindings = Vec::with_capacity(config.nodes.len());
        for settings in config.nodes.iter().cloned() {
            let key = settings.key.clone();
            let binding = NodeBinding::bring_up(settings, store.as_ref())
                .await
                .map_err(|source| RuntimeError::Binding { key, source })?;
            bindings.push(Arc::new(binding));
        }

        let director_for = |role: NodeRole| {
            bindings.iter().find(|b| b.role() == role).map(|b| Director::new(Arc::clone(b)))
        };
        let primary = director_for(NodeRole::Primary).ok_or(RuntimeError::NoPrimary)?;
        let secondary = director_for(NodeRole::Secondary);
        let local = director_for(NodeRole::Local);

        let (fatal_tx, fatal_rx) = fatal_channel();
        let client = UpstreamClient::new(&self.client)?;
        let mut engine = FailoverEngine::new(client, primary, fatal_tx.clone());
        if let Some(secondary) = secondary {
            engine = engine.with_secondary(secondary);
        }
        if let Some(local) = local {
            engine = engine.with_local(local);
        }

        let policy = Arc::new(config.policy.clone());
        let validator = RequestValidator::new(Arc::clone(&policy), config.server.read_timeout);
        let admin = AdminSurface::new(
            Arc::clone(&store),
            policy.admin_cred.clone(),
            policy.max_body_bytes,
            config.server.read_timeout,
        );
        let pipeline = Arc::new(GuardPipeline::new(validator, admin, engine, bindings));

        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::spawn(config.server.num_workers, Arc::clone(&pipeline), &shutdown_tx);

        info!(
            nodes = pipeline.bindings().len(),
            failover = config.has_failover(),
            workers = config.server.num_workers,
            "guard runtime ready"
        );

        Ok(GuardRuntime {
            config,
            store,
            pipeline,
            pool,
            shutdown_tx,
            fatal_tx,
            fatal_rx: Some(fatal_rx),
        })
    }
}

/// Running proxy core: bindings, pipeline and worker pool.
pub struct GuardRuntime {
    config: AppConfig,
    store: Arc<dyn ConfigStore>,
    pipeline: Arc<GuardPipeline>,
    pool: WorkerPool,
    shutdown_tx: broadcast::Sender<()>,
    fatal_tx: FatalSender,
    fatal_rx: Option<mpsc::Receiver<FatalError>>,
}

impl GuardRuntime {
    #[must_use]
    pub fn builder(config: AppConfig) -> GuardRuntimeBuilder {
        GuardRuntimeBuilder { config, store: None, client: UpstreamClientConfig::default() }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<GuardPipeline> {
        &self.pipeline
    }

    /// Submission handle for the HTTP layer. Remains usable after shutdown and then answers 503.
    #[must_use]
    pub fn pool_handle(&self) -> PoolHandle {
        self.pool.handle()
    }

    /// The single consumer end of the fatal channel. Returns `None` after the first call.
    pub fn take_fatal_receiver(&mut self) -> Option<mpsc::Receiver<FatalError>> {
        self.fatal_rx.take()
    }

    /// Another reporting end of the fatal channel, for components outside the engine.
    #[must_use]
    pub fn fatal_sender(&self) -> FatalSender {
        self.fatal_tx.clone()
    }

    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stops the workers and waits for them. Queued jobs are abandoned, not drained.
    pub async fn shutdown(self) {
        info!("stopping worker pool");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "failed to broadcast shutdown (no receivers)");
        }
        self.pool.join().await;
        info!("guard runtime stopped");
    }
}
