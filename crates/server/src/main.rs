use anyhow::Result;
use guard_core::{
    config::{AppConfig, LoggingConfig},
    metrics,
    runtime::GuardRuntime,
};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::{
    app::{self, MetricsEndpoint},
    listener,
};
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const WORKSPACE_TARGETS: [&str; 4] = ["guard_core", "server", "cli", "tests"];

/// `warn` for dependencies, `level` for the workspace crates.
fn workspace_filter(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Pretty output at `debug` in dev mode, JSON at `info` otherwise. `RUST_LOG` overrides the level;
/// the bare values `debug` and `trace` apply to the workspace crates only.
fn init_logging(logging: &LoggingConfig) {
    let default_level = if logging.dev_mode { "debug" } else { "info" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(level) if level == "debug" || level == "trace" => {
            EnvFilter::new(workspace_filter(&level))
        }
        Ok(_) => EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(workspace_filter(default_level))),
        Err(_) => EnvFilter::new(workspace_filter(default_level)),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if logging.dev_mode {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config.logging);
    info!("Starting JSON-RPC node guard");
    debug!(
        nodes = config.nodes.len(),
        failover = config.has_failover(),
        local = config.policy.has_local(),
        workers = config.server.num_workers,
        max_body_bytes = config.server.max_body_bytes,
        "Configuration loaded"
    );

    let addr = config
        .server
        .socket_addr()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {e}"))?;
    let metrics_addr = config
        .server
        .metrics_addr()
        .map_err(|e| anyhow::anyhow!("Invalid metrics address: {e}"))?;

    let metrics = match metrics_addr {
        Some(metrics_addr) => {
            let handle = metrics::init_prometheus_recorder();
            let listener = TcpListener::bind(metrics_addr).await?;
            Some(MetricsEndpoint { listener, handle })
        }
        None => {
            debug!("METRICS_PORT not set, metrics endpoint disabled");
            None
        }
    };

    let runtime = GuardRuntime::builder(config)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Runtime initialization failed: {e}"))?;

    let tcp = TcpListener::bind(addr).await?;
    info!(address = %addr, "RPC guard listening");

    app::run(runtime, tcp, metrics, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(
        "Shutdown signal received, starting graceful shutdown (timeout: {}s)",
        listener::GRACEFUL_SHUTDOWN_TIMEOUT.as_secs()
    );
}
