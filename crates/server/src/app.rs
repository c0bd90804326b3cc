//! Serving a built runtime until shutdown or a fatal upstream error.

use crate::{listener, router};
use anyhow::Result;
use guard_core::{proxy::FatalError, runtime::GuardRuntime};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{debug, error, info};

/// Scrape listener plus the recorder it renders.
pub struct MetricsEndpoint {
    pub listener: TcpListener,
    pub handle: PrometheusHandle,
}

/// Serves `runtime` on `tcp` until `shutdown` resolves or the fatal channel fires.
///
/// Either way the listener stops accepting, open connections drain, and the worker pool stops.
///
/// # Errors
///
/// Returns the [`FatalError`] (with context) when the process must exit non-zero.
pub async fn run<F>(
    mut runtime: GuardRuntime,
    tcp: TcpListener,
    metrics: Option<MetricsEndpoint>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let header_read_timeout = runtime.config().server.header_read_timeout;
    let write_timeout = runtime.config().server.write_timeout;
    let mut fatal_rx = runtime
        .take_fatal_receiver()
        .ok_or_else(|| anyhow::anyhow!("fatal channel already taken"))?;

    if let Some(MetricsEndpoint { listener: metrics_tcp, handle }) = metrics {
        let mut stop = runtime.shutdown_receiver();
        info!(address = ?metrics_tcp.local_addr().ok(), "metrics endpoint listening");
        tokio::spawn(async move {
            let app = router::metrics_router(handle);
            let served = listener::serve(metrics_tcp, app, header_read_timeout, async move {
                let _ = stop.recv().await;
            });
            if let Err(e) = served.await {
                error!(error = %e, "metrics endpoint failed");
            }
        });
    }

    let app = router::create_router(runtime.pool_handle(), write_timeout);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(listener::serve(tcp, app, header_read_timeout, async {
        let _ = stop_rx.await;
    }));

    let fatal: Option<FatalError> = tokio::select! {
        () = shutdown => None,
        Some(fatal) = fatal_rx.recv() => {
            error!(key = %fatal.key, error = %fatal.source, "fatal upstream error, shutting down");
            Some(fatal)
        }
    };

    if stop_tx.send(()).is_err() {
        debug!("listener already stopped before the stop signal");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Server error occurred"),
        Err(e) => error!(error = %e, "Server task failed"),
    }
    runtime.shutdown().await;

    if let Some(fatal) = fatal {
        return Err(anyhow::Error::new(fatal).context("terminated by fatal upstream error"));
    }
    info!("Server shutdown complete");
    Ok(())
}
