//! HTTP/1.1 accept loop.
//!
//! Each accepted connection gets its own task and serves a single request: keep-alive is off, and
//! the header read is bounded by a timeout. When the shutdown future resolves the listener stops
//! accepting, open connections are asked to finish, and the loop waits for them up to
//! [`GRACEFUL_SHUTDOWN_TIMEOUT`].

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use std::{future::Future, io, time::Duration};
use tokio::{net::TcpListener, sync::watch, task::JoinSet};
use tracing::{debug, info, warn};

/// How long in-flight connections get to finish after shutdown starts.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Only the local address lookup can fail; accept errors are logged and the loop carries on.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    header_read_timeout: Duration,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr()?;
    debug!(address = %local_addr, "accept loop started");

    let (close_tx, close_rx) = watch::channel(());
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };

        let service = TowerToHyperService::new(app.clone());
        let mut close_rx = close_rx.clone();
        connections.spawn(async move {
            let connection = http1::Builder::new()
                .keep_alive(false)
                .timer(TokioTimer::new())
                .header_read_timeout(header_read_timeout)
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = close_rx.changed() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                debug!(remote = %remote, error = %e, "connection closed with error");
            }
        });

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    close_tx.send_replace(());
    info!(open_connections = connections.len(), "listener closed, draining connections");

    let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "graceful shutdown timed out, aborting connections"
        );
        connections.abort_all();
    }

    Ok(())
}
