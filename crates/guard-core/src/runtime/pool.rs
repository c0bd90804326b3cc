//! Bounded worker pool between the HTTP accept path and the request pipeline.
//!
//! A single queue of depth `N` feeds `N` long-lived workers, so accept-side backpressure shows up
//! as waiting on enqueue. Client cancellation is the caller's future being dropped: before
//! enqueue it abandons the job, after enqueue the worker either skips the job (not yet started)
//! or finishes it and discards the response.

use crate::{
    metrics::{self, JobOutcome},
    proxy::ProxyError,
    types::{InboundRequest, ProxyResponse, REJECTED_ID},
};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Work executed for each dequeued request.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, request: InboundRequest) -> ProxyResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool stopped before the job produced a response.
    #[error("worker pool is shut down")]
    Closed,
}

struct Job {
    request: InboundRequest,
    done: oneshot::Sender<ProxyResponse>,
    enqueued: Instant,
}

/// Cloneable submission side of the pool.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<Job>,
}

impl PoolHandle {
    /// Enqueues `request` and waits for its response.
    ///
    /// Dropping the returned future is how a caller cancels.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] if the pool shut down before answering.
    pub async fn submit(&self, request: InboundRequest) -> Result<ProxyResponse, PoolError> {
        let (done, done_rx) = oneshot::channel();
        let job = Job { request, done, enqueued: Instant::now() };
        self.tx.send(job).await.map_err(|_| PoolError::Closed)?;
        metrics::record_queue_depth(self.queued());
        done_rx.await.map_err(|_| PoolError::Closed)
    }

    /// Like [`PoolHandle::submit`] but maps pool shutdown to a 503 envelope.
    pub async fn dispatch(&self, request: InboundRequest) -> ProxyResponse {
        match self.submit(request).await {
            Ok(response) => response,
            Err(PoolError::Closed) => {
                ProxyError::ShuttingDown.into_response(&Value::from(REJECTED_ID))
            }
        }
    }

    /// Free queue slots right now.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Jobs waiting for a worker right now.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `num_workers` workers sharing one queue of the same depth.
    ///
    /// Workers stop when `shutdown` fires; jobs still queued at that point are dropped and their
    /// callers observe [`PoolError::Closed`].
    pub fn spawn<H: JobHandler>(
        num_workers: usize,
        handler: Arc<H>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(num_workers);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&handler),
                    shutdown.subscribe(),
                ))
            })
            .collect();

        info!(num_workers, "worker pool started");
        Self { handle: PoolHandle { tx }, workers }
    }

    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Waits for every worker to exit. Call after broadcasting shutdown.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task failed");
            }
        }
        debug!("all workers joined");
    }
}

async fn worker_loop<H: JobHandler>(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<H>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            job = async { queue.lock().await.recv().await } => job,
        };
        let Some(job) = job else { break };

        metrics::record_queue_wait(job.enqueued.elapsed());
        if job.done.is_closed() {
            debug!(worker_id, "caller went away before start, skipping job");
            metrics::record_job(JobOutcome::Skipped);
            continue;
        }

        // A panicking job must not take its worker down with it.
        let response = match AssertUnwindSafe(handler.handle(job.request)).catch_unwind().await {
            Ok(response) => {
                metrics::record_job(JobOutcome::Completed);
                response
            }
            Err(_) => {
                error!(worker_id, "job panicked, answering 500");
                metrics::record_job(JobOutcome::Panicked);
                ProxyError::Internal.into_response(&Value::from(REJECTED_ID))
            }
        };
        if job.done.send(response).is_err() {
            debug!(worker_id, "caller went away, response discarded");
            metrics::record_job(JobOutcome::Discarded);
        }
    }
    debug!(worker_id, "worker stopped");
}
