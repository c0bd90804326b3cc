//! # Metrics
//!
//! Prometheus counters, gauges and histograms for the request path.
//!
//! Everything is recorded through the `metrics` facade macros. Until a recorder is installed they
//! are no-ops, so the worker pool and the failover engine record unconditionally and the server
//! installs the recorder at boot with [`init_prometheus_recorder`].
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `guard_dispatch_total` | counter | `node`, `outcome` |
//! | `guard_dispatch_duration_seconds` | histogram | `node` |
//! | `guard_failovers_total` | counter | `node`, `reason`, `error_type` |
//! | `guard_upstream_errors_total` | counter | `node`, `error_type` |
//! | `guard_fatal_errors_total` | counter | `node` |
//! | `guard_pool_queue_depth` | gauge | |
//! | `guard_pool_queue_wait_seconds` | histogram | |
//! | `guard_pool_jobs_total` | counter | `outcome` |
//! | `guard_requests_rejected_total` | counter | `stage` |

use crate::{middleware::Rejection, upstream::UpstreamError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Duration};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

// Node keys are operator-chosen and bounded by configuration, so they are safe as label values.

pub trait MetricsState {
    fn as_metric_str(&self) -> &'static str;
}

impl MetricsState for UpstreamError {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout => "timeout",
            Self::BodyWritten => "body_written",
            Self::Network(_) => "network",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ClientBuild(_) => "client_build",
            Self::ResponseBody(_) => "response_body",
            Self::Decode(_) => "decode",
            Self::Rpc(_) => "rpc",
        }
    }
}

impl MetricsState for Rejection {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::PathNotAllowed(_) => "path",
            Self::Unauthorized => "credentials",
            Self::InvalidBody => "body",
            Self::InvalidJson => "json",
            Self::MethodNotAllowed(_) => "method",
        }
    }
}

/// How a dispatch through the failover engine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The inspected primary, or an uninspected local node, answered.
    Healthy,
    /// A node error was relayed because no secondary exists.
    Relayed,
    /// The secondary answered after the primary failed.
    FailedOver,
    /// The last available dispatch failed and a 502 was synthesized.
    Failed,
}

impl MetricsState for DispatchOutcome {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Relayed => "relayed",
            Self::FailedOver => "failed_over",
            Self::Failed => "failed",
        }
    }
}

/// What a worker did with a dequeued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The caller went away before the job started.
    Skipped,
    /// The caller went away while the job ran.
    Discarded,
    Panicked,
}

impl MetricsState for JobOutcome {
    fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Discarded => "discarded",
            Self::Panicked => "panicked",
        }
    }
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Installs the process-wide Prometheus recorder on first call and returns its render handle.
///
/// If another recorder is already installed, a detached recorder is used instead so rendering
/// keeps working; its output will be empty.
pub fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "failed to install Prometheus recorder, using a detached one");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

pub fn record_dispatch(node: &str, outcome: DispatchOutcome, elapsed: Duration) {
    counter!(
        "guard_dispatch_total",
        "node" => node.to_string(),
        "outcome" => outcome.as_metric_str()
    )
    .increment(1);
    histogram!("guard_dispatch_duration_seconds", "node" => node.to_string())
        .record(elapsed.as_secs_f64());
}

/// `reason` is `transport` when the primary produced no usable response and `node` when it
/// answered with a JSON-RPC error or an undecodable body.
pub fn record_failover(node: &str, error: &UpstreamError) {
    let reason = if error.is_transport() { "transport" } else { "node" };
    counter!(
        "guard_failovers_total",
        "node" => node.to_string(),
        "reason" => reason,
        "error_type" => error.as_metric_str()
    )
    .increment(1);
}

pub fn record_upstream_error(node: &str, error: &UpstreamError) {
    counter!(
        "guard_upstream_errors_total",
        "node" => node.to_string(),
        "error_type" => error.as_metric_str()
    )
    .increment(1);
}

pub fn record_fatal(node: &str) {
    counter!("guard_fatal_errors_total", "node" => node.to_string()).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn record_queue_depth(depth: usize) {
    gauge!("guard_pool_queue_depth").set(depth as f64);
}

pub fn record_queue_wait(elapsed: Duration) {
    histogram!("guard_pool_queue_wait_seconds").record(elapsed.as_secs_f64());
}

pub fn record_job(outcome: JobOutcome) {
    counter!("guard_pool_jobs_total", "outcome" => outcome.as_metric_str()).increment(1);
}

/// `stage` names the admission check that refused the request.
pub fn record_rejection(stage: &'static str) {
    counter!("guard_requests_rejected_total", "stage" => stage).increment(1);
}
