//! Request admission: path whitelist, credential check, capped body read, JSON-RPC parse and
//! method whitelist, in that order.
//!
//! Admin-path diversion happens before any of these checks and lives in the pipeline router.

use super::auth::credentials_match;
use crate::{
    config::AccessPolicy,
    metrics::{self, MetricsState},
    types::{rejection_response, BoxError, JsonRpcRequest, ProxyResponse, REJECTED_ID},
};
use bytes::Bytes;
use http::{request::Parts, HeaderMap, Request};
use http_body::Body;
use http_body_util::{BodyExt, Limited};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a request is refused before reaching an upstream.
///
/// The display strings are the client-visible error messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("path not allowed {0}")]
    PathNotAllowed(String),

    #[error("request not authorized")]
    Unauthorized,

    #[error("invalid size limited body")]
    InvalidBody,

    #[error("invalid json")]
    InvalidJson,

    #[error("method not allow: {0}")]
    MethodNotAllowed(String),
}

impl Rejection {
    /// 400 with `{"jsonrpc":"2.0","id":-1,"error":...}`.
    #[must_use]
    pub fn into_response(self) -> ProxyResponse {
        rejection_response(&Value::from(REJECTED_ID), &self.to_string())
    }
}

/// A request that passed every check, with its body fully buffered.
#[derive(Debug)]
pub struct ValidatedRequest {
    pub parts: Parts,
    pub body: Bytes,
    pub rpc: JsonRpcRequest,
}

/// Reads `body` up to `limit` bytes within `timeout`.
///
/// Exceeding the cap, a read error and a timeout all map to [`Rejection::InvalidBody`].
///
/// # Errors
///
/// See above.
pub async fn read_limited<B>(body: B, limit: usize, timeout: Duration) -> Result<Bytes, Rejection>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<BoxError>,
{
    match limited_collect(body, limit, timeout).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) => {
            warn!(error = %e, limit, "error reading size limited body");
            Err(Rejection::InvalidBody)
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis(), "timed out reading request body");
            Err(Rejection::InvalidBody)
        }
    }
}

// Built outside the async fn so the `Send` check sees the future through an opaque type.
fn limited_collect<B>(
    body: B,
    limit: usize,
    timeout: Duration,
) -> impl std::future::Future<
    Output = Result<Result<http_body_util::Collected<Bytes>, BoxError>, tokio::time::error::Elapsed>,
> + Send
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<BoxError>,
{
    tokio::time::timeout(timeout, Limited::new(body, limit).collect())
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    policy: Arc<AccessPolicy>,
    read_timeout: Duration,
}

impl RequestValidator {
    #[must_use]
    pub fn new(policy: Arc<AccessPolicy>, read_timeout: Duration) -> Self {
        Self { policy, read_timeout }
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// # Errors
    ///
    /// [`Rejection::PathNotAllowed`] when a path whitelist is set and `path` is not on it.
    pub fn check_path(&self, path: &str) -> Result<(), Rejection> {
        if self.policy.path_allowed(path) {
            Ok(())
        } else {
            Err(Rejection::PathNotAllowed(path.to_string()))
        }
    }

    /// # Errors
    ///
    /// [`Rejection::Unauthorized`] when the proxy credentials are not presented.
    pub fn check_credentials(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        if credentials_match(&self.policy.proxy_cred, headers) {
            Ok(())
        } else {
            Err(Rejection::Unauthorized)
        }
    }

    /// # Errors
    ///
    /// [`Rejection::InvalidJson`] when `raw` is not a JSON-RPC request object.
    pub fn parse(&self, raw: &[u8]) -> Result<JsonRpcRequest, Rejection> {
        serde_json::from_slice(raw).map_err(|e| {
            warn!(error = %e, "error unmarshaling request");
            Rejection::InvalidJson
        })
    }

    /// # Errors
    ///
    /// [`Rejection::MethodNotAllowed`] when a method whitelist is set and `method` is not on it.
    pub fn check_method(&self, method: &str) -> Result<(), Rejection> {
        if self.policy.method_allowed(method) {
            Ok(())
        } else {
            warn!(method, "method not allowed");
            Err(Rejection::MethodNotAllowed(method.to_string()))
        }
    }

    /// Runs every non-admin check in order and buffers the body.
    ///
    /// # Errors
    ///
    /// The first [`Rejection`] encountered.
    pub async fn validate<B>(&self, request: Request<B>) -> Result<ValidatedRequest, Rejection>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let result = self.admit(request).await;
        if let Err(rejection) = &result {
            metrics::record_rejection(rejection.as_metric_str());
        }
        result
    }

    async fn admit<B>(&self, request: Request<B>) -> Result<ValidatedRequest, Rejection>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();

        self.check_path(parts.uri.path())?;
        self.check_credentials(&parts.headers)?;
        let body = read_limited(body, self.policy.max_body_bytes, self.read_timeout).await?;
        let rpc = self.parse(&body)?;
        self.check_method(&rpc.method)?;

        debug!(method = %rpc.method, bytes = body.len(), "request validated");
        Ok(ValidatedRequest { parts, body, rpc })
    }
}
