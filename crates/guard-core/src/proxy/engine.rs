use super::{
    errors::ProxyError,
    fatal::{FatalError, FatalSender},
};
use crate::{
    metrics::{self, DispatchOutcome},
    middleware::ValidatedRequest,
    types::ProxyResponse,
    upstream::{inspect, Director, Inspection, UpstreamClient, UpstreamError},
};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, warn};

/// One-shot primary to secondary failover.
///
/// Both dispatches are built from the same validated body bytes, so the secondary always receives
/// exactly what the primary received. Only the primary's response is inspected.
pub struct FailoverEngine {
    client: UpstreamClient,
    primary: Director,
    secondary: Option<Director>,
    local: Option<Director>,
    fatal: FatalSender,
}

impl FailoverEngine {
    #[must_use]
    pub fn new(client: UpstreamClient, primary: Director, fatal: FatalSender) -> Self {
        Self { client, primary, secondary: None, local: None, fatal }
    }

    #[must_use]
    pub fn with_secondary(mut self, secondary: Director) -> Self {
        self.secondary = Some(secondary);
        self
    }

    #[must_use]
    pub fn with_local(mut self, local: Director) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    /// Dispatches a validated request to the primary, failing over once if needed.
    pub async fn dispatch(&self, request: &ValidatedRequest) -> ProxyResponse {
        let path = request.parts.uri.path();
        let id = &request.rpc.id;
        let started = Instant::now();

        let outcome = self.dispatch_primary(request, path).await;
        let primary_key = self.primary.binding().key();

        let Some(secondary) = &self.secondary else {
            return match outcome {
                Ok(Inspection::Healthy(response)) => {
                    metrics::record_dispatch(primary_key, DispatchOutcome::Healthy, started.elapsed());
                    response
                }
                Ok(Inspection::Failed { error, response }) => {
                    warn!(key = primary_key, error = %error, "relaying node error");
                    metrics::record_dispatch(primary_key, DispatchOutcome::Relayed, started.elapsed());
                    response
                }
                Err(error) => self.fail(&self.primary, error, id, started),
            };
        };

        let error = match outcome {
            Ok(Inspection::Healthy(response)) => {
                metrics::record_dispatch(primary_key, DispatchOutcome::Healthy, started.elapsed());
                return response;
            }
            Ok(Inspection::Failed { error, .. }) | Err(error) => error,
        };
        if error.is_transport() {
            error!(
                key = primary_key,
                error = %error,
                method = %request.rpc.method,
                "primary failed to respond, failing over"
            );
        } else {
            warn!(
                key = primary_key,
                error = %error,
                method = %request.rpc.method,
                "primary answered with an error, failing over"
            );
        }
        metrics::record_failover(primary_key, &error);

        match self.forward(secondary, request, path).await {
            Ok(response) => {
                metrics::record_dispatch(
                    secondary.binding().key(),
                    DispatchOutcome::FailedOver,
                    started.elapsed(),
                );
                response
            }
            Err(error) => self.fail(secondary, error, id, started),
        }
    }

    /// Dispatches to the local binding with `path` already stripped of the local prefix.
    ///
    /// Local traffic is neither inspected nor failed over.
    pub async fn dispatch_local(&self, request: &ValidatedRequest, path: &str) -> ProxyResponse {
        let id = &request.rpc.id;
        let Some(local) = &self.local else {
            // Routing only sends local traffic here when a local binding exists.
            return self.dispatch(request).await;
        };
        let started = Instant::now();
        match self.forward(local, request, path).await {
            Ok(response) => {
                metrics::record_dispatch(
                    local.binding().key(),
                    DispatchOutcome::Healthy,
                    started.elapsed(),
                );
                response
            }
            Err(error) => self.fail(local, error, id, started),
        }
    }

    async fn dispatch_primary(
        &self,
        request: &ValidatedRequest,
        path: &str,
    ) -> Result<Inspection, UpstreamError> {
        let upstream = self.primary.rewrite(&request.parts, path, request.body.clone())?;
        let response = self.client.send(upstream).await?;
        inspect(response).await
    }

    async fn forward(
        &self,
        director: &Director,
        request: &ValidatedRequest,
        path: &str,
    ) -> Result<ProxyResponse, UpstreamError> {
        let upstream = director.rewrite(&request.parts, path, request.body.clone())?;
        let response = self.client.forward(upstream).await?;
        debug!(key = director.binding().key(), status = %response.status(), "relaying response");
        Ok(response)
    }

    /// Final failure of the last available dispatch.
    fn fail(
        &self,
        director: &Director,
        error: UpstreamError,
        id: &Value,
        started: Instant,
    ) -> ProxyResponse {
        let key = director.binding().key().to_string();
        metrics::record_upstream_error(&key, &error);
        metrics::record_dispatch(&key, DispatchOutcome::Failed, started.elapsed());
        if error == UpstreamError::BodyWritten {
            metrics::record_fatal(&key);
            self.fatal.report(FatalError { key: key.clone(), source: error.clone() });
        } else {
            error!(key = %key, error = %error, "node failed to respond");
        }
        ProxyError::Upstream { key, source: error }.into_response(id)
    }
}
