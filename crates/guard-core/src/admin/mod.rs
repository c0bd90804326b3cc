//! Admin surface: read and replace a binding's upstream target at runtime.
//!
//! `GET <admin_path>` returns the live target; `POST <admin_path>` replaces it and persists it for
//! store-backed bindings. Both require the admin credentials. Success replies carry `id: 1`,
//! failures `id: -1` with status 400.

use crate::{
    middleware::{credentials_match, read_limited},
    node::NodeBinding,
    store::{ConfigStore, StoreError},
    types::{
        rejection_response, result_response, Credentials, InboundRequest, ProxyResponse,
        TargetError, TargetPayload, UpstreamTarget, REJECTED_ID,
    },
};
use http::Method;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

const SUCCESS_ID: i64 = 1;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("request not authorized")]
    Unauthorized,

    #[error("only get request allowed on local node")]
    LocalReadOnly,

    #[error("method not allowed on admin path: {0}")]
    MethodNotAllowed(Method),

    #[error("malformed payload")]
    MalformedPayload,

    #[error("invalid node url, url={url}, error={source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid node credentials, url={url}")]
    InvalidCredentials { url: String },

    #[error("failed to update config in db, error={0}")]
    Store(#[from] StoreError),
}

impl AdminError {
    #[must_use]
    pub fn into_response(self) -> ProxyResponse {
        rejection_response(&Value::from(REJECTED_ID), &self.to_string())
    }
}

pub struct AdminSurface {
    store: Arc<dyn ConfigStore>,
    admin_cred: Credentials,
    max_body_bytes: usize,
    read_timeout: Duration,
}

impl AdminSurface {
    #[must_use]
    pub fn new(
        store: Arc<dyn ConfigStore>,
        admin_cred: Credentials,
        max_body_bytes: usize,
        read_timeout: Duration,
    ) -> Self {
        Self { store, admin_cred, max_body_bytes, read_timeout }
    }

    /// Serves one admin request for `binding`.
    pub async fn handle(&self, binding: &NodeBinding, request: InboundRequest) -> ProxyResponse {
        match self.try_handle(binding, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(key = binding.key(), error = %e, "admin request rejected");
                e.into_response()
            }
        }
    }

    async fn try_handle(
        &self,
        binding: &NodeBinding,
        request: InboundRequest,
    ) -> Result<ProxyResponse, AdminError> {
        if !credentials_match(&self.admin_cred, request.headers()) {
            return Err(AdminError::Unauthorized);
        }

        let method = request.method().clone();
        match method {
            Method::GET => Ok(Self::get(binding)),
            Method::POST => {
                if binding.is_local() {
                    return Err(AdminError::LocalReadOnly);
                }
                let body = read_limited(request.into_body(), self.max_body_bytes, self.read_timeout)
                    .await
                    .map_err(|_| AdminError::MalformedPayload)?;
                let payload: TargetPayload = serde_json::from_slice(&body).map_err(|e| {
                    debug!(error = %e, "admin payload decode failed");
                    AdminError::MalformedPayload
                })?;
                self.update(binding, payload).await?;
                Ok(result_response(&Value::from(SUCCESS_ID), &"successfully updated"))
            }
            other => Err(AdminError::MethodNotAllowed(other)),
        }
    }

    /// Snapshot of the live target as a result envelope.
    #[must_use]
    pub fn get(binding: &NodeBinding) -> ProxyResponse {
        let payload = binding.snapshot().to_payload();
        result_response(&Value::from(SUCCESS_ID), &payload)
    }

    /// Replaces the live target and persists it for store-backed bindings.
    ///
    /// An empty `url` resets the binding to its environment defaults. A store failure leaves the
    /// in-memory change in place and is returned to the caller.
    ///
    /// # Errors
    ///
    /// [`AdminError::LocalReadOnly`], [`AdminError::InvalidUrl`], [`AdminError::InvalidCredentials`]
    /// or [`AdminError::Store`].
    pub async fn update(
        &self,
        binding: &NodeBinding,
        payload: TargetPayload,
    ) -> Result<UpstreamTarget, AdminError> {
        if binding.is_local() {
            return Err(AdminError::LocalReadOnly);
        }

        let target = if payload.url.is_empty() {
            debug!(key = binding.key(), "empty url sent, resetting to defaults");
            binding.defaults().clone()
        } else {
            let url = payload.url.clone();
            UpstreamTarget::try_from(payload).map_err(|e| match e {
                TargetError::Url(source) => AdminError::InvalidUrl { url, source },
                TargetError::Credentials => AdminError::InvalidCredentials { url },
            })?
        };

        let _serial = binding.lock_updates().await;
        binding.replace(target.clone());
        if binding.store_backed() {
            self.store.update(binding.key(), &target.to_payload()).await?;
        }

        info!(
            key = binding.key(),
            upstream = target.raw_url(),
            cred = target.cred().kind(),
            "proxy config updated"
        );
        Ok(target)
    }
}
