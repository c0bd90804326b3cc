use crate::{
    types::{error_response, ProxyResponse},
    upstream::UpstreamError,
};
use http::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Per-request failures that leave the proxy with nothing to relay.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("upstream {key} failed: {source}")]
    Upstream {
        key: String,
        #[source]
        source: UpstreamError,
    },

    #[error("proxy shutting down")]
    ShuttingDown,

    #[error("internal proxy error")]
    Internal,
}

impl ProxyError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Envelope for the client. Upstream details stay in the logs.
    #[must_use]
    pub fn into_response(self, id: &Value) -> ProxyResponse {
        let message = match &self {
            Self::Upstream { .. } => "bad proxy request".to_string(),
            Self::ShuttingDown | Self::Internal => self.to_string(),
        };
        error_response(self.status(), id, &message)
    }
}
