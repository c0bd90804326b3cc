use thiserror::Error;

/// Failures talking to an upstream node.
///
/// Transport variants come from the HTTP client; the last three come from the response inspector
/// and mean the transport succeeded but the node did not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream request timed out")]
    Timeout,

    /// The request body was partly or fully written before the exchange failed; the transport
    /// cannot re-send it on this dispatch.
    #[error("request body was written; cannot re-send")]
    BodyWritten,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("failed to build http client: {0}")]
    ClientBuild(String),

    #[error("error reading response body: {0}")]
    ResponseBody(String),

    #[error("error unmarshaling response body: {0}")]
    Decode(String),

    #[error("jsonrpc response error: {0}")]
    Rpc(String),
}

impl UpstreamError {
    /// True when no usable response exists and the caller must synthesize one.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::Rpc(_))
    }
}
