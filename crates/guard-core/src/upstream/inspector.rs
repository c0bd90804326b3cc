use super::{http_client::buffer, UpstreamError};
use crate::types::{ProxyResponse, RpcOutcome};

/// Result of classifying a primary response.
#[derive(Debug)]
pub enum Inspection {
    /// Transport and RPC both succeeded; relay as-is.
    Healthy(ProxyResponse),
    /// The node answered but not usefully. `response` is kept so a deployment without a
    /// secondary can still relay what the node said.
    Failed { error: UpstreamError, response: ProxyResponse },
}

/// Reads the whole body and decodes `{result, error}`.
///
/// A non-null `error` or a body that is not a JSON object is a logical failure.
///
/// # Errors
///
/// Returns the transport error if the body cannot be read at all.
pub async fn inspect(response: reqwest::Response) -> Result<Inspection, UpstreamError> {
    let response = buffer(response).await?;
    Ok(classify(response))
}

/// Classifies an already buffered response.
#[must_use]
pub fn classify(response: ProxyResponse) -> Inspection {
    match serde_json::from_slice::<RpcOutcome>(response.body()) {
        Ok(outcome) => match outcome.error {
            Some(error) => Inspection::Failed { error: UpstreamError::Rpc(error.to_string()), response },
            None => Inspection::Healthy(response),
        },
        Err(e) => Inspection::Failed { error: UpstreamError::Decode(e.to_string()), response },
    }
}
