use super::{strip_hop_by_hop, UpstreamError};
use crate::types::ProxyResponse;
use bytes::Bytes;
use http::{header, Request, Response};
use reqwest::{Client, ClientBuilder};
use std::{error::Error as StdError, time::Duration};

/// Timeouts for upstream exchanges.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    /// Whole exchange, including reading the response body.
    pub request_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(5), request_timeout: Duration::from_secs(10) }
    }
}

/// Shared HTTP client used by every director.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns [`UpstreamError::ClientBuild`] if the TLS backend cannot be initialised.
    pub fn new(config: &UpstreamClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ClientBuild(e.to_string())
            })?;

        Ok(Self { client })
    }

    /// Sends `request` and returns the response once headers arrive.
    ///
    /// # Errors
    ///
    /// Returns a classified transport [`UpstreamError`].
    pub async fn send(&self, request: Request<Bytes>) -> Result<reqwest::Response, UpstreamError> {
        let request = reqwest::Request::try_from(request)
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        self.client.execute(request).await.map_err(|e| classify(&e))
    }

    /// Sends `request` and relays the response without inspection.
    ///
    /// # Errors
    ///
    /// Returns a classified transport [`UpstreamError`], including failures reading the body.
    pub async fn forward(&self, request: Request<Bytes>) -> Result<ProxyResponse, UpstreamError> {
        let response = self.send(request).await?;
        buffer(response).await
    }
}

/// Splits a reqwest response into status, relayable headers and fully read body.
///
/// # Errors
///
/// Returns [`UpstreamError::ResponseBody`] (or `Timeout`) if the body cannot be read.
pub async fn buffer(response: reqwest::Response) -> Result<ProxyResponse, UpstreamError> {
    let status = response.status();
    let version = response.version();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);

    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::ResponseBody(describe(&e))
        }
    })?;

    let mut relayed = Response::new(body);
    *relayed.status_mut() = status;
    *relayed.version_mut() = version;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

/// True when the failure happened after the request body started going out on the wire.
fn wrote_body(error: &reqwest::Error) -> bool {
    error.is_body() || chain_wrote_body(error.source())
}

/// Walks a source chain looking for hyper's report of a failed or aborted body write.
fn chain_wrote_body(mut source: Option<&(dyn StdError + 'static)>) -> bool {
    while let Some(err) = source {
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            if hyper_err.is_body_write_aborted() {
                return true;
            }
        }
        if err.to_string().contains("error writing a body") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Short description without URLs or credentials.
fn describe(error: &reqwest::Error) -> String {
    let mut message = String::new();
    let mut source = error.source();
    while let Some(err) = source {
        message = err.to_string();
        source = err.source();
    }
    if message.is_empty() {
        let mut message = error.to_string();
        if let Some(url) = error.url() {
            message = message.replace(url.as_str(), "<upstream>");
        }
        message
    } else {
        message
    }
}

pub(crate) fn classify(error: &reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout
    } else if wrote_body(error) {
        UpstreamError::BodyWritten
    } else if error.is_connect() {
        UpstreamError::Connect(describe(error))
    } else if error.is_builder() {
        UpstreamError::InvalidRequest(describe(error))
    } else {
        UpstreamError::Network(describe(error))
    }
}
