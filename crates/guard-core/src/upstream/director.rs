use super::{strip_hop_by_hop, UpstreamError};
use crate::node::NodeBinding;
use bytes::Bytes;
use http::{
    header::{self, HeaderName, HeaderValue},
    request::Parts,
    Request,
};
use std::sync::Arc;
use tracing::debug;

pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");

/// Joins the target's path prefix with the request path.
///
/// Trailing slashes are trimmed from both before concatenation. A request path of exactly `/`
/// yields the target path unchanged, and a request path ending in `/` keeps one trailing `/`.
#[must_use]
pub fn join_path(target_path: &str, request_path: &str) -> String {
    if request_path == "/" {
        return target_path.to_string();
    }
    let mut joined = String::with_capacity(target_path.len() + request_path.len());
    joined.push_str(target_path.trim_end_matches('/'));
    joined.push_str(request_path.trim_end_matches('/'));
    if request_path.ends_with('/') {
        joined.push('/');
    }
    joined
}

/// Rewrites validated requests against one binding's live target.
#[derive(Debug, Clone)]
pub struct Director {
    binding: Arc<NodeBinding>,
}

impl Director {
    #[must_use]
    pub fn new(binding: Arc<NodeBinding>) -> Self {
        Self { binding }
    }

    #[must_use]
    pub fn binding(&self) -> &Arc<NodeBinding> {
        &self.binding
    }

    /// Builds the upstream request for `parts` with `path` as the inbound path.
    ///
    /// The live target is read once under the binding's read lock, which is held until the
    /// rewritten request is complete. `body` is a cheap clone of the validated bytes.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidRequest`] if the rewritten URI cannot be represented.
    pub fn rewrite(
        &self,
        parts: &Parts,
        path: &str,
        body: Bytes,
    ) -> Result<Request<Bytes>, UpstreamError> {
        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::CONTENT_LENGTH);

        let inbound_host = headers
            .remove(header::HOST)
            .or_else(|| parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()));
        if let Some(host) = inbound_host {
            headers.insert(X_FORWARDED_HOST.clone(), host);
        }

        let request = self.binding.with_target(|target| {
            let authority = target.authority();
            let authority_value = HeaderValue::from_str(&authority)
                .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
            headers.insert(X_ORIGIN_HOST.clone(), authority_value.clone());
            headers.insert(header::HOST, authority_value);

            let mut url = target.url().clone();
            url.set_path(&join_path(target.url().path(), path));
            url.set_query(parts.uri.query());

            if let Some(value) = target.authorization() {
                headers.insert(header::AUTHORIZATION, value.clone());
            }

            let mut builder = Request::builder().method(parts.method.clone()).uri(url.as_str());
            if let Some(map) = builder.headers_mut() {
                *map = headers;
            }
            builder.body(body).map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
        })?;

        debug!(
            key = self.binding.key(),
            method = %request.method(),
            upstream = %request.uri(),
            "rewrote request"
        );
        Ok(request)
    }
}
