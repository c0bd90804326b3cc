use super::pool::JobHandler;
use crate::{
    admin::AdminSurface,
    middleware::RequestValidator,
    node::NodeBinding,
    proxy::FailoverEngine,
    types::{InboundRequest, ProxyResponse},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Where a request goes after admin and local-prefix routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Index into the pipeline's bindings.
    Admin(usize),
    /// Local binding, with the prefix stripped.
    Local(String),
    Proxy,
}

/// Strips `prefix` from `path` on a segment boundary.
///
/// `/local` and `/local/...` match `/local`; `/localx` does not. An empty remainder becomes `/`.
#[must_use]
pub fn strip_local_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Full per-request pipeline run by each worker: route, validate, dispatch.
pub struct GuardPipeline {
    validator: RequestValidator,
    admin: AdminSurface,
    engine: FailoverEngine,
    bindings: Vec<Arc<NodeBinding>>,
}

impl GuardPipeline {
    #[must_use]
    pub fn new(
        validator: RequestValidator,
        admin: AdminSurface,
        engine: FailoverEngine,
        bindings: Vec<Arc<NodeBinding>>,
    ) -> Self {
        Self { validator, admin, engine, bindings }
    }

    #[must_use]
    pub fn bindings(&self) -> &[Arc<NodeBinding>] {
        &self.bindings
    }

    #[must_use]
    pub fn route(&self, path: &str) -> Route {
        if let Some(index) = self.bindings.iter().position(|b| b.admin_path() == path) {
            return Route::Admin(index);
        }
        if self.engine.has_local() {
            if let Some(rest) = strip_local_prefix(&self.validator.policy().local_prefix, path) {
                return Route::Local(rest.to_string());
            }
        }
        Route::Proxy
    }

    pub async fn process(&self, request: InboundRequest) -> ProxyResponse {
        let route = self.route(request.uri().path());
        debug!(method = %request.method(), path = request.uri().path(), ?route, "processing request");

        if let Route::Admin(index) = route {
            return self.admin.handle(&self.bindings[index], request).await;
        }

        let validated = match self.validator.validate(request).await {
            Ok(validated) => validated,
            Err(rejection) => return rejection.into_response(),
        };

        match route {
            Route::Local(path) => self.engine.dispatch_local(&validated, &path).await,
            _ => self.engine.dispatch(&validated).await,
        }
    }
}

#[async_trait]
impl JobHandler for GuardPipeline {
    async fn handle(&self, request: InboundRequest) -> ProxyResponse {
        self.process(request).await
    }
}
