//! Environment builders and a harness that runs a [`GuardRuntime`] behind the public router.

use axum::{body::Body, Router};
use bytes::Bytes;
use guard_core::{
    config::{AppConfig, EnvSettings},
    runtime::GuardRuntime,
    store::{ConfigStore, MemoryConfigStore},
    upstream::UpstreamClientConfig,
};
use http::{header::AUTHORIZATION, HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tower::ServiceExt;

pub const NODE_KEY: &str = "btc";
pub const ADMIN_PATH: &str = "/config";
pub const ADMIN_TOKEN: &str = "admin-token";

/// An upstream address nothing listens on.
pub const DEAD_UPSTREAM: &str = "http://127.0.0.1:1/";

/// Environment variable map fed to [`EnvSettings::from_map`].
#[derive(Debug, Clone)]
pub struct TestEnv {
    vars: BTreeMap<String, String>,
}

impl TestEnv {
    fn base() -> Self {
        Self { vars: BTreeMap::new() }
            .set("NODE_KEY", NODE_KEY)
            .set("CONFIG_PATH", ADMIN_PATH)
            .set("CONFIG_TOKEN", ADMIN_TOKEN)
            .set("DB_SERVER", "sqlite::memory:")
    }

    /// Single-upstream deployment.
    #[must_use]
    pub fn single(node_url: &str) -> Self {
        Self::base().set("NODE_URL", node_url)
    }

    /// Primary/secondary deployment; the secondary's admin path is `/config2`.
    #[must_use]
    pub fn failover(primary_url: &str, secondary_url: &str) -> Self {
        Self::base()
            .set("NODE1_URL", primary_url)
            .set("NODE2_URL", secondary_url)
            .set("CONFIG_PATH_2", "/config2")
    }

    #[must_use]
    pub fn set(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    /// # Panics
    ///
    /// Panics if the variables do not form a valid configuration.
    #[must_use]
    pub fn config(&self) -> AppConfig {
        let settings = EnvSettings::from_map(self.vars.clone()).expect("decode test env");
        AppConfig::from_settings(&settings).expect("valid test env")
    }
}

/// Reply as seen by the client.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json reply body")
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Drives one request through `app` and collects the reply.
///
/// # Panics
///
/// Panics if the request cannot be built or the body cannot be read.
pub async fn send_request(
    app: Router,
    method: Method,
    path: &str,
    body: impl Into<Body>,
    auth: Option<&str>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    let request = builder.body(body.into()).expect("request");
    let response = app.oneshot(request).await.expect("router is infallible");

    let (parts, body) = response.into_parts();
    let body = body.collect().await.expect("response body").to_bytes();
    Reply { status: parts.status, headers: parts.headers, body }
}

/// A running runtime plus the router that fronts it.
pub struct GuardHarness {
    pub runtime: GuardRuntime,
    pub app: Router,
    pub store: Arc<dyn ConfigStore>,
}

impl GuardHarness {
    /// Starts against a fresh in-memory store.
    pub async fn start(env: &TestEnv) -> Self {
        Self::start_with_store(env, Arc::new(MemoryConfigStore::new())).await
    }

    /// # Panics
    ///
    /// Panics if the runtime fails to build.
    pub async fn start_with_store(env: &TestEnv, store: Arc<dyn ConfigStore>) -> Self {
        let config = env.config();
        let write_timeout = config.server.write_timeout;
        let runtime = GuardRuntime::builder(config)
            .with_store(Arc::clone(&store))
            .with_client_config(UpstreamClientConfig {
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(5),
            })
            .build()
            .await
            .expect("runtime builds");
        let app = server::router::create_router(runtime.pool_handle(), write_timeout);
        Self { runtime, app, store }
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: impl Into<Body>,
        auth: Option<&str>,
    ) -> Reply {
        send_request(self.app.clone(), method, path, body, auth).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Body>, auth: Option<&str>) -> Reply {
        self.send(Method::POST, path, body, auth).await
    }

    pub async fn get(&self, path: &str, auth: Option<&str>) -> Reply {
        self.send(Method::GET, path, Body::empty(), auth).await
    }

    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
    }
}
