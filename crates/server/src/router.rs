use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
        HeaderName, Method, StatusCode,
    },
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use guard_core::{
    runtime::PoolHandle,
    types::{BoxError, InboundRequest},
};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::debug;

static X_CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");
static X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

#[derive(Clone)]
pub struct AppState {
    pool: PoolHandle,
}

/// Single entry point for every path: admin, local and proxied traffic are all routed by the
/// pipeline behind the worker pool.
pub async fn handle_proxy(State(state): State<AppState>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    let request: InboundRequest = request.map(|body| body.map_err(BoxError::from).boxed_unsync());
    state.pool.dispatch(request).await.map(Body::from)
}

/// Rewrites any `OPTIONS` answer, including the CORS preflight, to `204 No Content`.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options {
        debug!(status = %response.status(), "answering OPTIONS with 204");
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.body_mut() = Body::empty();
    }
    response
}

fn cors_layer() -> CorsLayer {
    // Credentials cannot be combined with a literal `*`, so the request origin is echoed back.
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            ACCEPT_ENCODING,
            X_CSRF_TOKEN.clone(),
            CACHE_CONTROL,
            X_REQUESTED_WITH.clone(),
        ])
}

/// Builds the public router. `write_timeout` bounds the whole request, queueing included.
pub fn create_router(pool: PoolHandle, write_timeout: Duration) -> Router {
    Router::new()
        .fallback(handle_proxy)
        .with_state(AppState { pool })
        .layer(TimeoutLayer::new(write_timeout))
        .layer(cors_layer())
        .layer(axum_middleware::from_fn(preflight_no_content))
}

#[allow(clippy::unused_async)]
pub async fn handle_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

/// Router for the scrape port. It is bound separately so `/metrics` never shadows a proxied path.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(handle_metrics)).with_state(handle)
}
