//! Everything between a validated request and an upstream response.
//!
//! - [`director`]: rewrites the inbound request against the live target
//! - [`http_client`]: shared reqwest client with transport error classification
//! - [`inspector`]: classifies the primary's response at the JSON-RPC level

pub mod director;
pub mod errors;
pub mod http_client;
pub mod inspector;

pub use director::{join_path, Director};
pub use errors::UpstreamError;
pub use http_client::{UpstreamClient, UpstreamClientConfig};
pub use inspector::{inspect, Inspection};

use http::{header, HeaderMap, HeaderName};

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
