//! Core type definitions shared by the validator, director, failover engine and admin surface.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`]: the subset of an inbound request the validator needs
//! - [`RpcOutcome`]: the `{result, error}` view used to classify upstream responses
//! - [`ErrorEnvelope`] / [`ResultEnvelope`]: locally generated replies
//!
//! ## Upstream Types
//! - [`Credentials`]: bearer / basic / none, selected once at set-time
//! - [`UpstreamTarget`]: parsed upstream URL plus the credentials used against it
//! - [`TargetPayload`]: the JSON shape of a target as seen by the admin API and the store

use crate::middleware::auth::basic_header;
use bytes::Bytes;
use http::{
    header::{self, InvalidHeaderValue},
    HeaderValue, Response, StatusCode,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::Url;

/// JSON-RPC protocol version used on every locally generated envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Id used on envelopes for requests rejected before their id is trusted.
pub const REJECTED_ID: i64 = -1;

/// Response type produced by the pipeline. The server crate maps the body into its own type.
pub type ProxyResponse = Response<Bytes>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased inbound body; the server adapts its framework body into this.
pub type InboundBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

pub type InboundRequest = http::Request<InboundBody>;

/// Wraps an in-memory body as an [`InboundBody`].
#[must_use]
pub fn inbound_body(bytes: impl Into<Bytes>) -> InboundBody {
    use http_body_util::{BodyExt, Full};
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Inbound JSON-RPC 1.0/2.0 request object.
///
/// Only the fields needed for whitelisting are decoded; the raw bytes are what gets forwarded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC 1.0 style version field.
    #[serde(default)]
    pub version: Option<String>,

    /// JSON-RPC 2.0 version field.
    #[serde(default)]
    pub jsonrpc: Option<String>,

    #[serde(default)]
    pub id: Value,

    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,

    #[serde(default)]
    pub params: Option<Value>,
}

/// `{result, error}` view decoded from an upstream response body.
///
/// A JSON `null` error decodes to `None`, matching "error field non-null" semantics.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcOutcome {
    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcOutcome {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `{"jsonrpc":"2.0","id":<id>,"error":"<message>"}`.
///
/// Field order is the wire order.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub jsonrpc: &'static str,
    pub id: &'a Value,
    pub error: &'a str,
}

/// `{"jsonrpc":"2.0","id":<id>,"result":<payload>}`.
#[derive(Debug, Serialize)]
pub struct ResultEnvelope<'a, T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: &'a Value,
    pub result: &'a T,
}

fn json_response(status: StatusCode, body: Vec<u8>) -> ProxyResponse {
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Builds an error envelope response with the given status.
#[must_use]
pub fn error_response(status: StatusCode, id: &Value, message: &str) -> ProxyResponse {
    let envelope = ErrorEnvelope { jsonrpc: JSONRPC_VERSION, id, error: message };
    // Serializing a struct of strings and a `Value` cannot fail.
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    json_response(status, body)
}

/// Builds the 400 envelope used for every local rejection.
#[must_use]
pub fn rejection_response(id: &Value, message: &str) -> ProxyResponse {
    error_response(StatusCode::BAD_REQUEST, id, message)
}

/// Builds a 200 result envelope.
#[must_use]
pub fn result_response<T: Serialize>(id: &Value, result: &T) -> ProxyResponse {
    let envelope = ResultEnvelope { jsonrpc: JSONRPC_VERSION, id, result };
    match serde_json::to_vec(&envelope) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &Value::from(REJECTED_ID),
            &format!("failed to encode response: {e}"),
        ),
    }
}

/// Credentials presented to, or expected from, a peer.
///
/// Exactly one variant is active. Username and password belong to the same variant and may both
/// be empty only when the whole credential is [`Credentials::None`].
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "CredentialsWire", into = "CredentialsWire")]
pub enum Credentials {
    /// No `Authorization` header is sent or required.
    #[default]
    None,
    /// `Authorization: <token>`, verbatim.
    Bearer(String),
    /// HTTP Basic.
    Basic { username: String, password: String },
}

impl Credentials {
    /// Selects the variant from the three loose fields used by env vars and JSON payloads.
    ///
    /// A non-empty token wins over username/password.
    #[must_use]
    pub fn from_parts(token: &str, username: &str, password: &str) -> Self {
        if !token.is_empty() {
            Self::Bearer(token.to_string())
        } else if !username.is_empty() || !password.is_empty() {
            Self::Basic { username: username.to_string(), password: password.to_string() }
        } else {
            Self::None
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short variant name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer(_) => "bearer",
            Self::Basic { .. } => "basic",
        }
    }

    /// `Authorization` value to present upstream, or `None` when no header should be sent.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeaderValue`] when the token or the encoded basic pair contains bytes a
    /// header cannot carry.
    pub fn header_value(&self) -> Result<Option<HeaderValue>, InvalidHeaderValue> {
        let mut value = match self {
            Self::None => return Ok(None),
            Self::Bearer(token) => HeaderValue::from_str(token)?,
            Self::Basic { username, password } => {
                HeaderValue::from_str(&basic_header(username, password))?
            }
        };
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
            Self::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).field("password", &"***").finish()
            }
        }
    }
}

/// Loose JSON form of [`Credentials`]: `{"jwt"?, "username"?, "password"?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialsWire {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    jwt: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    username: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    password: String,
}

impl From<CredentialsWire> for Credentials {
    fn from(wire: CredentialsWire) -> Self {
        Self::from_parts(&wire.jwt, &wire.username, &wire.password)
    }
}

impl From<Credentials> for CredentialsWire {
    fn from(cred: Credentials) -> Self {
        match cred {
            Credentials::None => Self::default(),
            Credentials::Bearer(jwt) => Self { jwt, ..Self::default() },
            Credentials::Basic { username, password } => {
                Self { jwt: String::new(), username, password }
            }
        }
    }
}

/// JSON shape of an upstream target: `{"url": string, "jwt"?, "username"?, "password"?}`.
///
/// Used for admin request/response bodies and for the persisted store value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,

    #[serde(flatten)]
    pub cred: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("credentials are not a valid header value")]
    Credentials,
}

/// A fully validated upstream: absolute URL plus the credentials used against it.
///
/// The URL text is kept as given so that reads return exactly what was configured. The
/// `Authorization` value is encoded once here, so a target that exists can always be presented.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    raw: String,
    url: Url,
    cred: Credentials,
    authorization: Option<HeaderValue>,
}

impl UpstreamTarget {
    /// Parses `raw` into a target.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Url`] if `raw` is not an absolute URL and
    /// [`TargetError::Credentials`] if `cred` cannot be sent as an `Authorization` header.
    pub fn parse(raw: &str, cred: Credentials) -> Result<Self, TargetError> {
        let url = Url::parse(raw)?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(url::ParseError::EmptyHost.into());
        }
        let authorization = cred.header_value().map_err(|_| TargetError::Credentials)?;
        Ok(Self { raw: raw.to_string(), url, cred, authorization })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn raw_url(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn cred(&self) -> &Credentials {
        &self.cred
    }

    #[must_use]
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }

    /// `host[:port]` of the upstream, as used for the `Host` and `X-Origin-Host` headers.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    #[must_use]
    pub fn to_payload(&self) -> TargetPayload {
        TargetPayload { url: self.raw.clone(), cred: self.cred.clone() }
    }
}

impl TryFrom<TargetPayload> for UpstreamTarget {
    type Error = TargetError;

    fn try_from(payload: TargetPayload) -> Result<Self, Self::Error> {
        Self::parse(&payload.url, payload.cred)
    }
}

impl fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTarget").field("url", &self.raw).field("cred", &self.cred).finish()
    }
}

/// Role of a node binding within one proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Primary,
    Secondary,
    /// Read-only view of a colocated node; never persisted, never mutated.
    Local,
}

impl NodeRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
