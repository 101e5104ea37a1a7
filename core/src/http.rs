//! Plain-data vocabulary shared between requests and the host transport.
//!
//! # Design
//! Methods, auth and accept policies are small `Copy` enums with a fixed
//! mapping to their wire tokens. `TransportResponse` is produced by the host
//! after executing a request; the core only retains and delivers it, so it
//! stays a plain value with owned fields.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Delete,
    Put,
    Post,
    Head,
}

impl RequestMethod {
    /// Canonical uppercase token, e.g. `"GET"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Put => "PUT",
            RequestMethod::Post => "POST",
            RequestMethod::Head => "HEAD",
        }
    }

    /// Whether a request with this method is expected to carry a body.
    pub fn requires_payload(&self) -> bool {
        matches!(self, RequestMethod::Put | RequestMethod::Post)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RequestMethod::Get,
            RequestMethod::Delete,
            RequestMethod::Put,
            RequestMethod::Post,
            RequestMethod::Head,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| RequestError::UnknownMethod(s.to_string()))
    }
}

/// How a request interacts with access tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Needs no access token and does not produce one.
    None,
    /// The host must attach a bearer token before sending.
    #[default]
    NeedsAccessToken,
    /// Needs no token, but a successful response carries a new token and cookie.
    ProducesAccessTokenAndCookie,
}

impl AuthPolicy {
    pub fn needs_authentication(&self) -> bool {
        matches!(self, AuthPolicy::NeedsAccessToken)
    }

    pub fn response_will_contain_access_token(&self) -> bool {
        matches!(self, AuthPolicy::ProducesAccessTokenAndCookie)
    }

    pub fn response_will_contain_cookie(&self) -> bool {
        matches!(self, AuthPolicy::ProducesAccessTokenAndCookie)
    }
}

/// Expected media category of the response. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptPolicy {
    Any,
    #[default]
    StructuredData,
    Image,
}

impl AcceptPolicy {
    /// Value for the `Accept` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            AcceptPolicy::Any => "*/*",
            AcceptPolicy::StructuredData => "application/json",
            AcceptPolicy::Image => "image/*",
        }
    }
}

/// Identifiers of the transport-level task that carries a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentifier {
    pub identifier: u64,
    pub session_identifier: String,
}

impl TaskIdentifier {
    pub fn new(identifier: u64, session_identifier: impl Into<String>) -> Self {
        Self {
            identifier,
            session_identifier: session_identifier.into(),
        }
    }
}

impl fmt::Display for TaskIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} on {}", self.identifier, self.session_identifier)
    }
}

/// Classification for responses that never reached (or never came back
/// from) the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    /// The request deadline passed before it could be sent.
    Expired,
    Cancelled,
    TryAgainLater,
}

/// A response described as plain data.
///
/// Constructed by the host after executing a request (or synthesized locally
/// for expiry and cancellation), then handed to `fire_completion`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub failure: Option<FailureKind>,
}

impl TransportResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            failure: None,
        }
    }

    /// A response that carries no HTTP exchange, only a failure class.
    pub fn failed(kind: FailureKind) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            failure: Some(kind),
        }
    }

    pub fn expired() -> Self {
        Self::failed(FailureKind::Expired)
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled)
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, RequestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
