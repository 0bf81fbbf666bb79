//! [`WireResponse`] — a fully shaped reply, independent of axum.
//!
//! Codecs build these; the idempotency ledger stores and replays them
//! byte-for-byte.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use stratus_services::{RecordedReply, ServiceError};
use tracing::warn;

/// Status, headers and body of one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: StatusCode,
    /// Header pairs in send order; names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl WireResponse {
    /// A reply with no headers and no body.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A reply carrying raw bytes.
    pub fn bytes(status: StatusCode, content_type: &str, body: Bytes) -> Self {
        Self::empty(status)
            .with_header("content-type", content_type)
            .with_body(body)
    }

    /// A JSON reply with the given content type.
    pub fn json_as<T: Serialize>(
        status: StatusCode,
        content_type: &str,
        value: &T,
    ) -> Result<Self, ServiceError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::bytes(status, content_type, Bytes::from(body)))
    }

    /// An `application/json` reply.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, ServiceError> {
        Self::json_as(status, "application/json", value)
    }

    /// An XML reply.
    pub fn xml(status: StatusCode, body: String) -> Self {
        Self::bytes(status, "application/xml", Bytes::from(body))
    }

    /// Set header `name`, replacing any earlier value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| *k != name);
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<WireResponse> for RecordedReply {
    fn from(r: WireResponse) -> Self {
        RecordedReply {
            status: r.status.as_u16(),
            headers: r.headers,
            body: r.body,
        }
    }
}

impl From<RecordedReply> for WireResponse {
    fn from(r: RecordedReply) -> Self {
        Self {
            status: StatusCode::from_u16(r.status).unwrap_or(StatusCode::OK),
            headers: r.headers,
            body: r.body,
        }
    }
}

impl IntoResponse for WireResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "dropping unencodable response header"),
            }
        }
        response
    }
}
