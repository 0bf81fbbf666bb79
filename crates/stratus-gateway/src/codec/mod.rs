//! Dialect codecs: wire request to [`ServiceRequest`], [`Outcome`] and
//! errors back to wire shapes.
//!
//! One codec per provider family. The dispatcher picks the codec from the
//! listener's dialect and never looks inside the bytes itself.

mod aws;
mod gcp;
mod oracle;

use std::collections::BTreeMap;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Map, Value};
use stratus_protocol::{RequestEnvelope, ResolvedOperation};
use stratus_services::{ObjectMeta, Outcome, RequestContext, ServiceError, ServiceRequest};
use stratus_types::Dialect;

use crate::error::GatewayError;
use crate::response::WireResponse;

/// Translation between one provider's wire shapes and typed requests.
pub trait Codec: Send + Sync {
    /// The dialect this codec speaks.
    fn dialect(&self) -> Dialect;

    /// The credential or tenant segment naming the caller's scope.
    fn credential(&self, op: &ResolvedOperation, envelope: &RequestEnvelope) -> Option<String>;

    /// Client idempotency token, if the caller sent one.
    fn idempotency_token(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Option<String>;

    /// Build the typed request. Malformed input is a validation error.
    fn decode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Result<ServiceRequest, ServiceError>;

    /// Shape a successful outcome.
    fn encode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
        ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<WireResponse, ServiceError>;

    /// Shape a failure. `op` is `None` when detection failed.
    fn error(
        &self,
        op: Option<&ResolvedOperation>,
        envelope: &RequestEnvelope,
        request_id: &str,
        error: &GatewayError,
    ) -> WireResponse;
}

static AWS: aws::AwsCodec = aws::AwsCodec;
static GCP: gcp::GcpCodec = gcp::GcpCodec;
static ORACLE: oracle::OracleCodec = oracle::OracleCodec;

/// The codec for `dialect`.
pub fn for_dialect(dialect: Dialect) -> &'static dyn Codec {
    match dialect {
        Dialect::Aws => &AWS,
        Dialect::Gcp => &GCP,
        Dialect::Oracle => &ORACLE,
    }
}

// -----------------------------------------------------------------------
// Shared helpers
// -----------------------------------------------------------------------

const ALPHA_NUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A fresh request id in UUID form.
pub(crate) fn new_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// `len` random alphanumeric characters.
pub(crate) fn random_name(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHA_NUMERIC[rng.random_range(0..ALPHA_NUMERIC.len())] as char)
        .collect()
}

fn datetime(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(i64::try_from(ms).unwrap_or(i64::MAX)).unwrap_or_default()
}

/// `2024-05-01T12:00:00.000Z`
pub(crate) fn iso8601(ms: u64) -> String {
    datetime(ms).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `Wed, 01 May 2024 12:00:00 GMT`
pub(crate) fn http_date(ms: u64) -> String {
    datetime(ms).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Seconds since the epoch with millisecond precision.
pub(crate) fn epoch_seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

pub(crate) fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::Validation(message.into())
}

/// A path parameter the route template guarantees.
pub(crate) fn param<'a>(op: &'a ResolvedOperation, name: &str) -> Result<&'a str, ServiceError> {
    op.param(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(format!("missing path parameter {name:?}")))
}

/// The body as a JSON object; an empty body is an empty object.
pub(crate) fn json_body(envelope: &RequestEnvelope) -> Result<Map<String, Value>, ServiceError> {
    if envelope.body().iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(envelope.body()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(invalid("request body must be a JSON object")),
        Err(e) => Err(invalid(format!("malformed JSON body: {e}"))),
    }
}

pub(crate) fn str_field<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    map.get(name).and_then(Value::as_str)
}

pub(crate) fn required_str<'a>(
    map: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ServiceError> {
    str_field(map, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(format!("missing required field {name:?}")))
}

/// An integer field that may arrive as a JSON number or a numeric string.
pub(crate) fn u64_field(map: &Map<String, Value>, name: &str) -> Result<Option<u64>, ServiceError> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(format!("{name} must be a non-negative integer"))),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| invalid(format!("{name} must be a non-negative integer"))),
        Some(_) => Err(invalid(format!("{name} must be a non-negative integer"))),
    }
}

/// Parse an optional numeric query or form value.
pub(crate) fn parse_count(value: Option<&str>, name: &str) -> Result<Option<usize>, ServiceError> {
    value
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| invalid(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}

/// A string map from a JSON object of string values.
pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| Some((k.clone(), scalar_string(v)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// A JSON scalar rendered as a string.
pub(crate) fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Content type plus user metadata headers carrying `prefix`
/// (`x-amz-meta-`, `x-goog-meta-`, `opc-meta-`).
pub(crate) fn object_meta(envelope: &RequestEnvelope, prefix: &str) -> ObjectMeta {
    ObjectMeta {
        content_type: envelope.header("content-type").map(str::to_string),
        user: envelope
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix(prefix)?.to_string(), v.clone())))
            .collect(),
    }
}

/// Object metadata as reply headers.
pub(crate) fn meta_headers(
    mut response: WireResponse,
    meta: &ObjectMeta,
    prefix: &str,
) -> WireResponse {
    response = response.with_header(
        "content-type",
        meta.content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    );
    for (k, v) in &meta.user {
        response = response.with_header(&format!("{prefix}{k}"), v.clone());
    }
    response
}

/// The last `/`-separated segment of a URL or resource name.
pub(crate) fn last_segment(s: &str) -> &str {
    s.trim_end_matches('/').rsplit('/').next().unwrap_or(s)
}

/// `200 OK` with a JSON body.
pub(crate) fn ok_json(value: &Value) -> Result<WireResponse, ServiceError> {
    WireResponse::json(StatusCode::OK, value)
}

/// The codec received an outcome its operation never produces.
pub(crate) fn unexpected(op: &ResolvedOperation) -> ServiceError {
    ServiceError::Internal(format!("unexpected outcome for {}", op.action))
}
