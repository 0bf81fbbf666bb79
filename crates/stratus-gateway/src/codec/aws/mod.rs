//! AWS: S3 over REST-XML, DynamoDB / SQS / Price List over the JSON
//! protocol, EC2 and SQS over the Query protocol.

mod json;
mod query;
mod s3;

use stratus_protocol::{RequestEnvelope, ResolvedOperation, TARGET_HEADER, WireProtocol};
use stratus_services::{Outcome, RequestContext, ServiceError, ServiceRequest};
use stratus_types::Dialect;

use super::{Codec, json_body, str_field};
use crate::error::GatewayError;
use crate::response::WireResponse;

/// Account id used in queue URLs and ownership fields.
pub(crate) const ACCOUNT_ID: &str = "000000000000";
pub(crate) const REGION: &str = "us-east-1";

const CLIENT_TOKEN_HEADER: &str = "x-amz-client-token";
const REQUEST_ID_HEADER: &str = "x-amz-request-id";

pub(crate) struct AwsCodec;

impl Codec for AwsCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Aws
    }

    fn credential(&self, _op: &ResolvedOperation, envelope: &RequestEnvelope) -> Option<String> {
        envelope
            .header("authorization")
            .and_then(access_key_from_authorization)
            .or_else(|| {
                envelope
                    .query_param("X-Amz-Credential")
                    .and_then(|c| c.split('/').next())
            })
            .map(str::to_string)
    }

    fn idempotency_token(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Option<String> {
        if let Some(token) = envelope.header(CLIENT_TOKEN_HEADER) {
            return Some(token.to_string());
        }
        match op.protocol {
            WireProtocol::Query => envelope
                .form()
                .into_iter()
                .find(|(k, _)| k == "ClientToken")
                .map(|(_, v)| v),
            WireProtocol::Json => json_body(envelope)
                .ok()
                .and_then(|body| str_field(&body, "ClientToken").map(str::to_string)),
            WireProtocol::RestXml | WireProtocol::RestJson => None,
        }
        .filter(|t| !t.is_empty())
    }

    fn decode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Result<ServiceRequest, ServiceError> {
        match op.protocol {
            WireProtocol::Json => json::decode(op, envelope),
            WireProtocol::Query => query::decode(op, envelope),
            WireProtocol::RestXml | WireProtocol::RestJson => s3::decode(op, envelope),
        }
    }

    fn encode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
        ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<WireResponse, ServiceError> {
        let response = match op.protocol {
            WireProtocol::Json => json::encode(op, envelope, outcome)?,
            WireProtocol::Query => query::encode(op, envelope, ctx, outcome)?,
            WireProtocol::RestXml | WireProtocol::RestJson => {
                s3::encode(op, envelope, ctx, outcome)?
            }
        };
        Ok(response.with_header(REQUEST_ID_HEADER, ctx.request_id.clone()))
    }

    fn error(
        &self,
        op: Option<&ResolvedOperation>,
        envelope: &RequestEnvelope,
        request_id: &str,
        error: &GatewayError,
    ) -> WireResponse {
        let protocol = op.map_or_else(|| guess_protocol(envelope), |op| op.protocol);
        let response = match protocol {
            WireProtocol::Json => json::error(op, error),
            WireProtocol::Query => query::error(op, request_id, error),
            WireProtocol::RestXml | WireProtocol::RestJson => {
                s3::error(op, envelope, request_id, error)
            }
        };
        response.with_header(REQUEST_ID_HEADER, request_id)
    }
}

/// Which protocol an unresolved request was speaking.
fn guess_protocol(envelope: &RequestEnvelope) -> WireProtocol {
    if envelope.header(TARGET_HEADER).is_some() {
        WireProtocol::Json
    } else if envelope.is_form() {
        WireProtocol::Query
    } else {
        WireProtocol::RestXml
    }
}

/// Access key id from a SigV4 `Authorization` header:
/// `AWS4-HMAC-SHA256 Credential=AKID/20240101/us-east-1/s3/aws4_request, ...`.
fn access_key_from_authorization(header: &str) -> Option<&str> {
    let start = header.find("Credential=")? + "Credential=".len();
    let credential = &header[start..];
    let end = credential
        .find(['/', ',', ' '])
        .unwrap_or(credential.len());
    Some(&credential[..end]).filter(|key| !key.is_empty())
}

/// Base URL clients reach this listener on, for queue URLs.
pub(crate) fn endpoint(envelope: &RequestEnvelope) -> String {
    let host = envelope.header("host").unwrap_or("localhost:4566");
    format!("http://{host}")
}
