//! S3 REST-XML requests and replies.

use axum::http::StatusCode;
use stratus_protocol::{Action, Method, RequestEnvelope, ResolvedOperation};
use stratus_services::limits::MAX_PAGE_SIZE;
use stratus_services::{
    CompletedPart, ObjectInfo, ObjectListing, Outcome, PageRequest, RequestContext, Resource,
    ServiceError, ServiceRequest, VersioningStatus,
};

use super::{REGION, endpoint};
use crate::codec::{
    http_date, invalid, iso8601, meta_headers, object_meta, param, parse_count, unexpected,
};
use crate::error::GatewayError;
use crate::response::WireResponse;
use crate::xml;

const META_PREFIX: &str = "x-amz-meta-";

pub(super) fn decode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
) -> Result<ServiceRequest, ServiceError> {
    let bucket = || param(op, "bucket").map(str::to_string);
    let key = || param(op, "key").map(str::to_string);
    // "null" names the version written while versioning was off.
    let version_id = || {
        envelope
            .query_param("versionId")
            .filter(|v| !v.is_empty() && *v != "null")
            .map(str::to_string)
    };
    let upload_id = || {
        envelope
            .query_param("uploadId")
            .map(str::to_string)
            .ok_or_else(|| invalid("uploadId is required"))
    };
    Ok(match op.action {
        Action::ListBuckets => ServiceRequest::ListBuckets,
        Action::CreateBucket => ServiceRequest::CreateBucket { name: bucket()? },
        Action::DeleteBucket => ServiceRequest::DeleteBucket { name: bucket()? },
        Action::HeadBucket => ServiceRequest::HeadBucket { name: bucket()? },
        Action::ListObjects => ServiceRequest::ListObjects {
            bucket: bucket()?,
            prefix: envelope.query_param("prefix").unwrap_or_default().to_string(),
            delimiter: envelope
                .query_param("delimiter")
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            page: list_page(envelope)?,
        },
        Action::PutObject => {
            if envelope.header("x-amz-copy-source").is_some() {
                return Err(ServiceError::Unsupported("CopyObject".into()));
            }
            if envelope.has_query("partNumber") {
                return Err(invalid("partNumber is only valid with an uploadId"));
            }
            ServiceRequest::PutObject {
                bucket: bucket()?,
                key: key()?,
                data: envelope.body().clone(),
                meta: object_meta(envelope, META_PREFIX),
            }
        }
        Action::GetObject => ServiceRequest::GetObject {
            bucket: bucket()?,
            key: key()?,
            version_id: version_id(),
        },
        Action::HeadObject => ServiceRequest::HeadObject {
            bucket: bucket()?,
            key: key()?,
            version_id: version_id(),
        },
        Action::DeleteObject => ServiceRequest::DeleteObject {
            bucket: bucket()?,
            key: key()?,
            version_id: version_id(),
        },
        Action::GetBucketVersioning => ServiceRequest::GetBucketVersioning { bucket: bucket()? },
        Action::PutBucketVersioning => {
            let config: xml::VersioningConfigurationRequest = xml::from_xml(envelope.body())?;
            let status = config
                .status
                .as_deref()
                .and_then(VersioningStatus::parse)
                .ok_or_else(|| invalid("versioning status must be Enabled or Suspended"))?;
            ServiceRequest::PutBucketVersioning {
                bucket: bucket()?,
                status,
            }
        }
        Action::CreateMultipartUpload => ServiceRequest::CreateMultipartUpload {
            bucket: bucket()?,
            key: key()?,
            meta: object_meta(envelope, META_PREFIX),
        },
        Action::UploadPart => ServiceRequest::UploadPart {
            bucket: bucket()?,
            key: key()?,
            upload_id: upload_id()?,
            part_number: envelope
                .query_param("partNumber")
                .ok_or_else(|| invalid("partNumber is required"))?
                .parse()
                .map_err(|_| invalid("partNumber must be a positive integer"))?,
            data: envelope.body().clone(),
        },
        Action::CompleteMultipartUpload => {
            let body: xml::CompleteMultipartUpload = xml::from_xml(envelope.body())?;
            ServiceRequest::CompleteMultipartUpload {
                bucket: bucket()?,
                key: key()?,
                upload_id: upload_id()?,
                parts: body
                    .parts
                    .into_iter()
                    .map(|p| CompletedPart {
                        part_number: p.part_number,
                        etag: p.etag,
                    })
                    .collect(),
            }
        }
        Action::AbortMultipartUpload => ServiceRequest::AbortMultipartUpload {
            bucket: bucket()?,
            key: key()?,
            upload_id: upload_id()?,
        },
        other => return Err(invalid(format!("{other} is not an S3 operation"))),
    })
}

/// V2 pages by opaque continuation token or `start-after`; V1 by `marker`.
fn list_page(envelope: &RequestEnvelope) -> Result<PageRequest, ServiceError> {
    let max = parse_count(envelope.query_param("max-keys"), "max-keys")?;
    if is_v2(envelope) {
        if let Some(token) = envelope.query_param("continuation-token") {
            return Ok(PageRequest::new(Some(token), max));
        }
        let mut page = PageRequest::new(None, max);
        page.after = envelope
            .query_param("start-after")
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        return Ok(page);
    }
    let mut page = PageRequest::new(None, max);
    page.after = envelope
        .query_param("marker")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(page)
}

fn is_v2(envelope: &RequestEnvelope) -> bool {
    envelope.query_param("list-type") == Some("2")
}

pub(super) fn encode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    ctx: &RequestContext,
    outcome: Outcome,
) -> Result<WireResponse, ServiceError> {
    match (op.action, outcome) {
        (Action::CreateBucket, Outcome::Bucket(bucket)) => Ok(WireResponse::empty(StatusCode::OK)
            .with_header("location", format!("/{}", bucket.name))),
        (Action::HeadBucket, Outcome::Bucket(_)) => {
            Ok(WireResponse::empty(StatusCode::OK).with_header("x-amz-bucket-region", REGION))
        }
        (_, Outcome::Buckets(buckets)) => {
            let body = xml::to_xml(&xml::ListAllMyBucketsResult {
                xmlns: xml::S3_XMLNS,
                owner: xml::Owner {
                    id: ctx.scope.to_string(),
                    display_name: ctx.scope.to_string(),
                },
                buckets: xml::Buckets {
                    bucket: buckets
                        .into_iter()
                        .map(|b| xml::BucketEntry {
                            name: b.name,
                            creation_date: iso8601(b.created_at),
                        })
                        .collect(),
                },
            })?;
            Ok(WireResponse::xml(StatusCode::OK, body))
        }
        (Action::PutObject, Outcome::Object(info)) => Ok(versioned(
            WireResponse::empty(StatusCode::OK).with_header("etag", quoted(&info.etag)),
            info.version_id,
        )),
        (Action::CompleteMultipartUpload, Outcome::Object(info)) => {
            let body = xml::to_xml(&xml::CompleteMultipartUploadResult {
                xmlns: xml::S3_XMLNS,
                location: format!("{}/{}/{}", endpoint(envelope), info.bucket, info.key),
                etag: quoted(&info.etag),
                bucket: info.bucket,
                key: info.key,
            })?;
            Ok(versioned(WireResponse::xml(StatusCode::OK, body), info.version_id))
        }
        (_, Outcome::Object(info)) => Ok(object_headers(WireResponse::empty(StatusCode::OK), &info)),
        (_, Outcome::ObjectData { info, data }) => {
            Ok(object_headers(WireResponse::empty(StatusCode::OK), &info).with_body(data))
        }
        (_, Outcome::Objects(listing)) => list_objects(envelope, listing),
        (_, Outcome::ObjectDeleted(removal)) => {
            let response = versioned(WireResponse::empty(StatusCode::NO_CONTENT), removal.version_id);
            Ok(if removal.delete_marker {
                response.with_header("x-amz-delete-marker", "true")
            } else {
                response
            })
        }
        (Action::PutBucketVersioning, Outcome::Versioning { .. }) => {
            Ok(WireResponse::empty(StatusCode::OK))
        }
        (_, Outcome::Versioning { status, .. }) => {
            let body = xml::to_xml(&xml::VersioningConfiguration {
                xmlns: xml::S3_XMLNS,
                status: status.map(|s| s.as_str()),
            })?;
            Ok(WireResponse::xml(StatusCode::OK, body))
        }
        (_, Outcome::Upload(upload)) => {
            let body = xml::to_xml(&xml::InitiateMultipartUploadResult {
                xmlns: xml::S3_XMLNS,
                bucket: upload.bucket,
                key: upload.key,
                upload_id: upload.upload_id,
            })?;
            Ok(WireResponse::xml(StatusCode::OK, body))
        }
        (_, Outcome::Part(part)) => {
            Ok(WireResponse::empty(StatusCode::OK).with_header("etag", quoted(&part.etag)))
        }
        (_, Outcome::Deleted { .. }) => Ok(WireResponse::empty(StatusCode::NO_CONTENT)),
        _ => Err(unexpected(op)),
    }
}

fn quoted(etag: &str) -> String {
    format!("\"{etag}\"")
}

fn versioned(response: WireResponse, version_id: Option<String>) -> WireResponse {
    match version_id {
        Some(version) => response.with_header("x-amz-version-id", version),
        None => response,
    }
}

fn object_headers(response: WireResponse, info: &ObjectInfo) -> WireResponse {
    let response = versioned(response, info.version_id.clone());
    meta_headers(response, &info.meta, META_PREFIX)
        .with_header("content-length", info.size.to_string())
        .with_header("etag", quoted(&info.etag))
        .with_header("last-modified", http_date(info.last_modified))
        .with_header("accept-ranges", "bytes")
}

fn list_objects(
    envelope: &RequestEnvelope,
    listing: ObjectListing,
) -> Result<WireResponse, ServiceError> {
    let v2 = is_v2(envelope);
    let echo = |name: &str| envelope.query_param(name).map(str::to_string);
    let max_keys = parse_count(envelope.query_param("max-keys"), "max-keys")?
        .unwrap_or(MAX_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let truncated = listing.objects.next_token.is_some();
    let last_key = listing.objects.items.last().map(|o| o.key.clone());
    let key_count = listing.objects.items.len() + listing.common_prefixes.len();
    let body = xml::to_xml(&xml::ListBucketResult {
        xmlns: xml::S3_XMLNS,
        name: listing.bucket,
        prefix: listing.prefix,
        delimiter: listing.delimiter,
        marker: if v2 { None } else { Some(echo("marker").unwrap_or_default()) },
        next_marker: if v2 || !truncated { None } else { last_key },
        continuation_token: if v2 { echo("continuation-token") } else { None },
        next_continuation_token: if v2 { listing.objects.next_token } else { None },
        key_count: v2.then_some(key_count),
        max_keys,
        is_truncated: truncated,
        contents: listing
            .objects
            .items
            .into_iter()
            .map(|o| xml::Contents {
                last_modified: iso8601(o.last_modified),
                etag: quoted(&o.etag),
                size: o.size,
                key: o.key,
                storage_class: "STANDARD",
            })
            .collect(),
        common_prefixes: listing
            .common_prefixes
            .into_iter()
            .map(|prefix| xml::CommonPrefix { prefix })
            .collect(),
    })?;
    Ok(WireResponse::xml(StatusCode::OK, body))
}

pub(super) fn error(
    op: Option<&ResolvedOperation>,
    envelope: &RequestEnvelope,
    request_id: &str,
    error: &GatewayError,
) -> WireResponse {
    let action = op.map(|op| op.action);
    let code = match error {
        GatewayError::Detection(_) => "NotImplemented",
        GatewayError::Service(e) => match e {
            ServiceError::Validation(_) if action == Some(Action::CreateBucket) => {
                "InvalidBucketName"
            }
            ServiceError::Validation(_) if action == Some(Action::CompleteMultipartUpload) => {
                "InvalidPart"
            }
            ServiceError::Validation(_) if action == Some(Action::PutBucketVersioning) => {
                "MalformedXML"
            }
            ServiceError::Validation(_) => "InvalidArgument",
            ServiceError::NotFound {
                resource: Resource::Bucket,
                ..
            } => "NoSuchBucket",
            ServiceError::NotFound {
                resource: Resource::Version,
                ..
            } => "NoSuchVersion",
            ServiceError::NotFound {
                resource: Resource::Upload,
                ..
            } => "NoSuchUpload",
            ServiceError::NotFound { .. } => "NoSuchKey",
            ServiceError::AlreadyExists { .. } => "BucketAlreadyOwnedByYou",
            ServiceError::AccessDenied { .. } => "AccessDenied",
            ServiceError::Conflict(_) => "OperationAborted",
            ServiceError::Unsupported(_) => "NotImplemented",
            ServiceError::StorageUnavailable(_)
            | ServiceError::DriverUnavailable(_)
            | ServiceError::DriverTimeout(_) => "ServiceUnavailable",
            ServiceError::Internal(_) => "InternalError",
        },
    };
    let status = error.status_code();
    if envelope.method() == Method::Head {
        return WireResponse::empty(status);
    }
    WireResponse::xml(
        status,
        xml::s3_error(code, &error.to_string(), envelope.path(), request_id),
    )
}

