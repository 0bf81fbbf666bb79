//! GCP: Cloud Storage JSON API, Firestore REST, Pub/Sub, Compute Engine
//! and the Cloud Billing catalog, all JSON over REST.

use axum::http::StatusCode;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value, json};
use stratus_protocol::{Action, Method, RequestEnvelope, ResolvedOperation};
use stratus_services::{
    BucketInfo, ItemInfo, MessageInfo, ObjectInfo, ObjectMeta, Outcome, PageRequest, PriceItem,
    RequestContext, Resource, ServiceError, ServiceRequest, WorkloadInfo, WorkloadRequest,
};
use stratus_types::Dialect;

use super::{
    Codec, invalid, iso8601, json_body, last_segment, meta_headers, object_meta, ok_json, param,
    parse_count, random_name, required_str, str_field, string_map, u64_field, unexpected,
};
use crate::error::GatewayError;
use crate::response::WireResponse;

const META_PREFIX: &str = "x-goog-meta-";
const API_ROOT: &str = "https://www.googleapis.com";
const GIB: u64 = 1024 * 1024 * 1024;

pub(crate) struct GcpCodec;

impl Codec for GcpCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Gcp
    }

    fn credential(&self, op: &ResolvedOperation, envelope: &RequestEnvelope) -> Option<String> {
        op.param("project")
            .or_else(|| envelope.query_param("project"))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }

    fn idempotency_token(
        &self,
        _op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Option<String> {
        envelope
            .query_param("requestId")
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn decode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Result<ServiceRequest, ServiceError> {
        let page = || {
            let size = envelope
                .query_param("maxResults")
                .or_else(|| envelope.query_param("pageSize"));
            Ok::<_, ServiceError>(PageRequest::new(
                envelope.query_param("pageToken"),
                parse_count(size, "pageSize")?,
            ))
        };
        Ok(match op.action {
            Action::ListBuckets => ServiceRequest::ListBuckets,
            Action::CreateBucket => ServiceRequest::CreateBucket {
                name: required_str(&json_body(envelope)?, "name")?.to_string(),
            },
            Action::HeadBucket => ServiceRequest::HeadBucket {
                name: param(op, "bucket")?.to_string(),
            },
            Action::DeleteBucket => ServiceRequest::DeleteBucket {
                name: param(op, "bucket")?.to_string(),
            },
            Action::ListObjects => ServiceRequest::ListObjects {
                bucket: param(op, "bucket")?.to_string(),
                prefix: envelope.query_param("prefix").unwrap_or_default().to_string(),
                delimiter: envelope
                    .query_param("delimiter")
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
                page: page()?,
            },
            Action::PutObject => upload(op, envelope)?,
            Action::GetObject => ServiceRequest::GetObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: None,
            },
            Action::HeadObject => ServiceRequest::HeadObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: None,
            },
            Action::DeleteObject => ServiceRequest::DeleteObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: None,
            },

            Action::ListTables => {
                let body = json_body(envelope)?;
                ServiceRequest::ListTables {
                    page: PageRequest::new(
                        str_field(&body, "pageToken"),
                        u64_field(&body, "pageSize")?.map(|n| n as usize),
                    ),
                }
            }
            Action::PutItem => {
                let key = match envelope.method() {
                    Method::Post => envelope
                        .query_param("documentId")
                        .filter(|d| !d.is_empty())
                        .map_or_else(|| random_name(20), str::to_string),
                    _ => param(op, "document")?.to_string(),
                };
                let body = json_body(envelope)?;
                ServiceRequest::PutItem {
                    table: param(op, "collection")?.to_string(),
                    key: Some(key),
                    item: from_fields(body.get("fields"))?,
                    create_table: true,
                }
            }
            Action::GetItem => ServiceRequest::GetItem {
                table: param(op, "collection")?.to_string(),
                key: param(op, "document")?.to_string(),
            },
            Action::DeleteItem => ServiceRequest::DeleteItem {
                table: param(op, "collection")?.to_string(),
                key: param(op, "document")?.to_string(),
            },
            Action::Scan => ServiceRequest::Scan {
                table: param(op, "collection")?.to_string(),
                page: page()?,
            },

            Action::CreateQueue => ServiceRequest::CreateQueue {
                name: param(op, "topic")?.to_string(),
                attributes: string_map(json_body(envelope)?.get("labels")),
            },
            Action::GetQueue => ServiceRequest::GetQueue {
                name: param(op, "topic")?.to_string(),
            },
            Action::DeleteQueue => ServiceRequest::DeleteQueue {
                name: param(op, "topic")?.to_string(),
            },
            Action::ListQueues => ServiceRequest::ListQueues {
                prefix: String::new(),
                page: page()?,
            },
            Action::SendMessage => publish(op, envelope)?,
            Action::ReceiveMessages => ServiceRequest::ReceiveMessages {
                queue: param(op, "subscription")?.to_string(),
                max: u64_field(&json_body(envelope)?, "maxMessages")?.map_or(1, |n| n as usize),
            },
            Action::DeleteMessage => {
                let body = json_body(envelope)?;
                let ids: Vec<&str> = body
                    .get("ackIds")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let [receipt] = ids.as_slice() else {
                    return Err(invalid("acknowledge takes exactly one ackId"));
                };
                ServiceRequest::DeleteMessage {
                    queue: param(op, "subscription")?.to_string(),
                    receipt: receipt.to_string(),
                }
            }

            Action::CreateWorkload => insert_instance(op, envelope)?,
            Action::ListWorkloads => ServiceRequest::ListWorkloads,
            Action::GetWorkload => ServiceRequest::GetWorkload {
                id: param(op, "instance")?.to_string(),
            },
            Action::DeleteWorkload => ServiceRequest::DeleteWorkload {
                id: param(op, "instance")?.to_string(),
            },
            Action::CreateVolume => {
                let body = json_body(envelope)?;
                let gib = u64_field(&body, "sizeGb")?.unwrap_or(10);
                ServiceRequest::CreateVolume {
                    id: Some(required_str(&body, "name")?.to_string()),
                    size_bytes: gib.saturating_mul(GIB),
                }
            }
            Action::AttachVolume => ServiceRequest::AttachVolume {
                workload: param(op, "instance")?.to_string(),
                volume: last_segment(required_str(&json_body(envelope)?, "source")?).to_string(),
            },

            Action::ListPriceServices => ServiceRequest::ListPriceServices,
            Action::ListPrices => ServiceRequest::ListPrices {
                service_code: Some(param(op, "service")?.to_string()),
                filters: Vec::new(),
                page: page()?,
            },
            Action::GetPrice => ServiceRequest::GetPrice {
                product_code: param(op, "sku")?.to_string(),
            },

            other => {
                return Err(ServiceError::Unsupported(format!(
                    "{other} has no GCP equivalent"
                )));
            }
        })
    }

    fn encode(
        &self,
        op: &ResolvedOperation,
        _envelope: &RequestEnvelope,
        _ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<WireResponse, ServiceError> {
        let project = op.param("project").unwrap_or("default");
        match outcome {
            Outcome::Bucket(b) => ok_json(&bucket_resource(&b)),
            Outcome::Buckets(buckets) => ok_json(&json!({
                "kind": "storage#buckets",
                "items": buckets.iter().map(bucket_resource).collect::<Vec<_>>(),
            })),
            Outcome::Object(info) => ok_json(&object_resource(&info)),
            Outcome::ObjectData { info, data } => {
                let response = WireResponse::bytes(StatusCode::OK, "application/octet-stream", data)
                    .with_header("etag", info.etag.clone())
                    .with_header("x-goog-generation", info.last_modified.to_string());
                Ok(meta_headers(response, &info.meta, META_PREFIX))
            }
            Outcome::Objects(listing) => {
                let mut body = json!({
                    "kind": "storage#objects",
                    "items": listing.objects.items.iter().map(object_resource).collect::<Vec<_>>(),
                });
                if !listing.common_prefixes.is_empty() {
                    body["prefixes"] = json!(listing.common_prefixes);
                }
                if let Some(token) = listing.objects.next_token {
                    body["nextPageToken"] = json!(token);
                }
                ok_json(&body)
            }

            Outcome::Tables(listing) => {
                let mut body = json!({
                    "collectionIds": listing.items.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                });
                if let Some(token) = listing.next_token {
                    body["nextPageToken"] = json!(token);
                }
                ok_json(&body)
            }
            Outcome::Item(item) => ok_json(&document(op, project, &item)),
            Outcome::Items(listing) => {
                let mut body = json!({
                    "documents": listing.items.iter().map(|i| document(op, project, i)).collect::<Vec<_>>(),
                });
                if let Some(token) = listing.next_token {
                    body["nextPageToken"] = json!(token);
                }
                ok_json(&body)
            }

            Outcome::Queue(q) => ok_json(&topic(project, &q.name, &q.attributes)),
            Outcome::Queues(listing) => {
                let mut body = json!({
                    "topics": listing
                        .items
                        .iter()
                        .map(|q| topic(project, &q.name, &q.attributes))
                        .collect::<Vec<_>>(),
                });
                if let Some(token) = listing.next_token {
                    body["nextPageToken"] = json!(token);
                }
                ok_json(&body)
            }
            Outcome::MessageSent(m) => ok_json(&json!({ "messageIds": [m.message_id] })),
            Outcome::Messages(messages) => ok_json(&json!({
                "receivedMessages": messages.iter().map(received_message).collect::<Vec<_>>(),
            })),

            Outcome::Workload(w) if op.action == Action::CreateWorkload => {
                ok_json(&operation(op, project, "insert", &instance_link(op, project, &w.id)))
            }
            Outcome::Workload(w) => ok_json(&instance(op, project, &w)),
            Outcome::Workloads(workloads) => {
                let zone = op.param("zone");
                let items: Vec<Value> = workloads
                    .iter()
                    .filter(|w| zone.is_none_or(|z| w.zone.as_deref().is_none_or(|wz| wz == z)))
                    .map(|w| instance(op, project, w))
                    .collect();
                ok_json(&json!({ "kind": "compute#instanceList", "items": items }))
            }
            Outcome::Volume(v) => ok_json(&operation(
                op,
                project,
                "insert",
                &format!("{}/disks/{}", zone_link(op, project), v.id),
            )),
            Outcome::Attached { workload, .. } => ok_json(&operation(
                op,
                project,
                "attachDisk",
                &instance_link(op, project, &workload),
            )),

            Outcome::PriceServices(services) => ok_json(&json!({
                "services": services.iter().map(|s| json!({
                    "name": format!("services/{s}"),
                    "serviceId": s,
                    "displayName": s,
                    "businessEntityName": "businessEntities/GCP",
                })).collect::<Vec<_>>(),
                "nextPageToken": "",
            })),
            Outcome::Prices(listing) => ok_json(&json!({
                "skus": listing.items.iter().map(sku).collect::<Vec<_>>(),
                "nextPageToken": listing.next_token.unwrap_or_default(),
            })),
            Outcome::Price(item) => {
                if op.param("service").is_some_and(|s| s != item.service_code) {
                    return Err(ServiceError::NotFound {
                        resource: Resource::Price,
                        name: item.product_code,
                    });
                }
                ok_json(&sku(&item))
            }

            Outcome::ObjectDeleted(_) => Ok(WireResponse::empty(StatusCode::NO_CONTENT)),
            Outcome::Deleted { .. } => match op.action {
                Action::DeleteWorkload => {
                    let target = instance_link(op, project, param(op, "instance")?);
                    ok_json(&operation(op, project, "delete", &target))
                }
                Action::DeleteBucket | Action::DeleteObject => {
                    Ok(WireResponse::empty(StatusCode::NO_CONTENT))
                }
                _ => ok_json(&json!({})),
            },

            _ => Err(unexpected(op)),
        }
    }

    fn error(
        &self,
        _op: Option<&ResolvedOperation>,
        _envelope: &RequestEnvelope,
        _request_id: &str,
        error: &GatewayError,
    ) -> WireResponse {
        let (status, reason) = fault(error);
        let code = error.status_code();
        let body = json!({
            "error": {
                "code": code.as_u16(),
                "message": error.to_string(),
                "status": status,
                "errors": [{
                    "message": error.to_string(),
                    "domain": "global",
                    "reason": reason,
                }],
            }
        });
        WireResponse::json(code, &body)
            .unwrap_or_else(|_| WireResponse::empty(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

/// Canonical status name and legacy reason for an error.
fn fault(error: &GatewayError) -> (&'static str, &'static str) {
    use ServiceError::*;
    match error {
        GatewayError::Detection(_) => ("UNIMPLEMENTED", "notImplemented"),
        GatewayError::Service(e) => match e {
            Validation(_) => ("INVALID_ARGUMENT", "invalid"),
            NotFound { .. } => ("NOT_FOUND", "notFound"),
            AlreadyExists { .. } => ("ALREADY_EXISTS", "conflict"),
            AccessDenied { .. } => ("PERMISSION_DENIED", "forbidden"),
            Conflict(_) => ("ABORTED", "conflict"),
            Unsupported(_) => ("UNIMPLEMENTED", "notImplemented"),
            StorageUnavailable(_) | DriverUnavailable(_) | DriverTimeout(_) => {
                ("UNAVAILABLE", "backendError")
            }
            Internal(_) => ("INTERNAL", "backendError"),
        },
    }
}

// -----------------------------------------------------------------------
// Cloud Storage
// -----------------------------------------------------------------------

/// `POST /upload/storage/v1/b/{bucket}/o` in `media` or `multipart` form.
fn upload(op: &ResolvedOperation, envelope: &RequestEnvelope) -> Result<ServiceRequest, ServiceError> {
    let bucket = param(op, "bucket")?.to_string();
    match envelope.query_param("uploadType").unwrap_or("media") {
        "media" => Ok(ServiceRequest::PutObject {
            bucket,
            key: envelope
                .query_param("name")
                .filter(|n| !n.is_empty())
                .ok_or_else(|| invalid("media uploads need a name query parameter"))?
                .to_string(),
            data: envelope.body().clone(),
            meta: object_meta(envelope, META_PREFIX),
        }),
        "multipart" => {
            let boundary = envelope
                .header("content-type")
                .and_then(boundary_of)
                .ok_or_else(|| invalid("multipart upload without a boundary"))?;
            let parts = multipart_parts(envelope.body(), &boundary)?;
            let [(_, metadata), (headers, data)] = parts.as_slice() else {
                return Err(invalid("multipart upload needs a metadata part and a media part"));
            };
            let metadata: Map<String, Value> = serde_json::from_slice(metadata)
                .map_err(|e| invalid(format!("malformed object metadata: {e}")))?;
            let name = envelope
                .query_param("name")
                .or_else(|| str_field(&metadata, "name"))
                .filter(|n| !n.is_empty())
                .ok_or_else(|| invalid("object metadata has no name"))?;
            let content_type = str_field(&metadata, "contentType")
                .map(str::to_string)
                .or_else(|| part_header(headers, "content-type"));
            Ok(ServiceRequest::PutObject {
                bucket,
                key: name.to_string(),
                data: data.clone(),
                meta: ObjectMeta {
                    content_type,
                    user: string_map(metadata.get("metadata")),
                },
            })
        }
        other => Err(ServiceError::Unsupported(format!("uploadType={other}"))),
    }
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|p| {
        p.trim()
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Split a `multipart/related` body into `(headers, content)` parts.
fn multipart_parts(body: &Bytes, boundary: &str) -> Result<Vec<(String, Bytes)>, ServiceError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut pos = find(body, delimiter, 0).ok_or_else(|| invalid("multipart boundary not found"))?
        + delimiter.len();
    let mut parts = Vec::new();
    while !body[pos..].starts_with(b"--") {
        let start = pos + newline_len(&body[pos..]);
        let end = find(body, delimiter, start).ok_or_else(|| invalid("unterminated multipart body"))?;
        let mut part_end = end;
        if body[..part_end].ends_with(b"\r\n") {
            part_end -= 2;
        } else if body[..part_end].ends_with(b"\n") {
            part_end -= 1;
        }
        let part = body.slice(start..part_end.max(start));
        let (head_len, sep_len) = match find(&part, b"\r\n\r\n", 0) {
            Some(i) => (i, 4),
            None => find(&part, b"\n\n", 0).map_or((0, 0), |i| (i, 2)),
        };
        parts.push((
            String::from_utf8_lossy(&part[..head_len]).into_owned(),
            part.slice(head_len + sep_len..),
        ));
        pos = end + delimiter.len();
    }
    Ok(parts)
}

fn newline_len(rest: &[u8]) -> usize {
    if rest.starts_with(b"\r\n") {
        2
    } else if rest.starts_with(b"\n") {
        1
    } else {
        0
    }
}

fn part_header(headers: &str, name: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_string())
    })
}

fn bucket_resource(b: &BucketInfo) -> Value {
    json!({
        "kind": "storage#bucket",
        "id": b.name,
        "name": b.name,
        "selfLink": format!("{API_ROOT}/storage/v1/b/{}", b.name),
        "location": "US",
        "storageClass": "STANDARD",
        "timeCreated": iso8601(b.created_at),
        "updated": iso8601(b.created_at),
    })
}

fn object_resource(o: &ObjectInfo) -> Value {
    let link = format!(
        "storage/v1/b/{}/o/{}",
        o.bucket,
        utf8_percent_encode(&o.key, NON_ALPHANUMERIC)
    );
    let mut resource = json!({
        "kind": "storage#object",
        "id": format!("{}/{}/{}", o.bucket, o.key, o.last_modified),
        "name": o.key,
        "bucket": o.bucket,
        "generation": o.last_modified.to_string(),
        "size": o.size.to_string(),
        "etag": o.etag,
        "contentType": o.meta.content_type.as_deref().unwrap_or("application/octet-stream"),
        "storageClass": "STANDARD",
        "timeCreated": iso8601(o.last_modified),
        "updated": iso8601(o.last_modified),
        "selfLink": format!("{API_ROOT}/{link}"),
        "mediaLink": format!("{API_ROOT}/download/{link}?alt=media"),
    });
    if !o.meta.user.is_empty() {
        resource["metadata"] = json!(o.meta.user);
    }
    resource
}

// -----------------------------------------------------------------------
// Firestore
// -----------------------------------------------------------------------

/// A typed Firestore `fields` map as a plain JSON object.
fn from_fields(fields: Option<&Value>) -> Result<Value, ServiceError> {
    let Some(fields) = fields else {
        return Ok(Value::Object(Map::new()));
    };
    let fields = fields
        .as_object()
        .ok_or_else(|| invalid("fields must be an object"))?;
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), from_value(v)?)))
        .collect::<Result<Map<_, _>, ServiceError>>()
        .map(Value::Object)
}

fn from_value(value: &Value) -> Result<Value, ServiceError> {
    let typed = value
        .as_object()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| invalid("a Firestore value has exactly one type key"))?;
    let Some((kind, inner)) = typed.iter().next() else {
        return Err(invalid("empty Firestore value"));
    };
    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "doubleValue" | "stringValue" | "timestampValue" | "referenceValue"
        | "bytesValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(format!("bad integerValue {s:?}")))?,
            other => other.clone(),
        },
        "mapValue" => from_fields(inner.get("fields"))?,
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().map(from_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default(),
        ),
        other => return Err(invalid(format!("unknown Firestore value type {other}"))),
    })
}

/// A plain JSON value in Firestore's typed form.
fn to_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(to_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": to_fields(map) } }),
    }
}

fn to_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), to_value(v))).collect()
}

fn document(op: &ResolvedOperation, project: &str, item: &ItemInfo) -> Value {
    let database = op.param("database").unwrap_or("(default)");
    json!({
        "name": format!(
            "projects/{project}/databases/{database}/documents/{}/{}",
            item.table, item.key
        ),
        "fields": item.document.as_object().map(to_fields).unwrap_or_default(),
        "createTime": iso8601(item.updated_at),
        "updateTime": iso8601(item.updated_at),
    })
}

// -----------------------------------------------------------------------
// Pub/Sub
// -----------------------------------------------------------------------

/// `topics/{topic}:publish` with exactly one message.
fn publish(op: &ResolvedOperation, envelope: &RequestEnvelope) -> Result<ServiceRequest, ServiceError> {
    let body = json_body(envelope)?;
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let [message] = messages else {
        return Err(invalid("publish takes exactly one message"));
    };
    let data = message.get("data").and_then(Value::as_str).unwrap_or_default();
    let decoded = STANDARD
        .decode(data)
        .map_err(|_| invalid("message data must be base64"))?;
    let body =
        String::from_utf8(decoded).map_err(|_| invalid("message data must decode to UTF-8"))?;
    Ok(ServiceRequest::SendMessage {
        queue: param(op, "topic")?.to_string(),
        body,
        attributes: string_map(message.get("attributes")),
    })
}

fn topic(project: &str, name: &str, labels: &std::collections::BTreeMap<String, String>) -> Value {
    let mut resource = json!({ "name": format!("projects/{project}/topics/{name}") });
    if !labels.is_empty() {
        resource["labels"] = json!(labels);
    }
    resource
}

fn received_message(m: &MessageInfo) -> Value {
    json!({
        "ackId": m.receipt,
        "message": {
            "data": STANDARD.encode(m.body.as_bytes()),
            "attributes": m.attributes,
            "messageId": m.message_id,
            "publishTime": iso8601(m.sent_at),
        },
    })
}

// -----------------------------------------------------------------------
// Compute Engine
// -----------------------------------------------------------------------

/// vCPUs and memory of common machine types.
fn machine_shape(machine_type: &str) -> (u32, u32) {
    match last_segment(machine_type) {
        "e2-micro" => (2, 1024),
        "e2-small" => (2, 2048),
        "e2-medium" => (2, 4096),
        "e2-standard-2" | "n2-standard-2" => (2, 8192),
        "e2-standard-4" | "n2-standard-4" => (4, 16384),
        "n1-standard-1" => (1, 3840),
        _ => (1, 1024),
    }
}

fn insert_instance(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
) -> Result<ServiceRequest, ServiceError> {
    let body = json_body(envelope)?;
    let image = body
        .get("disks")
        .and_then(Value::as_array)
        .and_then(|disks| {
            disks.iter().find_map(|d| {
                d.pointer("/initializeParams/sourceImage")
                    .and_then(Value::as_str)
            })
        })
        .or_else(|| str_field(&body, "sourceImage"))
        .ok_or_else(|| invalid("instance needs a boot disk sourceImage"))?;
    let (cpus, memory_mb) = machine_shape(str_field(&body, "machineType").unwrap_or("e2-micro"));
    Ok(ServiceRequest::CreateWorkload(WorkloadRequest {
        name: Some(required_str(&body, "name")?.to_string()),
        image: image.to_string(),
        command: Vec::new(),
        cpus,
        memory_mb,
        zone: op.param("zone").map(str::to_string),
    }))
}

fn zone_link(op: &ResolvedOperation, project: &str) -> String {
    format!(
        "{API_ROOT}/compute/v1/projects/{project}/zones/{}",
        op.param("zone").unwrap_or("us-central1-a")
    )
}

fn instance_link(op: &ResolvedOperation, project: &str, name: &str) -> String {
    format!("{}/instances/{name}", zone_link(op, project))
}

fn instance(op: &ResolvedOperation, project: &str, w: &WorkloadInfo) -> Value {
    let status = match w.state.as_str() {
        "pending" => "PROVISIONING",
        "running" => "RUNNING",
        _ => "TERMINATED",
    };
    let zone = format!(
        "{API_ROOT}/compute/v1/projects/{project}/zones/{}",
        w.zone
            .as_deref()
            .or(op.param("zone"))
            .unwrap_or("us-central1-a")
    );
    json!({
        "kind": "compute#instance",
        "id": w.id,
        "name": w.id,
        "zone": zone,
        "status": status,
        "sourceImage": w.image,
        "creationTimestamp": iso8601(w.created_at),
        "networkInterfaces": [{
            "name": "nic0",
            "network": format!("{API_ROOT}/compute/v1/projects/{project}/global/networks/default"),
            "networkIP": w.ip_address,
        }],
        "disks": w.volumes.iter().map(|v| json!({
            "deviceName": v,
            "source": format!("{zone}/disks/{v}"),
            "boot": false,
        })).collect::<Vec<_>>(),
        "selfLink": format!("{zone}/instances/{}", w.id),
    })
}

/// A completed `compute#operation`.
fn operation(op: &ResolvedOperation, project: &str, kind: &str, target: &str) -> Value {
    let now = iso8601(stratus_types::now_millis());
    let name = format!("operation-{}", random_name(16).to_ascii_lowercase());
    let zone = zone_link(op, project);
    json!({
        "kind": "compute#operation",
        "id": random_name(12),
        "name": name,
        "zone": zone,
        "operationType": kind,
        "targetLink": target,
        "status": "DONE",
        "progress": 100,
        "insertTime": now,
        "startTime": now,
        "endTime": now,
        "selfLink": format!("{zone}/operations/{name}"),
    })
}

// -----------------------------------------------------------------------
// Cloud Billing catalog
// -----------------------------------------------------------------------

fn sku(item: &PriceItem) -> Value {
    let units = item.unit_price.trunc();
    let nanos = ((item.unit_price - units) * 1e9).round() as i64;
    json!({
        "name": format!("services/{}/skus/{}", item.service_code, item.product_code),
        "skuId": item.product_code,
        "description": item.description,
        "category": {
            "serviceDisplayName": item.service_code,
            "resourceFamily": item.attributes.get("resourceFamily").map_or("", String::as_str),
            "resourceGroup": item.attributes.get("resourceGroup").map_or("", String::as_str),
            "usageType": "OnDemand",
        },
        "serviceRegions": [item.region],
        "pricingInfo": [{
            "pricingExpression": {
                "usageUnit": item.unit,
                "tieredRates": [{
                    "startUsageAmount": 0,
                    "unitPrice": {
                        "currencyCode": item.currency,
                        "units": format!("{}", units as i64),
                        "nanos": nanos,
                    },
                }],
            },
        }],
        "serviceProviderName": "Google",
    })
}
