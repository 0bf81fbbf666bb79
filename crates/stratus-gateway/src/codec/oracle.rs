//! Oracle Cloud: Object Storage, NoSQL, Queue, Core Services compute and
//! the metering price list, JSON over REST.

use axum::http::StatusCode;
use serde_json::{Map, Value, json};
use stratus_protocol::{Action, Method, RequestEnvelope, ResolvedOperation, Service};
use stratus_services::{
    BucketInfo, ItemInfo, MessageInfo, ObjectInfo, Outcome, PageRequest, PriceItem, QueueInfo,
    RequestContext, Resource, ServiceError, ServiceRequest, TableInfo, VolumeInfo, WorkloadInfo,
    WorkloadRequest,
};
use stratus_types::Dialect;

use super::{
    Codec, http_date, invalid, iso8601, json_body, meta_headers, object_meta, ok_json, param,
    parse_count, required_str, str_field, string_map, u64_field, unexpected,
};
use crate::error::GatewayError;
use crate::response::WireResponse;

const META_PREFIX: &str = "opc-meta-";
const REQUEST_ID_HEADER: &str = "opc-request-id";
const RETRY_TOKEN_HEADER: &str = "opc-retry-token";
const NEXT_PAGE_HEADER: &str = "opc-next-page";
const REGION: &str = "us-ashburn-1";
const AVAILABILITY_DOMAIN: &str = "AD-1";
const GIB: u64 = 1024 * 1024 * 1024;

pub(crate) struct OracleCodec;

impl Codec for OracleCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    fn credential(&self, op: &ResolvedOperation, envelope: &RequestEnvelope) -> Option<String> {
        if let Some(namespace) = op.param("namespace").filter(|n| !n.is_empty()) {
            return Some(namespace.to_string());
        }
        if let Some(compartment) = envelope.query_param("compartmentId").filter(|c| !c.is_empty()) {
            return Some(compartment.to_string());
        }
        json_body(envelope)
            .ok()
            .and_then(|body| str_field(&body, "compartmentId").map(str::to_string))
            .filter(|c| !c.is_empty())
    }

    fn idempotency_token(
        &self,
        _op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Option<String> {
        envelope
            .header(RETRY_TOKEN_HEADER)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn decode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
    ) -> Result<ServiceRequest, ServiceError> {
        let limit = || parse_count(envelope.query_param("limit"), "limit");
        let page = || Ok::<_, ServiceError>(PageRequest::new(envelope.query_param("page"), limit()?));
        let version_id = || {
            envelope
                .query_param("versionId")
                .filter(|v| !v.is_empty())
                .map(str::to_string)
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
                page: PageRequest::new(envelope.query_param("start"), limit()?),
            },
            Action::PutObject => ServiceRequest::PutObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                data: envelope.body().clone(),
                meta: object_meta(envelope, META_PREFIX),
            },
            Action::GetObject => ServiceRequest::GetObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: version_id(),
            },
            Action::HeadObject => ServiceRequest::HeadObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: version_id(),
            },
            Action::DeleteObject => ServiceRequest::DeleteObject {
                bucket: param(op, "bucket")?.to_string(),
                key: param(op, "object")?.to_string(),
                version_id: version_id(),
            },

            Action::CreateTable => {
                let body = json_body(envelope)?;
                ServiceRequest::CreateTable {
                    name: required_str(&body, "name")?.to_string(),
                    key_attribute: primary_key(required_str(&body, "ddlStatement")?)?,
                }
            }
            Action::ListTables => ServiceRequest::ListTables { page: page()? },
            Action::DescribeTable => ServiceRequest::DescribeTable {
                name: param(op, "table")?.to_string(),
            },
            Action::DeleteTable => ServiceRequest::DeleteTable {
                name: param(op, "table")?.to_string(),
            },
            Action::PutItem => {
                let body = json_body(envelope)?;
                let value = body
                    .get("value")
                    .filter(|v| v.is_object())
                    .ok_or_else(|| invalid("row value must be a JSON object"))?;
                ServiceRequest::PutItem {
                    table: param(op, "table")?.to_string(),
                    key: None,
                    item: value.clone(),
                    create_table: false,
                }
            }
            Action::GetItem => ServiceRequest::GetItem {
                table: param(op, "table")?.to_string(),
                key: row_key(envelope)?,
            },
            Action::DeleteItem => ServiceRequest::DeleteItem {
                table: param(op, "table")?.to_string(),
                key: row_key(envelope)?,
            },
            Action::Scan => ServiceRequest::Scan {
                table: param(op, "table")?.to_string(),
                page: page()?,
            },

            Action::CreateQueue => {
                let body = json_body(envelope)?;
                let mut attributes = string_map(body.get("freeformTags"));
                for field in ["retentionInSeconds", "visibilityInSeconds", "timeoutInSeconds"] {
                    if let Some(v) = u64_field(&body, field)? {
                        attributes.insert(field.to_string(), v.to_string());
                    }
                }
                ServiceRequest::CreateQueue {
                    name: required_str(&body, "displayName")?.to_string(),
                    attributes,
                }
            }
            Action::ListQueues => ServiceRequest::ListQueues {
                prefix: envelope
                    .query_param("displayName")
                    .unwrap_or_default()
                    .to_string(),
                page: page()?,
            },
            Action::GetQueue => ServiceRequest::GetQueue {
                name: param(op, "queue")?.to_string(),
            },
            Action::DeleteQueue => ServiceRequest::DeleteQueue {
                name: param(op, "queue")?.to_string(),
            },
            Action::SendMessage => {
                let body = json_body(envelope)?;
                let messages = body
                    .get("messages")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let [message] = messages else {
                    return Err(invalid("PutMessages takes exactly one message"));
                };
                let content = message
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("message content must be a string"))?;
                ServiceRequest::SendMessage {
                    queue: param(op, "queue")?.to_string(),
                    body: content.to_string(),
                    attributes: string_map(message.pointer("/metadata/customProperties")),
                }
            }
            Action::ReceiveMessages => ServiceRequest::ReceiveMessages {
                queue: param(op, "queue")?.to_string(),
                max: limit()?.unwrap_or(1),
            },
            Action::DeleteMessage => ServiceRequest::DeleteMessage {
                queue: param(op, "queue")?.to_string(),
                receipt: param(op, "receipt")?.to_string(),
            },

            Action::CreateWorkload => launch_instance(envelope)?,
            Action::ListWorkloads => ServiceRequest::ListWorkloads,
            Action::GetWorkload => ServiceRequest::GetWorkload {
                id: param(op, "instance")?.to_string(),
            },
            Action::DeleteWorkload => ServiceRequest::DeleteWorkload {
                id: param(op, "instance")?.to_string(),
            },
            Action::CreateVolume => {
                let body = json_body(envelope)?;
                let gib = u64_field(&body, "sizeInGBs")?.unwrap_or(50);
                ServiceRequest::CreateVolume {
                    id: None,
                    size_bytes: gib.saturating_mul(GIB),
                }
            }
            Action::AttachVolume => {
                let body = json_body(envelope)?;
                ServiceRequest::AttachVolume {
                    workload: required_str(&body, "instanceId")?.to_string(),
                    volume: required_str(&body, "volumeId")?.to_string(),
                }
            }

            Action::GetPrice => ServiceRequest::GetPrice {
                product_code: envelope
                    .query_param("partNumber")
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| invalid("partNumber must not be empty"))?
                    .to_string(),
            },
            Action::ListPrices => ServiceRequest::ListPrices {
                service_code: envelope
                    .query_param("serviceCategory")
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                filters: Vec::new(),
                page: page()?,
            },
            Action::ListPriceServices => ServiceRequest::ListPriceServices,

            other @ (Action::GetBucketVersioning
            | Action::PutBucketVersioning
            | Action::CreateMultipartUpload
            | Action::UploadPart
            | Action::CompleteMultipartUpload
            | Action::AbortMultipartUpload) => {
                return Err(ServiceError::Unsupported(format!(
                    "{other} has no Oracle equivalent"
                )));
            }
        })
    }

    fn encode(
        &self,
        op: &ResolvedOperation,
        envelope: &RequestEnvelope,
        ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<WireResponse, ServiceError> {
        let namespace = op.param("namespace").unwrap_or("default");
        let compartment = ctx.scope.as_str();
        let response = match outcome {
            Outcome::Bucket(b) if envelope.method() == Method::Head => {
                WireResponse::empty(StatusCode::OK).with_header("etag", bucket_etag(&b))
            }
            Outcome::Bucket(b) => ok_json(&bucket(namespace, &b))?
                .with_header("etag", bucket_etag(&b))
                .with_header("location", format!("/n/{namespace}/b/{}", b.name)),
            Outcome::Buckets(buckets) => ok_json(&Value::Array(
                buckets.iter().map(|b| bucket(namespace, b)).collect(),
            ))?,
            Outcome::Object(info) if op.action == Action::PutObject => {
                WireResponse::empty(StatusCode::OK)
                    .with_header("etag", info.etag.clone())
                    .with_header("last-modified", http_date(info.last_modified))
            }
            Outcome::Object(info) => object_headers(WireResponse::empty(StatusCode::OK), &info),
            Outcome::ObjectData { info, data } => {
                object_headers(WireResponse::empty(StatusCode::OK), &info).with_body(data)
            }
            Outcome::Objects(listing) => {
                let mut body = json!({
                    "objects": listing.objects.items.iter().map(object_summary).collect::<Vec<_>>(),
                    "prefixes": listing.common_prefixes,
                });
                if let Some(token) = listing.objects.next_token {
                    body["nextStartWith"] = json!(token);
                }
                ok_json(&body)?
            }

            Outcome::Table(t) => ok_json(&table(compartment, &t))?,
            Outcome::Tables(listing) => paged(
                json!({ "items": listing.items.iter().map(|t| table(compartment, t)).collect::<Vec<_>>() }),
                listing.next_token,
            )?,
            Outcome::Item(item) if op.action == Action::PutItem => {
                ok_json(&json!({ "version": item.updated_at.to_string() }))?
            }
            Outcome::Item(item) => ok_json(&row(&item))?,
            Outcome::Items(listing) => paged(
                json!({ "items": listing.items.iter().map(row).collect::<Vec<_>>() }),
                listing.next_token,
            )?,

            Outcome::Queue(q) => ok_json(&queue(envelope, compartment, &q))?,
            Outcome::Queues(listing) => paged(
                json!({
                    "items": listing
                        .items
                        .iter()
                        .map(|q| queue(envelope, compartment, q))
                        .collect::<Vec<_>>(),
                }),
                listing.next_token,
            )?,
            Outcome::MessageSent(m) => ok_json(&json!({
                "messages": [{ "id": m.message_id, "expireAfter": Value::Null }],
            }))?,
            Outcome::Messages(messages) => ok_json(&json!({
                "messages": messages.iter().map(message).collect::<Vec<_>>(),
            }))?,

            Outcome::Workload(w) => ok_json(&instance(compartment, &w))?,
            Outcome::Workloads(workloads) => ok_json(&Value::Array(
                workloads.iter().map(|w| instance(compartment, w)).collect(),
            ))?,
            Outcome::Volume(v) => ok_json(&volume(compartment, &v))?,
            Outcome::Attached { workload, volume } => ok_json(&json!({
                "id": format!("ocid1.volumeattachment.{workload}.{volume}"),
                "instanceId": workload,
                "volumeId": volume,
                "compartmentId": compartment,
                "availabilityDomain": AVAILABILITY_DOMAIN,
                "attachmentType": "paravirtualized",
                "lifecycleState": "ATTACHED",
                "timeCreated": iso8601(stratus_types::now_millis()),
            }))?,

            Outcome::Price(item) => ok_json(&json!({ "items": [price(&item)] }))?,
            Outcome::Prices(listing) => {
                let has_more = listing.next_token.is_some();
                paged(
                    json!({
                        "items": listing.items.iter().map(price).collect::<Vec<_>>(),
                        "hasMore": has_more,
                    }),
                    listing.next_token,
                )?
            }

            Outcome::ObjectDeleted(_) => WireResponse::empty(StatusCode::NO_CONTENT),
            Outcome::Deleted { .. } => match op.action {
                Action::DeleteTable | Action::DeleteQueue => {
                    WireResponse::empty(StatusCode::ACCEPTED)
                }
                Action::DeleteItem => ok_json(&json!({ "isSuccess": true }))?,
                Action::DeleteMessage => WireResponse::empty(StatusCode::OK),
                _ => WireResponse::empty(StatusCode::NO_CONTENT),
            },

            _ => return Err(unexpected(op)),
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
        // Oracle hides foreign resources behind the same 404 as missing ones.
        let status = match error.service() {
            Some(ServiceError::AccessDenied { .. }) => StatusCode::NOT_FOUND,
            _ => error.status_code(),
        };
        let code = fault(op.map(ResolvedOperation::service), error);
        let response = if envelope.method() == Method::Head {
            WireResponse::empty(status)
        } else {
            WireResponse::json(status, &json!({ "code": code, "message": error.to_string() }))
                .unwrap_or_else(|_| WireResponse::empty(status))
        };
        response.with_header(REQUEST_ID_HEADER, request_id)
    }
}

fn fault(service: Option<Service>, error: &GatewayError) -> &'static str {
    use ServiceError::*;
    let GatewayError::Service(e) = error else {
        return "NotImplemented";
    };
    let object_storage = service == Some(Service::ObjectStorage);
    match e {
        Validation(_) => "InvalidParameter",
        NotFound {
            resource: Resource::Bucket,
            ..
        } if object_storage => "BucketNotFound",
        NotFound {
            resource: Resource::Object,
            ..
        } if object_storage => "ObjectNotFound",
        NotFound { .. } | AccessDenied { .. } => "NotAuthorizedOrNotFound",
        AlreadyExists {
            resource: Resource::Bucket,
            ..
        } => "BucketAlreadyExists",
        AlreadyExists { .. } | Conflict(_) => "Conflict",
        Unsupported(_) => "NotImplemented",
        StorageUnavailable(_) | DriverUnavailable(_) | DriverTimeout(_) => "ServiceUnavailable",
        Internal(_) => "InternalServerError",
    }
}

/// Attach `opc-next-page` when more results follow.
fn paged(body: Value, next: Option<String>) -> Result<WireResponse, ServiceError> {
    let response = ok_json(&body)?;
    Ok(match next {
        Some(token) => response.with_header(NEXT_PAGE_HEADER, token),
        None => response,
    })
}

// -----------------------------------------------------------------------
// Object Storage
// -----------------------------------------------------------------------

fn bucket_etag(b: &BucketInfo) -> String {
    format!("{}-{}", b.name, b.created_at)
}

fn bucket(namespace: &str, b: &BucketInfo) -> Value {
    json!({
        "namespace": namespace,
        "name": b.name,
        "compartmentId": b.scope,
        "createdBy": b.scope,
        "timeCreated": iso8601(b.created_at),
        "etag": bucket_etag(b),
        "publicAccessType": "NoPublicAccess",
        "storageTier": "Standard",
    })
}

fn object_headers(response: WireResponse, info: &ObjectInfo) -> WireResponse {
    let response = response
        .with_header("content-length", info.size.to_string())
        .with_header("etag", info.etag.clone())
        .with_header("last-modified", http_date(info.last_modified))
        .with_header("accept-ranges", "bytes");
    let response = match &info.version_id {
        Some(version) => response.with_header("version-id", version.clone()),
        None => response,
    };
    meta_headers(response, &info.meta, META_PREFIX)
}

fn object_summary(o: &ObjectInfo) -> Value {
    json!({
        "name": o.key,
        "size": o.size,
        "etag": o.etag,
        "timeCreated": iso8601(o.last_modified),
        "timeModified": iso8601(o.last_modified),
        "storageTier": "Standard",
    })
}

// -----------------------------------------------------------------------
// NoSQL
// -----------------------------------------------------------------------

/// The single key column named by `PRIMARY KEY(...)` in a DDL statement.
fn primary_key(ddl: &str) -> Result<String, ServiceError> {
    let upper = ddl.to_ascii_uppercase();
    let start = upper
        .find("PRIMARY KEY")
        .ok_or_else(|| invalid("ddlStatement has no PRIMARY KEY clause"))?;
    let open = ddl[start..]
        .find('(')
        .map(|i| start + i + 1)
        .ok_or_else(|| invalid("malformed PRIMARY KEY clause"))?;
    let mut depth = 1;
    let mut close = None;
    for (i, c) in ddl[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let inner = &ddl[open..close.ok_or_else(|| invalid("malformed PRIMARY KEY clause"))?];
    let columns: Vec<&str> = inner
        .split([',', '(', ')'])
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("SHARD"))
        .collect();
    match columns.as_slice() {
        [column] => Ok(column.to_string()),
        [] => Err(invalid("PRIMARY KEY names no column")),
        _ => Err(ServiceError::Unsupported("composite primary keys".into())),
    }
}

/// Row key from `?key=column:value`.
fn row_key(envelope: &RequestEnvelope) -> Result<String, ServiceError> {
    let raw = envelope
        .query_param("key")
        .filter(|k| !k.is_empty())
        .ok_or_else(|| invalid("missing row key"))?;
    Ok(raw.split_once(':').map_or(raw, |(_, value)| value).to_string())
}

fn table(compartment: &str, t: &TableInfo) -> Value {
    let mut resource = json!({
        "id": format!("ocid1.nosqltable.oc1.{REGION}.{}", t.name),
        "name": t.name,
        "compartmentId": compartment,
        "lifecycleState": "ACTIVE",
        "timeCreated": iso8601(t.created_at),
        "schema": { "primaryKey": [t.key_attribute] },
    });
    if let Some(count) = t.item_count {
        resource["rowCount"] = json!(count);
    }
    resource
}

fn row(item: &ItemInfo) -> Value {
    json!({
        "value": item.document,
        "timeOfExpiration": Value::Null,
        "usage": { "readUnitsConsumed": 1, "writeUnitsConsumed": 0 },
    })
}

// -----------------------------------------------------------------------
// Queue
// -----------------------------------------------------------------------

fn queue(envelope: &RequestEnvelope, compartment: &str, q: &QueueInfo) -> Value {
    let host = envelope.header("host").unwrap_or("localhost:4568");
    let attr = |name: &str| q.attributes.get(name).and_then(|v| v.parse::<u64>().ok());
    json!({
        "id": q.name,
        "displayName": q.name,
        "compartmentId": compartment,
        "lifecycleState": "ACTIVE",
        "messagesEndpoint": format!("http://{host}"),
        "retentionInSeconds": attr("retentionInSeconds").unwrap_or(345_600),
        "visibilityInSeconds": attr("visibilityInSeconds").unwrap_or(30),
        "timeoutInSeconds": attr("timeoutInSeconds").unwrap_or(30),
        "timeCreated": iso8601(q.created_at),
        "freeformTags": q
            .attributes
            .iter()
            .filter(|(k, _)| !k.ends_with("InSeconds"))
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<String, Value>>(),
    })
}

fn message(m: &MessageInfo) -> Value {
    json!({
        "id": m.message_id,
        "content": m.body,
        "receipt": m.receipt,
        "deliveryCount": 1,
        "visibleAfter": iso8601(m.sent_at),
        "expireAfter": Value::Null,
        "metadata": { "customProperties": m.attributes },
    })
}

// -----------------------------------------------------------------------
// Compute
// -----------------------------------------------------------------------

fn launch_instance(envelope: &RequestEnvelope) -> Result<ServiceRequest, ServiceError> {
    let body = json_body(envelope)?;
    let image = body
        .get("sourceDetails")
        .and_then(|d| d.get("imageId"))
        .and_then(Value::as_str)
        .or_else(|| str_field(&body, "imageId"))
        .filter(|i| !i.is_empty())
        .ok_or_else(|| invalid("instance needs sourceDetails.imageId"))?;
    let shape = body.get("shapeConfig");
    let cpus = shape
        .and_then(|s| s.get("ocpus"))
        .and_then(Value::as_f64)
        .map_or(1, |n| n.ceil().max(1.0) as u32);
    let memory_mb = shape
        .and_then(|s| s.get("memoryInGBs"))
        .and_then(Value::as_f64)
        .map_or(1024, |gb| (gb * 1024.0).ceil().max(1.0) as u32);
    Ok(ServiceRequest::CreateWorkload(WorkloadRequest {
        name: None,
        image: image.to_string(),
        command: Vec::new(),
        cpus,
        memory_mb,
        zone: str_field(&body, "availabilityDomain").map(str::to_string),
    }))
}

fn instance(compartment: &str, w: &WorkloadInfo) -> Value {
    let state = match w.state.as_str() {
        "pending" => "PROVISIONING",
        "running" => "RUNNING",
        "stopped" => "STOPPED",
        _ => "TERMINATED",
    };
    json!({
        "id": w.id,
        "displayName": w.id,
        "compartmentId": compartment,
        "availabilityDomain": w.zone.as_deref().unwrap_or(AVAILABILITY_DOMAIN),
        "region": REGION,
        "imageId": w.image,
        "shape": "VM.Standard.E4.Flex",
        "lifecycleState": state,
        "privateIp": w.ip_address,
        "timeCreated": iso8601(w.created_at),
    })
}

fn volume(compartment: &str, v: &VolumeInfo) -> Value {
    json!({
        "id": v.id,
        "displayName": v.id,
        "compartmentId": compartment,
        "availabilityDomain": AVAILABILITY_DOMAIN,
        "sizeInGBs": v.size_bytes.div_ceil(GIB),
        "sizeInMBs": v.size_bytes.div_ceil(1024 * 1024),
        "lifecycleState": "AVAILABLE",
        "timeCreated": iso8601(v.created_at),
    })
}

// -----------------------------------------------------------------------
// Prices
// -----------------------------------------------------------------------

fn price(item: &PriceItem) -> Value {
    json!({
        "partNumber": item.product_code,
        "displayName": item.description,
        "metricName": item.unit,
        "serviceCategory": item.service_code,
        "currencyCodeLocalizations": [{
            "currencyCode": item.currency,
            "prices": [{ "model": "PAY_AS_YOU_GO", "value": item.unit_price }],
        }],
    })
}
