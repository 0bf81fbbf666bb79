//! AWS JSON protocol: DynamoDB, SQS and the Price List API, addressed by
//! `x-amz-target`.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::{Map, Value, json};
use stratus_protocol::{Action, RequestEnvelope, ResolvedOperation, Service};
use stratus_services::{
    ItemInfo, Listing, MessageInfo, Outcome, PageRequest, PriceFilter, PriceItem, QueueInfo,
    Resource, ServiceError, ServiceRequest, TableInfo, key_of,
};

use super::{ACCOUNT_ID, REGION, endpoint};
use crate::codec::{
    epoch_seconds, invalid, json_body, last_segment, required_str, str_field, string_map,
    u64_field, unexpected,
};
use crate::error::GatewayError;
use crate::response::WireResponse;

const JSON_1_0: &str = "application/x-amz-json-1.0";
const JSON_1_1: &str = "application/x-amz-json-1.1";

/// Price List term and rate codes for on-demand prices.
const ON_DEMAND_TERM: &str = "JRTCKXETXF";
const ON_DEMAND_RATE: &str = "6YS6EN2CT7";

pub(super) fn decode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
) -> Result<ServiceRequest, ServiceError> {
    let body = json_body(envelope)?;
    match op.service() {
        Service::DocumentStore => decode_dynamodb(op, &body),
        Service::Messaging => decode_sqs(op, &body),
        Service::Pricing => decode_pricing(op, &body),
        other => Err(invalid(format!("{other} has no JSON protocol"))),
    }
}

pub(super) fn encode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    outcome: Outcome,
) -> Result<WireResponse, ServiceError> {
    let body = json_body(envelope)?;
    let (content_type, value) = match op.service() {
        Service::DocumentStore => (JSON_1_0, encode_dynamodb(op, &body, outcome)?),
        Service::Messaging => (JSON_1_0, encode_sqs(op, envelope, outcome)?),
        Service::Pricing => (JSON_1_1, encode_pricing(op, &body, outcome)?),
        _ => return Err(unexpected(op)),
    };
    WireResponse::json_as(StatusCode::OK, content_type, &value)
}

// -----------------------------------------------------------------------
// DynamoDB
// -----------------------------------------------------------------------

fn decode_dynamodb(
    op: &ResolvedOperation,
    body: &Map<String, Value>,
) -> Result<ServiceRequest, ServiceError> {
    let table = || required_str(body, "TableName").map(str::to_string);
    let limit = u64_field(body, "Limit")?.map(|n| n as usize);
    Ok(match op.action {
        Action::CreateTable => ServiceRequest::CreateTable {
            name: table()?,
            key_attribute: hash_key(body)?,
        },
        Action::DeleteTable => ServiceRequest::DeleteTable { name: table()? },
        Action::DescribeTable => ServiceRequest::DescribeTable { name: table()? },
        Action::ListTables => {
            let mut page = PageRequest::new(None, limit);
            page.after = str_field(body, "ExclusiveStartTableName").map(str::to_string);
            ServiceRequest::ListTables { page }
        }
        Action::PutItem => ServiceRequest::PutItem {
            table: table()?,
            key: None,
            item: body
                .get("Item")
                .filter(|v| v.is_object())
                .cloned()
                .ok_or_else(|| invalid("Item must be a map of attribute values"))?,
            create_table: false,
        },
        Action::GetItem => ServiceRequest::GetItem {
            table: table()?,
            key: item_key(body.get("Key"))?,
        },
        Action::DeleteItem => ServiceRequest::DeleteItem {
            table: table()?,
            key: item_key(body.get("Key"))?,
        },
        Action::Scan => {
            let mut page = PageRequest::new(None, limit);
            if let Some(start) = body.get("ExclusiveStartKey") {
                page.after = Some(item_key(Some(start))?);
            }
            ServiceRequest::Scan {
                table: table()?,
                page,
            }
        }
        other => return Err(invalid(format!("{other} is not a DynamoDB operation"))),
    })
}

/// The `HASH` attribute of a `KeySchema`.
fn hash_key(body: &Map<String, Value>) -> Result<String, ServiceError> {
    let schema = body
        .get("KeySchema")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("KeySchema is required"))?;
    if schema.len() > 1 {
        return Err(ServiceError::Unsupported("composite primary keys".into()));
    }
    schema
        .iter()
        .find(|k| k.get("KeyType").and_then(Value::as_str) == Some("HASH"))
        .and_then(|k| k.get("AttributeName").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| invalid("KeySchema needs a HASH attribute"))
}

/// The key string of a single-attribute `Key` map.
fn item_key(key: Option<&Value>) -> Result<String, ServiceError> {
    let map = key
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("Key must be a map of attribute values"))?;
    let mut names = map.keys();
    let (Some(name), None) = (names.next(), names.next()) else {
        return Err(invalid("Key must name exactly one attribute"));
    };
    key_of(&Value::Object(map.clone()), name)
        .ok_or_else(|| invalid(format!("Key attribute {name:?} must be a scalar")))
}

fn encode_dynamodb(
    op: &ResolvedOperation,
    body: &Map<String, Value>,
    outcome: Outcome,
) -> Result<Value, ServiceError> {
    Ok(match (op.action, outcome) {
        (Action::CreateTable, Outcome::Table(table)) => {
            json!({ "TableDescription": table_description(&table) })
        }
        (_, Outcome::Table(table)) => json!({ "Table": table_description(&table) }),
        (Action::DeleteTable, Outcome::Deleted { .. }) => json!({
            "TableDescription": {
                "TableName": str_field(body, "TableName").unwrap_or_default(),
                "TableStatus": "DELETING",
            }
        }),
        (_, Outcome::Tables(listing)) => {
            let mut out = json!({
                "TableNames": listing.items.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            });
            if listing.next_token.is_some()
                && let Some(last) = listing.items.last()
            {
                out["LastEvaluatedTableName"] = json!(last.name);
            }
            out
        }
        (Action::GetItem, Outcome::Item(item)) => json!({ "Item": item.document }),
        (_, Outcome::Item(_) | Outcome::Deleted { .. }) => json!({}),
        (_, Outcome::Items(listing)) => scan_result(listing),
        _ => return Err(unexpected(op)),
    })
}

fn table_description(table: &TableInfo) -> Value {
    let mut out = json!({
        "TableName": table.name,
        "TableStatus": "ACTIVE",
        "TableArn": format!("arn:aws:dynamodb:{REGION}:{ACCOUNT_ID}:table/{}", table.name),
        "KeySchema": [{ "AttributeName": table.key_attribute, "KeyType": "HASH" }],
        "AttributeDefinitions": [{ "AttributeName": table.key_attribute, "AttributeType": "S" }],
        "CreationDateTime": epoch_seconds(table.created_at),
        "BillingModeSummary": { "BillingMode": "PAY_PER_REQUEST" },
        "ProvisionedThroughput": { "ReadCapacityUnits": 0, "WriteCapacityUnits": 0 },
        "TableSizeBytes": 0,
    });
    if let Some(count) = table.item_count {
        out["ItemCount"] = json!(count);
    }
    out
}

fn scan_result(listing: Listing<ItemInfo>) -> Value {
    let last_key = listing
        .next_token
        .as_ref()
        .and_then(|_| listing.items.last())
        .and_then(key_attribute_of);
    let count = listing.items.len();
    let mut out = json!({
        "Items": listing.items.into_iter().map(|i| i.document).collect::<Vec<_>>(),
        "Count": count,
        "ScannedCount": count,
    });
    if let Some(key) = last_key {
        out["LastEvaluatedKey"] = key;
    }
    out
}

/// `{attr: value}` for the attribute of `item` that holds its key.
fn key_attribute_of(item: &ItemInfo) -> Option<Value> {
    let doc = item.document.as_object()?;
    doc.iter()
        .find(|(name, _)| key_of(&item.document, name).as_deref() == Some(item.key.as_str()))
        .map(|(name, value)| json!({ name.as_str(): value }))
}

// -----------------------------------------------------------------------
// SQS
// -----------------------------------------------------------------------

fn decode_sqs(
    op: &ResolvedOperation,
    body: &Map<String, Value>,
) -> Result<ServiceRequest, ServiceError> {
    let queue = || required_str(body, "QueueUrl").map(|url| last_segment(url).to_string());
    Ok(match op.action {
        Action::CreateQueue => ServiceRequest::CreateQueue {
            name: required_str(body, "QueueName")?.to_string(),
            attributes: string_map(body.get("Attributes")),
        },
        Action::GetQueue => ServiceRequest::GetQueue {
            name: required_str(body, "QueueName")?.to_string(),
        },
        Action::DeleteQueue => ServiceRequest::DeleteQueue { name: queue()? },
        Action::ListQueues => ServiceRequest::ListQueues {
            prefix: str_field(body, "QueueNamePrefix")
                .unwrap_or_default()
                .to_string(),
            page: PageRequest::new(
                str_field(body, "NextToken"),
                u64_field(body, "MaxResults")?.map(|n| n as usize),
            ),
        },
        Action::SendMessage => ServiceRequest::SendMessage {
            queue: queue()?,
            body: str_field(body, "MessageBody")
                .ok_or_else(|| invalid("MessageBody is required"))?
                .to_string(),
            attributes: message_attributes(body.get("MessageAttributes")),
        },
        Action::ReceiveMessages => ServiceRequest::ReceiveMessages {
            queue: queue()?,
            max: u64_field(body, "MaxNumberOfMessages")?.map_or(1, |n| n as usize),
        },
        Action::DeleteMessage => ServiceRequest::DeleteMessage {
            queue: queue()?,
            receipt: required_str(body, "ReceiptHandle")?.to_string(),
        },
        other => return Err(invalid(format!("{other} is not an SQS operation"))),
    })
}

/// `{"name": {"DataType": "String", "StringValue": "v"}}` to `name -> v`.
fn message_attributes(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|(name, v)| {
                    let value = v.get("StringValue").and_then(Value::as_str)?;
                    Some((name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn queue_url(envelope: &RequestEnvelope, name: &str) -> String {
    format!("{}/{ACCOUNT_ID}/{name}", endpoint(envelope))
}

pub(super) fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn encode_sqs(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    outcome: Outcome,
) -> Result<Value, ServiceError> {
    Ok(match outcome {
        Outcome::Queue(queue) => json!({ "QueueUrl": queue_url(envelope, &queue.name) }),
        Outcome::Queues(listing) => {
            let mut out = json!({
                "QueueUrls": listing
                    .items
                    .iter()
                    .map(|q: &QueueInfo| queue_url(envelope, &q.name))
                    .collect::<Vec<_>>(),
            });
            if let Some(token) = listing.next_token {
                out["NextToken"] = json!(token);
            }
            out
        }
        Outcome::MessageSent(message) => json!({
            "MessageId": message.message_id,
            "MD5OfMessageBody": md5_hex(message.body.as_bytes()),
        }),
        Outcome::Messages(messages) => json!({
            "Messages": messages.iter().map(sqs_message).collect::<Vec<_>>(),
        }),
        Outcome::Deleted { .. } => json!({}),
        _ => return Err(unexpected(op)),
    })
}

fn sqs_message(m: &MessageInfo) -> Value {
    let mut out = json!({
        "MessageId": m.message_id,
        "ReceiptHandle": m.receipt,
        "Body": m.body,
        "MD5OfBody": md5_hex(m.body.as_bytes()),
        "Attributes": { "SentTimestamp": m.sent_at.to_string() },
    });
    if !m.attributes.is_empty() {
        out["MessageAttributes"] = m
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), json!({ "DataType": "String", "StringValue": v })))
            .collect::<Map<_, _>>()
            .into();
    }
    out
}

// -----------------------------------------------------------------------
// Price List
// -----------------------------------------------------------------------

fn decode_pricing(
    op: &ResolvedOperation,
    body: &Map<String, Value>,
) -> Result<ServiceRequest, ServiceError> {
    if let Some(version) = str_field(body, "FormatVersion")
        && version != "aws_v1"
    {
        return Err(invalid(format!("unsupported FormatVersion {version:?}")));
    }
    match op.action {
        Action::ListPriceServices => Ok(ServiceRequest::ListPriceServices),
        Action::ListPrices => {
            let filters = price_filters(body)?;
            if let [only] = filters.as_slice()
                && only.field.eq_ignore_ascii_case("sku")
            {
                return Ok(ServiceRequest::GetPrice {
                    product_code: only.value.clone(),
                });
            }
            Ok(ServiceRequest::ListPrices {
                service_code: Some(required_str(body, "ServiceCode")?.to_string()),
                filters,
                page: PageRequest::new(
                    str_field(body, "NextToken"),
                    u64_field(body, "MaxResults")?.map(|n| n as usize),
                ),
            })
        }
        other => Err(invalid(format!("{other} is not a Price List operation"))),
    }
}

fn price_filters(body: &Map<String, Value>) -> Result<Vec<PriceFilter>, ServiceError> {
    let Some(filters) = body.get("Filters") else {
        return Ok(Vec::new());
    };
    let filters = filters
        .as_array()
        .ok_or_else(|| invalid("Filters must be a list"))?;
    filters
        .iter()
        .map(|f| {
            let f = f
                .as_object()
                .ok_or_else(|| invalid("each filter must be an object"))?;
            if let Some(kind) = str_field(f, "Type")
                && kind != "TERM_MATCH"
            {
                return Err(invalid(format!("unsupported filter type {kind:?}")));
            }
            Ok(PriceFilter {
                field: required_str(f, "Field")?.to_string(),
                value: required_str(f, "Value")?.to_string(),
            })
        })
        .collect()
}

fn encode_pricing(
    op: &ResolvedOperation,
    body: &Map<String, Value>,
    outcome: Outcome,
) -> Result<Value, ServiceError> {
    Ok(match outcome {
        Outcome::PriceServices(codes) => {
            let wanted = str_field(body, "ServiceCode");
            json!({
                "Services": codes
                    .iter()
                    .filter(|c| wanted.is_none_or(|w| w == c.as_str()))
                    .map(|c| json!({ "ServiceCode": c, "AttributeNames": [] }))
                    .collect::<Vec<_>>(),
                "FormatVersion": "aws_v1",
            })
        }
        Outcome::Price(item) => json!({
            "FormatVersion": "aws_v1",
            "PriceList": [price_list_entry(&item)?],
        }),
        Outcome::Prices(listing) => {
            let entries = listing
                .items
                .iter()
                .map(price_list_entry)
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = json!({ "FormatVersion": "aws_v1", "PriceList": entries });
            if let Some(token) = listing.next_token {
                out["NextToken"] = json!(token);
            }
            out
        }
        _ => return Err(unexpected(op)),
    })
}

/// One `aws_v1` price list document, string-encoded as the API returns it.
fn price_list_entry(item: &PriceItem) -> Result<String, ServiceError> {
    let sku = &item.product_code;
    let term = format!("{sku}.{ON_DEMAND_TERM}");
    let dimension = format!("{term}.{ON_DEMAND_RATE}");
    let mut attributes: Map<String, Value> = item
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    attributes.insert("servicecode".into(), json!(item.service_code));
    attributes.insert("regionCode".into(), json!(item.region));
    let doc = json!({
        "product": {
            "sku": sku,
            "productFamily": item.attributes.get("productFamily").map_or("Compute Instance", String::as_str),
            "attributes": attributes,
        },
        "serviceCode": item.service_code,
        "terms": {
            "OnDemand": {
                term.as_str(): {
                    "sku": sku,
                    "offerTermCode": ON_DEMAND_TERM,
                    "effectiveDate": "2024-01-01T00:00:00Z",
                    "termAttributes": {},
                    "priceDimensions": {
                        dimension.as_str(): {
                            "rateCode": dimension,
                            "description": item.description,
                            "unit": item.unit,
                            "beginRange": "0",
                            "endRange": "Inf",
                            "pricePerUnit": { item.currency.as_str(): format!("{:.10}", item.unit_price) },
                        }
                    },
                }
            }
        },
        "version": "20240101000000",
        "publicationDate": "2024-01-01T00:00:00Z",
    });
    Ok(serde_json::to_string(&doc)?)
}

// -----------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------

pub(super) fn error(op: Option<&ResolvedOperation>, error: &GatewayError) -> WireResponse {
    let service = op.map(ResolvedOperation::service);
    let missing_item = matches!(
        error.service(),
        Some(ServiceError::NotFound {
            resource: Resource::Item,
            ..
        })
    );
    if missing_item && op.is_some_and(|op| op.action == Action::GetItem) {
        // DynamoDB answers a missing item with an empty map.
        return WireResponse::bytes(StatusCode::OK, JSON_1_0, Bytes::from_static(b"{}"));
    }

    let (status, code, query_code) = match error {
        GatewayError::Detection(_) => (StatusCode::BAD_REQUEST, "UnknownOperationException", None),
        GatewayError::Service(e) => fault(service, e),
    };
    let namespace = match service {
        Some(Service::DocumentStore) => "com.amazonaws.dynamodb.v20120810#",
        Some(Service::Messaging) => "com.amazonaws.sqs#",
        _ => "",
    };
    let body = json!({ "__type": format!("{namespace}{code}"), "message": error.to_string() });
    let mut response = WireResponse::bytes(status, JSON_1_0, Bytes::from(body.to_string()));
    if let Some(query_code) = query_code {
        let side = if status.is_client_error() { "Sender" } else { "Receiver" };
        response = response.with_header("x-amzn-query-error", format!("{query_code};{side}"));
    }
    response
}

/// Status, JSON `__type`, and for SQS the Query-compatible error code.
fn fault(
    service: Option<Service>,
    e: &ServiceError,
) -> (StatusCode, &'static str, Option<&'static str>) {
    use ServiceError::*;
    let bad = StatusCode::BAD_REQUEST;
    match (service, e) {
        (_, StorageUnavailable(_) | DriverUnavailable(_) | DriverTimeout(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable", None)
        }
        (_, Internal(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", None),
        (_, AccessDenied { .. }) => (StatusCode::FORBIDDEN, "AccessDeniedException", None),

        (Some(Service::Messaging), NotFound { resource: Resource::Message, .. }) => (
            bad,
            "ReceiptHandleIsInvalid",
            Some("ReceiptHandleIsInvalid"),
        ),
        (Some(Service::Messaging), NotFound { .. }) => (
            bad,
            "QueueDoesNotExist",
            Some("AWS.SimpleQueueService.NonExistentQueue"),
        ),
        (Some(Service::Messaging), AlreadyExists { .. } | Conflict(_)) => {
            (bad, "QueueNameExists", Some("QueueAlreadyExists"))
        }
        (Some(Service::Messaging), Validation(_) | Unsupported(_)) => {
            (bad, "InvalidParameterValue", Some("InvalidParameterValue"))
        }

        (Some(Service::Pricing), NotFound { .. }) => (bad, "NotFoundException", None),
        (Some(Service::Pricing), _) => (bad, "InvalidParameterException", None),

        (_, NotFound { .. }) => (bad, "ResourceNotFoundException", None),
        (_, AlreadyExists { .. } | Conflict(_)) => (bad, "ResourceInUseException", None),
        (_, Validation(_) | Unsupported(_)) => (bad, "ValidationException", None),
    }
}
