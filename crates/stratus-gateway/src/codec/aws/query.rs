//! AWS Query protocol: form-encoded `Action=` requests for EC2 and SQS,
//! answered with XML.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use serde::Serialize;
use stratus_protocol::{Action, RequestEnvelope, ResolvedOperation, Service};
use stratus_services::{
    MessageInfo, Outcome, PageRequest, RequestContext, Resource, ServiceError, ServiceRequest,
    WorkloadInfo, WorkloadRequest,
};

use super::json::{md5_hex, queue_url};
use super::{ACCOUNT_ID, REGION};
use crate::codec::{invalid, iso8601, last_segment, parse_count, unexpected};
use crate::error::GatewayError;
use crate::response::WireResponse;
use crate::xml::{self, ResponseMetadata};

const EC2_XMLNS: &str = "http://ec2.amazonaws.com/doc/2016-11-15/";
const SQS_XMLNS: &str = "http://queue.amazonaws.com/doc/2012-11-05/";
const GIB: u64 = 1024 * 1024 * 1024;

/// Decoded form fields with the Query protocol's `Name.N` list helpers.
struct Form(Vec<(String, String)>);

impl Form {
    fn of(envelope: &RequestEnvelope) -> Self {
        Self(envelope.form())
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, name: &str) -> Result<&str, ServiceError> {
        self.get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("missing required parameter {name}")))
    }

    /// `prefix.1`, `prefix.2`, ... up to the first gap.
    fn list(&self, prefix: &str) -> Vec<&str> {
        (1..)
            .map_while(|n| self.get(&format!("{prefix}.{n}")))
            .collect()
    }

    /// `prefix.N.<name>` / `prefix.N.<value>` pairs.
    fn pairs(&self, prefix: &str, name: &str, value: &str) -> BTreeMap<String, String> {
        (1..)
            .map_while(|n| {
                let key = self.get(&format!("{prefix}.{n}.{name}"))?;
                let val = self.get(&format!("{prefix}.{n}.{value}")).unwrap_or_default();
                Some((key.to_string(), val.to_string()))
            })
            .collect()
    }
}

pub(super) fn decode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
) -> Result<ServiceRequest, ServiceError> {
    let form = Form::of(envelope);
    match op.service() {
        Service::Compute => decode_ec2(op, &form),
        Service::Messaging => decode_sqs(op, envelope, &form),
        other => Err(invalid(format!("{other} has no Query protocol"))),
    }
}

pub(super) fn encode(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    ctx: &RequestContext,
    outcome: Outcome,
) -> Result<WireResponse, ServiceError> {
    let form = Form::of(envelope);
    let body = match op.service() {
        Service::Compute => encode_ec2(op, &form, ctx, outcome)?,
        Service::Messaging => encode_sqs(op, envelope, ctx, outcome)?,
        _ => return Err(unexpected(op)),
    };
    Ok(WireResponse::xml(StatusCode::OK, body))
}

// -----------------------------------------------------------------------
// EC2
// -----------------------------------------------------------------------

/// vCPUs and memory of the instance types clients commonly ask for.
fn instance_shape(instance_type: &str) -> (u32, u32) {
    match instance_type {
        "t2.nano" | "t3.nano" => (1, 512),
        "t2.micro" | "t3.micro" => (1, 1024),
        "t2.small" | "t3.small" => (1, 2048),
        "t2.medium" | "t3.medium" => (2, 4096),
        "m5.large" | "t3.large" => (2, 8192),
        "m5.xlarge" => (4, 16384),
        _ => (1, 1024),
    }
}

fn decode_ec2(op: &ResolvedOperation, form: &Form) -> Result<ServiceRequest, ServiceError> {
    Ok(match op.action {
        Action::CreateWorkload => {
            let count = parse_count(form.get("MaxCount"), "MaxCount")?.unwrap_or(1);
            if count > 1 {
                return Err(ServiceError::Unsupported(
                    "launching more than one instance per call".into(),
                ));
            }
            let (cpus, memory_mb) = instance_shape(form.get("InstanceType").unwrap_or("t3.micro"));
            // Instance ids are always generated; a Name tag is only a label.
            ServiceRequest::CreateWorkload(WorkloadRequest {
                name: None,
                image: form.required("ImageId")?.to_string(),
                command: Vec::new(),
                cpus,
                memory_mb,
                zone: form.get("Placement.AvailabilityZone").map(str::to_string),
            })
        }
        Action::ListWorkloads => ServiceRequest::ListWorkloads,
        Action::DeleteWorkload => {
            let ids = form.list("InstanceId");
            let [id] = ids.as_slice() else {
                return Err(invalid("TerminateInstances takes exactly one InstanceId"));
            };
            ServiceRequest::DeleteWorkload { id: id.to_string() }
        }
        Action::CreateVolume => {
            let gib: u64 = form
                .required("Size")?
                .parse()
                .map_err(|_| invalid("Size must be a whole number of GiB"))?;
            ServiceRequest::CreateVolume {
                id: None,
                size_bytes: gib.saturating_mul(GIB),
            }
        }
        Action::AttachVolume => ServiceRequest::AttachVolume {
            workload: form.required("InstanceId")?.to_string(),
            volume: form.required("VolumeId")?.to_string(),
        },
        other => return Err(invalid(format!("{other} is not an EC2 operation"))),
    })
}

#[derive(Serialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default)]
    item: Vec<T>,
}

#[derive(Serialize)]
struct InstanceState {
    code: u16,
    name: &'static str,
}

impl InstanceState {
    fn of(state: &str) -> Self {
        let (code, name) = match state {
            "pending" => (0, "pending"),
            "running" => (16, "running"),
            "stopped" => (80, "stopped"),
            _ => (48, "terminated"),
        };
        Self { code, name }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Placement {
    availability_zone: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Ebs {
    volume_id: String,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockDevice {
    device_name: String,
    ebs: Ebs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    instance_id: String,
    image_id: String,
    instance_state: InstanceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_ip_address: Option<String>,
    instance_type: String,
    placement: Placement,
    launch_time: String,
    block_device_mapping: ItemSet<BlockDevice>,
}

impl Instance {
    fn of(w: WorkloadInfo, instance_type: &str) -> Self {
        Self {
            instance_state: InstanceState::of(&w.state),
            private_ip_address: w.ip_address,
            instance_type: instance_type.to_string(),
            placement: Placement {
                availability_zone: w.zone.unwrap_or_else(|| format!("{REGION}a")),
            },
            launch_time: iso8601(w.created_at),
            block_device_mapping: ItemSet {
                item: w
                    .volumes
                    .into_iter()
                    .enumerate()
                    .map(|(i, volume_id)| BlockDevice {
                        device_name: format!("/dev/sd{}", (b'f' + (i % 20) as u8) as char),
                        ebs: Ebs {
                            volume_id,
                            status: "attached",
                        },
                    })
                    .collect(),
            },
            instance_id: w.id,
            image_id: w.image,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    reservation_id: String,
    owner_id: &'static str,
    instances_set: ItemSet<Instance>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunInstances {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    request_id: String,
    reservation_id: String,
    owner_id: &'static str,
    instances_set: ItemSet<Instance>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstances {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    request_id: String,
    reservation_set: ItemSet<Reservation>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateChange {
    instance_id: String,
    current_state: InstanceState,
    previous_state: InstanceState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminateInstances {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    request_id: String,
    instances_set: ItemSet<StateChange>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateVolume {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    request_id: String,
    volume_id: String,
    size: u64,
    availability_zone: String,
    status: &'static str,
    create_time: String,
    volume_type: String,
    encrypted: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachVolume {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    request_id: String,
    volume_id: String,
    instance_id: String,
    device: String,
    status: &'static str,
    attach_time: String,
}

fn reservation_id(instance_id: &str) -> String {
    format!("r-{}", instance_id.trim_start_matches("i-"))
}

fn encode_ec2(
    op: &ResolvedOperation,
    form: &Form,
    ctx: &RequestContext,
    outcome: Outcome,
) -> Result<String, ServiceError> {
    let root = format!("{}Response", op.operation);
    let request_id = ctx.request_id.clone();
    let instance_type = form.get("InstanceType").unwrap_or("t3.micro");
    match outcome {
        Outcome::Workload(w) => xml::to_xml_with_root(
            &root,
            &RunInstances {
                xmlns: EC2_XMLNS,
                request_id,
                reservation_id: reservation_id(&w.id),
                owner_id: ACCOUNT_ID,
                instances_set: ItemSet {
                    item: vec![Instance::of(w, instance_type)],
                },
            },
        ),
        Outcome::Workloads(workloads) => {
            let wanted = form.list("InstanceId");
            let reservations = workloads
                .into_iter()
                .filter(|w| wanted.is_empty() || wanted.contains(&w.id.as_str()))
                .map(|w| Reservation {
                    reservation_id: reservation_id(&w.id),
                    owner_id: ACCOUNT_ID,
                    instances_set: ItemSet {
                        item: vec![Instance::of(w, "t3.micro")],
                    },
                })
                .collect();
            xml::to_xml_with_root(
                &root,
                &DescribeInstances {
                    xmlns: EC2_XMLNS,
                    request_id,
                    reservation_set: ItemSet { item: reservations },
                },
            )
        }
        Outcome::Deleted { .. } => xml::to_xml_with_root(
            &root,
            &TerminateInstances {
                xmlns: EC2_XMLNS,
                request_id,
                instances_set: ItemSet {
                    item: vec![StateChange {
                        instance_id: form.get("InstanceId.1").unwrap_or_default().to_string(),
                        current_state: InstanceState::of("terminated"),
                        previous_state: InstanceState::of("running"),
                    }],
                },
            },
        ),
        Outcome::Volume(v) => xml::to_xml_with_root(
            &root,
            &CreateVolume {
                xmlns: EC2_XMLNS,
                request_id,
                volume_id: v.id,
                size: v.size_bytes.div_ceil(GIB),
                availability_zone: form
                    .get("AvailabilityZone")
                    .map_or_else(|| format!("{REGION}a"), str::to_string),
                status: "available",
                create_time: iso8601(v.created_at),
                volume_type: form.get("VolumeType").unwrap_or("gp2").to_string(),
                encrypted: false,
            },
        ),
        Outcome::Attached { workload, volume } => xml::to_xml_with_root(
            &root,
            &AttachVolume {
                xmlns: EC2_XMLNS,
                request_id,
                volume_id: volume,
                instance_id: workload,
                device: form.get("Device").unwrap_or("/dev/sdf").to_string(),
                status: "attached",
                attach_time: iso8601(stratus_types::now_millis()),
            },
        ),
        _ => Err(unexpected(op)),
    }
}

// -----------------------------------------------------------------------
// SQS
// -----------------------------------------------------------------------

/// Queue name from `QueueUrl`, or from the request path
/// (`POST /000000000000/jobs`).
fn queue_name(envelope: &RequestEnvelope, form: &Form) -> Result<String, ServiceError> {
    if let Some(url) = form.get("QueueUrl").filter(|u| !u.is_empty()) {
        return Ok(last_segment(url).to_string());
    }
    let path = envelope.path().trim_matches('/');
    match path.split_once('/') {
        Some((_, name)) if !name.is_empty() && !name.contains('/') => Ok(name.to_string()),
        _ => Err(invalid("missing required parameter QueueUrl")),
    }
}

fn decode_sqs(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    form: &Form,
) -> Result<ServiceRequest, ServiceError> {
    let queue = || queue_name(envelope, form);
    Ok(match op.action {
        Action::CreateQueue => ServiceRequest::CreateQueue {
            name: form.required("QueueName")?.to_string(),
            attributes: form.pairs("Attribute", "Name", "Value"),
        },
        Action::GetQueue => ServiceRequest::GetQueue {
            name: form.required("QueueName")?.to_string(),
        },
        Action::DeleteQueue => ServiceRequest::DeleteQueue { name: queue()? },
        Action::ListQueues => ServiceRequest::ListQueues {
            prefix: form.get("QueueNamePrefix").unwrap_or_default().to_string(),
            page: PageRequest::new(
                form.get("NextToken"),
                parse_count(form.get("MaxResults"), "MaxResults")?,
            ),
        },
        Action::SendMessage => ServiceRequest::SendMessage {
            queue: queue()?,
            body: form
                .get("MessageBody")
                .ok_or_else(|| invalid("missing required parameter MessageBody"))?
                .to_string(),
            attributes: form.pairs("MessageAttribute", "Name", "Value.StringValue"),
        },
        Action::ReceiveMessages => ServiceRequest::ReceiveMessages {
            queue: queue()?,
            max: parse_count(form.get("MaxNumberOfMessages"), "MaxNumberOfMessages")?
                .unwrap_or(1),
        },
        Action::DeleteMessage => ServiceRequest::DeleteMessage {
            queue: queue()?,
            receipt: form.required("ReceiptHandle")?.to_string(),
        },
        other => return Err(invalid(format!("{other} is not an SQS operation"))),
    })
}

#[derive(Serialize)]
struct QueueUrlResult {
    #[serde(rename = "QueueUrl")]
    queue_url: String,
}

#[derive(Serialize)]
struct ListQueuesResult {
    #[serde(rename = "QueueUrl", default)]
    queue_url: Vec<String>,
    #[serde(rename = "NextToken", skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Serialize)]
struct SendMessageResult {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "MD5OfMessageBody")]
    md5_of_message_body: String,
}

#[derive(Serialize)]
struct NameValue {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Serialize)]
struct StringValue {
    #[serde(rename = "StringValue")]
    string_value: String,
    #[serde(rename = "DataType")]
    data_type: &'static str,
}

#[derive(Serialize)]
struct MessageAttribute {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: StringValue,
}

#[derive(Serialize)]
struct Message {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "ReceiptHandle")]
    receipt_handle: String,
    #[serde(rename = "MD5OfBody")]
    md5_of_body: String,
    #[serde(rename = "Body")]
    body: String,
    #[serde(rename = "Attribute", default)]
    attribute: Vec<NameValue>,
    #[serde(rename = "MessageAttribute", default)]
    message_attribute: Vec<MessageAttribute>,
}

impl Message {
    fn of(m: MessageInfo) -> Self {
        Self {
            md5_of_body: md5_hex(m.body.as_bytes()),
            attribute: vec![NameValue {
                name: "SentTimestamp".into(),
                value: m.sent_at.to_string(),
            }],
            message_attribute: m
                .attributes
                .into_iter()
                .map(|(name, value)| MessageAttribute {
                    name,
                    value: StringValue {
                        string_value: value,
                        data_type: "String",
                    },
                })
                .collect(),
            message_id: m.message_id,
            receipt_handle: m.receipt,
            body: m.body,
        }
    }
}

#[derive(Serialize)]
struct ReceiveMessageResult {
    #[serde(rename = "Message", default)]
    message: Vec<Message>,
}

/// `<{Op}Response>` holding an optional `<{Op}Result>` and the metadata.
fn sqs_reply(
    operation: &str,
    result: Option<String>,
    request_id: &str,
) -> Result<String, ServiceError> {
    let metadata = xml::element("ResponseMetadata", &ResponseMetadata::new(request_id))?;
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{operation}Response xmlns=\"{SQS_XMLNS}\">{}{metadata}</{operation}Response>",
        result.unwrap_or_default()
    ))
}

fn encode_sqs(
    op: &ResolvedOperation,
    envelope: &RequestEnvelope,
    ctx: &RequestContext,
    outcome: Outcome,
) -> Result<String, ServiceError> {
    let result_root = format!("{}Result", op.operation);
    let result = match outcome {
        Outcome::Queue(queue) => Some(xml::element(
            &result_root,
            &QueueUrlResult {
                queue_url: queue_url(envelope, &queue.name),
            },
        )?),
        Outcome::Queues(listing) => Some(xml::element(
            &result_root,
            &ListQueuesResult {
                queue_url: listing
                    .items
                    .iter()
                    .map(|q| queue_url(envelope, &q.name))
                    .collect(),
                next_token: listing.next_token,
            },
        )?),
        Outcome::MessageSent(message) => Some(xml::element(
            &result_root,
            &SendMessageResult {
                md5_of_message_body: md5_hex(message.body.as_bytes()),
                message_id: message.message_id,
            },
        )?),
        Outcome::Messages(messages) => Some(xml::element(
            &result_root,
            &ReceiveMessageResult {
                message: messages.into_iter().map(Message::of).collect(),
            },
        )?),
        Outcome::Deleted { .. } => None,
        _ => return Err(unexpected(op)),
    };
    sqs_reply(&op.operation, result, &ctx.request_id)
}

// -----------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------

pub(super) fn error(
    op: Option<&ResolvedOperation>,
    request_id: &str,
    error: &GatewayError,
) -> WireResponse {
    let (status, code) = match error {
        GatewayError::Detection(_) => (StatusCode::BAD_REQUEST, "InvalidAction"),
        GatewayError::Service(e) => fault(op.map(ResolvedOperation::service), e),
    };
    WireResponse::xml(
        status,
        xml::query_error(
            status.is_client_error(),
            code,
            &error.to_string(),
            request_id,
        ),
    )
}

fn fault(service: Option<Service>, e: &ServiceError) -> (StatusCode, &'static str) {
    use ServiceError::*;
    let bad = StatusCode::BAD_REQUEST;
    match (service, e) {
        (_, StorageUnavailable(_) | DriverUnavailable(_) | DriverTimeout(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Unavailable")
        }
        (_, Internal(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        (_, Unsupported(_)) => (bad, "UnsupportedOperation"),
        (_, AccessDenied { .. }) => (StatusCode::FORBIDDEN, "UnauthorizedOperation"),

        (Some(Service::Messaging), NotFound { resource: Resource::Message, .. }) => {
            (bad, "ReceiptHandleIsInvalid")
        }
        (Some(Service::Messaging), NotFound { .. }) => {
            (bad, "AWS.SimpleQueueService.NonExistentQueue")
        }
        (Some(Service::Messaging), AlreadyExists { .. } | Conflict(_)) => {
            (bad, "QueueAlreadyExists")
        }

        (_, NotFound { resource: Resource::Volume, .. }) => (bad, "InvalidVolume.NotFound"),
        (_, NotFound { .. }) => (bad, "InvalidInstanceID.NotFound"),
        (_, Conflict(_)) => (bad, "IdempotentParameterMismatch"),
        (_, AlreadyExists { .. } | Validation(_)) => (bad, "InvalidParameterValue"),
    }
}
