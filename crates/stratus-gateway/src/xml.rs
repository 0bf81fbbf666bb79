//! XML bodies for the AWS REST-XML (S3) and Query protocols, serialized via
//! `quick-xml` + `serde`.

use quick_xml::escape::escape;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stratus_services::ServiceError;

pub(crate) const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Serialize a struct to an XML document with the `<?xml ...?>` header.
pub(crate) fn to_xml<T: Serialize>(value: &T) -> Result<String, ServiceError> {
    let body = quick_xml::se::to_string(value)
        .map_err(|e| ServiceError::Internal(format!("xml serialization: {e}")))?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
}

/// Serialize `value` as an element named `root`, without the XML header.
pub(crate) fn element<T: Serialize>(root: &str, value: &T) -> Result<String, ServiceError> {
    quick_xml::se::to_string_with_root(root, value)
        .map_err(|e| ServiceError::Internal(format!("xml serialization: {e}")))
}

/// Parse a request body.
pub(crate) fn from_xml<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ServiceError::Validation("request body is not UTF-8".into()))?;
    quick_xml::de::from_str(text)
        .map_err(|e| ServiceError::Validation(format!("malformed XML: {e}")))
}

/// Serialize a document whose root element name is only known at runtime.
pub(crate) fn to_xml_with_root<T: Serialize>(root: &str, value: &T) -> Result<String, ServiceError> {
    let body = element(root, value)?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
}

// -----------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------

/// S3 `<Error>` document.
pub(crate) fn s3_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message>\
         <Resource>{}</Resource><RequestId>{}</RequestId></Error>",
        escape(code),
        escape(message),
        escape(resource),
        escape(request_id)
    )
}

/// Query-protocol `<ErrorResponse>` document.
pub(crate) fn query_error(sender: bool, code: &str, message: &str, request_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ErrorResponse><Error><Type>{}</Type>\
         <Code>{}</Code><Message>{}</Message></Error><RequestId>{}</RequestId></ErrorResponse>",
        if sender { "Sender" } else { "Receiver" },
        escape(code),
        escape(message),
        escape(request_id)
    )
}

// -----------------------------------------------------------------------
// ListAllMyBucketsResult (GET /)
// -----------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub(crate) struct ListAllMyBucketsResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Owner")]
    pub owner: Owner,
    #[serde(rename = "Buckets")]
    pub buckets: Buckets,
}

#[derive(Serialize)]
pub(crate) struct Owner {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

#[derive(Serialize)]
pub(crate) struct Buckets {
    #[serde(rename = "Bucket", default)]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Serialize)]
pub(crate) struct BucketEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

// -----------------------------------------------------------------------
// ListBucketResult (ListObjects V1 and V2)
// -----------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename = "ListBucketResult")]
pub(crate) struct ListBucketResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "Marker", skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
    #[serde(rename = "ContinuationToken", skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(
        rename = "NextContinuationToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_continuation_token: Option<String>,
    #[serde(rename = "KeyCount", skip_serializing_if = "Option::is_none")]
    pub key_count: Option<usize>,
    #[serde(rename = "MaxKeys")]
    pub max_keys: usize,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Contents", default)]
    pub contents: Vec<Contents>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefix>,
}

#[derive(Serialize)]
pub(crate) struct Contents {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: &'static str,
}

#[derive(Serialize)]
pub(crate) struct CommonPrefix {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

// -----------------------------------------------------------------------
// Bucket versioning
// -----------------------------------------------------------------------

/// Body of `PUT /{bucket}?versioning`.
#[derive(Deserialize)]
pub(crate) struct VersioningConfigurationRequest {
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

/// Reply to `GET /{bucket}?versioning`; empty for a never-versioned bucket.
#[derive(Serialize)]
#[serde(rename = "VersioningConfiguration")]
pub(crate) struct VersioningConfiguration {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

// -----------------------------------------------------------------------
// Multipart upload
// -----------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub(crate) struct InitiateMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

/// Body of `POST /{bucket}/{key}?uploadId=`.
#[derive(Deserialize)]
pub(crate) struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePart>,
}

#[derive(Deserialize)]
pub(crate) struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub(crate) struct CompleteMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

// -----------------------------------------------------------------------
// Query protocol
// -----------------------------------------------------------------------

/// `<ResponseMetadata>` trailer of SQS Query replies.
#[derive(Serialize)]
pub(crate) struct ResponseMetadata {
    #[serde(rename = "RequestId")]
    pub request_id: String,
}

impl ResponseMetadata {
    pub(crate) fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
        }
    }
}
