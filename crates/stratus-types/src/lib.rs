//! Shared types and identifiers for Stratus.
//!
//! This crate defines the data model used across the Stratus workspace:
//! content identifiers ([`ContentHash`], [`BlobAddress`]), resource
//! identity ([`ResourceKind`], [`ResourceId`], [`Scope`]), persisted
//! structures ([`ResourceRecord`], [`BlobObject`]), driver capabilities
//! ([`Capability`], [`CapabilityDescriptor`]) and the provider [`Dialect`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Content identifier of a blob payload: `blake3(payload)`.
    ContentHash
);

define_id!(
    /// Physical location of a blob in the blob store.
    ///
    /// Derived from the owning resource and the payload hash, so identical
    /// payloads under one resource share a location while payloads of
    /// different resources never alias.
    BlobAddress
);

impl BlobAddress {
    /// Derive the storage address of `hash` owned by `resource`.
    pub fn derive(resource: &ResourceId, hash: &ContentHash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(resource.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        Self(hasher.finalize().into())
    }
}

// ---------------------------------------------------------------------------
// Resource identity
// ---------------------------------------------------------------------------

/// The family a resource record belongs to.
///
/// The kind is the first segment of every [`ResourceId`], which keeps
/// records of one family contiguous in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Object storage bucket.
    Bucket,
    /// Document store table (DynamoDB table, Firestore collection, NoSQL table).
    Table,
    /// Message queue or topic.
    Queue,
    /// Compute workload (instance, container).
    Workload,
    /// Block volume.
    Volume,
    /// Recorded reply for an idempotency token.
    Idempotency,
}

impl ResourceKind {
    /// Stable string form used in resource ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Table => "table",
            Self::Queue => "queue",
            Self::Workload => "workload",
            Self::Volume => "volume",
            Self::Idempotency => "idempotency",
        }
    }

    /// Key prefix shared by every id of this kind (`"bucket/"`).
    pub fn prefix(&self) -> String {
        format!("{}/", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bucket" => Ok(Self::Bucket),
            "table" => Ok(Self::Table),
            "queue" => Ok(Self::Queue),
            "workload" => Ok(Self::Workload),
            "volume" => Ok(Self::Volume),
            "idempotency" => Ok(Self::Idempotency),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// Identifier of a resource record: `<kind>/<name>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Build the id of the resource `name` of the given kind.
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self(format!("{}/{name}", kind.as_str()))
    }

    /// The resource kind, if the id carries a known one.
    pub fn kind(&self) -> Option<ResourceKind> {
        self.0.split_once('/').and_then(|(kind, _)| kind.parse().ok())
    }

    /// The name part (everything after the kind).
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// The full id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

/// The caller scope that owns a resource (account, project, namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope(String);

impl Scope {
    /// Scope used when the request does not name one.
    pub const DEFAULT: &'static str = "default";

    /// Create a scope from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The scope identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the shared scope of requests without a credential.
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Persisted structures
// ---------------------------------------------------------------------------

/// Free-form string attributes carried by a resource record.
pub type Attributes = BTreeMap<String, String>;

/// A structured resource (bucket, table, queue, workload, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// `<kind>/<name>` identifier.
    pub id: ResourceId,
    /// Scope that created the resource.
    pub owner_scope: Scope,
    /// Family-specific attributes.
    pub attributes: Attributes,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the last mutation.
    pub updated_at: u64,
    /// Starts at 1, incremented on every mutation.
    pub version: u64,
}

impl ResourceRecord {
    /// Look up a single attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A payload stored under a resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobObject {
    /// Owning resource.
    pub resource_id: ResourceId,
    /// Key of the blob within its resource.
    pub key: String,
    /// BLAKE3 of the payload.
    pub content_hash: ContentHash,
    /// Payload size in bytes.
    pub size: u64,
    /// Where the payload lives in the blob store.
    pub storage_location: BlobAddress,
    /// User metadata (content-type, custom headers).
    pub metadata: BTreeMap<String, String>,
    /// Unix timestamp (milliseconds) when this version was written.
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Driver capabilities
// ---------------------------------------------------------------------------

/// A driver capability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Workload lifecycle.
    Compute,
    /// Block volumes.
    Storage,
    /// Virtual networks.
    Network,
    /// Principal resolution.
    Identity,
}

impl Capability {
    /// All capabilities, in declaration order.
    pub const ALL: [Capability; 4] = [
        Capability::Compute,
        Capability::Storage,
        Capability::Network,
        Capability::Identity,
    ];

    /// Stable lowercase name (used in configuration).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities a driver backend provides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor(BTreeSet<Capability>);

impl CapabilityDescriptor {
    /// Build a descriptor from a list of capabilities.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    /// Whether the backend provides `capability`.
    pub fn provides(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Iterate the provided capabilities in order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Dialects
// ---------------------------------------------------------------------------

/// Wire conventions of one emulated provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Amazon Web Services.
    Aws,
    /// Google Cloud Platform.
    Gcp,
    /// Oracle Cloud Infrastructure.
    Oracle,
}

impl Dialect {
    /// All dialects, in declaration order.
    pub const ALL: [Dialect; 3] = [Dialect::Aws, Dialect::Gcp, Dialect::Oracle];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "gcp" => Ok(Self::Gcp),
            "oracle" | "oci" => Ok(Self::Oracle),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let h1 = ContentHash::from_data(b"hello");
        let h2 = ContentHash::from_data(b"hello");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::from_data(b"world"));
    }

    #[test]
    fn test_blob_address_scoped_to_resource() {
        let hash = ContentHash::from_data(b"same payload");
        let a = BlobAddress::derive(&ResourceId::new(ResourceKind::Bucket, "a"), &hash);
        let b = BlobAddress::derive(&ResourceId::new(ResourceKind::Bucket, "b"), &hash);
        let a2 = BlobAddress::derive(&ResourceId::new(ResourceKind::Bucket, "a"), &hash);
        assert_eq!(a, a2, "same resource + payload must share a location");
        assert_ne!(a, b, "different resources must not alias");
    }

    #[test]
    fn test_display_outputs_hex() {
        let id = ContentHash::from([0xab; 32]);
        let hex = id.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn test_debug_format() {
        let id = BlobAddress::from([0u8; 32]);
        let debug = format!("{id:?}");
        assert!(debug.starts_with("BlobAddress("));
    }

    #[test]
    fn test_resource_id_parts() {
        let id = ResourceId::new(ResourceKind::Queue, "jobs");
        assert_eq!(id.as_str(), "queue/jobs");
        assert_eq!(id.kind(), Some(ResourceKind::Queue));
        assert_eq!(id.name(), "jobs");
    }

    #[test]
    fn test_resource_id_name_may_contain_slashes() {
        let id = ResourceId::new(ResourceKind::Idempotency, "acct/token-1");
        assert_eq!(id.kind(), Some(ResourceKind::Idempotency));
        assert_eq!(id.name(), "acct/token-1");
    }

    #[test]
    fn test_resource_ids_of_one_kind_share_prefix() {
        let id = ResourceId::new(ResourceKind::Bucket, "b1");
        assert!(id.as_str().starts_with(&ResourceKind::Bucket.prefix()));
        assert!(!id.as_str().starts_with(&ResourceKind::Table.prefix()));
    }

    #[test]
    fn test_scope_default() {
        assert_eq!(Scope::default().as_str(), "default");
    }

    #[test]
    fn test_capability_descriptor() {
        let desc = CapabilityDescriptor::new([Capability::Compute, Capability::Network]);
        assert!(desc.provides(Capability::Compute));
        assert!(!desc.provides(Capability::Storage));
        assert_eq!(desc.iter().count(), 2);
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("AWS".parse::<Dialect>().unwrap(), Dialect::Aws);
        assert_eq!("oci".parse::<Dialect>().unwrap(), Dialect::Oracle);
        assert!("azure".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_record_roundtrip_postcard() {
        let record = ResourceRecord {
            id: ResourceId::new(ResourceKind::Bucket, "b1"),
            owner_scope: Scope::new("acct"),
            attributes: BTreeMap::from([("region".to_string(), "us-east-1".to_string())]),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            version: 1,
        };
        let encoded = postcard::to_allocvec(&record).unwrap();
        let decoded: ResourceRecord = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(record, decoded);
    }
}
