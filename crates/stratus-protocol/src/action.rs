//! The closed set of canonical operations.

use std::fmt;

/// Emulated API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    /// Buckets and objects (S3, Cloud Storage, Object Storage).
    ObjectStorage,
    /// Tables and JSON items (DynamoDB, Firestore, NoSQL).
    DocumentStore,
    /// Queues and messages (SQS, Pub/Sub, Queue).
    Messaging,
    /// Workloads and volumes (EC2, Compute Engine, Compute).
    Compute,
    /// Static price catalog.
    Pricing,
}

impl Service {
    /// Stable lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectStorage => "object_storage",
            Self::DocumentStore => "document_store",
            Self::Messaging => "messaging",
            Self::Compute => "compute",
            Self::Pricing => "pricing",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical operation, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    // Object storage
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    ListBuckets,
    PutObject,
    GetObject,
    HeadObject,
    DeleteObject,
    ListObjects,
    GetBucketVersioning,
    PutBucketVersioning,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,

    // Document store
    CreateTable,
    DeleteTable,
    DescribeTable,
    ListTables,
    PutItem,
    GetItem,
    DeleteItem,
    Scan,

    // Messaging
    CreateQueue,
    DeleteQueue,
    GetQueue,
    ListQueues,
    SendMessage,
    ReceiveMessages,
    DeleteMessage,

    // Compute
    CreateWorkload,
    GetWorkload,
    ListWorkloads,
    DeleteWorkload,
    CreateVolume,
    AttachVolume,

    // Pricing
    GetPrice,
    ListPrices,
    ListPriceServices,
}

impl Action {
    /// Every action, for exhaustiveness checks in tests.
    pub const ALL: [Action; 39] = [
        Action::CreateBucket,
        Action::DeleteBucket,
        Action::HeadBucket,
        Action::ListBuckets,
        Action::PutObject,
        Action::GetObject,
        Action::HeadObject,
        Action::DeleteObject,
        Action::ListObjects,
        Action::GetBucketVersioning,
        Action::PutBucketVersioning,
        Action::CreateMultipartUpload,
        Action::UploadPart,
        Action::CompleteMultipartUpload,
        Action::AbortMultipartUpload,
        Action::CreateTable,
        Action::DeleteTable,
        Action::DescribeTable,
        Action::ListTables,
        Action::PutItem,
        Action::GetItem,
        Action::DeleteItem,
        Action::Scan,
        Action::CreateQueue,
        Action::DeleteQueue,
        Action::GetQueue,
        Action::ListQueues,
        Action::SendMessage,
        Action::ReceiveMessages,
        Action::DeleteMessage,
        Action::CreateWorkload,
        Action::GetWorkload,
        Action::ListWorkloads,
        Action::DeleteWorkload,
        Action::CreateVolume,
        Action::AttachVolume,
        Action::GetPrice,
        Action::ListPrices,
        Action::ListPriceServices,
    ];

    /// The API family this action belongs to.
    pub fn service(&self) -> Service {
        use Action::*;
        match self {
            CreateBucket | DeleteBucket | HeadBucket | ListBuckets | PutObject | GetObject
            | HeadObject | DeleteObject | ListObjects | GetBucketVersioning
            | PutBucketVersioning | CreateMultipartUpload | UploadPart
            | CompleteMultipartUpload | AbortMultipartUpload => Service::ObjectStorage,
            CreateTable | DeleteTable | DescribeTable | ListTables | PutItem | GetItem
            | DeleteItem | Scan => Service::DocumentStore,
            CreateQueue | DeleteQueue | GetQueue | ListQueues | SendMessage
            | ReceiveMessages | DeleteMessage => Service::Messaging,
            CreateWorkload | GetWorkload | ListWorkloads | DeleteWorkload | CreateVolume
            | AttachVolume => Service::Compute,
            GetPrice | ListPrices | ListPriceServices => Service::Pricing,
        }
    }

    /// Whether the action leaves stored state untouched.
    ///
    /// Read-only actions may be retried after a transient storage failure.
    /// `ReceiveMessages` is read-only: messages stay until deleted.
    pub fn is_read_only(&self) -> bool {
        use Action::*;
        matches!(
            self,
            HeadBucket
                | ListBuckets
                | GetObject
                | HeadObject
                | ListObjects
                | GetBucketVersioning
                | DescribeTable
                | ListTables
                | GetItem
                | Scan
                | GetQueue
                | ListQueues
                | ReceiveMessages
                | GetWorkload
                | ListWorkloads
                | GetPrice
                | ListPrices
                | ListPriceServices
        )
    }

    /// Bucket versioning and multipart uploads, which only S3 exposes.
    pub fn is_s3_only(&self) -> bool {
        use Action::*;
        matches!(
            self,
            GetBucketVersioning
                | PutBucketVersioning
                | CreateMultipartUpload
                | UploadPart
                | CompleteMultipartUpload
                | AbortMultipartUpload
        )
    }

    /// Whether a caller-supplied idempotency token deduplicates this action.
    pub fn idempotent_by_key(&self) -> bool {
        use Action::*;
        matches!(
            self,
            CreateBucket
                | CreateTable
                | CreateQueue
                | SendMessage
                | CreateWorkload
                | CreateVolume
                | AttachVolume
        )
    }

    /// CamelCase name, used in logs and as the default wire name.
    pub fn name(&self) -> &'static str {
        use Action::*;
        match self {
            CreateBucket => "CreateBucket",
            DeleteBucket => "DeleteBucket",
            HeadBucket => "HeadBucket",
            ListBuckets => "ListBuckets",
            PutObject => "PutObject",
            GetObject => "GetObject",
            HeadObject => "HeadObject",
            DeleteObject => "DeleteObject",
            ListObjects => "ListObjects",
            GetBucketVersioning => "GetBucketVersioning",
            PutBucketVersioning => "PutBucketVersioning",
            CreateMultipartUpload => "CreateMultipartUpload",
            UploadPart => "UploadPart",
            CompleteMultipartUpload => "CompleteMultipartUpload",
            AbortMultipartUpload => "AbortMultipartUpload",
            CreateTable => "CreateTable",
            DeleteTable => "DeleteTable",
            DescribeTable => "DescribeTable",
            ListTables => "ListTables",
            PutItem => "PutItem",
            GetItem => "GetItem",
            DeleteItem => "DeleteItem",
            Scan => "Scan",
            CreateQueue => "CreateQueue",
            DeleteQueue => "DeleteQueue",
            GetQueue => "GetQueue",
            ListQueues => "ListQueues",
            SendMessage => "SendMessage",
            ReceiveMessages => "ReceiveMessages",
            DeleteMessage => "DeleteMessage",
            CreateWorkload => "CreateWorkload",
            GetWorkload => "GetWorkload",
            ListWorkloads => "ListWorkloads",
            DeleteWorkload => "DeleteWorkload",
            CreateVolume => "CreateVolume",
            AttachVolume => "AttachVolume",
            GetPrice => "GetPrice",
            ListPrices => "ListPrices",
            ListPriceServices => "ListPriceServices",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique() {
        let mut names: Vec<_> = Action::ALL.iter().map(|a| a.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Action::ALL.len());
    }

    #[test]
    fn test_idempotent_actions_are_mutations() {
        for action in Action::ALL {
            if action.idempotent_by_key() {
                assert!(!action.is_read_only(), "{action} is both");
            }
        }
    }

    #[test]
    fn test_service_mapping() {
        assert_eq!(Action::PutObject.service(), Service::ObjectStorage);
        assert_eq!(Action::Scan.service(), Service::DocumentStore);
        assert_eq!(Action::ReceiveMessages.service(), Service::Messaging);
        assert_eq!(Action::AttachVolume.service(), Service::Compute);
        assert_eq!(Action::GetPrice.service(), Service::Pricing);
    }
}
