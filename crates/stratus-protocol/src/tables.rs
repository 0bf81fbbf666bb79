//! Built-in route tables, one per provider family.
//!
//! Each table maps the provider's own request shapes onto canonical
//! [`Action`]s. Operations outside these tables are answered with the
//! dialect's "not implemented" response.

use stratus_types::Dialect;

use crate::action::Action;
use crate::envelope::Method;
use crate::error::TableError;
use crate::table::{QueryGuard, RouteTable, WireProtocol};

/// `x-amz-target` prefix of DynamoDB.
pub const DYNAMODB_PREFIX: &str = "DynamoDB_20120810";
/// `x-amz-target` prefix of SQS (JSON protocol).
pub const SQS_PREFIX: &str = "AmazonSQS";
/// `x-amz-target` prefix of the Price List API.
pub const PRICING_PREFIX: &str = "AWSPriceListService";

/// AWS: S3 by path, DynamoDB/SQS/Pricing by target, EC2/SQS by form body.
pub fn aws() -> Result<RouteTable, TableError> {
    use Action::*;
    use Method::*;

    let mut builder = RouteTable::builder(Dialect::Aws, WireProtocol::RestXml)
        .route(Get, "/", ListBuckets)
        .route_when(Get, "/{bucket}", QueryGuard::Present("versioning"), GetBucketVersioning)
        .route_when(Put, "/{bucket}", QueryGuard::Present("versioning"), PutBucketVersioning)
        .route_when(Post, "/{bucket}/{*key}", QueryGuard::Present("uploads"), CreateMultipartUpload)
        .route_when(Put, "/{bucket}/{*key}", QueryGuard::Present("uploadId"), UploadPart)
        .route_when(
            Post,
            "/{bucket}/{*key}",
            QueryGuard::Present("uploadId"),
            CompleteMultipartUpload,
        )
        .route_when(
            Delete,
            "/{bucket}/{*key}",
            QueryGuard::Present("uploadId"),
            AbortMultipartUpload,
        )
        .route(Put, "/{bucket}", CreateBucket)
        .route(Delete, "/{bucket}", DeleteBucket)
        .route(Head, "/{bucket}", HeadBucket)
        .route(Get, "/{bucket}", ListObjects)
        .route(Put, "/{bucket}/{*key}", PutObject)
        .route(Get, "/{bucket}/{*key}", GetObject)
        .route(Head, "/{bucket}/{*key}", HeadObject)
        .route(Delete, "/{bucket}/{*key}", DeleteObject);

    for (op, action) in [
        ("CreateTable", CreateTable),
        ("DeleteTable", DeleteTable),
        ("DescribeTable", DescribeTable),
        ("ListTables", ListTables),
        ("PutItem", PutItem),
        ("GetItem", GetItem),
        ("DeleteItem", DeleteItem),
        ("Scan", Scan),
    ] {
        builder = builder.target(format!("{DYNAMODB_PREFIX}.{op}"), action);
    }

    let sqs = [
        ("CreateQueue", CreateQueue),
        ("DeleteQueue", DeleteQueue),
        ("GetQueueUrl", GetQueue),
        ("ListQueues", ListQueues),
        ("SendMessage", SendMessage),
        ("ReceiveMessage", ReceiveMessages),
        ("DeleteMessage", DeleteMessage),
    ];
    for (op, action) in sqs {
        builder = builder
            .target(format!("{SQS_PREFIX}.{op}"), action)
            .body_action(op, action);
    }

    builder = builder
        .target(format!("{PRICING_PREFIX}.GetProducts"), ListPrices)
        .target(format!("{PRICING_PREFIX}.GetServices"), ListPriceServices);

    for (op, action) in [
        ("RunInstances", CreateWorkload),
        ("DescribeInstances", ListWorkloads),
        ("TerminateInstances", DeleteWorkload),
        ("CreateVolume", CreateVolume),
        ("AttachVolume", AttachVolume),
    ] {
        builder = builder.body_action(op, action);
    }

    builder.build()
}

/// GCP: Cloud Storage, Firestore, Pub/Sub, Compute Engine and Billing.
pub fn gcp() -> Result<RouteTable, TableError> {
    use Action::*;
    use Method::*;

    const DOCS: &str = "/v1/projects/{project}/databases/{database}/documents/{collection}";
    const DOC: &str =
        "/v1/projects/{project}/databases/{database}/documents/{collection}/{document}";
    const INSTANCES: &str = "/compute/v1/projects/{project}/zones/{zone}/instances";
    const INSTANCE: &str = "/compute/v1/projects/{project}/zones/{zone}/instances/{instance}";

    RouteTable::builder(Dialect::Gcp, WireProtocol::RestJson)
        // Cloud Storage
        .route(Get, "/storage/v1/b", ListBuckets)
        .route(Post, "/storage/v1/b", CreateBucket)
        .route(Get, "/storage/v1/b/{bucket}", HeadBucket)
        .route(Delete, "/storage/v1/b/{bucket}", DeleteBucket)
        .route(Get, "/storage/v1/b/{bucket}/o", ListObjects)
        .route_when(
            Get,
            "/storage/v1/b/{bucket}/o/{*object}",
            QueryGuard::Equals("alt", "media"),
            GetObject,
        )
        .route(Get, "/storage/v1/b/{bucket}/o/{*object}", HeadObject)
        .route(Delete, "/storage/v1/b/{bucket}/o/{*object}", DeleteObject)
        .route(Post, "/upload/storage/v1/b/{bucket}/o", PutObject)
        // Firestore; collections are created on first write.
        .route(
            Post,
            "/v1/projects/{project}/databases/{database}/documents:listCollectionIds",
            ListTables,
        )
        .route(Post, DOCS, PutItem)
        .route(Get, DOCS, Scan)
        .route(Get, DOC, GetItem)
        .route(Patch, DOC, PutItem)
        .route(Delete, DOC, DeleteItem)
        // Pub/Sub
        .route(Get, "/v1/projects/{project}/topics", ListQueues)
        .route(Put, "/v1/projects/{project}/topics/{topic}", CreateQueue)
        .route(Get, "/v1/projects/{project}/topics/{topic}", GetQueue)
        .route(Delete, "/v1/projects/{project}/topics/{topic}", DeleteQueue)
        .route(Post, "/v1/projects/{project}/topics/{topic}:publish", SendMessage)
        .route(
            Post,
            "/v1/projects/{project}/subscriptions/{subscription}:pull",
            ReceiveMessages,
        )
        .route(
            Post,
            "/v1/projects/{project}/subscriptions/{subscription}:acknowledge",
            DeleteMessage,
        )
        // Compute Engine
        .route(Post, INSTANCES, CreateWorkload)
        .route(Get, INSTANCES, ListWorkloads)
        .route(Get, INSTANCE, GetWorkload)
        .route(Delete, INSTANCE, DeleteWorkload)
        .route(
            Post,
            "/compute/v1/projects/{project}/zones/{zone}/instances/{instance}/attachDisk",
            AttachVolume,
        )
        .route(
            Post,
            "/compute/v1/projects/{project}/zones/{zone}/disks",
            CreateVolume,
        )
        // Cloud Billing catalog
        .route(Get, "/v1/services", ListPriceServices)
        .route(Get, "/v1/services/{service}/skus", ListPrices)
        .route(Get, "/v1/services/{service}/skus/{sku}", GetPrice)
        .build()
}

/// Oracle: Object Storage, NoSQL, Queue, Compute and the price list.
pub fn oracle() -> Result<RouteTable, TableError> {
    use Action::*;
    use Method::*;

    RouteTable::builder(Dialect::Oracle, WireProtocol::RestJson)
        // Object Storage
        .route(Get, "/n/{namespace}/b", ListBuckets)
        .route(Post, "/n/{namespace}/b", CreateBucket)
        .route(Get, "/n/{namespace}/b/{bucket}", HeadBucket)
        .route(Head, "/n/{namespace}/b/{bucket}", HeadBucket)
        .route(Delete, "/n/{namespace}/b/{bucket}", DeleteBucket)
        .route(Get, "/n/{namespace}/b/{bucket}/o", ListObjects)
        .route(Put, "/n/{namespace}/b/{bucket}/o/{*object}", PutObject)
        .route(Get, "/n/{namespace}/b/{bucket}/o/{*object}", GetObject)
        .route(Head, "/n/{namespace}/b/{bucket}/o/{*object}", HeadObject)
        .route(Delete, "/n/{namespace}/b/{bucket}/o/{*object}", DeleteObject)
        // NoSQL
        .route(Post, "/20190828/tables", CreateTable)
        .route(Get, "/20190828/tables", ListTables)
        .route(Get, "/20190828/tables/{table}", DescribeTable)
        .route(Delete, "/20190828/tables/{table}", DeleteTable)
        .route(Put, "/20190828/tables/{table}/rows", PutItem)
        .route_when(
            Get,
            "/20190828/tables/{table}/rows",
            QueryGuard::Present("key"),
            GetItem,
        )
        .route(Get, "/20190828/tables/{table}/rows", Scan)
        .route(Delete, "/20190828/tables/{table}/rows", DeleteItem)
        // Queue
        .route(Post, "/20210201/queues", CreateQueue)
        .route(Get, "/20210201/queues", ListQueues)
        .route(Get, "/20210201/queues/{queue}", GetQueue)
        .route(Delete, "/20210201/queues/{queue}", DeleteQueue)
        .route(Post, "/20210201/queues/{queue}/messages", SendMessage)
        .route(Get, "/20210201/queues/{queue}/messages", ReceiveMessages)
        .route(
            Delete,
            "/20210201/queues/{queue}/messages/{receipt}",
            DeleteMessage,
        )
        // Compute
        .route(Post, "/20160918/instances", CreateWorkload)
        .route(Get, "/20160918/instances", ListWorkloads)
        .route(Get, "/20160918/instances/{instance}", GetWorkload)
        .route(Delete, "/20160918/instances/{instance}", DeleteWorkload)
        .route(Post, "/20160918/volumes", CreateVolume)
        .route(Post, "/20160918/volumeAttachments", AttachVolume)
        // Price list
        .route_when(
            Get,
            "/metering/api/v1/prices",
            QueryGuard::Present("partNumber"),
            GetPrice,
        )
        .route(Get, "/metering/api/v1/prices", ListPrices)
        .build()
}

/// The built-in table for `dialect`.
pub fn for_dialect(dialect: Dialect) -> Result<RouteTable, TableError> {
    match dialect {
        Dialect::Aws => aws(),
        Dialect::Gcp => gcp(),
        Dialect::Oracle => oracle(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Service;

    #[test]
    fn test_all_tables_build() {
        for dialect in Dialect::ALL {
            let table = for_dialect(dialect).unwrap();
            assert_eq!(table.dialect(), dialect);
        }
    }

    #[test]
    fn test_every_service_reachable_per_dialect() {
        let services = [
            Service::ObjectStorage,
            Service::DocumentStore,
            Service::Messaging,
            Service::Compute,
            Service::Pricing,
        ];
        for dialect in Dialect::ALL {
            let actions = for_dialect(dialect).unwrap().actions();
            for service in services {
                assert!(
                    actions.iter().any(|a| a.service() == service),
                    "{dialect} has no {service} route"
                );
            }
        }
    }

    #[test]
    fn test_aws_covers_every_action_but_get_price_and_workload_lookup() {
        let actions = aws().unwrap().actions();
        for action in Action::ALL {
            if matches!(action, Action::GetPrice | Action::GetWorkload) {
                continue;
            }
            assert!(actions.contains(&action), "aws lacks {action}");
        }
    }

    #[test]
    fn test_oracle_covers_every_action() {
        let actions = oracle().unwrap().actions();
        for action in Action::ALL.into_iter().filter(|a| !a.is_s3_only()) {
            assert!(actions.contains(&action), "oracle lacks {action}");
        }
    }

    #[test]
    fn test_gcp_has_no_explicit_table_management() {
        let actions = gcp().unwrap().actions();
        for action in Action::ALL {
            let implicit = action.is_s3_only()
                || matches!(
                    action,
                    Action::CreateTable | Action::DeleteTable | Action::DescribeTable
                );
            assert_eq!(actions.contains(&action), !implicit, "gcp {action}");
        }
    }
}
