//! Service handlers: the emulated API families behind the dispatcher.
//!
//! Each handler owns one family, validates its input before touching
//! storage, and returns typed results:
//!
//! - [`ObjectStorage`] — buckets and objects;
//! - [`DocumentStore`] — tables of JSON items;
//! - [`Messaging`] — queues with at-least-once delivery;
//! - [`Compute`] — workloads and volumes through the driver registry;
//! - [`Pricing`] — lookups in a static [`PriceCatalog`].
//!
//! [`Services`] bundles them behind one [`execute`](Services::execute)
//! entry point taking a [`ServiceRequest`] and returning an [`Outcome`].
//! Wire formats are not this crate's concern.

mod compute;
pub mod cursor;
mod document_store;
mod error;
mod idempotency;
pub mod limits;
mod messaging;
mod model;
mod object_storage;
mod pricing;
mod records;

use std::sync::Arc;

use stratus_driver::{DriverError, DriverRegistry};
use stratus_engine::StorageEngine;
use stratus_types::Scope;
use tracing::debug;

pub use compute::{Compute, DEFAULT_NETWORK, DEFAULT_NETWORK_CIDR};
pub use cursor::{Listing, PageRequest};
pub use document_store::{DEFAULT_KEY_ATTRIBUTE, DocumentStore, key_of};
pub use error::{Resource, ServiceError};
pub use idempotency::{IdempotencyLedger, RecordedReply, TokenClaim};
pub use limits::Limits;
pub use messaging::{MAX_MESSAGE_BYTES, Messaging};
pub use model::{
    BucketInfo, CompletedPart, ItemInfo, MessageInfo, MultipartUpload, ObjectInfo, ObjectListing,
    ObjectMeta, ObjectRemoval, Outcome, PartInfo, PriceFilter, PriceItem, QueueInfo,
    RequestContext, ServiceRequest, TableInfo, VersioningStatus, VolumeInfo, WorkloadInfo,
    WorkloadRequest,
};
pub use object_storage::ObjectStorage;
pub use pricing::{PriceCatalog, Pricing};

/// Every handler, sharing one engine and one driver registry.
pub struct Services {
    drivers: Arc<DriverRegistry>,
    objects: ObjectStorage,
    documents: DocumentStore,
    messaging: Messaging,
    compute: Compute,
    pricing: Pricing,
    ledger: IdempotencyLedger,
}

impl Services {
    pub fn new(
        engine: Arc<StorageEngine>,
        drivers: Arc<DriverRegistry>,
        catalog: Arc<PriceCatalog>,
        limits: Limits,
    ) -> Self {
        Self {
            objects: ObjectStorage::new(engine.clone(), limits),
            documents: DocumentStore::new(engine.clone()),
            messaging: Messaging::new(engine.clone()),
            compute: Compute::new(engine.clone(), drivers.clone()),
            pricing: Pricing::new(catalog),
            ledger: IdempotencyLedger::new(engine),
            drivers,
        }
    }

    pub fn objects(&self) -> &ObjectStorage {
        &self.objects
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    pub fn compute(&self) -> &Compute {
        &self.compute
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// Map a caller credential (an access key id) to its owning scope.
    ///
    /// With an identity driver bound, the driver decides; a credential it
    /// does not know is its own scope. Without one, the credential is the
    /// scope. No credential means the default scope.
    pub async fn resolve_scope(&self, credential: Option<&str>) -> Result<Scope, ServiceError> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            return Ok(Scope::default());
        };
        let default = Scope::default();
        if !self
            .drivers
            .is_bound(&default, stratus_types::Capability::Identity)
        {
            return Ok(Scope::new(credential));
        }
        let identity = self.drivers.identity(&default)?;
        match identity.resolve_principal(credential).await {
            Ok(principal) => Ok(principal.scope),
            Err(DriverError::NotFound { .. }) => Ok(Scope::new(credential)),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one request against its handler.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: ServiceRequest,
    ) -> Result<Outcome, ServiceError> {
        debug!(action = %request.action(), scope = %ctx.scope, request_id = %ctx.request_id, "executing");
        let scope = &ctx.scope;
        let outcome = match request {
            ServiceRequest::CreateBucket { name } => {
                Outcome::Bucket(self.objects.create_bucket(&name, scope).await?)
            }
            ServiceRequest::DeleteBucket { name } => Outcome::Deleted {
                existed: self.objects.delete_bucket(&name, scope).await?,
            },
            ServiceRequest::HeadBucket { name } => {
                Outcome::Bucket(self.objects.head_bucket(&name, scope).await?)
            }
            ServiceRequest::ListBuckets => Outcome::Buckets(self.objects.list_buckets(scope).await?),
            ServiceRequest::PutObject {
                bucket,
                key,
                data,
                meta,
            } => Outcome::Object(
                self.objects
                    .put_object(&bucket, &key, data, meta, scope)
                    .await?,
            ),
            ServiceRequest::GetObject {
                bucket,
                key,
                version_id,
            } => {
                let (info, data) = self
                    .objects
                    .get_object(&bucket, &key, version_id.as_deref(), scope)
                    .await?;
                Outcome::ObjectData { info, data }
            }
            ServiceRequest::HeadObject {
                bucket,
                key,
                version_id,
            } => Outcome::Object(
                self.objects
                    .head_object(&bucket, &key, version_id.as_deref(), scope)
                    .await?,
            ),
            ServiceRequest::DeleteObject {
                bucket,
                key,
                version_id,
            } => Outcome::ObjectDeleted(
                self.objects
                    .delete_object(&bucket, &key, version_id.as_deref(), scope)
                    .await?,
            ),
            ServiceRequest::ListObjects {
                bucket,
                prefix,
                delimiter,
                page,
            } => Outcome::Objects(
                self.objects
                    .list_objects(&bucket, &prefix, delimiter.as_deref(), &page, scope)
                    .await?,
            ),
            ServiceRequest::GetBucketVersioning { bucket } => Outcome::Versioning {
                status: self.objects.get_bucket_versioning(&bucket, scope).await?,
                bucket,
            },
            ServiceRequest::PutBucketVersioning { bucket, status } => Outcome::Versioning {
                status: self
                    .objects
                    .put_bucket_versioning(&bucket, status, scope)
                    .await?,
                bucket,
            },
            ServiceRequest::CreateMultipartUpload { bucket, key, meta } => Outcome::Upload(
                self.objects
                    .create_multipart_upload(&bucket, &key, meta, scope)
                    .await?,
            ),
            ServiceRequest::UploadPart {
                bucket,
                key,
                upload_id,
                part_number,
                data,
            } => Outcome::Part(
                self.objects
                    .upload_part(&bucket, &key, &upload_id, part_number, data, scope)
                    .await?,
            ),
            ServiceRequest::CompleteMultipartUpload {
                bucket,
                key,
                upload_id,
                parts,
            } => Outcome::Object(
                self.objects
                    .complete_multipart_upload(&bucket, &key, &upload_id, &parts, scope)
                    .await?,
            ),
            ServiceRequest::AbortMultipartUpload {
                bucket,
                key,
                upload_id,
            } => Outcome::Deleted {
                existed: self
                    .objects
                    .abort_multipart_upload(&bucket, &key, &upload_id, scope)
                    .await?,
            },

            ServiceRequest::CreateTable {
                name,
                key_attribute,
            } => Outcome::Table(
                self.documents
                    .create_table(&name, &key_attribute, scope)
                    .await?,
            ),
            ServiceRequest::DeleteTable { name } => Outcome::Deleted {
                existed: self.documents.delete_table(&name).await?,
            },
            ServiceRequest::DescribeTable { name } => {
                Outcome::Table(self.documents.describe_table(&name).await?)
            }
            ServiceRequest::ListTables { page } => {
                Outcome::Tables(self.documents.list_tables(scope, &page).await?)
            }
            ServiceRequest::PutItem {
                table,
                key,
                item,
                create_table,
            } => Outcome::Item(
                self.documents
                    .put_item(&table, key.as_deref(), item, create_table, scope)
                    .await?,
            ),
            ServiceRequest::GetItem { table, key } => {
                Outcome::Item(self.documents.get_item(&table, &key).await?)
            }
            ServiceRequest::DeleteItem { table, key } => Outcome::Deleted {
                existed: self.documents.delete_item(&table, &key).await?,
            },
            ServiceRequest::Scan { table, page } => {
                Outcome::Items(self.documents.scan(&table, &page).await?)
            }

            ServiceRequest::CreateQueue { name, attributes } => Outcome::Queue(
                self.messaging
                    .create_queue(&name, attributes, scope)
                    .await?,
            ),
            ServiceRequest::DeleteQueue { name } => Outcome::Deleted {
                existed: self.messaging.delete_queue(&name).await?,
            },
            ServiceRequest::GetQueue { name } => {
                Outcome::Queue(self.messaging.get_queue(&name).await?)
            }
            ServiceRequest::ListQueues { prefix, page } => {
                Outcome::Queues(self.messaging.list_queues(&prefix, scope, &page).await?)
            }
            ServiceRequest::SendMessage {
                queue,
                body,
                attributes,
            } => Outcome::MessageSent(
                self.messaging
                    .send_message(&queue, body, attributes)
                    .await?,
            ),
            ServiceRequest::ReceiveMessages { queue, max } => {
                Outcome::Messages(self.messaging.receive_messages(&queue, max).await?)
            }
            ServiceRequest::DeleteMessage { queue, receipt } => Outcome::Deleted {
                existed: self.messaging.delete_message(&queue, &receipt).await?,
            },

            ServiceRequest::CreateWorkload(spec) => Outcome::Workload(
                self.compute
                    .create_workload(spec, scope, &ctx.request_id)
                    .await?,
            ),
            ServiceRequest::GetWorkload { id } => {
                Outcome::Workload(self.compute.get_workload(&id, scope).await?)
            }
            ServiceRequest::ListWorkloads => {
                Outcome::Workloads(self.compute.list_workloads(scope).await?)
            }
            ServiceRequest::DeleteWorkload { id } => Outcome::Deleted {
                existed: self.compute.delete_workload(&id, scope).await?,
            },
            ServiceRequest::CreateVolume { id, size_bytes } => Outcome::Volume(
                self.compute
                    .create_volume(id, size_bytes, scope, &ctx.request_id)
                    .await?,
            ),
            ServiceRequest::AttachVolume { workload, volume } => {
                self.compute
                    .attach_volume(&workload, &volume, scope)
                    .await?;
                Outcome::Attached { workload, volume }
            }

            ServiceRequest::GetPrice { product_code } => {
                Outcome::Price(self.pricing.get_price(ctx.dialect, &product_code)?)
            }
            ServiceRequest::ListPrices {
                service_code,
                filters,
                page,
            } => Outcome::Prices(self.pricing.list_prices(
                ctx.dialect,
                service_code.as_deref(),
                &filters,
                &page,
            )),
            ServiceRequest::ListPriceServices => {
                Outcome::PriceServices(self.pricing.list_price_services(ctx.dialect))
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests;
