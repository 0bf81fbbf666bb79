//! Static price catalog.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use stratus_types::Dialect;
use tracing::info;

use crate::cursor::{Listing, PageRequest};
use crate::error::{Resource, ServiceError};
use crate::model::{PriceFilter, PriceItem};

/// Price entries of every provider, ordered by `(dialect, product_code)`.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    items: BTreeMap<(Dialect, String), PriceItem>,
}

impl PriceCatalog {
    /// A catalog with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in entries.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for item in seed() {
            catalog.items.insert((item.dialect, item.product_code.clone()), item);
        }
        catalog
    }

    /// Add or replace entries. Prices must be finite and non-negative.
    pub fn extend(&mut self, items: impl IntoIterator<Item = PriceItem>) -> Result<usize, ServiceError> {
        let mut added = 0;
        for item in items {
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(ServiceError::validation(format!(
                    "price of {} must be a non-negative number",
                    item.product_code
                )));
            }
            if item.product_code.is_empty() || item.service_code.is_empty() {
                return Err(ServiceError::validation(
                    "price entries need a product code and a service code",
                ));
            }
            self.items.insert((item.dialect, item.product_code.clone()), item);
            added += 1;
        }
        Ok(added)
    }

    /// Load extra entries from a JSON array of [`PriceItem`]s.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ServiceError> {
        let raw = std::fs::read(path)
            .map_err(|e| ServiceError::Internal(format!("reading {}: {e}", path.display())))?;
        let items: Vec<PriceItem> = serde_json::from_slice(&raw).map_err(|e| {
            ServiceError::validation(format!("parsing {}: {e}", path.display()))
        })?;
        let added = self.extend(items)?;
        info!(path = %path.display(), entries = added, "loaded pricing catalog");
        Ok(added)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn of(&self, dialect: Dialect) -> impl Iterator<Item = &PriceItem> {
        self.items
            .range((dialect, String::new())..)
            .take_while(move |((d, _), _)| *d == dialect)
            .map(|(_, item)| item)
    }
}

/// Pricing handler.
pub struct Pricing {
    catalog: Arc<PriceCatalog>,
}

impl Pricing {
    pub fn new(catalog: Arc<PriceCatalog>) -> Self {
        Self { catalog }
    }

    /// Exactly one entry for `product_code`, or `NotFound`.
    pub fn get_price(&self, dialect: Dialect, product_code: &str) -> Result<PriceItem, ServiceError> {
        self.catalog
            .items
            .get(&(dialect, product_code.to_string()))
            .cloned()
            .ok_or_else(|| ServiceError::not_found(Resource::Price, product_code))
    }

    /// Entries matching every filter, in product-code order.
    pub fn list_prices(
        &self,
        dialect: Dialect,
        service_code: Option<&str>,
        filters: &[PriceFilter],
        page: &PageRequest,
    ) -> Listing<PriceItem> {
        let mut matching = self
            .catalog
            .of(dialect)
            .filter(|item| service_code.is_none_or(|s| item.service_code == s))
            .filter(|item| filters.iter().all(|f| matches_filter(item, f)))
            .filter(|item| {
                page.after
                    .as_deref()
                    .is_none_or(|after| item.product_code.as_str() > after)
            });
        let items: Vec<PriceItem> = matching.by_ref().take(page.limit).cloned().collect();
        let truncated = matching.next().is_some();
        let last = items.last().map(|i| i.product_code.clone());
        Listing::new(items, truncated, last.as_deref())
    }

    /// Distinct service codes, sorted.
    pub fn list_price_services(&self, dialect: Dialect) -> Vec<String> {
        let mut services: Vec<String> = self
            .catalog
            .of(dialect)
            .map(|i| i.service_code.clone())
            .collect();
        services.sort();
        services.dedup();
        services
    }
}

fn matches_filter(item: &PriceItem, filter: &PriceFilter) -> bool {
    let field = filter.field.to_ascii_lowercase();
    let actual = match field.as_str() {
        "servicecode" | "service" => Some(item.service_code.as_str()),
        "sku" | "productcode" | "partnumber" => Some(item.product_code.as_str()),
        "regioncode" | "region" => Some(item.region.as_str()),
        "currency" | "currencycode" => Some(item.currency.as_str()),
        _ => item
            .attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&filter.field))
            .map(|(_, v)| v.as_str()),
    };
    actual == Some(filter.value.as_str())
}

#[allow(clippy::too_many_arguments)]
fn entry(
    dialect: Dialect,
    service_code: &str,
    product_code: &str,
    description: &str,
    region: &str,
    unit: &str,
    unit_price: f64,
    attributes: &[(&str, &str)],
) -> PriceItem {
    PriceItem {
        dialect,
        service_code: service_code.to_string(),
        product_code: product_code.to_string(),
        description: description.to_string(),
        region: region.to_string(),
        unit: unit.to_string(),
        unit_price,
        currency: "USD".to_string(),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn seed() -> Vec<PriceItem> {
    use Dialect::*;
    vec![
        entry(
            Aws,
            "AmazonEC2",
            "ABC-123",
            "$0.0104 per On Demand Linux t3.micro Instance Hour",
            "us-east-1",
            "Hrs",
            0.0104,
            &[
                ("instanceType", "t3.micro"),
                ("operatingSystem", "Linux"),
                ("location", "US East (N. Virginia)"),
            ],
        ),
        entry(
            Aws,
            "AmazonEC2",
            "DEF-456",
            "$0.0208 per On Demand Linux t3.small Instance Hour",
            "us-east-1",
            "Hrs",
            0.0208,
            &[
                ("instanceType", "t3.small"),
                ("operatingSystem", "Linux"),
                ("location", "US East (N. Virginia)"),
            ],
        ),
        entry(
            Aws,
            "AmazonS3",
            "S3-STD-001",
            "$0.023 per GB-Mo for the first 50 TB of Standard storage",
            "us-east-1",
            "GB-Mo",
            0.023,
            &[("storageClass", "General Purpose"), ("volumeType", "Standard")],
        ),
        entry(
            Aws,
            "AmazonDynamoDB",
            "DDB-WRU-001",
            "$1.25 per million write request units",
            "us-east-1",
            "WriteRequestUnits",
            0.00000125,
            &[("group", "DDB-WriteUnits")],
        ),
        entry(
            Aws,
            "AWSQueueService",
            "SQS-REQ-001",
            "$0.40 per million Amazon SQS standard requests",
            "us-east-1",
            "Requests",
            0.0000004,
            &[("queueType", "Standard")],
        ),
        entry(
            Gcp,
            "6F81-5844-456A",
            "2E27-4F75-95CD",
            "E2 Instance Core running in Americas",
            "us-central1",
            "h",
            0.021811,
            &[("resourceFamily", "Compute"), ("resourceGroup", "CPU")],
        ),
        entry(
            Gcp,
            "6F81-5844-456A",
            "6B8F-E63D-832B",
            "E2 Instance Ram running in Americas",
            "us-central1",
            "GiBy.h",
            0.002923,
            &[("resourceFamily", "Compute"), ("resourceGroup", "RAM")],
        ),
        entry(
            Gcp,
            "95FF-2EF5-5EA1",
            "E5F0-6A5D-7BAD",
            "Standard Storage US Multi-region",
            "us",
            "GiBy.mo",
            0.026,
            &[("resourceFamily", "Storage"), ("resourceGroup", "MultiRegionalStorage")],
        ),
        entry(
            Oracle,
            "COMPUTE",
            "B88298",
            "Compute - Standard - E3 - OCPU",
            "us-ashburn-1",
            "OCPU Per Hour",
            0.025,
            &[("shape", "VM.Standard.E3.Flex"), ("metric", "OCPU")],
        ),
        entry(
            Oracle,
            "COMPUTE",
            "B88299",
            "Compute - Standard - E3 - Memory",
            "us-ashburn-1",
            "Gigabyte Per Hour",
            0.0015,
            &[("shape", "VM.Standard.E3.Flex"), ("metric", "Memory")],
        ),
        entry(
            Oracle,
            "STORAGE",
            "B91628",
            "Object Storage - Storage",
            "us-ashburn-1",
            "Gigabyte Storage Capacity Per Month",
            0.0255,
            &[("tier", "Standard")],
        ),
    ]
}
