//! [`Detector`] — resolves envelopes against the per-dialect tables.

use serde::{Deserialize, Serialize};
use stratus_types::Dialect;
use tracing::debug;

use crate::action::{Action, Service};
use crate::envelope::RequestEnvelope;
use crate::error::{DetectionError, TableError};
use crate::table::{PathMatch, RouteTable, WireProtocol};
use crate::tables;
use crate::template::PathParams;

/// Header carrying `<Service>.<Operation>` for AWS JSON protocols.
pub const TARGET_HEADER: &str = "x-amz-target";

/// A detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Explicit action header.
    Header,
    /// Path template table.
    Path,
    /// Body envelope inspection.
    Body,
}

/// Strategy order per dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Order for the AWS listener.
    pub aws: Vec<Strategy>,
    /// Order for the GCP listener.
    pub gcp: Vec<Strategy>,
    /// Order for the Oracle listener.
    pub oracle: Vec<Strategy>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let order = vec![Strategy::Header, Strategy::Path, Strategy::Body];
        Self {
            aws: order.clone(),
            gcp: order.clone(),
            oracle: order,
        }
    }
}

impl DetectorConfig {
    /// Strategy order for `dialect`.
    pub fn order(&self, dialect: Dialect) -> &[Strategy] {
        match dialect {
            Dialect::Aws => &self.aws,
            Dialect::Gcp => &self.gcp,
            Dialect::Oracle => &self.oracle,
        }
    }

    fn validate(&self) -> Result<(), TableError> {
        for dialect in Dialect::ALL {
            let order = self.order(dialect);
            let invalid = |reason: &str| TableError::InvalidOrder {
                dialect: dialect.to_string(),
                reason: reason.to_string(),
            };
            if order.is_empty() {
                return Err(invalid("no strategies"));
            }
            for (i, s) in order.iter().enumerate() {
                if order[..i].contains(s) {
                    return Err(invalid("strategy listed twice"));
                }
            }
        }
        Ok(())
    }
}

/// A request resolved to one canonical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperation {
    /// Dialect of the listener.
    pub dialect: Dialect,
    /// Canonical action.
    pub action: Action,
    /// Strategy that resolved it.
    pub strategy: Strategy,
    /// Wire protocol, selecting response and error shapes.
    pub protocol: WireProtocol,
    /// Operation name as the caller spelled it (`RunInstances`, `CreateTable`).
    pub operation: String,
    /// Decoded path parameters (empty for header and body matches).
    pub params: PathParams,
}

impl ResolvedOperation {
    /// API family of the action.
    pub fn service(&self) -> Service {
        self.action.service()
    }

    /// A decoded path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

struct DialectRules {
    table: RouteTable,
    order: Vec<Strategy>,
}

/// Resolves request envelopes for every dialect.
pub struct Detector {
    aws: DialectRules,
    gcp: DialectRules,
    oracle: DialectRules,
}

impl Detector {
    /// Build the detector from the built-in tables.
    pub fn new(config: &DetectorConfig) -> Result<Self, TableError> {
        Self::with_tables(config, tables::aws()?, tables::gcp()?, tables::oracle()?)
    }

    /// Build the detector from explicit tables.
    pub fn with_tables(
        config: &DetectorConfig,
        aws: RouteTable,
        gcp: RouteTable,
        oracle: RouteTable,
    ) -> Result<Self, TableError> {
        config.validate()?;
        let rules = |table: RouteTable| DialectRules {
            order: config.order(table.dialect()).to_vec(),
            table,
        };
        Ok(Self {
            aws: rules(aws),
            gcp: rules(gcp),
            oracle: rules(oracle),
        })
    }

    /// The table serving `dialect`.
    pub fn table(&self, dialect: Dialect) -> &RouteTable {
        &self.rules(dialect).table
    }

    fn rules(&self, dialect: Dialect) -> &DialectRules {
        match dialect {
            Dialect::Aws => &self.aws,
            Dialect::Gcp => &self.gcp,
            Dialect::Oracle => &self.oracle,
        }
    }

    /// Resolve an envelope to an operation.
    ///
    /// Strategies run in the configured order. A present target header
    /// short-circuits: an unknown target fails immediately. Other
    /// strategies fall through; if none resolves, the most specific
    /// failure is reported: an unknown body action over a method mismatch,
    /// either over [`DetectionError::UnknownOperation`].
    pub fn detect(&self, envelope: &RequestEnvelope) -> Result<ResolvedOperation, DetectionError> {
        let rules = self.rules(envelope.dialect());
        let mut refined: Option<DetectionError> = None;

        for strategy in &rules.order {
            let attempt = match strategy {
                Strategy::Header => detect_header(&rules.table, envelope),
                Strategy::Path => detect_path(&rules.table, envelope),
                Strategy::Body => detect_body(&rules.table, envelope),
            };
            match attempt {
                Attempt::Resolved(action, protocol, operation, params) => {
                    debug!(
                        dialect = %envelope.dialect(),
                        %action,
                        ?strategy,
                        "operation resolved"
                    );
                    return Ok(ResolvedOperation {
                        dialect: envelope.dialect(),
                        action,
                        strategy: *strategy,
                        protocol,
                        operation,
                        params,
                    });
                }
                Attempt::Fatal(e) => return Err(e),
                Attempt::Refined(e) => {
                    // A failure naming an operation beats one that does not.
                    let replace = refined.as_ref().is_none_or(|prev| {
                        prev.requested_operation().is_none() && e.requested_operation().is_some()
                    });
                    if replace {
                        refined = Some(e);
                    }
                }
                Attempt::NotApplicable => {}
            }
        }

        Err(refined.unwrap_or_else(|| DetectionError::UnknownOperation {
            method: envelope.method(),
            path: envelope.path().to_string(),
        }))
    }
}

enum Attempt {
    Resolved(Action, WireProtocol, String, PathParams),
    /// Stop detection with this error.
    Fatal(DetectionError),
    /// Keep trying; report this if nothing else matches.
    Refined(DetectionError),
    NotApplicable,
}

fn detect_header(table: &RouteTable, envelope: &RequestEnvelope) -> Attempt {
    if !table.has_targets() {
        return Attempt::NotApplicable;
    }
    let Some(target) = envelope.header(TARGET_HEADER) else {
        return Attempt::NotApplicable;
    };
    let target = target.trim();
    match table.target(target) {
        Some(action) => {
            let operation = target.rsplit('.').next().unwrap_or(target).to_string();
            Attempt::Resolved(action, WireProtocol::Json, operation, PathParams::new())
        }
        None => Attempt::Fatal(DetectionError::UnknownTarget(target.to_string())),
    }
}

fn detect_path(table: &RouteTable, envelope: &RequestEnvelope) -> Attempt {
    match table.match_path(envelope) {
        PathMatch::Found(route, params) => Attempt::Resolved(
            route.action,
            table.path_protocol(),
            route.action.name().to_string(),
            params,
        ),
        PathMatch::MethodMismatch => Attempt::Refined(DetectionError::UnsupportedMethod {
            method: envelope.method(),
            path: envelope.path().to_string(),
        }),
        PathMatch::None => Attempt::NotApplicable,
    }
}

fn detect_body(table: &RouteTable, envelope: &RequestEnvelope) -> Attempt {
    if !table.has_body_actions() || envelope.body().is_empty() {
        return Attempt::NotApplicable;
    }
    let (name, protocol) = if envelope.is_form() {
        let form = envelope.form();
        match form.into_iter().find(|(k, _)| k == "Action") {
            Some((_, v)) => (v, WireProtocol::Query),
            None => return Attempt::NotApplicable,
        }
    } else if envelope.body().trim_ascii_start().starts_with(b"{") {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(envelope.body()) else {
            return Attempt::NotApplicable;
        };
        match value.get("Action").and_then(|a| a.as_str()) {
            Some(name) => (name.to_string(), WireProtocol::Json),
            None => return Attempt::NotApplicable,
        }
    } else {
        return Attempt::NotApplicable;
    };

    match table.body_action(&name) {
        Some(action) => Attempt::Resolved(action, protocol, name, PathParams::new()),
        None => Attempt::Refined(DetectionError::UnknownAction(name)),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::envelope::Method;

    fn env(
        dialect: Dialect,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &[(&str, &str)],
        body: &str,
    ) -> RequestEnvelope {
        RequestEnvelope::new(
            dialect,
            method,
            path,
            query,
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
            Bytes::from(body.to_string()),
        )
    }

    fn detector() -> Detector {
        Detector::new(&DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_header_short_circuits_path() {
        let d = detector();
        let op = d
            .detect(&env(
                Dialect::Aws,
                Method::Post,
                "/",
                None,
                &[("X-Amz-Target", "DynamoDB_20120810.CreateTable")],
                "{}",
            ))
            .unwrap();
        assert_eq!(op.action, Action::CreateTable);
        assert_eq!(op.strategy, Strategy::Header);
        assert_eq!(op.protocol, WireProtocol::Json);
        assert_eq!(op.operation, "CreateTable");
    }

    #[test]
    fn test_unknown_target_is_fatal() {
        let err = detector()
            .detect(&env(
                Dialect::Aws,
                Method::Post,
                "/",
                None,
                &[("x-amz-target", "DynamoDB_20120810.TransactWriteItems")],
                "{}",
            ))
            .unwrap_err();
        assert_eq!(
            err,
            DetectionError::UnknownTarget("DynamoDB_20120810.TransactWriteItems".into())
        );
        assert_eq!(err.requested_operation(), Some("TransactWriteItems"));
    }

    #[test]
    fn test_path_match_binds_params() {
        let op = detector()
            .detect(&env(
                Dialect::Aws,
                Method::Put,
                "/b1/a.txt",
                None,
                &[],
                "hello",
            ))
            .unwrap();
        assert_eq!(op.action, Action::PutObject);
        assert_eq!(op.param("bucket"), Some("b1"));
        assert_eq!(op.param("key"), Some("a.txt"));
        assert_eq!(op.protocol, WireProtocol::RestXml);
    }

    #[test]
    fn test_s3_subresource_queries_select_operation() {
        let d = detector();
        let cases = [
            (Method::Post, "/b1/big.bin", Some("uploads"), Action::CreateMultipartUpload),
            (Method::Put, "/b1/big.bin", Some("partNumber=2&uploadId=u1"), Action::UploadPart),
            (Method::Post, "/b1/big.bin", Some("uploadId=u1"), Action::CompleteMultipartUpload),
            (Method::Delete, "/b1/big.bin", Some("uploadId=u1"), Action::AbortMultipartUpload),
            (Method::Delete, "/b1/big.bin", None, Action::DeleteObject),
            (Method::Put, "/b1", Some("versioning"), Action::PutBucketVersioning),
            (Method::Get, "/b1", Some("versioning"), Action::GetBucketVersioning),
            (Method::Get, "/b1", Some("prefix=a"), Action::ListObjects),
        ];
        for (method, path, query, action) in cases {
            let op = d.detect(&env(Dialect::Aws, method, path, query, &[], "")).unwrap();
            assert_eq!(op.action, action, "{method} {path}?{query:?}");
            assert_eq!(op.param("bucket"), Some("b1"));
        }
    }

    #[test]
    fn test_query_body_resolves_ec2() {
        let op = detector()
            .detect(&env(
                Dialect::Aws,
                Method::Post,
                "/",
                None,
                &[("content-type", "application/x-www-form-urlencoded")],
                "Action=RunInstances&ImageId=ami-1&MinCount=1&MaxCount=1",
            ))
            .unwrap();
        assert_eq!(op.action, Action::CreateWorkload);
        assert_eq!(op.strategy, Strategy::Body);
        assert_eq!(op.protocol, WireProtocol::Query);
        assert_eq!(op.operation, "RunInstances");
    }

    #[test]
    fn test_unknown_body_action() {
        let err = detector()
            .detect(&env(
                Dialect::Aws,
                Method::Post,
                "/",
                None,
                &[("content-type", "application/x-www-form-urlencoded")],
                "Action=CreateVpc",
            ))
            .unwrap_err();
        assert_eq!(err, DetectionError::UnknownAction("CreateVpc".into()));
    }

    #[test]
    fn test_unsupported_method_refinement() {
        let err = detector()
            .detect(&env(Dialect::Aws, Method::Patch, "/b1", None, &[], ""))
            .unwrap_err();
        assert!(matches!(err, DetectionError::UnsupportedMethod { .. }));
    }

    #[test]
    fn test_unknown_path() {
        let err = detector()
            .detect(&env(Dialect::Gcp, Method::Get, "/nothing/here", None, &[], ""))
            .unwrap_err();
        assert!(matches!(err, DetectionError::UnknownOperation { .. }));
    }

    #[test]
    fn test_query_guard_selects_route() {
        let d = detector();
        let media = d
            .detect(&env(
                Dialect::Gcp,
                Method::Get,
                "/storage/v1/b/b1/o/a.txt",
                Some("alt=media"),
                &[],
                "",
            ))
            .unwrap();
        assert_eq!(media.action, Action::GetObject);

        let meta = d
            .detect(&env(
                Dialect::Gcp,
                Method::Get,
                "/storage/v1/b/b1/o/a.txt",
                None,
                &[],
                "",
            ))
            .unwrap();
        assert_eq!(meta.action, Action::HeadObject);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let d = detector();
        let e = env(
            Dialect::Oracle,
            Method::Get,
            "/n/ns/b/bucket/o/dir/obj",
            None,
            &[],
            "",
        );
        let first = d.detect(&e).unwrap();
        for _ in 0..10 {
            assert_eq!(d.detect(&e).unwrap(), first);
        }
        assert_eq!(first.action, Action::GetObject);
        assert_eq!(first.param("object"), Some("dir/obj"));
    }

    #[test]
    fn test_configured_order_puts_body_first() {
        let config = DetectorConfig {
            aws: vec![Strategy::Body, Strategy::Path],
            ..DetectorConfig::default()
        };
        let d = Detector::new(&config).unwrap();
        // With the header strategy removed, the target header is ignored.
        let op = d
            .detect(&env(
                Dialect::Aws,
                Method::Post,
                "/",
                None,
                &[
                    ("x-amz-target", "Nope.Nothing"),
                    ("content-type", "application/x-www-form-urlencoded"),
                ],
                "Action=ListQueues",
            ))
            .unwrap();
        assert_eq!(op.action, Action::ListQueues);
    }

    #[test]
    fn test_invalid_order_rejected() {
        let config = DetectorConfig {
            gcp: vec![Strategy::Path, Strategy::Path],
            ..DetectorConfig::default()
        };
        assert!(matches!(
            Detector::new(&config).err().unwrap(),
            TableError::InvalidOrder { .. }
        ));

        let config = DetectorConfig {
            oracle: vec![],
            ..DetectorConfig::default()
        };
        assert!(Detector::new(&config).is_err());
    }
}
