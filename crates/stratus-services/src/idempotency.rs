//! Recorded replies for client idempotency tokens.
//!
//! Each `(scope, token)` pair owns one `idempotency/<scope>/<token>` record.
//! The reply body is a blob under it; status, headers and the action that
//! produced it are attributes. Recording is create-if-absent, so of two
//! concurrent first requests only one reply is kept and both callers see it.
//!
//! Callers that execute the mutation themselves first take a
//! [`TokenClaim`]: while it is held no other request with the same token
//! gets past [`IdempotencyLedger::claim`], so a lookup miss followed by the
//! mutation and [`IdempotencyLedger::record`] happens once per token.

use std::sync::Arc;

use bytes::Bytes;
use stratus_engine::{BlobDraft, LockTable, StorageEngine};
use stratus_protocol::Action;
use stratus_types::{Attributes, ResourceId, ResourceKind, Scope};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::{Resource, ServiceError};
use crate::limits;

const BODY_KEY: &str = "response";
const STATUS: &str = "status";
const ACTION: &str = "action";
const HEADER_PREFIX: &str = "header:";

/// A wire reply as it was first sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Exclusive use of one `(scope, token)` pair until dropped.
#[must_use = "the token is released as soon as the claim is dropped"]
pub struct TokenClaim {
    _guard: OwnedMutexGuard<()>,
}

/// Idempotency ledger.
pub struct IdempotencyLedger {
    engine: Arc<StorageEngine>,
    claims: LockTable,
}

impl IdempotencyLedger {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            claims: LockTable::default(),
        }
    }

    /// Wait until no other request holds `token`, then hold it.
    pub async fn claim(&self, scope: &Scope, token: &str) -> Result<TokenClaim, ServiceError> {
        let id = token_id(scope, token)?;
        Ok(TokenClaim {
            _guard: self.claims.lock(&id).await,
        })
    }

    /// The reply recorded for `token`, if any.
    ///
    /// A token first used for a different action is rejected.
    pub async fn lookup(
        &self,
        scope: &Scope,
        token: &str,
        action: Action,
    ) -> Result<Option<RecordedReply>, ServiceError> {
        let id = token_id(scope, token)?;
        let record = match self.engine.get(&id).await {
            Ok(record) => record,
            Err(stratus_engine::EngineError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        check_action(&record.attributes, token, action)?;
        let (_, body) = self.engine.get_blob(&id, BODY_KEY).await?;
        Ok(Some(reply_from(&record.attributes, body)))
    }

    /// Record `reply` for `token` unless a reply is already recorded, and
    /// return whichever reply is now on file.
    pub async fn record(
        &self,
        scope: &Scope,
        token: &str,
        action: Action,
        reply: RecordedReply,
    ) -> Result<RecordedReply, ServiceError> {
        let id = token_id(scope, token)?;
        let mut attrs = Attributes::from([
            (STATUS.to_string(), reply.status.to_string()),
            (ACTION.to_string(), action.name().to_string()),
        ]);
        for (i, (name, value)) in reply.headers.iter().enumerate() {
            // Index keeps repeated header names distinct and in order.
            attrs.insert(format!("{HEADER_PREFIX}{i:03}:{name}"), value.clone());
        }
        let blob = BlobDraft::new(BODY_KEY, reply.body.clone());
        let (record, created) = self
            .engine
            .create_if_absent(&id, scope, attrs, vec![blob])
            .await?;
        if created {
            debug!(%scope, token, action = %action, "idempotent reply recorded");
            return Ok(reply);
        }
        check_action(&record.attributes, token, action)?;
        let (_, body) = self.engine.get_blob(&id, BODY_KEY).await?;
        Ok(reply_from(&record.attributes, body))
    }
}

fn token_id(scope: &Scope, token: &str) -> Result<ResourceId, ServiceError> {
    limits::validate_key("idempotency token", token)?;
    if token.len() > 255 {
        return Err(ServiceError::validation("idempotency token longer than 255 bytes"));
    }
    Ok(ResourceId::new(
        ResourceKind::Idempotency,
        &format!("{scope}/{token}"),
    ))
}

fn check_action(attrs: &Attributes, token: &str, action: Action) -> Result<(), ServiceError> {
    match attrs.get(ACTION) {
        Some(recorded) if recorded != action.name() => Err(ServiceError::Conflict(format!(
            "idempotency token {token:?} was used for {recorded}"
        ))),
        Some(_) => Ok(()),
        None => Err(ServiceError::not_found(Resource::IdempotencyToken, token)),
    }
}

fn reply_from(attrs: &Attributes, body: Bytes) -> RecordedReply {
    RecordedReply {
        status: attrs
            .get(STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(200),
        headers: attrs
            .iter()
            .filter_map(|(k, v)| {
                let rest = k.strip_prefix(HEADER_PREFIX)?;
                let (_, name) = rest.split_once(':')?;
                Some((name.to_string(), v.clone()))
            })
            .collect(),
        body,
    }
}
