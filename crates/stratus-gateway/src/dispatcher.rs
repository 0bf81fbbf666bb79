//! Request pipeline: detect, scope, decode, replay, execute, shape.
//!
//! The dispatcher owns no state of its own. Storage is reached only
//! through [`Services`]; wire shapes only through the dialect [`Codec`].

use std::sync::Arc;
use std::time::Duration;

use stratus_protocol::{Detector, RequestEnvelope, ResolvedOperation};
use stratus_services::{RecordedReply, RequestContext, ServiceError, ServiceRequest, Services};
use tracing::{debug, info, warn};

use crate::codec::{self, Codec};
use crate::error::GatewayError;
use crate::response::WireResponse;

/// Default attempts a read-only request gets when storage is unavailable.
pub const READ_ATTEMPTS: u32 = 3;

/// Base delay between read attempts; attempt `n` waits `n` times this.
pub const READ_BACKOFF: Duration = Duration::from_millis(50);

/// Turns request envelopes into wire responses.
pub struct Dispatcher {
    detector: Detector,
    services: Arc<Services>,
    read_attempts: u32,
}

impl Dispatcher {
    pub fn new(detector: Detector, services: Arc<Services>) -> Self {
        Self {
            detector,
            services,
            read_attempts: READ_ATTEMPTS,
        }
    }

    /// Override how many times a read is tried; at least once.
    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Handle one request. Every failure becomes the dialect's error shape.
    #[tracing::instrument(
        skip_all,
        fields(dialect = %envelope.dialect(), method = %envelope.method(), path = envelope.path())
    )]
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> WireResponse {
        let codec = codec::for_dialect(envelope.dialect());
        let request_id = codec::new_request_id();

        let op = match self.detector.detect(&envelope) {
            Ok(op) => op,
            Err(e) => {
                debug!(error = %e, "request not recognised");
                return codec.error(None, &envelope, &request_id, &e.into());
            }
        };

        let envelope = Arc::new(envelope);
        match self.run(codec, &op, &envelope, request_id.clone()).await {
            Ok(response) => {
                debug!(action = %op.action, status = response.status.as_u16(), "request served");
                response
            }
            Err(e) => {
                let error = GatewayError::from(e);
                if error.is_client_error() {
                    debug!(action = %op.action, error = %error, "request rejected");
                } else {
                    warn!(action = %op.action, error = %error, "request failed");
                }
                codec.error(Some(&op), &envelope, &request_id, &error)
            }
        }
    }

    async fn run(
        &self,
        codec: &'static dyn Codec,
        op: &ResolvedOperation,
        envelope: &Arc<RequestEnvelope>,
        request_id: String,
    ) -> Result<WireResponse, ServiceError> {
        let credential = codec.credential(op, envelope);
        let scope = self.services.resolve_scope(credential.as_deref()).await?;
        let request = codec.decode(op, envelope)?;
        let ctx = RequestContext::new(codec.dialect(), scope, request_id);

        let token = if op.action.idempotent_by_key() {
            codec.idempotency_token(op, envelope)
        } else {
            None
        };
        // The claim is held from lookup until the reply is recorded, so
        // concurrent retries of one token wait and then replay.
        let mut claim = None;
        if let Some(token) = &token {
            claim = Some(self.services.ledger().claim(&ctx.scope, token).await?);
            if let Some(reply) = self
                .services
                .ledger()
                .lookup(&ctx.scope, token, op.action)
                .await?
            {
                info!(action = %op.action, scope = %ctx.scope, "replaying recorded reply");
                return Ok(reply.into());
            }
        }

        if op.action.is_read_only() {
            let outcome = self.execute_read(&ctx, request).await?;
            return codec.encode(op, envelope, &ctx, outcome);
        }

        // Mutations run detached so a dropped connection cannot cut one
        // short; the reply is simply discarded.
        let services = Arc::clone(&self.services);
        let op = op.clone();
        let envelope = Arc::clone(envelope);
        tokio::spawn(async move {
            let _claim = claim;
            let outcome = services.execute(&ctx, request).await?;
            let response = codec.encode(&op, &envelope, &ctx, outcome)?;
            match token {
                Some(token) => {
                    let recorded = services
                        .ledger()
                        .record(&ctx.scope, &token, op.action, RecordedReply::from(response))
                        .await?;
                    Ok(WireResponse::from(recorded))
                }
                None => Ok(response),
            }
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("mutation task failed: {e}")))?
    }

    async fn execute_read(
        &self,
        ctx: &RequestContext,
        request: ServiceRequest,
    ) -> Result<stratus_services::Outcome, ServiceError> {
        let mut attempt = 1;
        loop {
            match self.services.execute(ctx, request.clone()).await {
                Err(e) if e.is_unavailable() && attempt < self.read_attempts => {
                    warn!(attempt, error = %e, "storage unavailable, retrying read");
                    tokio::time::sleep(READ_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
