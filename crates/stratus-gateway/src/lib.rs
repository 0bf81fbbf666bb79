//! HTTP ingress for Stratus.
//!
//! One axum listener per provider family, each bound to a [`Dialect`]:
//!
//! - AWS (default `:4566`) — S3 REST/XML, DynamoDB / SQS / Price List JSON,
//!   EC2 and SQS Query
//! - GCP (default `:4567`) — Cloud Storage, Firestore, Pub/Sub, Compute
//!   Engine, Cloud Billing catalog
//! - Oracle (default `:4568`) — Object Storage, NoSQL, Queue, Compute,
//!   metering prices
//!
//! Every listener also answers `GET /_stratus/health`. Everything else is
//! turned into a [`RequestEnvelope`] and handed to the [`Dispatcher`],
//! which never lets an unrecognised request become a bare 500.

mod codec;
mod dispatcher;
mod error;
mod response;
mod xml;


use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use stratus_protocol::{Method, RequestEnvelope};
use stratus_services::ServiceError;
use stratus_types::Dialect;
use tracing::warn;

pub use codec::{Codec, for_dialect};
pub use dispatcher::{Dispatcher, READ_ATTEMPTS, READ_BACKOFF};
pub use error::GatewayError;
pub use response::WireResponse;

/// Path of the per-listener health check.
pub const HEALTH_PATH: &str = "/_stratus/health";

/// Extra room over the object limit for multipart framing and metadata.
const BODY_HEADROOM: usize = 64 * 1024;

#[derive(Clone)]
struct ListenerState {
    dialect: Dialect,
    dispatcher: Arc<Dispatcher>,
    body_limit: usize,
}

/// Builds and serves the per-dialect listeners around one [`Dispatcher`].
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    body_limit: usize,
}

impl Gateway {
    /// `max_object_bytes` caps request bodies on every listener.
    pub fn new(dispatcher: Arc<Dispatcher>, max_object_bytes: u64) -> Self {
        let body_limit = usize::try_from(max_object_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(BODY_HEADROOM);
        Self {
            dispatcher,
            body_limit,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The [`Router`] for one listener (useful for testing with `tower::ServiceExt`).
    pub fn router(&self, dialect: Dialect) -> Router {
        let state = ListenerState {
            dialect,
            dispatcher: Arc::clone(&self.dispatcher),
            body_limit: self.body_limit,
        };
        Router::new()
            .route(HEALTH_PATH, get(health))
            .fallback(handle)
            .layer(DefaultBodyLimit::max(self.body_limit))
            .with_state(state)
    }

    /// Serve one dialect on `addr` until `shutdown` completes.
    ///
    /// When `shutdown` completes, the listener stops accepting new
    /// connections and waits for in-flight requests to finish.
    pub async fn serve_with_shutdown(
        &self,
        dialect: Dialect,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, %dialect, "listener started");
        axum::serve(listener, self.router(dialect))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn health(State(state): State<ListenerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "dialect": state.dialect.as_str(),
    }))
}

/// Fallback handler: every non-health request goes through the dispatcher.
async fn handle(State(state): State<ListenerState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let method = Method::parse(parts.method.as_str());
    let path = parts.uri.path().to_string();
    let query = parts.uri.query();

    let body = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, path = %path, "request body rejected");
            let envelope =
                RequestEnvelope::new(state.dialect, method, path, query, headers, Default::default());
            let error = GatewayError::Service(ServiceError::Validation(format!(
                "request body unreadable or larger than {} bytes",
                state.body_limit - BODY_HEADROOM.min(state.body_limit)
            )));
            return for_dialect(state.dialect)
                .error(None, &envelope, &codec::new_request_id(), &error)
                .into_response();
        }
    };

    let envelope = RequestEnvelope::new(state.dialect, method, path, query, headers, body);
    state.dispatcher.dispatch(envelope).await.into_response()
}
