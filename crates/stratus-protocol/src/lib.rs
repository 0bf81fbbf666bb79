//! Protocol detection: from a raw request envelope to a canonical operation.
//!
//! Each listener tags its requests with a [`Dialect`](stratus_types::Dialect).
//! The [`Detector`] holds one validated [`RouteTable`] per dialect and tries
//! three strategies in a configurable order:
//!
//! 1. **Header** — `x-amz-target: <Service>.<Operation>` (AWS JSON protocols).
//! 2. **Path** — `(method, template)` pairs such as `PUT /{bucket}/{*key}`.
//! 3. **Body** — `Action=...` in a form body (AWS Query) or an `Action`
//!    field in a JSON body.
//!
//! The result is a [`ResolvedOperation`] naming one [`Action`] from a closed
//! enum, or a [`DetectionError`] that the caller renders as the dialect's
//! "not implemented" response.

mod action;
mod detector;
mod envelope;
mod error;
mod table;
pub mod tables;
mod template;

pub use action::{Action, Service};
pub use detector::{Detector, DetectorConfig, ResolvedOperation, Strategy, TARGET_HEADER};
pub use envelope::{Method, RequestEnvelope};
pub use error::{DetectionError, TableError};
pub use table::{QueryGuard, Route, RouteTable, RouteTableBuilder, WireProtocol};
pub use template::{PathParams, PathTemplate};
