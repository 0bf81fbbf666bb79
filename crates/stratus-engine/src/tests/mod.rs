//! Tests for the stratus-engine crate.

mod helpers;

mod blobs;
mod lifecycle;
