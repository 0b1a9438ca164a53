//! storage-service library: Google Cloud Storage helpers for one
//! service account.
//!
//! [`ServiceAccountStorage`] loads a service-account key, authenticates
//! against the GCS JSON API and exposes bucket get/create/get-or-create,
//! object upload/download/delete/list, and V4 signed URL generation.
//! The HTTP layer sits behind [`storage::backend::StorageBackend`], with an
//! in-memory implementation for tests and offline use.

pub mod config;
pub mod credentials;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod naming;
pub mod service;
pub mod signing;
pub mod storage;
pub mod token;

pub use config::Config;
pub use errors::{Result, StorageError};
pub use service::ServiceAccountStorage;
