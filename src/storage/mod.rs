//! Bucket and object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where buckets
//! live.  [`gcs::GcsBackend`] talks to the GCS JSON API;
//! [`memory::MemoryBackend`] keeps everything in process.

pub mod backend;
pub mod gcs;
pub mod memory;
