//! Report ingestion services.

pub mod artifact_store;
pub mod index_sink;
pub mod ingest_service;
pub mod location;
pub mod memory_store;
pub mod metadata_service;
pub mod metadata_store;
pub mod pg_store;
pub mod transcoder;
