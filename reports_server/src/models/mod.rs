//! Report ingestion data models.

pub mod artifact_index;
pub mod build_activity;
pub mod summary;
pub mod upload;
