//! Centrix test report service.
//!
//! Accepts test report uploads, stores them on disk, indexes JUnit summaries
//! and links every report to its artifact index and build activity.

pub mod config;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
