//! Summary document — the normalized shape the index backend accepts.

use serde::{Deserialize, Serialize};

/// Aggregate counters of one JUnit test suite, plus build coordinates.
///
/// Every value is a string and every key is always present; the index
/// rejects documents whose shape varies between reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDocument {
    pub org: String,
    pub app: String,
    pub version: String,
    /// Processing time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub timestamp: String,
    pub testsuite_name: String,
    pub tests: String,
    pub failures: String,
    pub errors: String,
    pub skipped_tests: String,
    pub time: String,
}

/// Timestamp layout used in summary documents.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
