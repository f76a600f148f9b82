//! reports.build_activity — per-build record owned by the build system.
//!
//! This service only appends report links to an existing activity; it never
//! creates, deletes, or rewrites one.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::artifact_index::ReportLink;
use crate::schema::build_activities;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildActivityKey {
    pub org: String,
    pub app: String,
    pub branch: String,
    pub build_number: String,
}

impl BuildActivityKey {
    pub fn new(
        org: impl Into<String>,
        app: impl Into<String>,
        branch: impl Into<String>,
        build_number: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            app: app.into(),
            branch: branch.into(),
            build_number: build_number.into(),
        }
    }
}

impl std::fmt::Display for BuildActivityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.org, self.app, self.branch, self.build_number
        )
    }
}

/// The annotation this service manages on a build activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildActivity {
    pub reports: Vec<ReportLink>,
}

impl BuildActivity {
    /// Append a report line. An identical line is not repeated; nothing is
    /// ever removed. Returns `false` when the line was already present.
    pub fn annotate(&mut self, filename: &str, url: &str) -> bool {
        let present = self
            .reports
            .iter()
            .any(|link| link.filename == filename && link.url == url);
        if present {
            return false;
        }
        self.reports.push(ReportLink::new(filename, url));
        true
    }

    pub fn reports_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.reports).unwrap_or_default()
    }

    pub fn from_reports_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            reports: serde_json::from_value(value)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = build_activities)]
pub struct BuildActivityRow {
    pub org: String,
    pub app: String,
    pub branch: String,
    pub build_number: String,
    pub revision: i64,
    pub report_links: serde_json::Value,
    pub write_date: Option<DateTime<Utc>>,
}
