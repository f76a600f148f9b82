//! reports.artifact_index — per (org, app) directory of report locations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::report_artifact_indexes;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIndexKey {
    pub org: String,
    pub app: String,
}

impl ArtifactIndexKey {
    pub fn new(org: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            app: app.into(),
        }
    }
}

impl std::fmt::Display for ArtifactIndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-test-reports", self.org, self.app)
    }
}

/// One stored report and where it can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLink {
    pub filename: String,
    pub url: String,
}

impl ReportLink {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
        }
    }
}

/// Version → report links, versions and filenames both kept sorted so that
/// the record is independent of the order merges were applied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactIndex {
    versions: BTreeMap<String, Vec<ReportLink>>,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links recorded under `version`, in filename order.
    pub fn entries(&self, version: &str) -> &[ReportLink] {
        self.versions
            .get(version)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn versions(&self) -> impl Iterator<Item = (&str, &[ReportLink])> {
        self.versions
            .iter()
            .map(|(version, links)| (version.as_str(), links.as_slice()))
    }

    /// Total number of links across all versions.
    pub fn len(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `filename → url` under `version`, replacing the URL of an entry
    /// with the same filename. Returns `false` when nothing changed.
    pub fn upsert(&mut self, version: &str, filename: &str, url: &str) -> bool {
        let links = self.versions.entry(version.to_string()).or_default();
        match links.binary_search_by(|link| link.filename.as_str().cmp(filename)) {
            Ok(pos) if links[pos].url == url => false,
            Ok(pos) => {
                links[pos].url = url.to_string();
                true
            }
            Err(pos) => {
                links.insert(pos, ReportLink::new(filename, url));
                true
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Decode a stored value. Entries written by other tools may be unsorted
    /// or repeat a filename; the last occurrence of a filename wins.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, Vec<ReportLink>> = serde_json::from_value(value)?;
        let mut index = Self::new();
        for (version, links) in raw {
            index.versions.entry(version.clone()).or_default();
            for link in links {
                index.upsert(&version, &link.filename, &link.url);
            }
        }
        Ok(index)
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = report_artifact_indexes)]
pub struct ArtifactIndexRow {
    pub org: String,
    pub app: String,
    pub revision: i64,
    pub versions: serde_json::Value,
    pub write_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = report_artifact_indexes)]
pub struct NewArtifactIndexRow {
    pub org: String,
    pub app: String,
    pub revision: i64,
    pub versions: serde_json::Value,
}
