//! Index sink — best-effort delivery of summary documents to the search index.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::summary::SummaryDocument;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP status: {status}; HTTP Body: {body}")]
    Rejected { status: u16, body: String },

    #[error("index unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Deliver one document. No retry; the caller decides what a failure means.
    async fn send(&self, summary: &SummaryDocument) -> Result<(), DeliveryError>;
}

/// POSTs summaries as JSON to an index-ingest URL.
#[derive(Debug, Clone)]
pub struct HttpIndexSink {
    client: reqwest::Client,
    url: String,
}

impl HttpIndexSink {
    /// An empty `url` disables delivery.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("centrix-reports")
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn send(&self, summary: &SummaryDocument) -> Result<(), DeliveryError> {
        if self.url.is_empty() {
            tracing::debug!("Index URL not set, skipping summary delivery");
            return Ok(());
        }

        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(summary)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %self.url, status = status.as_u16(), "Summary delivered");
        Ok(())
    }
}
