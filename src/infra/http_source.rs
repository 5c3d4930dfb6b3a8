use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::app::ports::{SourcePayload, SourcePort};
use crate::error::SourceError;
use crate::observability::metrics;

/// Fetches a payload snapshot over HTTP
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    origin: String,
}

impl HttpSource {
    pub fn new(url: &str, origin: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("healthai_etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Unreadable {
                origin: origin.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.to_string(),
            origin: origin.to_string(),
        })
    }

    fn unreadable(&self, detail: impl Into<String>) -> SourceError {
        SourceError::Unreadable {
            origin: self.origin.clone(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl SourcePort for HttpSource {
    async fn read(&self) -> Result<SourcePayload, SourceError> {
        let started = Instant::now();
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.unreadable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("GET {} returned {}", self.url, status);
            return Err(self.unreadable(format!("HTTP {}", status)));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.unreadable(e.to_string()))?
            .to_vec();
        metrics::sources::fetch_duration(started.elapsed().as_secs_f64());
        debug!(url = %self.url, bytes = bytes.len(), "Fetched snapshot");

        if bytes.is_empty() {
            return Err(SourceError::Empty {
                origin: self.origin.clone(),
            });
        }
        Ok(SourcePayload {
            bytes,
            fetched_at: Utc::now(),
        })
    }

    fn describe(&self) -> String {
        format!("url {}", self.url)
    }
}
