//! Provider directory lookup.
//!
//! The directory only enriches the discovery candidate set. Raw URLs are returned as published
//! (plain, onion and list variants); sanitization is the orchestrator's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

/// Source of extra endpoint candidates. Failures yield an empty list.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn endpoints(&self) -> Vec<String>;
}

#[derive(Debug, Default, Deserialize)]
struct ProviderRecord {
    endpoint_url: Option<String>,
    endpoint_urls: Option<Vec<String>>,
    http_url: Option<String>,
    onion_url: Option<String>,
    onion_urls: Option<Vec<String>>,
}

impl ProviderRecord {
    fn urls(self) -> impl Iterator<Item = String> {
        self.endpoint_url
            .into_iter()
            .chain(self.endpoint_urls.unwrap_or_default())
            .chain(self.http_url)
            .chain(self.onion_url)
            .chain(self.onion_urls.unwrap_or_default())
    }
}

/// Extract every advertised URL from a directory body: `{"providers": [...]}` or a bare array.
/// Records that do not match the provider shape are skipped.
pub fn parse_directory(body: &Value) -> Vec<String> {
    let records = match body {
        Value::Array(arr) => arr.as_slice(),
        other => match other.get("providers").and_then(Value::as_array) {
            Some(arr) => arr.as_slice(),
            None => return Vec::new(),
        },
    };
    records
        .iter()
        .filter_map(|r| serde_json::from_value::<ProviderRecord>(r.clone()).ok())
        .flat_map(ProviderRecord::urls)
        .collect()
}

/// Directory served over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    url: String,
    client: reqwest::Client,
    budget: Duration,
}

impl HttpDirectory {
    pub fn new(url: impl Into<String>, client: reqwest::Client, budget: Duration) -> Self {
        Self {
            url: url.into(),
            client,
            budget,
        }
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("directory request")?
            .error_for_status()
            .context("directory status")?;
        let body: Value = resp.json().await.context("parse directory")?;
        Ok(parse_directory(&body))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn endpoints(&self) -> Vec<String> {
        match timeout(self.budget, self.fetch()).await {
            Ok(Ok(urls)) => {
                tracing::debug!(directory = %self.url, count = urls.len(), "directory fetched");
                urls
            }
            Ok(Err(e)) => {
                tracing::warn!(directory = %self.url, reason = %e, "directory lookup failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(directory = %self.url, "directory lookup timed out");
                Vec::new()
            }
        }
    }
}
