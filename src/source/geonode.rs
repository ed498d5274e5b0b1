//! Geonode-style proxy list source
//!
//! Fetches a JSON document of the form `{"data": [{ip, port, protocols,
//! country, latency, ...}]}` and filters it down to usable candidates.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::ProxySource;
use crate::config::{FilterConfig, SourceConfig};
use crate::error::{EgretError, Result};
use crate::models::{ProxyProtocol, ProxyRecord};

pub struct GeonodeSource {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    ip: String,
    port: String,
    protocols: Vec<String>,
    country: String,
    #[serde(default)]
    latency: f64,
    #[serde(rename = "lastChecked", default)]
    last_checked: Option<i64>,
}

impl GeonodeSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout))
            .user_agent(concat!("egret/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EgretError::PoolFetch(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl ProxySource for GeonodeSource {
    #[instrument(skip(self, filter))]
    async fn fetch(&self, filter: &FilterConfig) -> Result<Vec<ProxyRecord>> {
        debug!("Fetching proxy list from {}", self.api_url);

        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| EgretError::PoolFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EgretError::PoolFetch(format!(
                "list endpoint returned {}",
                response.status()
            )));
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| EgretError::PoolFetch(format!("list decode failed: {}", e)))?;

        let records = filter_entries(body.data, filter);
        info!("Fetched {} candidates after filtering", records.len());
        Ok(records)
    }
}

/// Apply the latency ceiling, country allow-list and protocol preference
fn filter_entries(entries: Vec<ListEntry>, filter: &FilterConfig) -> Vec<ProxyRecord> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let latency_ms = entry.latency.max(0.0).round() as u64;
            if latency_ms > filter.max_latency_ms {
                return None;
            }
            if !filter.countries.is_empty() && !filter.countries.contains(&entry.country) {
                return None;
            }

            // First preferred protocol the candidate advertises wins
            let advertised: Vec<ProxyProtocol> = entry
                .protocols
                .iter()
                .filter_map(|p| ProxyProtocol::from_str(p))
                .collect();
            let protocol = filter
                .protocol_preference
                .iter()
                .find(|p| advertised.contains(p))
                .copied()?;

            let port = entry.port.parse::<u16>().ok()?;

            Some(ProxyRecord {
                host: entry.ip,
                port,
                protocol,
                country: entry.country,
                latency_ms,
                last_checked: entry
                    .last_checked
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
                favorite: false,
            })
        })
        .collect()
}
