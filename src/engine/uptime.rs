//! Uptime ledger
//!
//! Pure read accessor over the uptime records; all mutation happens in the
//! scheduler's uptime loop.

use std::sync::Arc;

use chrono::Utc;

use crate::engine::state::EngineState;
use crate::models::ProxyKey;

#[derive(Clone)]
pub struct UptimeLedger {
    state: Arc<EngineState>,
}

impl UptimeLedger {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    /// Uptime percentage for one proxy, if it has ever been tracked
    pub fn percentage(&self, key: &ProxyKey) -> Option<f64> {
        let now = Utc::now();
        self.state
            .uptime_records()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, record)| record.percentage(now))
    }

    /// All tracked proxies with their current uptime percentage
    pub fn percentages(&self) -> Vec<(ProxyKey, f64)> {
        let now = Utc::now();
        let mut all: Vec<(ProxyKey, f64)> = self
            .state
            .uptime_records()
            .into_iter()
            .map(|(key, record)| (key, record.percentage(now)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
