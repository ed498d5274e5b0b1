use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::history::ActivationEvent;
use super::proxy::{ActiveProxy, ProxyKey, ProxyRecord};
use super::uptime::UptimeRecord;

/// Byte counters accumulated by probing, for the reporting surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub sent: u64,
    pub received: u64,
}

/// Full engine state for process-restart continuity
///
/// Uptime records are keyed by the "host:port" form so the wire format
/// stays a plain JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub current_proxy: Option<ActiveProxy>,
    pub pool: Vec<ProxyRecord>,
    pub history_log: Vec<ActivationEvent>,
    pub uptime_records: BTreeMap<String, UptimeRecord>,
    #[serde(default)]
    pub blacklist: Vec<ProxyKey>,
    #[serde(default)]
    pub traffic: TrafficStats,
}

impl Snapshot {
    /// Decode the uptime map back to typed keys, skipping unparseable ones
    pub fn typed_uptime(&self) -> Vec<(ProxyKey, UptimeRecord)> {
        self.uptime_records
            .iter()
            .filter_map(|(k, v)| ProxyKey::parse(k).map(|key| (key, v.clone())))
            .collect()
    }
}
