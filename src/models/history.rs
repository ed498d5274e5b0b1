use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::proxy::{ActiveProxy, ProxyKey, ProxyProtocol};

/// A single committed activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationEvent {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub country: String,
    pub observed_addr: String,
    pub latency_ms: u64,
    pub activated_at: DateTime<Utc>,
}

impl ActivationEvent {
    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }
}

impl From<&ActiveProxy> for ActivationEvent {
    fn from(active: &ActiveProxy) -> Self {
        Self {
            host: active.record.host.clone(),
            port: active.record.port,
            protocol: active.record.protocol,
            country: active.record.country.clone(),
            observed_addr: active.observed_addr.clone(),
            latency_ms: active.latency_ms,
            activated_at: active.activated_at,
        }
    }
}

/// Bounded activation history, newest first
///
/// The cap is enforced on every push; oldest entries fall off the tail.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<ActivationEvent>,
    cap: usize,
}

impl HistoryLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
        }
    }

    /// Prepend an event and evict from the tail past the cap
    pub fn push(&mut self, event: ActivationEvent) {
        self.entries.push_front(event);
        self.entries.truncate(self.cap);
    }

    /// Drop the most recent entry (activation rollback)
    pub fn pop_newest(&mut self) -> Option<ActivationEvent> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Entries newest first
    pub fn entries(&self) -> impl Iterator<Item = &ActivationEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ActivationEvent> {
        self.entries.iter().cloned().collect()
    }

    /// Rebuild from persisted entries (newest first), re-applying the cap
    pub fn from_entries(cap: usize, entries: Vec<ActivationEvent>) -> Self {
        let mut log = Self::new(cap);
        let mut entries = entries;
        entries.truncate(cap);
        log.entries = entries.into();
        log
    }
}
