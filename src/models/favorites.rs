use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::proxy::{ProxyKey, ProxyProtocol, ProxyRecord};

/// A proxy promoted by the user, kept across pool rebuilds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub country: String,
    pub added: DateTime<Utc>,
}

impl FavoriteEntry {
    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }
}

impl From<&ProxyRecord> for FavoriteEntry {
    fn from(record: &ProxyRecord) -> Self {
        Self {
            host: record.host.clone(),
            port: record.port,
            protocol: record.protocol,
            country: record.country.clone(),
            added: Utc::now(),
        }
    }
}

/// Favorites keyed by (host, port); duplicate keys are rejected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoritesSet {
    entries: Vec<FavoriteEntry>,
}

impl FavoritesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; returns false if the key is already present
    pub fn add(&mut self, entry: FavoriteEntry) -> bool {
        if self.contains(&entry.key()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove by key; returns true if an entry was removed
    pub fn remove(&mut self, key: &ProxyKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key() != *key);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, key: &ProxyKey) -> bool {
        self.entries.iter().any(|e| e.key() == *key)
    }

    pub fn keys(&self) -> HashSet<ProxyKey> {
        self.entries.iter().map(|e| e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FavoriteEntry] {
        &self.entries
    }
}
