//! Shared engine state
//!
//! All mutations of the current proxy, the history log and the uptime map
//! go through the single lock held here. Probing never happens under it;
//! callers probe first and take the lock only to commit the result.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::models::{
    ActivationEvent, ActiveProxy, FavoriteEntry, FavoritesSet, HistoryLog, ProxyKey, ProxyRecord,
    Snapshot, TrafficStats, UptimeRecord,
};

/// Bytes moved by probes, shared with the prober
#[derive(Debug, Default)]
pub struct TrafficCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TrafficCounters {
    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TrafficStats {
        TrafficStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    fn set(&self, stats: TrafficStats) {
        self.sent.store(stats.sent, Ordering::Relaxed);
        self.received.store(stats.received, Ordering::Relaxed);
    }
}

struct StateInner {
    current: Option<ActiveProxy>,
    pool: Vec<ProxyRecord>,
    favorites: FavoritesSet,
    history: HistoryLog,
    uptime: HashMap<ProxyKey, UptimeRecord>,
    blacklist: HashSet<ProxyKey>,
}

pub struct EngineState {
    inner: RwLock<StateInner>,
    traffic: Arc<TrafficCounters>,
}

impl EngineState {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                current: None,
                pool: Vec::new(),
                favorites: FavoritesSet::new(),
                history: HistoryLog::new(history_cap),
                uptime: HashMap::new(),
                blacklist: HashSet::new(),
            }),
            traffic: Arc::new(TrafficCounters::default()),
        }
    }

    pub fn traffic(&self) -> &TrafficCounters {
        &self.traffic
    }

    /// Shared handle for the prober, which feeds the counters
    pub fn traffic_handle(&self) -> Arc<TrafficCounters> {
        self.traffic.clone()
    }

    // --- pool ---

    /// Replace the pool wholesale, re-applying the favorite overlay
    pub fn replace_pool(&self, mut pool: Vec<ProxyRecord>) {
        let mut inner = self.inner.write();
        let favorite_keys = inner.favorites.keys();
        for record in &mut pool {
            record.favorite = favorite_keys.contains(&record.key());
        }
        inner.pool = pool;
    }

    /// Pool members eligible for selection (blacklist overlay applied)
    pub fn pool_view(&self) -> Vec<ProxyRecord> {
        let inner = self.inner.read();
        inner
            .pool
            .iter()
            .filter(|r| !inner.blacklist.contains(&r.key()))
            .cloned()
            .collect()
    }

    pub fn pool_len(&self) -> usize {
        self.inner.read().pool.len()
    }

    pub fn pool(&self) -> Vec<ProxyRecord> {
        self.inner.read().pool.clone()
    }

    // --- current proxy + history ---

    pub fn current(&self) -> Option<ActiveProxy> {
        self.inner.read().current.clone()
    }

    /// Commit an activation: set current and prepend its history entry.
    /// Returns the previous current proxy for rollback.
    pub fn commit_activation(&self, active: ActiveProxy) -> Option<ActiveProxy> {
        let mut inner = self.inner.write();
        let event = ActivationEvent::from(&active);
        inner.history.push(event);
        inner.current.replace(active)
    }

    /// Undo the most recent commit after a failed state write
    pub fn rollback_activation(&self, previous: Option<ActiveProxy>) {
        let mut inner = self.inner.write();
        inner.history.pop_newest();
        inner.current = previous;
    }

    pub fn clear_current(&self) -> Option<ActiveProxy> {
        self.inner.write().current.take()
    }

    pub fn history(&self) -> Vec<ActivationEvent> {
        self.inner.read().history.to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }

    // --- favorites ---

    pub fn set_favorites(&self, favorites: FavoritesSet) {
        let mut inner = self.inner.write();
        inner.favorites = favorites;
        let keys = inner.favorites.keys();
        for record in &mut inner.pool {
            record.favorite = keys.contains(&record.key());
        }
    }

    pub fn favorites(&self) -> FavoritesSet {
        self.inner.read().favorites.clone()
    }

    pub fn favorite_keys(&self) -> HashSet<ProxyKey> {
        self.inner.read().favorites.keys()
    }

    pub fn add_favorite(&self, entry: FavoriteEntry) -> bool {
        let mut inner = self.inner.write();
        let key = entry.key();
        let added = inner.favorites.add(entry);
        if added {
            for record in &mut inner.pool {
                if record.key() == key {
                    record.favorite = true;
                }
            }
        }
        added
    }

    pub fn remove_favorite(&self, key: &ProxyKey) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.favorites.remove(key);
        if removed {
            for record in &mut inner.pool {
                if record.key() == *key {
                    record.favorite = false;
                }
            }
        }
        removed
    }

    pub fn clear_favorites(&self) {
        let mut inner = self.inner.write();
        inner.favorites.clear();
        for record in &mut inner.pool {
            record.favorite = false;
        }
    }

    // --- uptime ---

    /// Create the record on first sight of this key; no-op afterwards
    pub fn ensure_uptime(&self, key: ProxyKey) {
        let mut inner = self.inner.write();
        inner
            .uptime
            .entry(key)
            .or_insert_with(|| UptimeRecord::started(Utc::now()));
    }

    pub fn add_downtime(&self, key: &ProxyKey, secs: u64) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.uptime.get_mut(key) {
            record.add_downtime(secs);
        }
    }

    pub fn uptime_records(&self) -> Vec<(ProxyKey, UptimeRecord)> {
        self.inner
            .read()
            .uptime
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // --- snapshots ---

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        self.snapshot_of(&inner)
    }

    /// Snapshot as it would look after committing `active`, without
    /// mutating anything. Used for the write-ahead state commit.
    pub fn prospective_snapshot(&self, active: &ActiveProxy) -> Snapshot {
        let inner = self.inner.read();
        let mut snap = self.snapshot_of(&inner);
        snap.current_proxy = Some(active.clone());
        snap.history_log.insert(0, ActivationEvent::from(active));
        snap.history_log.truncate(inner.history.cap());
        snap
    }

    fn snapshot_of(&self, inner: &StateInner) -> Snapshot {
        Snapshot {
            current_proxy: inner.current.clone(),
            pool: inner.pool.clone(),
            history_log: inner.history.to_vec(),
            uptime_records: inner
                .uptime
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            blacklist: inner.blacklist.iter().cloned().collect(),
            traffic: self.traffic.stats(),
        }
    }

    /// Restore from a snapshot; favorites are persisted separately and
    /// left untouched.
    pub fn restore(&self, snapshot: Snapshot) {
        let typed_uptime = snapshot.typed_uptime();
        let mut inner = self.inner.write();
        let cap = inner.history.cap();
        inner.current = snapshot.current_proxy;
        inner.pool = snapshot.pool;
        inner.history = HistoryLog::from_entries(cap, snapshot.history_log);
        inner.uptime = typed_uptime.into_iter().collect();
        inner.blacklist = snapshot.blacklist.into_iter().collect();
        self.traffic.set(snapshot.traffic);

        let keys = inner.favorites.keys();
        for record in &mut inner.pool {
            record.favorite = keys.contains(&record.key());
        }
    }
}
