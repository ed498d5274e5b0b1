//! The proxy pool lifecycle engine
//!
//! Owns all mutable state behind one lock and funnels every activation
//! through a single gate, so rotation and failover can never commit
//! concurrently. External readers get snapshots, never references.

pub mod activator;
pub mod prober;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod transport;
pub mod uptime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::config::FilterConfig;
use crate::engine::activator::Activator;
use crate::engine::prober::{ProbeOutcome, Prober};
use crate::engine::selector::{Selector, SelectorConfig};
use crate::engine::state::EngineState;
use crate::engine::uptime::UptimeLedger;
use crate::hooks::ActivationHook;
use crate::models::{
    ActivationEvent, ActiveProxy, FavoriteEntry, FavoritesSet, ProxyKey, ProxyRecord, Snapshot,
    TrafficStats,
};
use crate::notify::NotificationSink;
use crate::source::ProxySource;

/// Engine tunables distilled from the application configuration
#[derive(Clone)]
pub struct EngineConfig {
    pub filter: FilterConfig,
    pub max_attempts: usize,
    pub probe_timeout: Duration,
    pub max_history: usize,
    pub notifications: bool,
    /// Snapshot written through on every activation when set
    pub state_path: Option<PathBuf>,
}

pub struct Engine {
    state: Arc<EngineState>,
    selector: Selector,
    activator: Activator,
    prober: Arc<dyn Prober>,
    source: Arc<dyn ProxySource>,
    filter: FilterConfig,
    probe_timeout: Duration,
    /// At most one in-flight activation at a time
    activation_gate: Mutex<()>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ProxySource>,
        prober: Arc<dyn Prober>,
        hooks: Vec<Box<dyn ActivationHook>>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let state = Arc::new(EngineState::new(config.max_history));
        Self::assemble(state, config, source, prober, hooks, notifier)
    }

    /// Standard wiring: an HTTP prober that feeds the engine's traffic
    /// counters with every successful probe payload.
    pub fn with_http_prober(
        config: EngineConfig,
        probe: crate::config::ProbeConfig,
        source: Arc<dyn ProxySource>,
        hooks: Vec<Box<dyn ActivationHook>>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let state = Arc::new(EngineState::new(config.max_history));
        let prober = Arc::new(crate::engine::prober::HttpProber::new(
            probe,
            state.traffic_handle(),
        ));
        Self::assemble(state, config, source, prober, hooks, notifier)
    }

    fn assemble(
        state: Arc<EngineState>,
        config: EngineConfig,
        source: Arc<dyn ProxySource>,
        prober: Arc<dyn Prober>,
        hooks: Vec<Box<dyn ActivationHook>>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let selector = Selector::new(
            state.clone(),
            source.clone(),
            prober.clone(),
            SelectorConfig {
                max_attempts: config.max_attempts,
                probe_timeout: config.probe_timeout,
                filter: config.filter.clone(),
            },
        );

        let activator = Activator::new(
            state.clone(),
            hooks,
            notifier,
            config.notifications,
            config.state_path,
        );

        Arc::new(Self {
            state,
            selector,
            activator,
            prober,
            source,
            filter: config.filter,
            probe_timeout: config.probe_timeout,
            activation_gate: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// Fetch a fresh candidate pool, replacing the old one wholesale
    #[instrument(skip(self))]
    pub async fn refresh_pool(&self) -> crate::error::Result<usize> {
        let fetched = self.source.fetch(&self.filter).await?;
        let count = fetched.len();
        self.state.replace_pool(fetched);
        info!("Pool replaced with {} candidates", count);
        Ok(count)
    }

    /// One full rotation: select a working proxy and activate it
    ///
    /// Serialized behind the activation gate; a concurrent trigger waits
    /// and then operates on the already-updated state.
    pub async fn rotate_once(&self) -> Option<ActiveProxy> {
        let _gate = self.activation_gate.lock().await;

        let (record, success) = self.selector.find_working().await?;
        match self.activator.activate(record, success).await {
            Ok(active) => Some(active),
            Err(e) => {
                error!("Activation failed: {}", e);
                None
            }
        }
    }

    /// Probe the current proxy, if any
    ///
    /// Used by the failover and uptime loops; the probe runs without any
    /// lock held.
    pub async fn check_current(&self) -> Option<ProbeOutcome> {
        let active = self.state.current()?;
        Some(self.prober.probe(&active.record, self.probe_timeout).await)
    }

    /// One uptime accrual tick
    pub async fn uptime_tick(&self, tick_secs: u64) {
        let Some(active) = self.state.current() else {
            return;
        };
        let key = active.key();
        self.state.ensure_uptime(key.clone());

        let outcome = self.prober.probe(&active.record, self.probe_timeout).await;
        if !outcome.is_working() {
            self.state.add_downtime(&key, tick_secs);
        }
    }

    /// Drop the current proxy without touching the pool or history
    pub fn clear_current(&self) -> Option<ActiveProxy> {
        self.state.clear_current()
    }

    // --- reporting surface (read-only snapshots) ---

    pub fn current(&self) -> Option<ActiveProxy> {
        self.state.current()
    }

    pub fn history(&self) -> Vec<ActivationEvent> {
        self.state.history()
    }

    pub fn uptime_ledger(&self) -> UptimeLedger {
        UptimeLedger::new(self.state.clone())
    }

    pub fn traffic(&self) -> TrafficStats {
        self.state.traffic().stats()
    }

    pub fn pool(&self) -> Vec<ProxyRecord> {
        self.state.pool()
    }

    pub fn pool_len(&self) -> usize {
        self.state.pool_len()
    }

    // --- favorites ---

    pub fn favorites(&self) -> FavoritesSet {
        self.state.favorites()
    }

    pub fn set_favorites(&self, favorites: FavoritesSet) {
        self.state.set_favorites(favorites);
    }

    pub fn add_favorite(&self, entry: FavoriteEntry) -> bool {
        self.state.add_favorite(entry)
    }

    pub fn remove_favorite(&self, key: &ProxyKey) -> bool {
        self.state.remove_favorite(key)
    }

    pub fn clear_favorites(&self) {
        self.state.clear_favorites()
    }

    // --- persistence surface ---

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn restore(&self, snapshot: Snapshot) {
        self.state.restore(snapshot);
    }
}
