//! Candidate selection
//!
//! Ranks the pool and probes candidates sequentially until one works,
//! bounded by the attempt budget.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use crate::config::FilterConfig;
use crate::engine::prober::{ProbeOutcome, ProbeSuccess, Prober};
use crate::engine::state::EngineState;
use crate::models::ProxyRecord;
use crate::source::ProxySource;

#[derive(Clone)]
pub struct SelectorConfig {
    /// Probe attempt budget per selection round
    pub max_attempts: usize,
    /// Per-probe timeout
    pub probe_timeout: Duration,
    /// Filter passed through to pool re-acquisition
    pub filter: FilterConfig,
}

pub struct Selector {
    state: Arc<EngineState>,
    source: Arc<dyn ProxySource>,
    prober: Arc<dyn Prober>,
    config: SelectorConfig,
}

impl Selector {
    pub fn new(
        state: Arc<EngineState>,
        source: Arc<dyn ProxySource>,
        prober: Arc<dyn Prober>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            state,
            source,
            prober,
            config,
        }
    }

    /// Find the next usable proxy
    ///
    /// Returns `None` when the pool is exhausted; pool exhaustion is not
    /// an error, callers decide whether to re-fetch later.
    #[instrument(skip(self))]
    pub async fn find_working(&self) -> Option<(ProxyRecord, ProbeSuccess)> {
        let mut pool = self.state.pool_view();

        if pool.is_empty() {
            info!("Pool is empty, re-acquiring candidates");
            match self.source.fetch(&self.config.filter).await {
                Ok(fetched) if !fetched.is_empty() => {
                    self.state.replace_pool(fetched);
                    pool = self.state.pool_view();
                }
                Ok(_) => {
                    warn!("Re-acquisition returned no candidates");
                    return None;
                }
                Err(e) => {
                    warn!("Re-acquisition failed: {}", e);
                    return None;
                }
            }
            if pool.is_empty() {
                return None;
            }
        }

        let candidates = self.rank(pool);
        debug!("Probing {} candidates", candidates.len());

        for candidate in candidates {
            debug!(
                "Testing {} ({})",
                candidate.address(),
                candidate.protocol.as_str().to_uppercase()
            );
            match self
                .prober
                .probe(&candidate, self.config.probe_timeout)
                .await
            {
                ProbeOutcome::Working(success) => {
                    info!(
                        "Found working proxy {} via {} ({}ms)",
                        candidate.address(),
                        success.observed_addr,
                        success.latency_ms
                    );
                    return Some((candidate, success));
                }
                ProbeOutcome::Failed => continue,
            }
        }

        warn!("No working proxy found in this round");
        None
    }

    /// Build the candidate list for one selection round
    ///
    /// Favorited pool members pre-empt latency ordering entirely; the
    /// shuffle happens after truncation so only the top candidates are
    /// ever tried, in random order (load distribution).
    fn rank(&self, pool: Vec<ProxyRecord>) -> Vec<ProxyRecord> {
        let favorite_keys = self.state.favorite_keys();

        let mut candidates: Vec<ProxyRecord> = pool
            .iter()
            .filter(|r| favorite_keys.contains(&r.key()))
            .cloned()
            .collect();

        if candidates.is_empty() {
            candidates = pool;
            candidates.sort_by_key(|r| r.latency_ms);
        }

        candidates.truncate(self.config.max_attempts);
        candidates.shuffle(&mut rand::thread_rng());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EgretError, Result};
    use crate::models::{FavoriteEntry, ProxyProtocol};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    fn record(host: &str, port: u16, latency_ms: u64) -> ProxyRecord {
        ProxyRecord {
            host: host.to_string(),
            port,
            protocol: ProxyProtocol::Http,
            country: "US".to_string(),
            latency_ms,
            last_checked: None,
            favorite: false,
        }
    }

    /// Probes succeed only for hosts in the allow set; every call is logged
    struct ScriptedProber {
        working_hosts: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        fn new(working_hosts: &[&str]) -> Self {
            Self {
                working_hosts: working_hosts.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn probed(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, record: &ProxyRecord, _timeout: Duration) -> ProbeOutcome {
            self.calls.lock().push(record.host.clone());
            if self.working_hosts.contains(&record.host) {
                ProbeOutcome::Working(ProbeSuccess {
                    observed_addr: "1.2.3.4".to_string(),
                    latency_ms: 42,
                })
            } else {
                ProbeOutcome::Failed
            }
        }
    }

    /// Yields a fixed list once, or an error
    struct StaticSource {
        records: Vec<ProxyRecord>,
        fail: bool,
        fetches: Mutex<usize>,
    }

    impl StaticSource {
        fn new(records: Vec<ProxyRecord>) -> Self {
            Self {
                records,
                fail: false,
                fetches: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                records: Vec::new(),
                fail: true,
                fetches: Mutex::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            *self.fetches.lock()
        }
    }

    #[async_trait]
    impl ProxySource for StaticSource {
        async fn fetch(&self, _filter: &FilterConfig) -> Result<Vec<ProxyRecord>> {
            *self.fetches.lock() += 1;
            if self.fail {
                Err(EgretError::PoolFetch("unreachable".to_string()))
            } else {
                Ok(self.records.clone())
            }
        }
    }

    fn selector_config(max_attempts: usize) -> SelectorConfig {
        SelectorConfig {
            max_attempts,
            probe_timeout: Duration::from_millis(10),
            filter: FilterConfig {
                max_latency_ms: 2000,
                countries: vec![],
                protocol_preference: vec![ProxyProtocol::Http],
            },
        }
    }

    fn build(
        state: Arc<EngineState>,
        source: Arc<StaticSource>,
        prober: Arc<ScriptedProber>,
        max_attempts: usize,
    ) -> Selector {
        Selector::new(state, source, prober, selector_config(max_attempts))
    }

    #[tokio::test]
    async fn test_favorites_preempt_latency_ordering() {
        let state = Arc::new(EngineState::new(10));
        state.replace_pool(vec![
            record("10.0.0.1", 80, 5),
            record("10.0.0.2", 80, 9000),
            record("10.0.0.3", 80, 10),
        ]);
        // the slowest proxy is the favorite
        state.add_favorite(FavoriteEntry::from(&record("10.0.0.2", 80, 9000)));

        let prober = Arc::new(ScriptedProber::new(&[]));
        let selector = build(
            state,
            Arc::new(StaticSource::new(vec![])),
            prober.clone(),
            5,
        );

        let result = selector.find_working().await;
        assert!(result.is_none());
        // only the favorited subset was probed, latency ignored entirely
        assert_eq!(prober.probed(), vec!["10.0.0.2".to_string()]);
    }

    #[tokio::test]
    async fn test_truncation_keeps_lowest_latency_set() {
        let state = Arc::new(EngineState::new(10));
        state.replace_pool(vec![
            record("10.0.0.1", 80, 500),
            record("10.0.0.2", 80, 100),
            record("10.0.0.3", 80, 300),
            record("10.0.0.4", 80, 200),
            record("10.0.0.5", 80, 400),
        ]);

        let prober = Arc::new(ScriptedProber::new(&[]));
        let selector = build(
            state,
            Arc::new(StaticSource::new(vec![])),
            prober.clone(),
            3,
        );

        let result = selector.find_working().await;
        assert!(result.is_none());

        // Set (not order) of probed candidates is the 3 lowest latencies
        let probed: HashSet<String> = prober.probed().into_iter().collect();
        let expected: HashSet<String> = ["10.0.0.2", "10.0.0.4", "10.0.0.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(probed, expected);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let state = Arc::new(EngineState::new(10));
        state.replace_pool(vec![
            record("10.0.0.1", 80, 100),
            record("10.0.0.2", 80, 200),
            record("10.0.0.3", 80, 300),
        ]);

        // every candidate works; sequential probing must stop after one
        let prober = Arc::new(ScriptedProber::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        let selector = build(
            state,
            Arc::new(StaticSource::new(vec![])),
            prober.clone(),
            5,
        );

        let (found, success) = selector.find_working().await.unwrap();
        assert_eq!(success.latency_ms, 42);
        assert_eq!(prober.probed().len(), 1);
        assert_eq!(prober.probed()[0], found.host);
    }

    #[tokio::test]
    async fn test_all_favorites_failing_probes_each_exactly_once() {
        // 3 favorited proxies all failing with a budget of 5 means
        // exactly 3 probes, not 5
        let state = Arc::new(EngineState::new(10));
        let records = vec![
            record("10.0.0.1", 80, 100),
            record("10.0.0.2", 80, 200),
            record("10.0.0.3", 80, 300),
        ];
        state.replace_pool(records.clone());
        for r in &records {
            state.add_favorite(FavoriteEntry::from(r));
        }

        let prober = Arc::new(ScriptedProber::new(&[]));
        let selector = build(
            state,
            Arc::new(StaticSource::new(vec![])),
            prober.clone(),
            5,
        );

        assert!(selector.find_working().await.is_none());
        assert_eq!(prober.probed().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_pool_triggers_reacquisition() {
        let state = Arc::new(EngineState::new(10));
        let source = Arc::new(StaticSource::new(vec![record("10.0.0.9", 80, 50)]));
        let prober = Arc::new(ScriptedProber::new(&["10.0.0.9"]));
        let selector = build(state.clone(), source.clone(), prober.clone(), 5);

        let (found, _) = selector.find_working().await.unwrap();
        assert_eq!(found.host, "10.0.0.9");
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(state.pool_len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reacquisition_returns_none_without_probing() {
        let state = Arc::new(EngineState::new(10));
        let source = Arc::new(StaticSource::failing());
        let prober = Arc::new(ScriptedProber::new(&[]));
        let selector = build(state, source.clone(), prober.clone(), 5);

        assert!(selector.find_working().await.is_none());
        assert_eq!(source.fetch_count(), 1);
        assert!(prober.probed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reacquisition_returns_none_without_probing() {
        let state = Arc::new(EngineState::new(10));
        let source = Arc::new(StaticSource::new(vec![]));
        let prober = Arc::new(ScriptedProber::new(&[]));
        let selector = build(state, source, prober.clone(), 5);

        assert!(selector.find_working().await.is_none());
        assert!(prober.probed().is_empty());
    }
}
