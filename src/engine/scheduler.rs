//! Background loops
//!
//! Three independent timed loops drive the engine over time: scheduled
//! rotation, failover watching, and uptime accrual. Each loop checks its
//! shutdown signal cooperatively at the top of every iteration and is
//! never interrupted mid-probe; shutdown joins with a bounded timeout and
//! abandons a loop that misses it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::engine::prober::ProbeOutcome;
use crate::engine::Engine;

/// Scheduler timing configuration
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Tick period of the failover watch
    pub failover_interval: Duration,
    /// Tick period of the uptime monitor
    pub uptime_interval: Duration,
    /// Pause after a failed rotation attempt before retrying
    pub rotation_backoff: Duration,
    /// How long to wait for a loop to stop before abandoning it
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failover_interval: Duration::from_secs(30),
            uptime_interval: Duration::from_secs(5),
            rotation_backoff: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// One scheduled rotation run
///
/// An absent end time means the session runs until stopped.
#[derive(Debug, Clone)]
pub struct RotationSession {
    pub interval: Duration,
    pub end_time: Option<Instant>,
}

impl RotationSession {
    pub fn new(interval: Duration, duration: Option<Duration>) -> Self {
        Self {
            interval,
            end_time: duration.map(|d| Instant::now() + d),
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.end_time.is_some_and(|end| now >= end)
    }
}

struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the three background loops and their shared stop bookkeeping
pub struct Scheduler {
    engine: Arc<Engine>,
    config: SchedulerConfig,
    rotation: Mutex<Option<LoopHandle>>,
    failover: Mutex<Option<LoopHandle>>,
    uptime: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            rotation: Mutex::new(None),
            failover: Mutex::new(None),
            uptime: Mutex::new(None),
        }
    }

    /// Start scheduled rotation; returns false if it is already running
    pub fn start_rotation(&self, rotation_interval: Duration, duration: Option<Duration>) -> bool {
        let mut slot = self.rotation.lock();
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }

        let session = RotationSession::new(rotation_interval, duration);
        match duration {
            Some(window) => info!(
                "Rotation started: every {:?} for {:?}",
                rotation_interval, window
            ),
            None => info!(
                "Rotation started: every {:?} until stopped",
                rotation_interval
            ),
        }

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(rotation_loop(
            self.engine.clone(),
            session,
            self.config.rotation_backoff,
            rx,
        ));
        *slot = Some(LoopHandle {
            shutdown_tx: tx,
            task,
        });
        true
    }

    pub async fn stop_rotation(&self) -> bool {
        self.stop_slot(&self.rotation, "rotation").await
    }

    pub fn rotation_active(&self) -> bool {
        self.rotation
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Start watching the current proxy for failure
    pub fn start_failover_watch(&self) -> bool {
        let mut slot = self.failover.lock();
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(failover_loop(
            self.engine.clone(),
            self.config.failover_interval,
            rx,
        ));
        *slot = Some(LoopHandle {
            shutdown_tx: tx,
            task,
        });
        true
    }

    pub async fn stop_failover_watch(&self) -> bool {
        self.stop_slot(&self.failover, "failover watch").await
    }

    /// Start accruing per-proxy uptime
    pub fn start_uptime_monitor(&self) -> bool {
        let mut slot = self.uptime.lock();
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(uptime_loop(
            self.engine.clone(),
            self.config.uptime_interval,
            rx,
        ));
        *slot = Some(LoopHandle {
            shutdown_tx: tx,
            task,
        });
        true
    }

    pub async fn stop_uptime_monitor(&self) -> bool {
        self.stop_slot(&self.uptime, "uptime monitor").await
    }

    /// Stop every loop; called once at process shutdown
    pub async fn shutdown(&self) {
        self.stop_rotation().await;
        self.stop_failover_watch().await;
        self.stop_uptime_monitor().await;
    }

    async fn stop_slot(&self, slot: &Mutex<Option<LoopHandle>>, name: &str) -> bool {
        let Some(handle) = slot.lock().take() else {
            return false;
        };

        let _ = handle.shutdown_tx.send(true);
        match timeout(self.config.shutdown_timeout, handle.task).await {
            Ok(_) => {
                info!("{} loop stopped", name);
                true
            }
            Err(_) => {
                // Abandon it; process shutdown must not hang on a stuck probe.
                warn!(
                    "{} loop did not stop within {:?}, abandoning",
                    name, self.config.shutdown_timeout
                );
                true
            }
        }
    }
}

/// Sleep, waking early on shutdown; returns true when stopped
async fn stopped_during(pause: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(pause) => false,
        res = shutdown.changed() => res.is_err() || *shutdown.borrow(),
    }
}

#[instrument(skip_all)]
async fn rotation_loop(
    engine: Arc<Engine>,
    session: RotationSession,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if session.expired(Instant::now()) {
            info!("Rotation window elapsed");
            break;
        }

        let pause = match engine.rotate_once().await {
            Some(active) => {
                debug!(
                    "Rotated to {}, next rotation in {:?}",
                    active.record.address(),
                    session.interval
                );
                session.interval
            }
            None => {
                // Retry on the fixed backoff without advancing the schedule
                warn!("Rotation found no usable proxy, retrying in {:?}", backoff);
                backoff
            }
        };

        if stopped_during(pause, &mut shutdown).await {
            break;
        }
    }

    info!("Rotation schedule completed");
}

#[instrument(skip_all)]
async fn failover_loop(
    engine: Arc<Engine>,
    tick_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Failover watch running every {:?}", tick_period);
    let mut tick = interval(tick_period);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Some(ProbeOutcome::Failed) = engine.check_current().await {
                    warn!("Current proxy failed its probe, rotating out of schedule");
                    if engine.rotate_once().await.is_none() {
                        warn!("Failover found no replacement, will re-check next tick");
                    }
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Failover watch stopped");
}

#[instrument(skip_all)]
async fn uptime_loop(
    engine: Arc<Engine>,
    tick_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Uptime monitor running every {:?}", tick_period);
    let tick_secs = tick_period.as_secs();
    let mut tick = interval(tick_period);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                engine.uptime_tick(tick_secs).await;
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Uptime monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::prober::{ProbeSuccess, Prober};
    use crate::engine::testing::{engine_with, record, ScriptedProber};
    use crate::models::ProxyKey;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            failover_interval: Duration::from_millis(40),
            uptime_interval: Duration::from_millis(20),
            rotation_backoff: Duration::from_millis(80),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    /// Pops one scripted outcome per probe, recording call times;
    /// succeeds once the script runs dry.
    struct SequenceProber {
        outcomes: PlMutex<VecDeque<bool>>,
        times: PlMutex<Vec<Instant>>,
    }

    impl SequenceProber {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: PlMutex::new(outcomes.iter().copied().collect()),
                times: PlMutex::new(Vec::new()),
            })
        }

        fn times(&self) -> Vec<Instant> {
            self.times.lock().clone()
        }
    }

    #[async_trait]
    impl Prober for SequenceProber {
        async fn probe(
            &self,
            _record: &crate::models::ProxyRecord,
            _timeout: Duration,
        ) -> ProbeOutcome {
            self.times.lock().push(Instant::now());
            let working = self.outcomes.lock().pop_front().unwrap_or(true);
            if working {
                ProbeOutcome::Working(ProbeSuccess {
                    observed_addr: "1.2.3.4".to_string(),
                    latency_ms: 42,
                })
            } else {
                ProbeOutcome::Failed
            }
        }
    }

    #[test]
    fn test_rotation_session_expiry() {
        let unbounded = RotationSession::new(Duration::from_secs(60), None);
        assert!(!unbounded.expired(Instant::now() + Duration::from_secs(86400)));

        let bounded = RotationSession::new(
            Duration::from_secs(60),
            Some(Duration::from_millis(10)),
        );
        assert!(!bounded.expired(Instant::now()));
        assert!(bounded.expired(Instant::now() + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_rotation_backs_off_on_failure_then_resumes_schedule() {
        // Two failed attempts must each be followed by the short backoff,
        // and the success by the full interval.
        let prober = SequenceProber::new(&[false, false, true]);
        let engine = engine_with_prober(prober.clone());
        let scheduler = Scheduler::new(engine, test_config());

        let rotation_interval = Duration::from_millis(250);
        assert!(scheduler.start_rotation(rotation_interval, None));

        // Wait long enough for: fail, backoff, fail, backoff, success,
        // interval, next attempt.
        sleep(Duration::from_millis(600)).await;
        scheduler.stop_rotation().await;

        let times = prober.times();
        assert!(times.len() >= 4, "expected 4+ probes, got {}", times.len());

        let backoff_1 = times[1] - times[0];
        let backoff_2 = times[2] - times[1];
        let full_interval = times[3] - times[2];

        // Failures pause for the backoff, not the rotation interval
        assert!(backoff_1 < rotation_interval, "backoff 1 was {:?}", backoff_1);
        assert!(backoff_2 < rotation_interval, "backoff 2 was {:?}", backoff_2);
        // The success pauses for at least the full interval
        assert!(
            full_interval >= Duration::from_millis(230),
            "interval pause was {:?}",
            full_interval
        );
    }

    #[tokio::test]
    async fn test_stop_rotation_terminates_mid_sleep() {
        let prober = ScriptedProber::new(&["10.0.0.1"]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober, 5);
        let scheduler = Scheduler::new(engine, test_config());

        // Unbounded session sleeping a long interval after the first rotation
        assert!(scheduler.start_rotation(Duration::from_secs(600), None));
        sleep(Duration::from_millis(50)).await;
        assert!(scheduler.rotation_active());

        let stop_started = Instant::now();
        assert!(scheduler.stop_rotation().await);
        // Stopped well before the next scheduled action
        assert!(stop_started.elapsed() < Duration::from_secs(1));
        assert!(!scheduler.rotation_active());
    }

    #[tokio::test]
    async fn test_rotation_expires_naturally() {
        let prober = ScriptedProber::new(&["10.0.0.1"]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober, 5);
        let scheduler = Scheduler::new(engine, test_config());

        assert!(scheduler.start_rotation(
            Duration::from_millis(30),
            Some(Duration::from_millis(100)),
        ));

        sleep(Duration::from_millis(300)).await;
        assert!(!scheduler.rotation_active());

        // An expired session frees the slot for a new one
        assert!(scheduler.start_rotation(Duration::from_secs(600), None));
        scheduler.stop_rotation().await;
    }

    #[tokio::test]
    async fn test_start_rotation_twice_is_rejected() {
        let prober = ScriptedProber::new(&["10.0.0.1"]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober, 5);
        let scheduler = Scheduler::new(engine, test_config());

        assert!(scheduler.start_rotation(Duration::from_secs(600), None));
        assert!(!scheduler.start_rotation(Duration::from_secs(600), None));
        scheduler.stop_rotation().await;
    }

    #[tokio::test]
    async fn test_failover_replaces_dead_current_proxy() {
        let prober = ScriptedProber::new(&["10.0.0.1", "10.0.0.2"]);
        let engine = engine_with(
            vec![record("10.0.0.1", 80, 10), record("10.0.0.2", 80, 20)],
            prober.clone(),
            5,
        );

        // Activate the fast proxy, then kill it
        let first = engine.rotate_once().await.unwrap();
        assert_eq!(first.record.host, "10.0.0.1");
        prober.set_working("10.0.0.1", false);

        let scheduler = Scheduler::new(engine.clone(), test_config());
        assert!(scheduler.start_failover_watch());

        // Within a tick or two the watch probes, sees the failure and
        // re-activates out of schedule.
        sleep(Duration::from_millis(250)).await;
        scheduler.stop_failover_watch().await;

        let current = engine.current().unwrap();
        assert_eq!(current.record.host, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_failover_idle_without_current_proxy() {
        let prober = ScriptedProber::new(&[]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober.clone(), 5);
        let scheduler = Scheduler::new(engine, test_config());

        assert!(scheduler.start_failover_watch());
        sleep(Duration::from_millis(120)).await;
        scheduler.stop_failover_watch().await;

        // No current proxy means no probes at all
        assert_eq!(prober.call_count(), 0);
    }

    #[tokio::test]
    async fn test_uptime_monitor_creates_record_and_probes() {
        let prober = ScriptedProber::new(&["10.0.0.1"]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober.clone(), 5);
        engine.rotate_once().await.unwrap();
        let probes_after_rotation = prober.call_count();

        let scheduler = Scheduler::new(engine.clone(), test_config());
        assert!(scheduler.start_uptime_monitor());
        sleep(Duration::from_millis(150)).await;
        scheduler.stop_uptime_monitor().await;

        let ledger = engine.uptime_ledger();
        let key = ProxyKey::new("10.0.0.1", 80);
        assert!(ledger.percentage(&key).is_some());
        assert!(prober.call_count() > probes_after_rotation);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let prober = ScriptedProber::new(&["10.0.0.1"]);
        let engine = engine_with(vec![record("10.0.0.1", 80, 10)], prober, 5);
        let scheduler = Scheduler::new(engine, test_config());

        scheduler.start_rotation(Duration::from_secs(600), None);
        scheduler.start_failover_watch();
        scheduler.start_uptime_monitor();

        scheduler.shutdown().await;
        assert!(!scheduler.rotation_active());

        // Idempotent: nothing left to stop
        assert!(!scheduler.stop_rotation().await);
        assert!(!scheduler.stop_failover_watch().await);
        assert!(!scheduler.stop_uptime_monitor().await);
    }

    fn engine_with_prober(prober: Arc<SequenceProber>) -> Arc<Engine> {
        use crate::engine::testing::{NullSink, StaticSource};
        use crate::engine::EngineConfig;
        use crate::config::FilterConfig;
        use crate::models::ProxyProtocol;

        let config = EngineConfig {
            filter: FilterConfig {
                max_latency_ms: u64::MAX,
                countries: vec![],
                protocol_preference: vec![ProxyProtocol::Http],
            },
            max_attempts: 5,
            probe_timeout: Duration::from_millis(50),
            max_history: 50,
            notifications: false,
            state_path: None,
        };
        let engine = Engine::new(
            config,
            Arc::new(StaticSource { records: vec![] }),
            prober,
            vec![],
            Arc::new(NullSink),
        );
        engine
            .state()
            .replace_pool(vec![record("10.0.0.1", 80, 10)]);
        engine
    }
}
