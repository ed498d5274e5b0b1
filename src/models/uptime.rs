use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-proxy availability accounting
///
/// Created lazily the first time a proxy becomes current while uptime
/// tracking runs; never reset within a process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeRecord {
    pub started_at: DateTime<Utc>,
    pub downtime_secs: u64,
}

impl UptimeRecord {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            downtime_secs: 0,
        }
    }

    pub fn add_downtime(&mut self, secs: u64) {
        self.downtime_secs = self.downtime_secs.saturating_add(secs);
    }

    /// Uptime percentage in [0, 100]
    ///
    /// Zero elapsed time reports 0% rather than dividing by zero.
    pub fn percentage(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.started_at).num_seconds();
        if elapsed <= 0 {
            return 0.0;
        }
        let elapsed = elapsed as f64;
        let up = (elapsed - self.downtime_secs as f64).max(0.0);
        ((up / elapsed) * 100.0).clamp(0.0, 100.0)
    }
}
