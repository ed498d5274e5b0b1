//! Activation
//!
//! Commits a probed winner as the current proxy, records history and fires
//! the side-effect hooks. The commit is write-ahead: when a state file is
//! configured, the prospective snapshot is written before memory changes,
//! so a failed write leaves the previous proxy in place.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::engine::prober::ProbeSuccess;
use crate::engine::state::EngineState;
use crate::error::{EgretError, Result};
use crate::hooks::ActivationHook;
use crate::models::{ActiveProxy, ProxyRecord};
use crate::notify::NotificationSink;
use crate::persist;

pub struct Activator {
    state: Arc<EngineState>,
    hooks: Vec<Box<dyn ActivationHook>>,
    notifier: Arc<dyn NotificationSink>,
    notifications: bool,
    /// Write-through target; None keeps commits memory-only
    state_path: Option<PathBuf>,
}

impl Activator {
    pub fn new(
        state: Arc<EngineState>,
        hooks: Vec<Box<dyn ActivationHook>>,
        notifier: Arc<dyn NotificationSink>,
        notifications: bool,
        state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            state,
            hooks,
            notifier,
            notifications,
            state_path,
        }
    }

    /// Commit a probed candidate as the current egress proxy
    ///
    /// Only the state commit can fail here; hook and notification failures
    /// are logged and swallowed.
    #[instrument(skip(self, probe), fields(proxy = %record.address()))]
    pub async fn activate(&self, record: ProxyRecord, probe: ProbeSuccess) -> Result<ActiveProxy> {
        let active = ActiveProxy {
            record,
            observed_addr: probe.observed_addr,
            latency_ms: probe.latency_ms,
            activated_at: Utc::now(),
        };

        // Write-ahead: persist the post-commit state first, then flip memory.
        if let Some(path) = &self.state_path {
            let prospective = self.state.prospective_snapshot(&active);
            persist::save_snapshot(path, &prospective)
                .await
                .map_err(|e| EgretError::StateCommit(e.to_string()))?;
        }
        self.state.commit_activation(active.clone());

        info!(
            "Activated {} ({}) via {}, {}ms",
            active.record.address(),
            active.record.protocol.as_str().to_uppercase(),
            active.observed_addr,
            active.latency_ms
        );

        self.fire_hooks(&active).await;

        if self.notifications {
            self.notifier
                .notify(
                    "Proxy Rotated",
                    &format!("New IP: {}", active.observed_addr),
                )
                .await;
        }

        Ok(active)
    }

    /// Run every hook in its fixed order, independently
    async fn fire_hooks(&self, active: &ActiveProxy) {
        for hook in &self.hooks {
            if let Err(e) = hook.apply(active).await {
                warn!("Activation hook {} failed: {:#}", hook.name(), e);
            }
        }
    }
}
