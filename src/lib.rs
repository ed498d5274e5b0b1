//! Egret - Rotating Egress Proxy Pool Engine
//!
//! Maintains a rotating pool of egress proxies for a client process:
//! acquires candidates, verifies their liveness, activates one as the
//! current egress path, and re-evaluates that choice on a schedule and
//! on failure.
//!
//! ## Features
//!
//! - Pool acquisition with latency, country and protocol filtering
//! - Favorites that pre-empt latency ordering during selection
//! - HTTP, HTTPS, SOCKS4 and SOCKS5 candidate probing
//! - Scheduled rotation with failure backoff and bounded sessions
//! - Failover watch and per-proxy uptime accounting
//! - Pluggable activation hooks and desktop notifications
//! - JSON snapshot persistence for restart continuity

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod models;
pub mod notify;
pub mod persist;
pub mod source;

pub use config::Config;
pub use engine::scheduler::{Scheduler, SchedulerConfig};
pub use engine::uptime::UptimeLedger;
pub use engine::{Engine, EngineConfig};
pub use error::{EgretError, Result};
