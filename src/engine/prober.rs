//! Liveness probing
//!
//! One probe is one outbound request through a candidate to the liveness
//! endpoint. The only observable failure signal is boolean; retry policy
//! belongs to the selector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::config::ProbeConfig;
use crate::engine::state::TrafficCounters;
use crate::engine::transport;
use crate::error::Result;
use crate::models::ProxyRecord;

/// Successful probe measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSuccess {
    /// External address the endpoint saw the request arrive from
    pub observed_addr: String,
    /// Wall-clock round trip in milliseconds
    pub latency_ms: u64,
}

/// Two-valued probe result; failures carry no further classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Working(ProbeSuccess),
    Failed,
}

impl ProbeOutcome {
    pub fn is_working(&self) -> bool {
        matches!(self, ProbeOutcome::Working(_))
    }
}

/// Issues a single liveness check against one candidate
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, record: &ProxyRecord, timeout: Duration) -> ProbeOutcome;
}

/// Probes by fetching the liveness endpoint through the candidate
///
/// The endpoint echoes the caller's external address in the body, which
/// becomes the observed address of the activation.
pub struct HttpProber {
    config: ProbeConfig,
    traffic: Arc<TrafficCounters>,
}

const MAX_RESPONSE_BYTES: usize = 64 * 1024;

impl HttpProber {
    pub fn new(config: ProbeConfig, traffic: Arc<TrafficCounters>) -> Self {
        Self { config, traffic }
    }

    async fn request_through(&self, record: &ProxyRecord) -> Result<Vec<u8>> {
        let mut stream =
            transport::connect(record, &self.config.host, self.config.port).await?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.config.path, self.config.host
        );
        stream.write_all(request.as_bytes()).await?;
        self.traffic.add_sent(request.len() as u64);

        let mut response = Vec::with_capacity(1024);
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.len() >= MAX_RESPONSE_BYTES {
                break;
            }
        }

        Ok(response)
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self), fields(candidate = %record.address(), protocol = %record.protocol))]
    async fn probe(&self, record: &ProxyRecord, probe_timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();

        let raw = match timeout(probe_timeout, self.request_through(record)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                debug!("probe failed: {}", e);
                return ProbeOutcome::Failed;
            }
            Err(_) => {
                debug!("probe timed out after {:?}", probe_timeout);
                return ProbeOutcome::Failed;
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        match parse_response(&raw) {
            Some((status, body)) if (200..300).contains(&status) => {
                self.traffic.add_received(body.len() as u64);
                let observed_addr = body.trim().to_string();
                debug!(latency_ms, %observed_addr, "probe succeeded");
                ProbeOutcome::Working(ProbeSuccess {
                    observed_addr,
                    latency_ms,
                })
            }
            Some((status, _)) => {
                debug!("probe got non-success status {}", status);
                ProbeOutcome::Failed
            }
            None => {
                debug!("probe got unparseable response");
                ProbeOutcome::Failed
            }
        }
    }
}

/// Split a raw HTTP response into status code and body
fn parse_response(raw: &[u8]) -> Option<(u16, String)> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = match text.split_once("\r\n\r\n") {
        Some((head, body)) => (head, body),
        None => (text.as_ref(), ""),
    };

    let status_line = head.lines().next()?;
    if !status_line.starts_with("HTTP/") {
        return None;
    }
    let status = status_line.split_whitespace().nth(1)?.parse::<u16>().ok()?;

    Some((status, body.to_string()))
}
