use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity key for a proxy: (host, port)
///
/// Favorites, blacklist and uptime records are all keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyKey {
    pub host: String,
    pub port: u16,
}

impl ProxyKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a "host:port" string back into a key
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port_str) = s.rsplit_once(':')?;
        let port = port_str.parse::<u16>().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A candidate egress proxy as acquired from the pool source
///
/// Immutable once fetched, except for the favorite flag overlay applied
/// when the pool is rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub country: String,
    /// Latency advertised by the pool source, in milliseconds
    pub latency_ms: u64,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub favorite: bool,
}

impl ProxyRecord {
    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }

    /// "host:port" form used for dialing and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// The currently active egress proxy, as committed by an activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveProxy {
    pub record: ProxyRecord,
    /// External address observed through the proxy during the probe
    pub observed_addr: String,
    /// Measured round-trip latency of the activation probe
    pub latency_ms: u64,
    pub activated_at: DateTime<Utc>,
}

impl ActiveProxy {
    pub fn key(&self) -> ProxyKey {
        self.record.key()
    }
}
