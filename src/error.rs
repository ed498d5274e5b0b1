use thiserror::Error;

/// Unified error type for the Egret engine
#[derive(Error, Debug)]
pub enum EgretError {
    // Pool acquisition errors
    #[error("Pool fetch failed: {0}")]
    PoolFetch(String),

    #[error("No proxies available")]
    NoProxiesAvailable,

    // Candidate dialing errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // State layer errors
    #[error("State commit failed: {0}")]
    StateCommit(String),

    #[error("Snapshot decode failed: {0}")]
    SnapshotDecode(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Timing
    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Egret operations
pub type Result<T> = std::result::Result<T, EgretError>;

impl EgretError {
    /// Transient errors are recoverable by retrying or moving to the next
    /// candidate; they must never terminate a background loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EgretError::PoolFetch(_)
                | EgretError::NoProxiesAvailable
                | EgretError::ProxyConnectionFailed(_)
                | EgretError::Timeout
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for EgretError {
    fn from(err: url::ParseError) -> Self {
        EgretError::InvalidConfig(err.to_string())
    }
}
