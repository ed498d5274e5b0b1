//! Pool acquisition
//!
//! The engine never talks to a proxy list API directly; it goes through
//! the `ProxySource` seam so selection logic stays testable offline.

mod geonode;

pub use geonode::GeonodeSource;

use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::error::Result;
use crate::models::ProxyRecord;

/// A provider of candidate proxies
///
/// Fetches replace the pool wholesale; implementations apply the filter
/// before returning so every pool member already satisfies it.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self, filter: &FilterConfig) -> Result<Vec<ProxyRecord>>;
}
