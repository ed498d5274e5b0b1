//! Data model: proxy records, favorites, history, uptime and snapshots

mod favorites;
mod history;
mod proxy;
mod snapshot;
mod uptime;

pub use favorites::{FavoriteEntry, FavoritesSet};
pub use history::{ActivationEvent, HistoryLog};
pub use proxy::{ActiveProxy, ProxyKey, ProxyProtocol, ProxyRecord};
pub use snapshot::{Snapshot, TrafficStats};
pub use uptime::UptimeRecord;
