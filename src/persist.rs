//! Persistence surface
//!
//! JSON files on disk: the engine snapshot for restart continuity and the
//! favorites set, which outlives any pool. Writes go through a temp file
//! and rename so a crash mid-write never corrupts the previous state.

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::models::{FavoritesSet, ProxyRecord, Snapshot};

pub async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    write_json(path, snapshot).await
}

pub async fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    read_json(path).await
}

pub async fn save_favorites(path: &Path, favorites: &FavoritesSet) -> Result<()> {
    write_json(path, favorites).await
}

pub async fn load_favorites(path: &Path) -> Result<Option<FavoritesSet>> {
    read_json(path).await
}

/// Export the pool as one `scheme://host:port` line per proxy
pub async fn export_pool(path: &Path, pool: &[ProxyRecord]) -> Result<usize> {
    let mut out = String::new();
    for record in pool {
        out.push_str(&record.url());
        out.push('\n');
    }
    tokio::fs::write(path, out).await?;
    debug!("Exported {} proxies to {}", pool.len(), path.display());
    Ok(pool.len())
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!("Wrote {}", path.display());
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
