//! Resources suppressed per maintenance id that are not yet confirmed unsuppressed
//!
//! Lets a completion event clean up even when the maintenance binding was
//! already cleared before it fired. Entries shrink as removals succeed, so
//! only unconfirmed resources carry over. Optionally snapshotted to a JSON
//! file so a restart does not lose them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::resolver::TargetResource;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberedWindow {
    pub maintenance_id: String,
    pub resources: Vec<TargetResource>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct WindowStore {
    path: Option<PathBuf>,
    windows: RwLock<HashMap<String, RememberedWindow>>,
}

impl WindowStore {
    /// A store that lives only in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a snapshot from `path`, starting empty when it does not exist yet
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let windows = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<RememberedWindow> = serde_json::from_slice(&bytes)?;
                list.into_iter()
                    .map(|w| (w.maintenance_id.to_ascii_lowercase(), w))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} remembered window(s) from {}", windows.len(), path.display());
        Ok(Self {
            path: Some(path),
            windows: RwLock::new(windows),
        })
    }

    /// Add `resources` to the remembered set for `maintenance_id`
    pub async fn remember(&self, maintenance_id: &str, resources: &[TargetResource]) {
        if resources.is_empty() {
            return;
        }
        let mut windows = self.windows.write().await;
        let window = windows
            .entry(maintenance_id.to_ascii_lowercase())
            .or_insert_with(|| RememberedWindow {
                maintenance_id: maintenance_id.to_string(),
                resources: Vec::new(),
                updated_at: Utc::now(),
            });
        for resource in resources {
            let key = resource.identity_key();
            if !window.resources.iter().any(|r| r.identity_key() == key) {
                window.resources.push(resource.clone());
            }
        }
        window.updated_at = Utc::now();
        self.persist(&windows).await;
    }

    pub async fn recall(&self, maintenance_id: &str) -> Vec<TargetResource> {
        self.windows
            .read()
            .await
            .get(&maintenance_id.to_ascii_lowercase())
            .map(|w| w.resources.clone())
            .unwrap_or_default()
    }

    /// Drop resources whose suppression is confirmed removed
    pub async fn release(&self, maintenance_id: &str, released: &[TargetResource]) {
        let key = maintenance_id.to_ascii_lowercase();
        let mut windows = self.windows.write().await;
        let Some(window) = windows.get_mut(&key) else {
            return;
        };
        window
            .resources
            .retain(|r| !released.iter().any(|x| x.identity_key() == r.identity_key()));
        window.updated_at = Utc::now();
        if window.resources.is_empty() {
            windows.remove(&key);
        }
        self.persist(&windows).await;
    }

    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.windows.read().await.is_empty()
    }

    /// Snapshot failures are logged, never fatal: the in-memory state stays authoritative
    async fn persist(&self, windows: &HashMap<String, RememberedWindow>) {
        let Some(path) = &self.path else {
            return;
        };
        let mut list: Vec<&RememberedWindow> = windows.values().collect();
        list.sort_by(|a, b| a.maintenance_id.cmp(&b.maintenance_id));

        let bytes = match serde_json::to_vec_pretty(&list) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize window store: {}", e);
                return;
            }
        };
        let tmp = path.with_extension("tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            warn!("Failed to write window store {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(name: &str) -> TargetResource {
        TargetResource::from_resource_id(
            &format!("/subscriptions/sub1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}"),
            "sub1",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_remember_unions_and_release_shrinks() {
        let store = WindowStore::in_memory();
        store.remember("M1", &[vm("vm-a")]).await;
        store.remember("m1", &[vm("vm-a"), vm("vm-b")]).await;
        assert_eq!(store.recall("m1").await.len(), 2);

        store.release("m1", &[vm("vm-a")]).await;
        let left = store.recall("m1").await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "vm-b");

        store.release("m1", &[vm("vm-b")]).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windows.json");

        let store = WindowStore::load(&path).await.unwrap();
        assert!(store.is_empty().await);
        store.remember("m1", &[vm("vm-a")]).await;

        let reloaded = WindowStore::load(&path).await.unwrap();
        let recalled = reloaded.recall("m1").await;
        assert_eq!(recalled, vec![vm("vm-a")]);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windows.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(WindowStore::load(&path).await.is_err());
    }
}
