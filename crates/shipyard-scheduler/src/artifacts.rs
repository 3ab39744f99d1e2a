//! Artifact store backends: process memory and local filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use shipyard_core::artifact::{ArtifactKey, ArtifactRef, ArtifactStore, PruneStats};
use shipyard_core::{Error, ResourceId, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Artifact names are single path components.
fn check_name(key: &ArtifactKey) -> Result<()> {
    let name = key.name.as_str();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(|c| c.is_control())
    {
        return Err(Error::InvalidInput(format!(
            "invalid artifact name: {:?}",
            name
        )));
    }
    Ok(())
}

fn verify(reference: &ArtifactRef, data: Bytes) -> Result<Bytes> {
    if reference.matches(&data) {
        Ok(data)
    } else {
        Err(Error::Storage(format!(
            "checksum mismatch for {}",
            reference.key.path()
        )))
    }
}

fn sort_refs(refs: &mut [ArtifactRef]) {
    refs.sort_by(|a, b| {
        a.key
            .stage
            .cmp(&b.key.stage)
            .then_with(|| a.key.name.cmp(&b.key.name))
    });
}

/// Artifacts kept in process memory.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKey, (ArtifactRef, Bytes)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef> {
        check_name(key)?;
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(key) {
            return Err(Error::Conflict(format!(
                "artifact {} already exists",
                key.path()
            )));
        }
        let reference =
            ArtifactRef::describe(key.clone(), format!("memory://{}", key.path()), &data);
        artifacts.insert(key.clone(), (reference.clone(), data));
        Ok(reference)
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Bytes> {
        let data = self
            .artifacts
            .read()
            .await
            .get(&reference.key)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::NotFound(format!("artifact {}", reference.key.path())))?;
        verify(reference, data)
    }

    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>> {
        let mut refs: Vec<ArtifactRef> = self
            .artifacts
            .read()
            .await
            .values()
            .filter(|(r, _)| &r.key.run_id == run_id)
            .map(|(r, _)| r.clone())
            .collect();
        sort_refs(&mut refs);
        Ok(refs)
    }

    async fn delete_run(&self, run_id: &ResourceId) -> Result<PruneStats> {
        let mut stats = PruneStats::default();
        self.artifacts.write().await.retain(|key, (reference, _)| {
            if &key.run_id == run_id {
                stats.artifacts_deleted += 1;
                stats.bytes_freed += reference.size;
                false
            } else {
                true
            }
        });
        Ok(stats)
    }
}

/// Artifacts written under a root directory.
///
/// Layout: `<root>/<run>/<stage>/<name>` holds the content and
/// `<root>/<run>/refs/<stage>/<name>.json` the serialized [`ArtifactRef`].
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(key.run_id.to_string())
            .join(key.stage.as_str())
            .join(&key.name)
    }

    fn ref_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(key.run_id.to_string())
            .join("refs")
            .join(key.stage.as_str())
            .join(format!("{}.json", key.name))
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef> {
        check_name(key)?;
        let path = self.data_path(key);
        create_parent(&path).await?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Conflict(format!(
                    "artifact {} already exists",
                    key.path()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data).await?;
        file.sync_all().await?;

        let reference =
            ArtifactRef::describe(key.clone(), path.display().to_string(), &data);
        let ref_path = self.ref_path(key);
        create_parent(&ref_path).await?;
        tokio::fs::write(&ref_path, serde_json::to_vec(&reference)?).await?;

        debug!(artifact = %key.path(), size = reference.size, "Stored artifact");
        Ok(reference)
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Bytes> {
        let path = self.data_path(&reference.key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "artifact {}",
                    reference.key.path()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        verify(reference, Bytes::from(data))
    }

    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>> {
        let refs_dir = self.root.join(run_id.to_string()).join("refs");
        let mut refs = Vec::new();

        let mut stages = match tokio::fs::read_dir(&refs_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(refs),
            Err(e) => return Err(e.into()),
        };
        while let Some(stage_dir) = stages.next_entry().await? {
            let mut entries = tokio::fs::read_dir(stage_dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let raw = tokio::fs::read(entry.path()).await?;
                refs.push(serde_json::from_slice::<ArtifactRef>(&raw)?);
            }
        }

        sort_refs(&mut refs);
        Ok(refs)
    }

    async fn delete_run(&self, run_id: &ResourceId) -> Result<PruneStats> {
        let refs = self.list(run_id).await?;
        let stats = PruneStats {
            artifacts_deleted: refs.len() as u64,
            bytes_freed: refs.iter().map(|r| r.size).sum(),
        };
        match tokio::fs::remove_dir_all(self.root.join(run_id.to_string())).await {
            Ok(()) => Ok(stats),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(stats),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::StageKind;

    async fn exercise(store: &dyn ArtifactStore) {
        let run_id = ResourceId::new();
        let other_run = ResourceId::new();
        let key = ArtifactKey::new(run_id, StageKind::Build, "imagedefinitions.json");
        let data = Bytes::from_static(br#"[{"name":"app","imageUri":"repo:latest"}]"#);

        let reference = store.put(&key, data.clone()).await.unwrap();
        assert_eq!(reference.size, data.len() as u64);
        assert_eq!(store.get(&reference).await.unwrap(), data);

        // Append-only.
        let err = store.put(&key, Bytes::from_static(b"[]")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.get(&reference).await.unwrap(), data);

        // Same name under another run or stage does not collide.
        store
            .put(
                &ArtifactKey::new(other_run, StageKind::Build, "imagedefinitions.json"),
                Bytes::from_static(b"other"),
            )
            .await
            .unwrap();
        store
            .put(
                &ArtifactKey::new(run_id, StageKind::Source, "source.json"),
                Bytes::from_static(b"{}"),
            )
            .await
            .unwrap();

        let listed = store.list(&run_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key.stage, StageKind::Source);
        assert_eq!(listed[1], reference);

        let mut tampered = reference.clone();
        tampered.checksum = "0".repeat(64);
        assert!(matches!(
            store.get(&tampered).await,
            Err(Error::Storage(_))
        ));

        let bad = ArtifactKey::new(run_id, StageKind::Build, "../escape");
        assert!(matches!(
            store.put(&bad, Bytes::new()).await,
            Err(Error::InvalidInput(_))
        ));

        let stats = store.delete_run(&run_id).await.unwrap();
        assert_eq!(stats.artifacts_deleted, 2);
        assert_eq!(stats.bytes_freed, data.len() as u64 + 2);
        assert!(store.list(&run_id).await.unwrap().is_empty());
        assert_eq!(store.list(&other_run).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryArtifactStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store() {
        let root = std::env::temp_dir().join(format!("shipyard-artifacts-{}", ResourceId::new()));
        let store = FsArtifactStore::new(&root);
        exercise(&store).await;
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_fs_store_missing_run() {
        let root = std::env::temp_dir().join(format!("shipyard-artifacts-{}", ResourceId::new()));
        let store = FsArtifactStore::new(&root);
        let run_id = ResourceId::new();
        assert!(store.list(&run_id).await.unwrap().is_empty());
        assert_eq!(store.delete_run(&run_id).await.unwrap(), PruneStats::default());
    }
}
