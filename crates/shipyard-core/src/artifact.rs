//! Artifact storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::StageKind;
use crate::{ResourceId, Result};

/// Key for storing/retrieving an artifact.
///
/// Keys are scoped by run and producing stage, so runs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub run_id: ResourceId,
    /// Stage that produced the artifact.
    pub stage: StageKind,
    /// Artifact file name, e.g. `imagedefinitions.json`.
    pub name: String,
}

impl ArtifactKey {
    pub fn new(run_id: ResourceId, stage: StageKind, name: impl Into<String>) -> Self {
        Self {
            run_id,
            stage,
            name: name.into(),
        }
    }

    /// Relative storage path: `<run>/<stage>/<name>`.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.run_id, self.stage, self.name)
    }
}

/// Reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    /// Storage location (backend-specific).
    pub location: String,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    /// Build a reference for `data` stored under `key` at `location`.
    pub fn describe(key: ArtifactKey, location: impl Into<String>, data: &[u8]) -> Self {
        Self {
            key,
            location: location.into(),
            checksum: sha256_hex(data),
            size: data.len() as u64,
            created_at: Utc::now(),
        }
    }

    /// Whether `data` is exactly what was stored.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.size == data.len() as u64 && self.checksum == sha256_hex(data)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Statistics from a cleanup operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub artifacts_deleted: u64,
    pub bytes_freed: u64,
}

/// Append-only artifact storage.
///
/// `put` on an existing key fails with [`crate::Error::Conflict`]; an
/// artifact never changes once written.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef>;

    /// Read an artifact back, verifying its checksum.
    async fn get(&self, reference: &ArtifactRef) -> Result<Bytes>;

    /// All artifacts of a run.
    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>>;

    /// Remove every artifact of a run (retention cleanup).
    async fn delete_run(&self, run_id: &ResourceId) -> Result<PruneStats>;
}
