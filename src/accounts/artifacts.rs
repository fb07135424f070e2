use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::shared::error::{AppError, AppResult};

/// Optional operator-supplied metadata accompanying a session artifact.
/// Extra keys are tolerated; only the known fields are extracted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Session,
    Metadata,
}

pub fn classify_upload(file_name: &str) -> Option<ArtifactKind> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".session") {
        Some(ArtifactKind::Session)
    } else if lower.ends_with(".json") {
        Some(ArtifactKind::Metadata)
    } else {
        None
    }
}

pub fn parse_metadata(bytes: &[u8]) -> AppResult<SessionMetadata> {
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::ArtifactInvalid(format!("metadata is not valid JSON: {e}")))
}

/// Unique artifact basename derived from the owning tenant and the upload
/// instant.
pub fn artifact_hash(tenant: Uuid, at: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{tenant}:{}", at.timestamp_nanos_opt().unwrap_or(0)));
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone)]
pub struct StoredArtifacts {
    pub session_path: String,
    pub metadata_path: String,
}

/// Filesystem layout: `{root}/sessions/{tenant}/{hash}.session` and
/// `{root}/json/{tenant}/{hash}.json`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn store(
        &self,
        tenant: Uuid,
        session_bytes: &[u8],
        metadata_bytes: &[u8],
    ) -> AppResult<StoredArtifacts> {
        let hash = artifact_hash(tenant, Utc::now());

        let session_dir = self.root.join("sessions").join(tenant.to_string());
        let json_dir = self.root.join("json").join(tenant.to_string());
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| AppError::Internal(format!("artifact dir create failed: {e}")))?;
        tokio::fs::create_dir_all(&json_dir)
            .await
            .map_err(|e| AppError::Internal(format!("artifact dir create failed: {e}")))?;

        let session_path = session_dir.join(format!("{hash}.session"));
        let metadata_path = json_dir.join(format!("{hash}.json"));

        tokio::fs::write(&session_path, session_bytes)
            .await
            .map_err(|e| AppError::Internal(format!("session artifact write failed: {e}")))?;
        tokio::fs::write(&metadata_path, metadata_bytes)
            .await
            .map_err(|e| AppError::Internal(format!("metadata artifact write failed: {e}")))?;

        Ok(StoredArtifacts {
            session_path: session_path.to_string_lossy().into_owned(),
            metadata_path: metadata_path.to_string_lossy().into_owned(),
        })
    }

    /// Best-effort removal of both artifacts; missing files are not an
    /// error so deletes stay idempotent.
    pub async fn remove(&self, session_path: &str, metadata_path: &str) {
        for path in [session_path, metadata_path] {
            if let Err(e) = tokio::fs::remove_file(Path::new(path)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove artifact {path}: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_upload() {
        assert_eq!(classify_upload("acc1.session"), Some(ArtifactKind::Session));
        assert_eq!(classify_upload("ACC1.SESSION"), Some(ArtifactKind::Session));
        assert_eq!(classify_upload("meta.json"), Some(ArtifactKind::Metadata));
        assert_eq!(classify_upload("notes.txt"), None);
        assert_eq!(classify_upload("session"), None);
    }

    #[test]
    fn test_parse_metadata_extracts_known_fields() {
        let meta = parse_metadata(
            br#"{"phone_number": "+123456", "username": "acc", "extra": 42}"#,
        )
        .expect("parse failed");
        assert_eq!(meta.phone_number.as_deref(), Some("+123456"));
        assert_eq!(meta.username.as_deref(), Some("acc"));
        assert!(meta.first_name.is_none());
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(parse_metadata(b"not json at all").is_err());
        assert!(parse_metadata(b"").is_err());
    }

    #[test]
    fn test_artifact_hash_is_tenant_and_time_scoped() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let at = Utc::now();
        assert_eq!(artifact_hash(tenant, at), artifact_hash(tenant, at));
        assert_ne!(artifact_hash(tenant, at), artifact_hash(other, at));
        assert_eq!(artifact_hash(tenant, at).len(), 32);
    }

    #[tokio::test]
    async fn test_store_and_remove_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = ArtifactStore::new(dir.path());
        let tenant = Uuid::new_v4();

        let stored = store
            .store(tenant, b"session-bytes", br#"{"username":"acc"}"#)
            .await
            .expect("store failed");

        assert!(Path::new(&stored.session_path).exists());
        assert!(Path::new(&stored.metadata_path).exists());
        assert!(stored.session_path.contains(&tenant.to_string()));

        store.remove(&stored.session_path, &stored.metadata_path).await;
        assert!(!Path::new(&stored.session_path).exists());
        assert!(!Path::new(&stored.metadata_path).exists());

        // Second removal is a no-op.
        store.remove(&stored.session_path, &stored.metadata_path).await;
    }
}
