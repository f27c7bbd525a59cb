//! Optional JSON persistence for scan reports.
//!
//! The runtime itself keeps no durable state; this collaborator snapshots
//! reports under an application data directory using the envelope
//! `{version, created_at, checksum, payload}` and verifies the checksum on
//! load.

use crate::{scan::ScanReport, AssistError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    checksum: u32,
    payload: serde_json::Value,
}

pub struct ReportSnapshotStore {
    directory: PathBuf,
}

impl ReportSnapshotStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, report_id: uuid::Uuid) -> PathBuf {
        self.directory.join(format!("scan-{report_id}.json"))
    }

    fn checksum(payload: &str) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(payload.as_bytes());
        crc.sum()
    }

    /// Persist a report snapshot. Returns the file path written.
    pub async fn save(&self, report: &ScanReport) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                AssistError::Internal(anyhow::anyhow!(
                    "cannot create snapshot directory {}: {e}",
                    self.directory.display()
                ))
            })?;

        let payload = serde_json::to_value(report)?;
        let payload_text = serde_json::to_string(&payload)?;
        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            created_at: chrono::Utc::now(),
            checksum: Self::checksum(&payload_text),
            payload,
        };

        let path = self.path_for(report.id);
        let body = serde_json::to_string_pretty(&envelope)?;
        tokio::fs::write(&path, body).await.map_err(|e| {
            AssistError::Internal(anyhow::anyhow!(
                "cannot write snapshot {}: {e}",
                path.display()
            ))
        })?;

        info!("Snapshotted scan report {} to {}", report.id, path.display());
        Ok(path)
    }

    /// Load and verify a snapshot.
    pub async fn load(&self, path: &Path) -> Result<ScanReport> {
        let body = tokio::fs::read_to_string(path).await.map_err(|e| {
            AssistError::NotFound(format!("snapshot {} unreadable: {e}", path.display()))
        })?;
        let envelope: SnapshotEnvelope = serde_json::from_str(&body)?;

        if envelope.version != SNAPSHOT_VERSION {
            return Err(AssistError::Validation(format!(
                "unsupported snapshot version {}",
                envelope.version
            )));
        }

        let payload_text = serde_json::to_string(&envelope.payload)?;
        let computed = Self::checksum(&payload_text);
        if computed != envelope.checksum {
            return Err(AssistError::Validation(format!(
                "snapshot {} failed integrity check (expected {:08x}, got {:08x})",
                path.display(),
                envelope.checksum,
                computed
            )));
        }

        debug!("Loaded snapshot {}", path.display());
        Ok(serde_json::from_value(envelope.payload)?)
    }

    /// List snapshot files in the store, newest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(_) => return Ok(paths),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.reverse();
        Ok(paths)
    }
}
