//! # Patch Pipeline
//!
//! Session-generated changes to configured target files, held for operator
//! approval. At most one proposal is pending at a time; a second proposal is
//! rejected rather than replacing the first.
//!
//! ```text
//!   propose ──▶ clone written + validated ──▶ Pending ──deploy──▶ Deployed
//!                        │                       │
//!                        ▼                       └────drop────▶ Dropped
//!                   rejected (clone removed, slot stays free)
//! ```
//!
//! The live target is only written inside `deploy`, in one atomic rename.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_config::schema::PatchConfig;
use tether_core::{Event, EventBus, PatchId, TetherError};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Deployed,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchProposal {
    pub id: PatchId,
    pub target_id: String,
    pub target_path: PathBuf,
    pub clone_path: PathBuf,
    pub description: String,
    pub size_bytes: usize,
    pub status: PatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Slot {
    pending: Option<PatchProposal>,
    history: Vec<PatchProposal>,
}

pub struct PatchPipeline {
    config: PatchConfig,
    slot: Mutex<Slot>,
    events: EventBus,
}

impl PatchPipeline {
    pub fn new(config: PatchConfig, events: EventBus) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::default()),
            events,
        }
    }

    /// Configured target ids, sorted.
    pub fn targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.config.targets.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn pending(&self) -> Option<PatchProposal> {
        self.slot.lock().await.pending.clone()
    }

    /// Resolved proposals, oldest first.
    pub async fn history(&self) -> Vec<PatchProposal> {
        self.slot.lock().await.history.clone()
    }

    /// Materialize `content` as a clone of the target and hold it for approval.
    pub async fn propose(
        &self,
        target_id: &str,
        content: &str,
        description: &str,
    ) -> tether_core::Result<PatchProposal> {
        let mut slot = self.slot.lock().await;

        if let Some(pending) = &slot.pending {
            info!(pending = %pending.id, target = target_id, "proposal rejected, slot busy");
            self.events.publish(Event::PatchRejected {
                target: target_id.to_string(),
                reason: format!("proposal {} is still pending", pending.id),
            });
            return Err(TetherError::PatchBusy {
                pending: pending.id,
            });
        }

        let Some(target_path) = self.config.targets.get(target_id).cloned() else {
            self.events.publish(Event::PatchRejected {
                target: target_id.to_string(),
                reason: "unknown target".into(),
            });
            return Err(TetherError::PatchTargetUnknown(target_id.to_string()));
        };

        // Oversized content never reaches the filesystem.
        if content.len() > self.config.max_content_bytes {
            let reason = format!(
                "content is {} bytes, limit is {}",
                content.len(),
                self.config.max_content_bytes
            );
            warn!(target = target_id, %reason, "proposal failed validation");
            self.events.publish(Event::PatchRejected {
                target: target_id.to_string(),
                reason: reason.clone(),
            });
            return Err(TetherError::PatchValidation(reason));
        }

        let id = Uuid::new_v4();
        let file_name = target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "target".into());
        tokio::fs::create_dir_all(&self.config.clone_dir).await?;
        let clone_path = self.config.clone_dir.join(format!("{id}-{file_name}"));
        tokio::fs::write(&clone_path, content).await?;

        let limit = Duration::from_secs(self.config.validation_timeout_secs);
        let verdict = match tokio::time::timeout(
            limit,
            validate_clone(&clone_path, self.config.max_content_bytes),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_) => Err(format!("validation timed out after {}s", limit.as_secs())),
        };

        if let Err(reason) = verdict {
            if let Err(e) = tokio::fs::remove_file(&clone_path).await {
                warn!(clone = ?clone_path, error = %e, "failed to remove rejected clone");
            }
            warn!(target = target_id, %reason, "proposal failed validation");
            self.events.publish(Event::PatchRejected {
                target: target_id.to_string(),
                reason: reason.clone(),
            });
            return Err(TetherError::PatchValidation(reason));
        }

        let proposal = PatchProposal {
            id,
            target_id: target_id.to_string(),
            target_path,
            clone_path,
            description: description.to_string(),
            size_bytes: content.len(),
            status: PatchStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        slot.pending = Some(proposal.clone());
        info!(patch_id = %id, target = target_id, "patch proposed");
        self.events.publish(Event::PatchProposed {
            patch_id: id,
            target: target_id.to_string(),
        });
        Ok(proposal)
    }

    /// Atomically replace the live target with the pending clone.
    pub async fn deploy(&self, id: PatchId) -> tether_core::Result<PatchProposal> {
        let mut slot = self.slot.lock().await;
        let proposal = match &slot.pending {
            Some(p) if p.id == id => p.clone(),
            _ => return Err(TetherError::PatchNotFound(id)),
        };

        let bytes = tokio::fs::read(&proposal.clone_path).await?;
        let target = proposal.target_path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .map_err(|e| TetherError::Io(std::io::Error::other(e)))??;

        remove_clone(&proposal.clone_path).await;
        let resolved = resolve(proposal, PatchStatus::Deployed);
        slot.pending = None;
        slot.history.push(resolved.clone());

        info!(patch_id = %id, target = %resolved.target_id, "patch deployed");
        self.events.publish(Event::PatchDeployed {
            patch_id: id,
            target: resolved.target_id.clone(),
        });
        Ok(resolved)
    }

    /// Discard the pending clone; the live target is left untouched.
    pub async fn drop(&self, id: PatchId) -> tether_core::Result<PatchProposal> {
        let mut slot = self.slot.lock().await;
        let proposal = match slot.pending.take() {
            Some(p) if p.id == id => p,
            other => {
                slot.pending = other;
                return Err(TetherError::PatchNotFound(id));
            }
        };

        remove_clone(&proposal.clone_path).await;
        let resolved = resolve(proposal, PatchStatus::Dropped);
        slot.history.push(resolved.clone());

        info!(patch_id = %id, target = %resolved.target_id, "patch dropped");
        self.events.publish(Event::PatchDropped {
            patch_id: id,
            target: resolved.target_id.clone(),
        });
        Ok(resolved)
    }
}

fn resolve(mut proposal: PatchProposal, status: PatchStatus) -> PatchProposal {
    proposal.status = status;
    proposal.resolved_at = Some(Utc::now());
    proposal
}

async fn remove_clone(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(clone = ?path, error = %e, "failed to remove patch clone");
    }
}

/// Check the clone as written to disk.
async fn validate_clone(path: &Path, max_bytes: usize) -> Result<(), String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("clone is unreadable: {e}"))?;
    if content.trim().is_empty() {
        return Err("content is empty".into());
    }
    if content.len() > max_bytes {
        return Err(format!(
            "content is {} bytes, limit is {max_bytes}",
            content.len()
        ));
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<serde_json::Value>(&content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {e}")),
        Some("toml") => toml::from_str::<toml::Table>(&content)
            .map(|_| ())
            .map_err(|e| format!("invalid TOML: {e}")),
        _ => Ok(()),
    }
}

/// Write to a sibling temp file, sync it, then rename over the target.
fn atomic_write(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
