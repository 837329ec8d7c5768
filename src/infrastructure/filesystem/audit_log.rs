//! Audit trail of provisioning actions.
//!
//! One entry per provisioning attempt, rollback deletion, git connect and
//! promotion. Entries carry names, kinds and remote ids only; tokens and
//! secrets never reach an [`AuditSink`].

use crate::common::result::{DeployResult, ResultExt};
use crate::domain::entities::ResourceKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Provision,
    Delete,
    GitConnect,
    Promote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    AlreadyExists,
    Skipped,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
    /// Human-readable subject, e.g. `item Notebook 'ingest'`.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEntry {
    pub fn new(
        run_id: impl Into<String>,
        action: AuditAction,
        subject: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.into(),
            action,
            kind: None,
            subject: subject.into(),
            remote_id: None,
            outcome,
            message: None,
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_remote_id(mut self, remote_id: Option<impl Into<String>>) -> Self {
        self.remote_id = remote_id.map(Into::into);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> DeployResult<()>;
}

/// Emits audit entries as structured `tracing` events.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> DeployResult<()> {
        info!(
            target: "fabdeploy::audit",
            run_id = %entry.run_id,
            action = ?entry.action,
            subject = %entry.subject,
            remote_id = entry.remote_id.as_deref().unwrap_or("-"),
            outcome = ?entry.outcome,
            message = entry.message.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesAuditLog {
    path: PathBuf,
}

impl JsonLinesAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditLog {
    async fn record(&self, entry: &AuditEntry) -> DeployResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_filesystem_error("Failed to create audit log directory", Some(parent.to_path_buf()))?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_filesystem_error("Failed to open audit log", Some(self.path.clone()))?;
        file.write_all(line.as_bytes())
            .await
            .with_filesystem_error("Failed to append audit entry", Some(self.path.clone()))?;
        file.flush()
            .await
            .with_filesystem_error("Failed to flush audit log", Some(self.path.clone()))?;
        Ok(())
    }
}
