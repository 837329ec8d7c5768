//! Deployment run state: the status machine and the append-only record of
//! resources created during the run.
//!
//! The record doubles as the rollback stack. It is serialized as-is to the
//! checkpoint store after every append and every rollback deletion, so a
//! crashed run can be resumed or unwound later without listing remote
//! resources. Entries are never removed; a deleted entry is marked and
//! skipped by every later rollback.

use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::entities::resource::ResourceSpec;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "Pending",
            DeploymentStatus::InProgress => "InProgress",
            DeploymentStatus::Completed => "Completed",
            DeploymentStatus::Failed => "Failed",
            DeploymentStatus::RolledBack => "RolledBack",
        }
    }

    /// `Completed` and `RolledBack` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::RolledBack)
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource created by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub spec: ResourceSpec,
    pub remote_id: String,
    /// Remote id of the containing workspace; None for the workspace itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once rollback deleted the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordEntry {
    pub fn new(spec: ResourceSpec, remote_id: impl Into<String>, workspace_id: Option<String>) -> Self {
        Self {
            spec,
            remote_id: remote_id.into(),
            workspace_id,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn same_resource(&self, other: &RecordEntry) -> bool {
        self.spec.kind == other.spec.kind && self.remote_id == other.remote_id
    }
}

/// Ordered, append-only list of created resources plus run status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    run_id: String,
    /// Name of the target workspace; one checkpoint exists per target.
    target: String,
    status: DeploymentStatus,
    entries: Vec<RecordEntry>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl DeploymentRecord {
    pub fn new(target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: generate_run_id(now),
            target: target.into(),
            status: DeploymentStatus::Pending,
            entries: Vec::new(),
            started_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries not yet deleted by a rollback.
    pub fn remaining(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_deleted()).count()
    }

    /// The checkpoint still owns remote resources this tool created.
    pub fn needs_cleanup(&self) -> bool {
        match self.status {
            DeploymentStatus::InProgress | DeploymentStatus::Failed => true,
            DeploymentStatus::RolledBack => self.remaining() > 0,
            DeploymentStatus::Pending | DeploymentStatus::Completed => false,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Move to `next`, rejecting anything outside the allowed edges.
    pub fn transition(&mut self, next: DeploymentStatus) -> DeployResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `Failed` and remember why.
    pub fn fail(&mut self, error: &DeployError) -> DeployResult<()> {
        self.transition(DeploymentStatus::Failed)?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// Append a created resource. Only an in-progress run records entries.
    pub fn append(&mut self, entry: RecordEntry) -> DeployResult<()> {
        if self.status != DeploymentStatus::InProgress {
            return Err(DeployError::InvalidStateTransition {
                from: self.status.to_string(),
                to: format!("append {}", entry.spec.label()),
            });
        }
        self.entries.push(entry);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Take over the live entries of an interrupted run for the same target.
    pub fn adopt(&mut self, previous: DeploymentRecord) {
        let mut entries = previous.entries;
        entries.retain(|e| !e.is_deleted());
        entries.append(&mut self.entries);
        self.entries = entries;
        self.updated_at = Utc::now();
    }

    /// Mark a rolled-back entry so no later pass deletes it again.
    pub fn mark_deleted(&mut self, entry: &RecordEntry) {
        let now = Utc::now();
        if let Some(found) = self
            .entries
            .iter_mut()
            .find(|e| !e.is_deleted() && e.same_resource(entry))
        {
            found.deleted_at = Some(now);
            self.updated_at = now;
        }
    }

    /// Entries still to delete, in reverse creation order.
    pub fn rollback_order(&self) -> impl Iterator<Item = &RecordEntry> {
        self.entries.iter().rev().filter(|e| !e.is_deleted())
    }

    /// Remote id of the target workspace when this run created it.
    pub fn created_workspace_id(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.workspace_id.is_none() && !e.is_deleted())
            .map(|e| e.remote_id.as_str())
    }
}

fn generate_run_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("{}-{:06x}", now.format("%Y%m%dT%H%M%SZ"), suffix)
}
