//! Run bookkeeping around the provisioning client.
//!
//! Every resource created during the run is appended to the
//! [`DeploymentRecord`] and checkpointed before the next step starts. When a
//! step fails the run is marked `Failed` and, if rollback is enabled, the
//! record is walked last-to-first issuing best-effort deletes. A finished walk
//! always ends in `RolledBack`; deletions that failed stay in the checkpoint
//! for a later `fabdeploy rollback`. The triggering error is always handed
//! back unchanged inside [`DeploymentFailure`].

use crate::application::services::git_connection::GitConnectResult;
use crate::application::services::provisioning_client::{EnsureOutcome, EnsureStatus, ProvisioningClient, WorkspaceRef};
use crate::common::error::DeployError;
use crate::common::result::{DeployResult, DeployResultExt, OptionExt};
use crate::domain::entities::{DeploymentRecord, DeploymentStatus, RecordEntry, ResourceKind, ResourceSpec};
use crate::infrastructure::filesystem::{AuditAction, AuditEntry, AuditOutcome, AuditSink, CheckpointStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionOutcome {
    pub spec: ResourceSpec,
    pub outcome: EnsureOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollbackFailure {
    pub entry: RecordEntry,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    pub all_succeeded: bool,
    /// Deleted entries, in deletion order
    pub deleted: Vec<RecordEntry>,
    pub failures: Vec<RollbackFailure>,
}

#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub run_id: String,
    pub status: DeploymentStatus,
    pub record: DeploymentRecord,
    pub outcomes: Vec<ProvisionOutcome>,
    pub rollback: Option<RollbackReport>,
    pub git: Option<GitConnectResult>,
}

impl DeploymentReport {
    pub fn count(&self, status: EnsureStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.status == status)
            .count()
    }
}

/// A failed run: the original error plus everything that happened before and after it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DeploymentFailure {
    #[source]
    pub error: DeployError,
    pub report: DeploymentReport,
}

pub struct DeploymentStateManager {
    client: Arc<ProvisioningClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    rollback_on_failure: bool,
    record: DeploymentRecord,
    outcomes: Vec<ProvisionOutcome>,
}

impl DeploymentStateManager {
    pub fn new(
        client: Arc<ProvisioningClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        target: &str,
    ) -> Self {
        Self::from_record(client, checkpoints, audit, DeploymentRecord::new(target))
    }

    /// Manager for a record loaded from a checkpoint, used for offline rollback.
    pub fn from_record(
        client: Arc<ProvisioningClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        record: DeploymentRecord,
    ) -> Self {
        Self {
            client,
            checkpoints,
            audit,
            rollback_on_failure: true,
            record,
            outcomes: Vec::new(),
        }
    }

    pub fn with_rollback(mut self, rollback_on_failure: bool) -> Self {
        self.rollback_on_failure = rollback_on_failure;
        self
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    pub fn client(&self) -> &Arc<ProvisioningClient> {
        &self.client
    }

    /// Start the run, adopting the entries of an interrupted run for the same target.
    pub async fn begin(&mut self) -> DeployResult<()> {
        if let Some(previous) = self.checkpoints.load(self.record.target()).await? {
            if !previous.target().eq_ignore_ascii_case(self.record.target()) {
                return Err(DeployError::config_error(format!(
                    "Checkpoint for '{}' belongs to workspace '{}'; refusing to adopt it",
                    self.record.target(),
                    previous.target()
                )));
            }
            if previous.needs_cleanup() {
                info!(
                    previous_run = %previous.run_id(),
                    entries = previous.len(),
                    status = %previous.status(),
                    "resuming from checkpoint"
                );
                self.record.adopt(previous);
            }
        }

        self.record.transition(DeploymentStatus::InProgress)?;
        self.checkpoints.save(&self.record).await?;
        info!(run_id = %self.record.run_id(), target = %self.record.target(), "deployment started");
        Ok(())
    }

    /// Ensure one resource; created resources are recorded and checkpointed.
    ///
    /// `workspace` is required for everything but the workspace itself.
    pub async fn provision(
        &mut self,
        workspace: Option<&WorkspaceRef>,
        spec: &ResourceSpec,
    ) -> DeployResult<EnsureOutcome> {
        let result = self.ensure(workspace, spec).await;

        match result {
            Ok(outcome) => {
                if outcome.is_created() {
                    let remote_id = outcome
                        .remote_id
                        .clone()
                        .ok_or_internal_error(format!("{} was created without an id", spec.label()))?;
                    let entry = RecordEntry::new(spec.clone(), remote_id, workspace.map(|w| w.id.clone()));
                    self.record.append(entry)?;
                    self.checkpoints.save(&self.record).await?;
                }

                let audit_outcome = match outcome.status {
                    EnsureStatus::Created => AuditOutcome::Success,
                    EnsureStatus::AlreadyExists => AuditOutcome::AlreadyExists,
                    EnsureStatus::SkippedSelf => AuditOutcome::Skipped,
                };
                self.audit(
                    AuditEntry::new(self.record.run_id(), AuditAction::Provision, spec.label(), audit_outcome)
                        .with_kind(spec.kind)
                        .with_remote_id(outcome.remote_id.clone()),
                )
                .await;

                self.outcomes.push(ProvisionOutcome {
                    spec: spec.clone(),
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                self.audit(
                    AuditEntry::new(self.record.run_id(), AuditAction::Provision, spec.label(), AuditOutcome::Failure)
                        .with_kind(spec.kind)
                        .with_message(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn ensure(&self, workspace: Option<&WorkspaceRef>, spec: &ResourceSpec) -> DeployResult<EnsureOutcome> {
        if spec.kind == ResourceKind::Workspace {
            return self.client.ensure_workspace(spec).await;
        }

        let workspace = workspace.ok_or_internal_error(format!("{} needs a workspace", spec.label()))?;
        match spec.kind {
            ResourceKind::Folder => self.client.ensure_folder(workspace, spec).await,
            ResourceKind::Item => self.client.ensure_item(workspace, spec).await,
            _ => self.client.ensure_access_grant(workspace, spec).await,
        }
    }

    pub async fn assign_capacity(&mut self, workspace: &WorkspaceRef, capacity_id: &str) -> DeployResult<()> {
        let result = self.client.assign_capacity(workspace, capacity_id).await;
        let outcome = if result.is_ok() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        let mut entry = AuditEntry::new(
            self.record.run_id(),
            AuditAction::Provision,
            format!("capacity '{}' for workspace '{}'", capacity_id, workspace.name),
            outcome,
        )
        .with_kind(ResourceKind::Workspace)
        .with_remote_id(Some(workspace.id.clone()));
        if let Err(e) = &result {
            entry = entry.with_message(e.to_string());
        }
        self.audit(entry).await;
        result
    }

    /// Record the outcome of the git step in the audit trail.
    pub async fn record_git(&self, workspace: &WorkspaceRef, result: &DeployResult<GitConnectResult>) {
        let (outcome, message) = match result {
            Ok(r) if r.no_change || r.already_connected => (AuditOutcome::AlreadyExists, None),
            Ok(_) => (AuditOutcome::Success, None),
            Err(e) => (AuditOutcome::Failure, Some(e.to_string())),
        };
        let mut entry = AuditEntry::new(
            self.record.run_id(),
            AuditAction::GitConnect,
            format!("git binding of workspace '{}'", workspace.name),
            outcome,
        )
        .with_remote_id(Some(workspace.id.clone()));
        if let Some(message) = message {
            entry = entry.with_message(message);
        }
        self.audit(entry).await;
    }

    /// Finish the run successfully and drop its checkpoint.
    pub async fn complete(mut self, git: Option<GitConnectResult>) -> Result<DeploymentReport, DeploymentFailure> {
        if let Err(error) = self.record.transition(DeploymentStatus::Completed) {
            return Err(DeploymentFailure {
                error,
                report: self.into_report(None, git),
            });
        }
        self.checkpoints
            .remove(self.record.target())
            .await
            .ok_logged("remove checkpoint");
        info!(
            run_id = %self.record.run_id(),
            created = self.record.len(),
            outcomes = self.outcomes.len(),
            "deployment completed"
        );
        Ok(self.into_report(None, git))
    }

    /// Fail the run, unwinding it when rollback is enabled.
    pub async fn abort(mut self, error: DeployError, git: Option<GitConnectResult>) -> DeploymentFailure {
        error!(run_id = %self.record.run_id(), error = %error, "deployment failed");

        let rollback = match self.record.fail(&error) {
            Ok(()) => {
                self.checkpoints.save(&self.record).await.ok_logged("save checkpoint");
                if self.rollback_on_failure {
                    Some(self.rollback().await)
                } else {
                    if !self.record.is_empty() {
                        warn!(
                            entries = self.record.len(),
                            "rollback disabled; checkpoint kept for later cleanup"
                        );
                    }
                    None
                }
            }
            Err(e) => {
                warn!(error = %e, "run never started; nothing to unwind");
                None
            }
        };

        DeploymentFailure {
            error,
            report: self.into_report(rollback, git),
        }
    }

    /// Delete every recorded resource not yet deleted, newest first.
    ///
    /// Individual failures are logged and collected in the report. Each
    /// deletion is checkpointed as it happens, and the record ends in
    /// `RolledBack` whether or not every deletion succeeded.
    pub async fn rollback(&mut self) -> RollbackReport {
        let entries: Vec<RecordEntry> = self.record.rollback_order().cloned().collect();
        info!(run_id = %self.record.run_id(), entries = entries.len(), "rolling back");

        let mut report = RollbackReport::default();
        for entry in entries {
            let label = entry.spec.label();
            match self.client.delete_entry(&entry).await {
                Ok(()) => {
                    info!(resource = %label, id = %entry.remote_id, "deleted");
                    self.audit(
                        AuditEntry::new(self.record.run_id(), AuditAction::Delete, label, AuditOutcome::Success)
                            .with_kind(entry.spec.kind)
                            .with_remote_id(Some(entry.remote_id.clone())),
                    )
                    .await;
                    self.record.mark_deleted(&entry);
                    self.checkpoints.save(&self.record).await.ok_logged("save checkpoint");
                    report.deleted.push(entry);
                }
                Err(e) => {
                    warn!(resource = %label, id = %entry.remote_id, error = %e, "rollback deletion failed");
                    self.audit(
                        AuditEntry::new(self.record.run_id(), AuditAction::Delete, label, AuditOutcome::Failure)
                            .with_kind(entry.spec.kind)
                            .with_remote_id(Some(entry.remote_id.clone()))
                            .with_message(e.to_string()),
                    )
                    .await;
                    report.failures.push(RollbackFailure {
                        entry,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.all_succeeded = report.failures.is_empty();
        if self.record.status() != DeploymentStatus::RolledBack {
            if let Err(e) = self.record.transition(DeploymentStatus::RolledBack) {
                warn!(error = %e, "could not mark run rolled back");
            }
        }

        if report.all_succeeded {
            self.checkpoints
                .remove(self.record.target())
                .await
                .ok_logged("remove checkpoint");
        } else {
            warn!(
                failed = report.failures.len(),
                "rollback incomplete; undeleted entries kept for a later retry"
            );
            self.checkpoints.save(&self.record).await.ok_logged("save checkpoint");
        }
        report
    }

    async fn audit(&self, entry: AuditEntry) {
        self.audit.record(&entry).await.ok_logged("write audit entry");
    }

    fn into_report(self, rollback: Option<RollbackReport>, git: Option<GitConnectResult>) -> DeploymentReport {
        DeploymentReport {
            run_id: self.record.run_id().to_string(),
            status: self.record.status(),
            record: self.record,
            outcomes: self.outcomes,
            rollback,
            git,
        }
    }
}
