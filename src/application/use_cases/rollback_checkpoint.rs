//! Offline rollback of a checkpoint left behind by a failed or crashed run.

use crate::application::services::{DeploymentStateManager, ProvisioningClient, Retrier, RollbackReport};
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::entities::{DeploymentRecord, DeploymentStatus};
use crate::domain::value_objects::RetryPolicy;
use crate::infrastructure::filesystem::{AuditSink, CheckpointFile, CheckpointStore, FileCheckpointStore};
use crate::infrastructure::platform::PlatformApi;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    /// Checkpoint of a target workspace in the configured store
    Target(String),
    /// Explicit checkpoint file
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RollbackCheckpointConfig {
    pub source: CheckpointSource,
    pub retry: RetryPolicy,
}

impl RollbackCheckpointConfig {
    pub fn new(source: CheckpointSource) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RollbackCheckpointResult {
    pub target: String,
    pub run_id: String,
    pub status: DeploymentStatus,
    pub report: RollbackReport,
}

pub struct RollbackCheckpointUseCase {
    api: Arc<dyn PlatformApi>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    config: RollbackCheckpointConfig,
}

impl RollbackCheckpointUseCase {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        config: RollbackCheckpointConfig,
    ) -> Self {
        Self {
            api,
            checkpoints,
            audit,
            config,
        }
    }

    pub async fn execute(&self) -> DeployResult<RollbackCheckpointResult> {
        let (mut record, checkpoints) = self.load().await?;

        match record.status() {
            DeploymentStatus::Completed => {
                return Err(DeployError::config_error(format!(
                    "Checkpoint for '{}' is {}; nothing to roll back",
                    record.target(),
                    record.status()
                )));
            }
            DeploymentStatus::RolledBack if !record.needs_cleanup() => {
                return Err(DeployError::config_error(format!(
                    "Checkpoint for '{}' is {}; nothing to roll back",
                    record.target(),
                    record.status()
                )));
            }
            DeploymentStatus::RolledBack => {
                info!(
                    target = %record.target(),
                    remaining = record.remaining(),
                    "retrying deletions left over by an earlier rollback"
                );
            }
            DeploymentStatus::Pending => {
                info!(target = %record.target(), "run never started; dropping checkpoint");
                checkpoints.remove(record.target()).await?;
                return Ok(RollbackCheckpointResult {
                    target: record.target().to_string(),
                    run_id: record.run_id().to_string(),
                    status: record.status(),
                    report: RollbackReport {
                        all_succeeded: true,
                        ..Default::default()
                    },
                });
            }
            DeploymentStatus::InProgress => {
                warn!(run_id = %record.run_id(), "checkpoint belongs to an interrupted run");
                record.fail(&DeployError::Cancelled)?;
                checkpoints.save(&record).await?;
            }
            DeploymentStatus::Failed => {}
        }

        let target = record.target().to_string();
        let run_id = record.run_id().to_string();
        let client = ProvisioningClient::new(
            self.api.clone(),
            Retrier::new(self.config.retry.clone()),
            CancellationSignal::new(),
        );
        let mut manager =
            DeploymentStateManager::from_record(Arc::new(client), checkpoints, self.audit.clone(), record);

        let report = manager.rollback().await;
        Ok(RollbackCheckpointResult {
            target,
            run_id,
            status: manager.record().status(),
            report,
        })
    }

    /// The record plus the store its checkpoint lives in.
    async fn load(&self) -> DeployResult<(DeploymentRecord, Arc<dyn CheckpointStore>)> {
        match &self.config.source {
            CheckpointSource::Target(target) => {
                let record = self.checkpoints.load(target).await?.ok_or_else(|| {
                    DeployError::config_error(format!("No checkpoint found for '{}'", target))
                })?;
                Ok((record, self.checkpoints.clone()))
            }
            CheckpointSource::Path(path) => {
                let record = FileCheckpointStore::load_path(path).await?;
                Ok((record, Arc::new(CheckpointFile::new(path.clone()))))
            }
        }
    }
}
