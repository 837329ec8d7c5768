use crate::application::services::{PromotionEngine, PromotionOptions, PromotionResult, Retrier};
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::{DeployResult, DeployResultExt};
use crate::domain::entities::DeploymentConfig;
use crate::infrastructure::filesystem::{AuditAction, AuditEntry, AuditOutcome, AuditSink};
use crate::infrastructure::platform::PlatformApi;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What to promote and how.
#[derive(Debug, Clone, Default)]
pub struct PromoteStageConfig {
    pub source: String,
    pub target: String,

    /// Permit skipping intermediate stages
    pub allow_skip: bool,

    pub note: Option<String>,

    /// Create the pipeline and assign stage workspaces before promoting
    pub ensure_pipeline: bool,
}

impl PromoteStageConfig {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_allow_skip(mut self, allow_skip: bool) -> Self {
        self.allow_skip = allow_skip;
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_ensure_pipeline(mut self, ensure_pipeline: bool) -> Self {
        self.ensure_pipeline = ensure_pipeline;
        self
    }
}

pub struct PromoteStageUseCase {
    api: Arc<dyn PlatformApi>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationSignal,
    config: PromoteStageConfig,
}

impl PromoteStageUseCase {
    pub fn new(api: Arc<dyn PlatformApi>, audit: Arc<dyn AuditSink>, config: PromoteStageConfig) -> Self {
        Self {
            api,
            audit,
            cancel: CancellationSignal::new(),
            config,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn execute(&self, document: &DeploymentConfig) -> DeployResult<PromotionResult> {
        let pipeline_config = document.pipeline.as_ref().ok_or_else(|| {
            DeployError::config_error("The deployment document declares no pipeline")
        })?;
        let mut pipeline = pipeline_config.to_pipeline();

        // Rejected transitions never reach the platform.
        pipeline.validate_transition(&self.config.source, &self.config.target, self.config.allow_skip)?;

        let options = PromotionOptions::from(&pipeline_config.promotion)
            .with_allow_skip(self.config.allow_skip)
            .with_note(self.config.note.clone());
        let retrier = Retrier::new(document.deployment.retry.to_policy());
        let engine = PromotionEngine::new(self.api.clone(), retrier.clone(), self.cancel.clone());

        if self.config.ensure_pipeline {
            let workspace_ids = self.stage_workspace_ids(&retrier).await?;
            pipeline = engine.ensure_pipeline(&pipeline, &workspace_ids).await?;
        }

        let result = engine
            .promote(&pipeline, &self.config.source, &self.config.target, &options)
            .await;
        self.record(&pipeline.name, &result).await;

        let result = result?;
        info!(
            pipeline = %pipeline.name,
            source = %self.config.source,
            target = %self.config.target,
            status = %result.status,
            polls = result.polls,
            "promotion finished"
        );
        Ok(result)
    }

    async fn stage_workspace_ids(&self, retrier: &Retrier) -> DeployResult<HashMap<String, String>> {
        let workspaces = retrier
            .run("list_workspaces", &self.cancel, || self.api.list_workspaces())
            .await?;
        debug!(count = workspaces.len(), "workspaces listed for stage assignment");
        Ok(workspaces
            .into_iter()
            .map(|w| (w.display_name, w.id))
            .collect())
    }

    async fn record(&self, pipeline: &str, result: &DeployResult<PromotionResult>) {
        let subject = format!(
            "pipeline '{}' {} -> {}",
            pipeline, self.config.source, self.config.target
        );
        let run_id = format!("promote-{}", Utc::now().format("%Y%m%dT%H%M%SZ"));

        let entry = match result {
            Ok(r) => AuditEntry::new(run_id, AuditAction::Promote, subject, AuditOutcome::Success)
                .with_remote_id(Some(r.operation_id.clone()))
                .with_message(r.status.to_string()),
            Err(e) => AuditEntry::new(run_id, AuditAction::Promote, subject, AuditOutcome::Failure)
                .with_message(e.to_string()),
        };
        self.audit.record(&entry).await.ok_logged("write audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::filesystem::TracingAuditSink;
    use crate::infrastructure::platform::platform_api::MockPlatformApi;

    fn document() -> DeploymentConfig {
        serde_yaml::from_str(
            r#"
workspace:
  name: analytics-dev
pipeline:
  name: analytics
  stages:
    - name: Development
      workspace: analytics-dev
    - name: Test
      workspace: analytics-test
    - name: Production
      workspace: analytics-prod
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_skipping_stage_is_rejected_without_remote_calls() {
        let api = MockPlatformApi::new();
        let use_case = PromoteStageUseCase::new(
            Arc::new(api),
            Arc::new(TracingAuditSink),
            PromoteStageConfig::new("Development", "Production"),
        );

        let result = use_case.execute(&document()).await;
        assert!(matches!(result, Err(DeployError::InvalidStageTransition { .. })));
    }

    #[tokio::test]
    async fn test_document_without_pipeline_is_config_error() {
        let document: DeploymentConfig = serde_yaml::from_str("workspace:\n  name: analytics\n").unwrap();
        let use_case = PromoteStageUseCase::new(
            Arc::new(MockPlatformApi::new()),
            Arc::new(TracingAuditSink),
            PromoteStageConfig::new("Development", "Test"),
        );

        let result = use_case.execute(&document).await;
        assert!(matches!(result, Err(DeployError::ConfigError { .. })));
    }
}
