//! Deploy one resolved document: workspace, capacity, folders, items, access
//! grants, git binding and, when declared, the deployment pipeline.
//!
//! Steps run strictly in that order on the calling task. The first failing
//! step aborts the run through [`DeploymentStateManager::abort`], which
//! unwinds what this run created when rollback is enabled.

use crate::application::services::{
    DeploymentFailure, DeploymentReport, DeploymentStateManager, GitConnectResult, GitConnectionManager,
    GitCredentials, PromotionEngine, ProvisioningClient, Retrier, WorkspaceRef,
};
use crate::common::cancellation::CancellationSignal;
use crate::common::result::{DeployResult, OptionExt, ResultExt};
use crate::domain::entities::DeploymentConfig;
use crate::infrastructure::filesystem::{AuditSink, CheckpointStore};
use crate::infrastructure::platform::PlatformApi;
use crate::infrastructure::process::{CliRunner, FabCli};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Run settings that do not come from the deployment document.
#[derive(Debug, Clone, Default)]
pub struct DeployWorkspaceConfig {
    /// Overrides `deployment.rollback_on_failure` when set
    pub rollback_on_failure: Option<bool>,

    /// Identity the engine authenticates as; grants to it are skipped
    pub self_principal_id: Option<String>,

    /// Leave the declared pipeline alone
    pub skip_pipeline: bool,
}

impl DeployWorkspaceConfig {
    pub fn with_rollback(mut self, rollback_on_failure: Option<bool>) -> Self {
        self.rollback_on_failure = rollback_on_failure;
        self
    }

    pub fn with_self_principal(mut self, principal_id: Option<String>) -> Self {
        self.self_principal_id = principal_id;
        self
    }

    pub fn with_skip_pipeline(mut self, skip_pipeline: bool) -> Self {
        self.skip_pipeline = skip_pipeline;
        self
    }
}

pub struct DeployWorkspaceUseCase {
    api: Arc<dyn PlatformApi>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationSignal,
    cli: Option<Arc<dyn CliRunner>>,
    config: DeployWorkspaceConfig,
}

impl DeployWorkspaceUseCase {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        config: DeployWorkspaceConfig,
    ) -> Self {
        Self {
            api,
            checkpoints,
            audit,
            cancel: CancellationSignal::new(),
            cli: None,
            config,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runner for CLI-only item types; defaults to the document's `cli_tool`.
    pub fn with_cli_runner(mut self, cli: Arc<dyn CliRunner>) -> Self {
        self.cli = Some(cli);
        self
    }

    pub async fn execute(&self, document: &DeploymentConfig) -> Result<DeploymentReport, DeploymentFailure> {
        let settings = &document.deployment;
        let retrier = Retrier::new(settings.retry.to_policy());

        let mut client = ProvisioningClient::new(self.api.clone(), retrier.clone(), self.cancel.clone())
            .with_self_principal(self.config.self_principal_id.clone())
            .with_skip_self_grant(settings.skip_self_grant);
        if !settings.cli_fallback_item_types.is_empty() {
            let cli = self
                .cli
                .clone()
                .unwrap_or_else(|| Arc::new(FabCli::with_executable(settings.cli_tool.clone())) as Arc<dyn CliRunner>);
            client = client.with_cli_fallback(cli, settings.cli_fallback_item_types.clone());
        }

        let rollback = self
            .config
            .rollback_on_failure
            .unwrap_or(settings.rollback_on_failure);
        let mut state = DeploymentStateManager::new(
            Arc::new(client),
            self.checkpoints.clone(),
            self.audit.clone(),
            &document.workspace.name,
        )
        .with_rollback(rollback);

        if let Err(e) = state.begin().await {
            return Err(state.abort(e, None).await);
        }

        match self.run_steps(&mut state, document, &retrier).await {
            Ok(git) => state.complete(git).await,
            Err(e) => Err(state.abort(e, None).await),
        }
    }

    async fn run_steps(
        &self,
        state: &mut DeploymentStateManager,
        document: &DeploymentConfig,
        retrier: &Retrier,
    ) -> DeployResult<Option<GitConnectResult>> {
        let specs = document.resource_specs();
        let (workspace_spec, contents) = specs
            .split_first()
            .ok_or_internal_error("deployment document produced no workspace")?;

        let outcome = state.provision(None, workspace_spec).await?;
        let workspace_id = outcome
            .remote_id
            .ok_or_internal_error(format!("no id for workspace '{}'", workspace_spec.name))?;
        let workspace = WorkspaceRef::new(workspace_id, &document.workspace.name);

        if let Some(capacity_id) = &document.workspace.capacity_id {
            state.assign_capacity(&workspace, capacity_id).await?;
        }

        for spec in contents {
            self.cancel.check()?;
            state.provision(Some(&workspace), spec).await?;
        }

        let git = match &document.git {
            Some(git_config) => {
                let binding = git_config.binding().with_config_error("Invalid git binding")?;
                let credentials = GitCredentials::new(git_config.connection_name())
                    .with_access_token(git_config.access_token.clone());
                let manager = GitConnectionManager::new(self.api.clone(), retrier.clone(), self.cancel.clone());

                let result = manager.connect(&workspace.id, &binding, &credentials).await;
                state.record_git(&workspace, &result).await;
                Some(result?)
            }
            None => None,
        };

        if let Some(pipeline_config) = document.pipeline.as_ref().filter(|_| !self.config.skip_pipeline) {
            let pipeline = pipeline_config.to_pipeline();
            let mut workspace_ids = HashMap::new();
            for stage in pipeline.stages() {
                if stage.workspace_name.eq_ignore_ascii_case(&workspace.name) {
                    workspace_ids.insert(stage.workspace_name.clone(), workspace.id.clone());
                } else if let Some(id) = state.client().find_workspace_id(&stage.workspace_name).await? {
                    workspace_ids.insert(stage.workspace_name.clone(), id);
                } else {
                    debug!(stage = %stage.name, workspace = %stage.workspace_name, "stage workspace not deployed yet");
                }
            }

            let engine = PromotionEngine::new(self.api.clone(), retrier.clone(), self.cancel.clone());
            let resolved = engine.ensure_pipeline(&pipeline, &workspace_ids).await?;
            info!(
                pipeline = %resolved.name,
                id = resolved.id.as_deref().unwrap_or_default(),
                assigned = workspace_ids.len(),
                "deployment pipeline ready"
            );
        }

        Ok(git)
    }
}
