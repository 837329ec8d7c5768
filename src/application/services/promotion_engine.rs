//! Stage-to-stage content promotion through a deployment pipeline.
//!
//! Transitions are validated locally before any remote call. A started
//! promotion is polled in a bounded loop: each iteration sleeps the poll
//! interval (cancellable), fetches the operation through the retrier and
//! stops on a terminal status. The whole loop runs under the promotion
//! timeout.

use crate::application::services::retry::Retrier;
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::{async_helpers, DeployResult};
use crate::domain::entities::deployment_config::PromotionSettings;
use crate::domain::entities::{FailedItem, Pipeline, PipelineStage, PromotionOperation, PromotionStatus};
use crate::domain::value_objects::ItemType;
use crate::infrastructure::platform::{CreatePipelineRequest, PlatformApi, PromotionRequest, RemoteStage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PromotionOptions {
    /// Permit promoting past intermediate stages
    pub allow_skip: bool,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Item types dropped from a single re-issue after a partial success
    pub auto_exclude_item_types: Vec<ItemType>,
    pub note: Option<String>,
}

impl Default for PromotionOptions {
    fn default() -> Self {
        Self::from(&PromotionSettings::default())
    }
}

impl From<&PromotionSettings> for PromotionOptions {
    fn from(settings: &PromotionSettings) -> Self {
        Self {
            allow_skip: false,
            grace_period: Duration::from_secs(settings.grace_period_secs),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            timeout: Duration::from_secs(settings.timeout_secs),
            auto_exclude_item_types: settings.auto_exclude_item_types.clone(),
            note: None,
        }
    }
}

impl PromotionOptions {
    pub fn with_allow_skip(mut self, allow_skip: bool) -> Self {
        self.allow_skip = allow_skip;
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionResult {
    pub status: PromotionStatus,
    pub operation_id: String,
    /// Status polls across all issued operations
    pub polls: u32,
    /// The promotion was re-issued once without the excluded item types.
    pub retried: bool,
    pub excluded_item_types: Vec<ItemType>,
    pub failed_items: Vec<FailedItem>,
}

pub struct PromotionEngine {
    api: Arc<dyn PlatformApi>,
    retrier: Retrier,
    /// Start calls are only re-sent when the platform throttled them;
    /// a 5xx may arrive after the promotion was already accepted.
    start_retrier: Retrier,
    cancel: CancellationSignal,
}

impl PromotionEngine {
    pub fn new(api: Arc<dyn PlatformApi>, retrier: Retrier, cancel: CancellationSignal) -> Self {
        let start_retrier = Retrier::new(retrier.policy().clone().with_classifier(DeployError::is_throttled));
        Self {
            api,
            retrier,
            start_retrier,
            cancel,
        }
    }

    /// Promote the content of `source` into `target`.
    pub async fn promote(
        &self,
        pipeline: &Pipeline,
        source: &str,
        target: &str,
        options: &PromotionOptions,
    ) -> DeployResult<PromotionResult> {
        let (source_stage, target_stage) = pipeline.validate_transition(source, target, options.allow_skip)?;
        self.cancel.check()?;

        let pipeline_id = match &pipeline.id {
            Some(id) => id.clone(),
            None => self.find_pipeline_id(&pipeline.name).await?.ok_or_else(|| {
                DeployError::config_error(format!("Deployment pipeline '{}' does not exist", pipeline.name))
            })?,
        };
        let (source_id, target_id) = self
            .stage_ids(&pipeline_id, pipeline, source_stage, target_stage)
            .await?;

        if !options.grace_period.is_zero() {
            info!(
                grace_period_secs = options.grace_period.as_secs(),
                "waiting before promotion"
            );
            self.cancel.sleep(options.grace_period).await?;
        }

        info!(pipeline = %pipeline.name, source = %source_stage.name, target = %target_stage.name, "starting promotion");
        let mut request = PromotionRequest {
            source_stage_id: source_id.clone(),
            target_stage_id: target_id,
            items: None,
            note: options.note.clone(),
        };

        let mut polls = 0u32;
        let mut operation = self.run_operation(&pipeline_id, &request, options, &mut polls).await?;
        let mut retried = false;
        let mut excluded_item_types = Vec::new();

        if operation.status == PromotionStatus::PartiallySucceeded {
            let excluded: Vec<ItemType> = operation
                .failed_item_types()
                .into_iter()
                .filter(|t| options.auto_exclude_item_types.contains(t))
                .collect();

            if !excluded.is_empty() {
                let items = self
                    .retrier
                    .run("list_stage_items", &self.cancel, || {
                        self.api.list_stage_items(&pipeline_id, &source_id)
                    })
                    .await?;
                let remaining: Vec<_> = items
                    .into_iter()
                    .filter(|i| !excluded.contains(&i.item_type))
                    .collect();

                if remaining.is_empty() {
                    debug!("nothing left to promote after excluding failed item types");
                } else {
                    warn!(
                        excluded = ?excluded.iter().map(ItemType::as_str).collect::<Vec<_>>(),
                        remaining = remaining.len(),
                        "promotion partially succeeded, re-issuing without excluded item types"
                    );
                    request.items = Some(remaining);
                    operation = self.run_operation(&pipeline_id, &request, options, &mut polls).await?;
                    retried = true;
                    excluded_item_types = excluded;
                }
            }
        }

        match operation.status {
            PromotionStatus::Failed | PromotionStatus::Cancelled => Err(DeployError::PromotionFailed {
                message: operation
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("operation ended {}", operation.status)),
                operation_id: operation.id,
            }),
            status => {
                info!(operation_id = %operation.id, status = %status, polls, "promotion finished");
                Ok(PromotionResult {
                    status,
                    operation_id: operation.id,
                    polls,
                    retried,
                    excluded_item_types,
                    failed_items: operation.failed_items,
                })
            }
        }
    }

    /// Start one promotion and poll it to a terminal status.
    async fn run_operation(
        &self,
        pipeline_id: &str,
        request: &PromotionRequest,
        options: &PromotionOptions,
        polls: &mut u32,
    ) -> DeployResult<PromotionOperation> {
        let started = self
            .start_retrier
            .run("deploy_stage", &self.cancel, || self.api.deploy_stage(pipeline_id, request))
            .await?;
        if started.status.is_terminal() {
            return Ok(started);
        }

        let operation_id = started.id;
        info!(operation_id = %operation_id, "promotion started");

        let poll_loop = async {
            loop {
                self.cancel.sleep(options.poll_interval).await?;
                let operation = self
                    .retrier
                    .run("get_promotion_operation", &self.cancel, || {
                        self.api.get_promotion_operation(pipeline_id, &operation_id)
                    })
                    .await?;
                *polls += 1;
                debug!(operation_id = %operation_id, status = %operation.status, poll = *polls, "promotion status");

                if operation.status.is_terminal() {
                    return Ok(operation);
                }
            }
        };

        async_helpers::with_timeout(poll_loop, &format!("promotion {}", operation_id), options.timeout).await
    }

    async fn find_pipeline_id(&self, name: &str) -> DeployResult<Option<String>> {
        let pipelines = self
            .retrier
            .run("list_pipelines", &self.cancel, || self.api.list_pipelines())
            .await?;
        Ok(pipelines
            .into_iter()
            .find(|p| p.display_name.eq_ignore_ascii_case(name))
            .map(|p| p.id))
    }

    async fn stage_ids(
        &self,
        pipeline_id: &str,
        pipeline: &Pipeline,
        source: &PipelineStage,
        target: &PipelineStage,
    ) -> DeployResult<(String, String)> {
        if let (Some(source_id), Some(target_id)) = (&source.id, &target.id) {
            return Ok((source_id.clone(), target_id.clone()));
        }

        let remote = self
            .retrier
            .run("list_pipeline_stages", &self.cancel, || {
                self.api.list_pipeline_stages(pipeline_id)
            })
            .await?;
        let lookup = |stage: &PipelineStage| {
            match_stage(&remote, pipeline, stage)
                .map(|r| r.id.clone())
                .ok_or_else(|| {
                    DeployError::config_error(format!(
                        "Stage '{}' does not exist in pipeline '{}'",
                        stage.name, pipeline.name
                    ))
                })
        };
        Ok((lookup(source)?, lookup(target)?))
    }

    /// Create the pipeline when missing and assign each stage's workspace.
    ///
    /// `workspace_ids` maps workspace names to remote ids; stages whose
    /// workspace is not in the map are left unassigned.
    pub async fn ensure_pipeline(
        &self,
        pipeline: &Pipeline,
        workspace_ids: &HashMap<String, String>,
    ) -> DeployResult<Pipeline> {
        let pipeline_id = match self.find_pipeline_id(&pipeline.name).await? {
            Some(id) => {
                info!(pipeline = %pipeline.name, id = %id, "deployment pipeline already exists");
                id
            }
            None => self.create_pipeline(pipeline).await?,
        };

        let remote = self
            .retrier
            .run("list_pipeline_stages", &self.cancel, || {
                self.api.list_pipeline_stages(&pipeline_id)
            })
            .await?;

        let mut resolved = pipeline.clone().with_id(pipeline_id.clone());
        for stage in resolved.stages_mut() {
            let Some(remote_stage) = match_stage(&remote, pipeline, stage) else {
                return Err(DeployError::config_error(format!(
                    "Stage '{}' does not exist in pipeline '{}'",
                    stage.name, pipeline.name
                )));
            };
            stage.id = Some(remote_stage.id.clone());

            let workspace_id = workspace_ids
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&stage.workspace_name))
                .map(|(_, id)| id.as_str());
            let Some(workspace_id) = workspace_id else {
                debug!(stage = %stage.name, workspace = %stage.workspace_name, "stage workspace unknown, not assigned");
                continue;
            };
            if remote_stage.workspace_id.as_deref() == Some(workspace_id) {
                continue;
            }

            let assigned = self
                .retrier
                .run("assign_stage_workspace", &self.cancel, || {
                    self.api
                        .assign_stage_workspace(&pipeline_id, &remote_stage.id, workspace_id)
                })
                .await;
            match assigned {
                Ok(()) => info!(stage = %stage.name, workspace = %stage.workspace_name, "stage workspace assigned"),
                Err(e) if e.is_already_exists() => {
                    info!(stage = %stage.name, workspace = %stage.workspace_name, "stage workspace already assigned")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(resolved)
    }

    async fn create_pipeline(&self, pipeline: &Pipeline) -> DeployResult<String> {
        let request = CreatePipelineRequest {
            display_name: pipeline.name.clone(),
            description: pipeline.description.clone(),
            stage_names: pipeline.stages().iter().map(|s| s.name.clone()).collect(),
        };
        let created = self
            .retrier
            .run("create_pipeline", &self.cancel, || self.api.create_pipeline(&request))
            .await;

        match created {
            Ok(remote) => {
                info!(pipeline = %pipeline.name, id = %remote.id, "deployment pipeline created");
                Ok(remote.id)
            }
            Err(e) if e.is_already_exists() => {
                self.find_pipeline_id(&pipeline.name).await?.ok_or_else(|| {
                    DeployError::internal_error_with_source(
                        format!("pipeline '{}' already exists but could not be found by name", pipeline.name),
                        e,
                    )
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Remote stage for a local one: by name, else by position.
fn match_stage<'a>(remote: &'a [RemoteStage], pipeline: &Pipeline, stage: &PipelineStage) -> Option<&'a RemoteStage> {
    remote
        .iter()
        .find(|r| r.display_name.eq_ignore_ascii_case(&stage.name))
        .or_else(|| {
            let position = pipeline.stages().iter().position(|s| s.name == stage.name)?;
            let mut ordered: Vec<&RemoteStage> = remote.iter().collect();
            ordered.sort_by_key(|r| r.order);
            ordered.get(position).copied()
        })
}
