//! Resolved deployment document.
//!
//! Produced by the configuration resolver after overlay merge and placeholder
//! substitution, then checked structurally with `validator` before any remote
//! call is made.

use crate::domain::entities::pipeline::{Pipeline, PipelineStage};
use crate::domain::entities::resource::{
    ResourceSpec, PROPERTY_CAPACITY_ID, PROPERTY_DEFINITION, PROPERTY_DESCRIPTION,
};
use crate::domain::value_objects::{
    GitBinding, GitBindingError, ItemType, PrincipalType, RetryPolicy, WorkspaceRole,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_references"))]
pub struct DeploymentConfig {
    #[validate(nested)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    #[validate(nested)]
    pub folders: Vec<FolderConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<ItemConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub access_grants: Vec<AccessGrantConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub git: Option<GitConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub pipeline: Option<PipelineConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub deployment: DeploymentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkspaceConfig {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub capacity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FolderConfig {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    /// Name of the parent folder; must be declared earlier in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemConfig {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque item definition forwarded to the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccessGrantConfig {
    #[validate(length(min = 1))]
    pub principal_id: String,

    /// Probed in a fixed order when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<PrincipalType>,

    pub role: WorkspaceRole,
}

#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct GitConfig {
    #[validate(url)]
    pub repository_url: String,

    #[validate(length(min = 1))]
    pub branch: String,

    #[serde(default)]
    pub directory: String,

    /// Display name of the credential connection; derived from the repository when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub connection_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl GitConfig {
    pub fn binding(&self) -> Result<GitBinding, GitBindingError> {
        GitBinding::new(&self.repository_url, &self.branch, Some(&self.directory))
    }

    pub fn connection_name(&self) -> String {
        if let Some(name) = &self.connection_name {
            return name.clone();
        }
        let repository = self
            .repository_url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit('/')
            .next()
            .unwrap_or("repository");
        format!("git-{}", repository)
    }
}

impl fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitConfig")
            .field("repository_url", &self.repository_url)
            .field("branch", &self.branch)
            .field("directory", &self.directory)
            .field("connection_name", &self.connection_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[validate(length(min = 2, message = "a pipeline needs at least two stages"), nested)]
    pub stages: Vec<StageConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub promotion: PromotionSettings,
}

impl PipelineConfig {
    /// Stage order follows declaration order.
    pub fn to_pipeline(&self) -> Pipeline {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(order, stage)| {
                let mut s = PipelineStage::new(order as u32, &stage.name, &stage.workspace);
                s.capacity_id = stage.capacity_id.clone();
                s
            })
            .collect();
        let pipeline = Pipeline::new(&self.name, stages);
        match &self.description {
            Some(d) => pipeline.with_description(d),
            None => pipeline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StageConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub workspace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PromotionSettings {
    #[serde(default)]
    pub grace_period_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,

    #[serde(default = "default_promotion_timeout_secs")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    #[serde(default)]
    pub auto_exclude_item_types: Vec<ItemType>,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: 0,
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_promotion_timeout_secs(),
            auto_exclude_item_types: Vec::new(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_promotion_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeploymentSettings {
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,

    /// Skip access grants whose principal is the deploying identity.
    #[serde(default = "default_true")]
    pub skip_self_grant: bool,

    /// Item types created through the external CLI instead of the REST API.
    #[serde(default)]
    pub cli_fallback_item_types: Vec<ItemType>,

    #[serde(default = "default_cli_tool")]
    #[validate(length(min = 1))]
    pub cli_tool: String,

    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
            skip_self_grant: true,
            cli_fallback_item_types: Vec::new(),
            cli_tool: default_cli_tool(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cli_tool() -> String {
    "fab".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
    pub max_delay_ms: u64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter_ratio(self.jitter_ratio)
    }
}

impl DeploymentConfig {
    /// Resource specs in creation order: workspace, folders, items, access grants.
    pub fn resource_specs(&self) -> Vec<ResourceSpec> {
        let mut specs = Vec::with_capacity(
            1 + self.folders.len() + self.items.len() + self.access_grants.len(),
        );

        let mut workspace = ResourceSpec::workspace(&self.workspace.name);
        if let Some(description) = &self.workspace.description {
            workspace = workspace.with_property(PROPERTY_DESCRIPTION, description.as_str());
        }
        if let Some(capacity_id) = &self.workspace.capacity_id {
            workspace = workspace.with_property(PROPERTY_CAPACITY_ID, capacity_id.as_str());
        }
        specs.push(workspace);

        for folder in &self.folders {
            specs.push(ResourceSpec::folder(&folder.name, folder.parent.clone()));
        }

        for item in &self.items {
            let mut spec = ResourceSpec::item(&item.name, item.item_type.clone(), item.folder.clone());
            if let Some(description) = &item.description {
                spec = spec.with_property(PROPERTY_DESCRIPTION, description.as_str());
            }
            if let Some(definition) = &item.definition {
                spec = spec.with_property(PROPERTY_DEFINITION, definition.clone());
            }
            specs.push(spec);
        }

        for grant in &self.access_grants {
            specs.push(ResourceSpec::access_grant(
                &grant.principal_id,
                grant.role,
                grant.principal_type,
            ));
        }

        specs
    }
}

fn reference_error(code: &'static str, message: String) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(message));
    error
}

fn validate_references(config: &DeploymentConfig) -> Result<(), ValidationError> {
    let mut folders: HashSet<&str> = HashSet::new();
    for folder in &config.folders {
        if let Some(parent) = folder.parent.as_deref() {
            if !folders.contains(parent) {
                return Err(reference_error(
                    "unknown_parent_folder",
                    format!(
                        "folder '{}' references parent '{}' which is not declared before it",
                        folder.name, parent
                    ),
                ));
            }
        }
        if !folders.insert(folder.name.as_str()) {
            return Err(reference_error(
                "duplicate_folder",
                format!("folder '{}' is declared more than once", folder.name),
            ));
        }
    }

    let mut items: HashSet<(String, String)> = HashSet::new();
    for item in &config.items {
        if let Some(folder) = item.folder.as_deref() {
            if !folders.contains(folder) {
                return Err(reference_error(
                    "unknown_folder",
                    format!("item '{}' references undeclared folder '{}'", item.name, folder),
                ));
            }
        }
        let key = (
            item.item_type.as_str().to_ascii_lowercase(),
            item.name.clone(),
        );
        if !items.insert(key) {
            return Err(reference_error(
                "duplicate_item",
                format!("item {} '{}' is declared more than once", item.item_type, item.name),
            ));
        }
    }

    let mut principals: HashSet<&str> = HashSet::new();
    for grant in &config.access_grants {
        if !principals.insert(grant.principal_id.as_str()) {
            return Err(reference_error(
                "duplicate_access_grant",
                format!("principal '{}' is granted more than once", grant.principal_id),
            ));
        }
    }

    if let Some(git) = &config.git {
        if let Err(e) = git.binding() {
            return Err(reference_error("invalid_git_binding", e.to_string()));
        }
    }

    if let Some(pipeline) = &config.pipeline {
        let mut stages: HashSet<String> = HashSet::new();
        for stage in &pipeline.stages {
            if !stages.insert(stage.name.to_ascii_lowercase()) {
                return Err(reference_error(
                    "duplicate_stage",
                    format!("stage '{}' is declared more than once", stage.name),
                ));
            }
        }
    }

    Ok(())
}
