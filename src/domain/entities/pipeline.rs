//! Deployment pipeline model: ordered stages and promotion operations.

use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::value_objects::ItemType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One environment of a pipeline, e.g. Development.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStage {
    /// Zero-based position; stages form a total order.
    pub order: u32,
    pub name: String,
    pub workspace_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_id: Option<String>,
    /// Remote stage id, known once the pipeline exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PipelineStage {
    pub fn new(order: u32, name: impl Into<String>, workspace_name: impl Into<String>) -> Self {
        Self {
            order,
            name: name.into(),
            workspace_name: workspace_name.into(),
            capacity_id: None,
            id: None,
        }
    }

    pub fn with_capacity(mut self, capacity_id: impl Into<String>) -> Self {
        self.capacity_id = Some(capacity_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Ordered sequence of stages content is promoted through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    /// Stages are kept sorted by `order`.
    pub fn new(name: impl Into<String>, mut stages: Vec<PipelineStage>) -> Self {
        stages.sort_by_key(|s| s.order);
        Self {
            name: name.into(),
            description: None,
            id: None,
            stages,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut [PipelineStage] {
        &mut self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Check that promoting `source` to `target` moves forward through the
    /// pipeline, and by exactly one stage unless `allow_skip` is set.
    pub fn validate_transition(
        &self,
        source: &str,
        target: &str,
        allow_skip: bool,
    ) -> DeployResult<(&PipelineStage, &PipelineStage)> {
        let from = self.position(source).ok_or_else(|| {
            DeployError::invalid_stage_transition(source, target, format!("unknown stage '{}'", source))
        })?;
        let to = self.position(target).ok_or_else(|| {
            DeployError::invalid_stage_transition(source, target, format!("unknown stage '{}'", target))
        })?;

        if to == from {
            return Err(DeployError::invalid_stage_transition(
                source,
                target,
                "source and target are the same stage",
            ));
        }
        if to < from {
            return Err(DeployError::invalid_stage_transition(
                source,
                target,
                "backward promotion is not allowed",
            ));
        }
        if to > from + 1 && !allow_skip {
            return Err(DeployError::invalid_stage_transition(
                source,
                target,
                "target is not the next stage; pass allow_skip to skip stages",
            ));
        }

        Ok((&self.stages[from], &self.stages[to]))
    }
}

/// Status of a remote promotion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    PartiallySucceeded,
    Cancelled,
}

impl PromotionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PromotionStatus::NotStarted | PromotionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::NotStarted => "NotStarted",
            PromotionStatus::Running => "Running",
            PromotionStatus::Succeeded => "Succeeded",
            PromotionStatus::Failed => "Failed",
            PromotionStatus::PartiallySucceeded => "PartiallySucceeded",
            PromotionStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionStatus {
    type Err = String;

    /// Accepts both pipeline-operation and long-running-operation spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notstarted" | "queued" => Ok(PromotionStatus::NotStarted),
            "running" | "executing" | "inprogress" => Ok(PromotionStatus::Running),
            "succeeded" => Ok(PromotionStatus::Succeeded),
            "failed" => Ok(PromotionStatus::Failed),
            "partiallysucceeded" => Ok(PromotionStatus::PartiallySucceeded),
            "cancelled" | "canceled" => Ok(PromotionStatus::Cancelled),
            _ => Err(format!("Unknown promotion status: '{}'", s)),
        }
    }
}

/// An item that did not promote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_name: String,
    pub item_type: ItemType,
    #[serde(default)]
    pub message: String,
}

/// Remote long-running promotion job, as last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOperation {
    pub id: String,
    /// URL to poll, when the platform returned one.
    pub location: Option<String>,
    pub status: PromotionStatus,
    pub failed_items: Vec<FailedItem>,
    pub error: Option<String>,
}

impl PromotionOperation {
    pub fn new(id: impl Into<String>, status: PromotionStatus) -> Self {
        Self {
            id: id.into(),
            location: None,
            status,
            failed_items: Vec::new(),
            error: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_failed_items(mut self, failed_items: Vec<FailedItem>) -> Self {
        self.failed_items = failed_items;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Distinct item types among the failed items, in first-seen order.
    pub fn failed_item_types(&self) -> Vec<ItemType> {
        let mut types: Vec<ItemType> = Vec::new();
        for item in &self.failed_items {
            if !types.contains(&item.item_type) {
                types.push(item.item_type.clone());
            }
        }
        types
    }
}
