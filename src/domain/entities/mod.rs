pub mod credential;
pub mod deployment_config;
pub mod deployment_record;
pub mod pipeline;
pub mod resource;

pub use credential::{Credential, RefreshMaterial};
pub use deployment_config::DeploymentConfig;
pub use deployment_record::{DeploymentRecord, DeploymentStatus, RecordEntry};
pub use pipeline::{FailedItem, Pipeline, PipelineStage, PromotionOperation, PromotionStatus};
pub use resource::{ResourceKind, ResourceSpec};
