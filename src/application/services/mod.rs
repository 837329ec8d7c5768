pub mod config_resolver;
pub mod deployment_state;
pub mod git_connection;
pub mod promotion_engine;
pub mod provisioning_client;
pub mod retry;
pub mod token_manager;

pub use config_resolver::ConfigResolver;
pub use deployment_state::{
    DeploymentFailure, DeploymentReport, DeploymentStateManager, ProvisionOutcome, RollbackFailure,
    RollbackReport,
};
pub use git_connection::{GitConnectResult, GitConnectionManager, GitCredentials};
pub use promotion_engine::{PromotionEngine, PromotionOptions, PromotionResult};
pub use provisioning_client::{EnsureOutcome, EnsureStatus, ProvisioningClient, WorkspaceRef};
pub use retry::Retrier;
pub use token_manager::TokenManager;
