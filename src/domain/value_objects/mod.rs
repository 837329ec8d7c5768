/// Immutable domain values shared by the provisioning, git and promotion services.
pub mod git_binding;
pub mod item_type;
pub mod principal;
pub mod retry_policy;

pub use git_binding::{GitBinding, GitBindingError, GitProvider};
pub use item_type::ItemType;
pub use principal::{PrincipalType, WorkspaceRole};
pub use retry_policy::{RetryClassifier, RetryPolicy};
