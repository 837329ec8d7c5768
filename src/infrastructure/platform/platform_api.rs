use crate::common::result::DeployResult;
use crate::domain::entities::PromotionOperation;
use crate::domain::value_objects::{GitBinding, ItemType, PrincipalType, WorkspaceRole};
use async_trait::async_trait;
use std::fmt;

/// Outbound interface to the platform REST API.
///
/// Every method performs exactly one logical remote call (paging aside) and
/// maps error bodies to [`crate::common::error::DeployError::Api`]; retry,
/// idempotency and lookup-by-name live in the services built on top.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_workspaces(&self) -> DeployResult<Vec<RemoteWorkspace>>;

    async fn create_workspace(&self, request: &CreateWorkspaceRequest) -> DeployResult<RemoteWorkspace>;

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()>;

    async fn assign_capacity(&self, workspace_id: &str, capacity_id: &str) -> DeployResult<()>;

    async fn list_folders(&self, workspace_id: &str) -> DeployResult<Vec<RemoteFolder>>;

    async fn create_folder(
        &self,
        workspace_id: &str,
        request: &CreateFolderRequest,
    ) -> DeployResult<RemoteFolder>;

    async fn delete_folder(&self, workspace_id: &str, folder_id: &str) -> DeployResult<()>;

    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>>;

    async fn create_item(&self, workspace_id: &str, request: &CreateItemRequest) -> DeployResult<RemoteItem>;

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()>;

    async fn list_role_assignments(&self, workspace_id: &str) -> DeployResult<Vec<RemoteRoleAssignment>>;

    async fn add_role_assignment(
        &self,
        workspace_id: &str,
        request: &RoleAssignmentRequest,
    ) -> DeployResult<RemoteRoleAssignment>;

    async fn delete_role_assignment(&self, workspace_id: &str, assignment_id: &str) -> DeployResult<()>;

    async fn get_git_connection(&self, workspace_id: &str) -> DeployResult<GitConnectionState>;

    async fn connect_git(&self, workspace_id: &str, request: &GitConnectRequest) -> DeployResult<()>;

    async fn initialize_git_connection(&self, workspace_id: &str) -> DeployResult<()>;

    async fn list_connections(&self) -> DeployResult<Vec<RemoteConnection>>;

    async fn create_connection(&self, request: &CreateConnectionRequest) -> DeployResult<RemoteConnection>;

    async fn list_pipelines(&self) -> DeployResult<Vec<RemotePipeline>>;

    async fn create_pipeline(&self, request: &CreatePipelineRequest) -> DeployResult<RemotePipeline>;

    async fn list_pipeline_stages(&self, pipeline_id: &str) -> DeployResult<Vec<RemoteStage>>;

    async fn assign_stage_workspace(
        &self,
        pipeline_id: &str,
        stage_id: &str,
        workspace_id: &str,
    ) -> DeployResult<()>;

    async fn list_stage_items(&self, pipeline_id: &str, stage_id: &str) -> DeployResult<Vec<StageItem>>;

    /// Start a promotion; the returned operation is usually not terminal yet.
    async fn deploy_stage(&self, pipeline_id: &str, request: &PromotionRequest) -> DeployResult<PromotionOperation>;

    async fn get_promotion_operation(
        &self,
        pipeline_id: &str,
        operation_id: &str,
    ) -> DeployResult<PromotionOperation>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkspace {
    pub id: String,
    pub display_name: String,
    pub capacity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: String,
    pub display_name: String,
    pub parent_folder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub display_name: String,
    pub item_type: ItemType,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRoleAssignment {
    pub id: String,
    pub principal_id: String,
    pub principal_type: Option<PrincipalType>,
    pub role: WorkspaceRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConnection {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePipeline {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStage {
    pub id: String,
    pub display_name: String,
    pub order: u32,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageItem {
    pub item_id: String,
    pub display_name: String,
    pub item_type: ItemType,
}

/// Observed git state of a workspace. `binding` is None while not connected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GitConnectionState {
    pub binding: Option<GitBinding>,
    pub connection_id: Option<String>,
    pub initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWorkspaceRequest {
    pub display_name: String,
    pub description: Option<String>,
    pub capacity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFolderRequest {
    pub display_name: String,
    pub parent_folder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateItemRequest {
    pub display_name: String,
    pub item_type: ItemType,
    pub folder_id: Option<String>,
    pub description: Option<String>,
    pub definition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignmentRequest {
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub role: WorkspaceRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConnectRequest {
    pub binding: GitBinding,
    /// Credential connection to authenticate with; None means automatic credentials.
    pub connection_id: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct CreateConnectionRequest {
    pub display_name: String,
    pub repository_url: String,
    pub access_token: Option<String>,
}

impl fmt::Debug for CreateConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateConnectionRequest")
            .field("display_name", &self.display_name)
            .field("repository_url", &self.repository_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePipelineRequest {
    pub display_name: String,
    pub description: Option<String>,
    pub stage_names: Vec<String>,
}

/// Selective promotion; `items: None` promotes everything in the source stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRequest {
    pub source_stage_id: String,
    pub target_stage_id: String,
    pub items: Option<Vec<StageItem>>,
    pub note: Option<String>,
}
