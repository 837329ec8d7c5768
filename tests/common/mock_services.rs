//! In-memory platform and collaborators for integration tests
//!
//! `FakePlatform` keeps workspaces, folders, items, role assignments, git
//! bindings and pipelines in memory and answers with the same conflict codes
//! the real platform uses, so the engine's idempotency paths run unmodified.

use async_trait::async_trait;
use fabdeploy::common::error::DeployError;
use fabdeploy::common::result::DeployResult;
use fabdeploy::domain::entities::{Credential, PromotionOperation, PromotionStatus};
use fabdeploy::domain::value_objects::{GitBinding, PrincipalType};
use fabdeploy::infrastructure::filesystem::{AuditEntry, AuditSink};
use fabdeploy::infrastructure::platform::{
    CreateConnectionRequest, CreateFolderRequest, CreateItemRequest, CreatePipelineRequest,
    CreateWorkspaceRequest, GitConnectRequest, GitConnectionState, PlatformApi, PromotionRequest,
    RemoteConnection, RemoteFolder, RemoteItem, RemotePipeline, RemoteRoleAssignment, RemoteStage,
    RemoteWorkspace, RoleAssignmentRequest, StageItem, TokenSource,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct PlatformState {
    workspaces: Vec<RemoteWorkspace>,
    folders: HashMap<String, Vec<RemoteFolder>>,
    items: HashMap<String, Vec<RemoteItem>>,
    role_assignments: HashMap<String, Vec<RemoteRoleAssignment>>,
    git: HashMap<String, GitConnectionState>,
    connections: Vec<RemoteConnection>,
    pipelines: Vec<RemotePipeline>,
    stages: HashMap<String, Vec<RemoteStage>>,
    stage_items: HashMap<String, Vec<StageItem>>,
    /// Actual type of known principals; requests with another type are rejected
    principals: HashMap<String, PrincipalType>,
    /// Statuses returned by successive operation polls
    poll_script: VecDeque<PromotionOperation>,
    promotion_requests: Vec<PromotionRequest>,
    /// Errors returned by the next calls of an operation
    failures: HashMap<String, VecDeque<DeployError>>,
    call_history: Vec<String>,
    next_id: u32,
}

impl PlatformState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn call(&mut self, operation: &str, subject: &str) -> DeployResult<()> {
        self.call_history.push(format!("{}:{}", operation, subject));
        match self.failures.get_mut(operation).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn conflict(code: &str) -> DeployError {
    DeployError::api_error(409, Some(code.to_string()), format!("{} (fake)", code))
}

fn not_found(what: &str) -> DeployError {
    DeployError::api_error(404, Some("EntityNotFound".to_string()), format!("{} not found", what))
}

/// Mock platform REST API
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    /// Create an empty platform
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &str, error: DeployError) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Register the actual type of a principal
    pub fn add_principal(&self, principal_id: &str, principal_type: PrincipalType) {
        let mut state = self.state.lock().unwrap();
        state.principals.insert(principal_id.to_string(), principal_type);
    }

    /// Add a workspace directly, bypassing the call history
    pub fn seed_workspace(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("ws");
        state.workspaces.push(RemoteWorkspace {
            id: id.clone(),
            display_name: name.to_string(),
            capacity_id: None,
        });
        id
    }

    /// Bind a workspace to git directly
    pub fn seed_git_binding(&self, workspace_id: &str, binding: GitBinding) {
        let mut state = self.state.lock().unwrap();
        state.git.insert(
            workspace_id.to_string(),
            GitConnectionState {
                binding: Some(binding),
                connection_id: None,
                initialized: true,
            },
        );
    }

    /// Add a credential connection directly
    pub fn seed_connection(&self, display_name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("conn");
        state.connections.push(RemoteConnection {
            id: id.clone(),
            display_name: display_name.to_string(),
        });
        id
    }

    /// Add a pipeline with named stages
    pub fn seed_pipeline(&self, name: &str, stages: &[&str]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("pipe");
        state.pipelines.push(RemotePipeline {
            id: id.clone(),
            display_name: name.to_string(),
        });
        let mut remote_stages = Vec::new();
        for (order, stage) in stages.iter().enumerate() {
            let stage_id = state.id("stage");
            remote_stages.push(RemoteStage {
                id: stage_id,
                display_name: stage.to_string(),
                order: order as u32,
                workspace_id: None,
            });
        }
        state.stages.insert(id.clone(), remote_stages);
        id
    }

    /// Queue the statuses returned by successive operation polls
    pub fn script_polls(&self, statuses: &[PromotionStatus]) {
        let mut state = self.state.lock().unwrap();
        for status in statuses {
            state
                .poll_script
                .push_back(PromotionOperation::new("op-1", *status));
        }
    }

    /// Queue a full operation returned by the next poll
    pub fn script_poll_operation(&self, operation: PromotionOperation) {
        let mut state = self.state.lock().unwrap();
        state.poll_script.push_back(operation);
    }

    /// Items visible in a pipeline stage
    pub fn set_stage_items(&self, stage_id: &str, items: Vec<StageItem>) {
        let mut state = self.state.lock().unwrap();
        state.stage_items.insert(stage_id.to_string(), items);
    }

    /// Get call history for verification
    pub fn get_call_history(&self) -> Vec<String> {
        self.state.lock().unwrap().call_history.clone()
    }

    /// Calls of one operation, in order
    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{}:", operation);
        self.get_call_history()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect()
    }

    /// Calls that change remote state
    pub fn mutating_calls(&self) -> Vec<String> {
        self.get_call_history()
            .into_iter()
            .filter(|c| !(c.starts_with("list_") || c.starts_with("get_")))
            .collect()
    }

    /// Clear call history
    pub fn clear_call_history(&self) {
        self.state.lock().unwrap().call_history.clear();
    }

    pub fn workspace_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.workspaces.iter().map(|w| w.display_name.clone()).collect()
    }

    pub fn folder_names(&self, workspace_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(workspace_id)
            .map(|f| f.iter().map(|f| f.display_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn git_state(&self, workspace_id: &str) -> GitConnectionState {
        let state = self.state.lock().unwrap();
        state.git.get(workspace_id).cloned().unwrap_or_default()
    }

    pub fn promotion_requests(&self) -> Vec<PromotionRequest> {
        self.state.lock().unwrap().promotion_requests.clone()
    }

    pub fn stage_workspace(&self, pipeline_id: &str, stage_name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .stages
            .get(pipeline_id)?
            .iter()
            .find(|s| s.display_name == stage_name)?
            .workspace_id
            .clone()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn list_workspaces(&self) -> DeployResult<Vec<RemoteWorkspace>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_workspaces", "*")?;
        Ok(state.workspaces.clone())
    }

    async fn create_workspace(&self, request: &CreateWorkspaceRequest) -> DeployResult<RemoteWorkspace> {
        let mut state = self.state.lock().unwrap();
        state.call("create_workspace", &request.display_name)?;
        if state
            .workspaces
            .iter()
            .any(|w| w.display_name.eq_ignore_ascii_case(&request.display_name))
        {
            return Err(conflict("WorkspaceNameAlreadyExists"));
        }
        let workspace = RemoteWorkspace {
            id: state.id("ws"),
            display_name: request.display_name.clone(),
            capacity_id: request.capacity_id.clone(),
        };
        state.workspaces.push(workspace.clone());
        Ok(workspace)
    }

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_workspace", workspace_id)?;
        let before = state.workspaces.len();
        state.workspaces.retain(|w| w.id != workspace_id);
        if state.workspaces.len() == before {
            return Err(not_found("workspace"));
        }
        state.folders.remove(workspace_id);
        state.items.remove(workspace_id);
        state.role_assignments.remove(workspace_id);
        Ok(())
    }

    async fn assign_capacity(&self, workspace_id: &str, capacity_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("assign_capacity", workspace_id)?;
        let workspace = state
            .workspaces
            .iter_mut()
            .find(|w| w.id == workspace_id)
            .ok_or_else(|| not_found("workspace"))?;
        workspace.capacity_id = Some(capacity_id.to_string());
        Ok(())
    }

    async fn list_folders(&self, workspace_id: &str) -> DeployResult<Vec<RemoteFolder>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_folders", workspace_id)?;
        Ok(state.folders.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn create_folder(&self, workspace_id: &str, request: &CreateFolderRequest) -> DeployResult<RemoteFolder> {
        let mut state = self.state.lock().unwrap();
        state.call("create_folder", &request.display_name)?;
        let exists = state.folders.get(workspace_id).is_some_and(|folders| {
            folders.iter().any(|f| {
                f.display_name.eq_ignore_ascii_case(&request.display_name)
                    && f.parent_folder_id == request.parent_folder_id
            })
        });
        if exists {
            return Err(conflict("FolderDisplayNameAlreadyInUse"));
        }
        let folder = RemoteFolder {
            id: state.id("folder"),
            display_name: request.display_name.clone(),
            parent_folder_id: request.parent_folder_id.clone(),
        };
        state
            .folders
            .entry(workspace_id.to_string())
            .or_default()
            .push(folder.clone());
        Ok(folder)
    }

    async fn delete_folder(&self, workspace_id: &str, folder_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_folder", folder_id)?;
        let folders = state.folders.entry(workspace_id.to_string()).or_default();
        let before = folders.len();
        folders.retain(|f| f.id != folder_id);
        if folders.len() == before {
            return Err(not_found("folder"));
        }
        Ok(())
    }

    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_items", workspace_id)?;
        Ok(state.items.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn create_item(&self, workspace_id: &str, request: &CreateItemRequest) -> DeployResult<RemoteItem> {
        let mut state = self.state.lock().unwrap();
        state.call("create_item", &request.display_name)?;
        let exists = state.items.get(workspace_id).is_some_and(|items| {
            items.iter().any(|i| {
                i.display_name.eq_ignore_ascii_case(&request.display_name) && i.item_type == request.item_type
            })
        });
        if exists {
            return Err(conflict("ItemDisplayNameAlreadyInUse"));
        }
        let item = RemoteItem {
            id: state.id("item"),
            display_name: request.display_name.clone(),
            item_type: request.item_type.clone(),
            folder_id: request.folder_id.clone(),
        };
        state
            .items
            .entry(workspace_id.to_string())
            .or_default()
            .push(item.clone());
        Ok(item)
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_item", item_id)?;
        let items = state.items.entry(workspace_id.to_string()).or_default();
        let before = items.len();
        items.retain(|i| i.id != item_id);
        if items.len() == before {
            return Err(not_found("item"));
        }
        Ok(())
    }

    async fn list_role_assignments(&self, workspace_id: &str) -> DeployResult<Vec<RemoteRoleAssignment>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_role_assignments", workspace_id)?;
        Ok(state.role_assignments.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn add_role_assignment(
        &self,
        workspace_id: &str,
        request: &RoleAssignmentRequest,
    ) -> DeployResult<RemoteRoleAssignment> {
        let mut state = self.state.lock().unwrap();
        state.call(
            "add_role_assignment",
            &format!("{}/{}", request.principal_id, request.principal_type),
        )?;

        if let Some(actual) = state.principals.get(&request.principal_id) {
            if *actual != request.principal_type {
                return Err(DeployError::api_error(
                    400,
                    Some("PrincipalTypeNotSupported".to_string()),
                    "principal type does not match",
                ));
            }
        }
        let exists = state
            .role_assignments
            .get(workspace_id)
            .is_some_and(|a| a.iter().any(|a| a.principal_id == request.principal_id));
        if exists {
            return Err(conflict("PrincipalAlreadyHasWorkspaceRolePermissions"));
        }

        let assignment = RemoteRoleAssignment {
            id: state.id("role"),
            principal_id: request.principal_id.clone(),
            principal_type: Some(request.principal_type),
            role: request.role,
        };
        state
            .role_assignments
            .entry(workspace_id.to_string())
            .or_default()
            .push(assignment.clone());
        Ok(assignment)
    }

    async fn delete_role_assignment(&self, workspace_id: &str, assignment_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_role_assignment", assignment_id)?;
        let assignments = state.role_assignments.entry(workspace_id.to_string()).or_default();
        let before = assignments.len();
        assignments.retain(|a| a.id != assignment_id);
        if assignments.len() == before {
            return Err(not_found("role assignment"));
        }
        Ok(())
    }

    async fn get_git_connection(&self, workspace_id: &str) -> DeployResult<GitConnectionState> {
        let mut state = self.state.lock().unwrap();
        state.call("get_git_connection", workspace_id)?;
        Ok(state.git.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn connect_git(&self, workspace_id: &str, request: &GitConnectRequest) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("connect_git", workspace_id)?;
        let current = state.git.entry(workspace_id.to_string()).or_default();
        if current.binding.is_some() {
            return Err(conflict("WorkspaceAlreadyConnectedToGit"));
        }
        current.binding = Some(request.binding.clone());
        current.connection_id = request.connection_id.clone();
        Ok(())
    }

    async fn initialize_git_connection(&self, workspace_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("initialize_git_connection", workspace_id)?;
        let current = state.git.entry(workspace_id.to_string()).or_default();
        if current.initialized {
            return Err(conflict("WorkspaceGitConnectionAlreadyInitialized"));
        }
        current.initialized = true;
        Ok(())
    }

    async fn list_connections(&self) -> DeployResult<Vec<RemoteConnection>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_connections", "*")?;
        Ok(state.connections.clone())
    }

    async fn create_connection(&self, request: &CreateConnectionRequest) -> DeployResult<RemoteConnection> {
        let mut state = self.state.lock().unwrap();
        state.call("create_connection", &request.display_name)?;
        if state
            .connections
            .iter()
            .any(|c| c.display_name.eq_ignore_ascii_case(&request.display_name))
        {
            return Err(conflict("DuplicateConnectionName"));
        }
        let connection = RemoteConnection {
            id: state.id("conn"),
            display_name: request.display_name.clone(),
        };
        state.connections.push(connection.clone());
        Ok(connection)
    }

    async fn list_pipelines(&self) -> DeployResult<Vec<RemotePipeline>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_pipelines", "*")?;
        Ok(state.pipelines.clone())
    }

    async fn create_pipeline(&self, request: &CreatePipelineRequest) -> DeployResult<RemotePipeline> {
        let exists = {
            let mut state = self.state.lock().unwrap();
            state.call("create_pipeline", &request.display_name)?;
            state
                .pipelines
                .iter()
                .any(|p| p.display_name.eq_ignore_ascii_case(&request.display_name))
        };
        if exists {
            return Err(conflict("DeploymentPipelineNameAlreadyExists"));
        }
        let stage_names: Vec<&str> = request.stage_names.iter().map(String::as_str).collect();
        let id = self.seed_pipeline(&request.display_name, &stage_names);
        Ok(RemotePipeline {
            id,
            display_name: request.display_name.clone(),
        })
    }

    async fn list_pipeline_stages(&self, pipeline_id: &str) -> DeployResult<Vec<RemoteStage>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_pipeline_stages", pipeline_id)?;
        state
            .stages
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| not_found("pipeline"))
    }

    async fn assign_stage_workspace(&self, pipeline_id: &str, stage_id: &str, workspace_id: &str) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.call("assign_stage_workspace", stage_id)?;
        let stage = state
            .stages
            .get_mut(pipeline_id)
            .and_then(|stages| stages.iter_mut().find(|s| s.id == stage_id))
            .ok_or_else(|| not_found("stage"))?;
        stage.workspace_id = Some(workspace_id.to_string());
        Ok(())
    }

    async fn list_stage_items(&self, _pipeline_id: &str, stage_id: &str) -> DeployResult<Vec<StageItem>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_stage_items", stage_id)?;
        Ok(state.stage_items.get(stage_id).cloned().unwrap_or_default())
    }

    async fn deploy_stage(&self, pipeline_id: &str, request: &PromotionRequest) -> DeployResult<PromotionOperation> {
        let mut state = self.state.lock().unwrap();
        state.call("deploy_stage", pipeline_id)?;
        state.promotion_requests.push(request.clone());
        let id = format!("op-{}", state.promotion_requests.len());
        Ok(PromotionOperation::new(id, PromotionStatus::NotStarted))
    }

    async fn get_promotion_operation(&self, _pipeline_id: &str, operation_id: &str) -> DeployResult<PromotionOperation> {
        let mut state = self.state.lock().unwrap();
        state.call("get_promotion_operation", operation_id)?;
        let mut operation = state
            .poll_script
            .pop_front()
            .unwrap_or_else(|| PromotionOperation::new(operation_id, PromotionStatus::Succeeded));
        operation.id = operation_id.to_string();
        Ok(operation)
    }
}

/// Token source that counts fetches and takes a while to answer
pub struct CountingTokenSource {
    fetches: AtomicU32,
    latency: Duration,
    lifetime: Duration,
}

impl CountingTokenSource {
    pub fn new(latency: Duration, lifetime: Duration) -> Self {
        Self {
            fetches: AtomicU32::new(0),
            latency,
            lifetime,
        }
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn fetch_token(&self) -> DeployResult<Credential> {
        tokio::time::sleep(self.latency).await;
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential::expiring_in(format!("token-{}", n), self.lifetime))
    }

    fn identity(&self) -> Option<String> {
        Some("deployer-sp".to_string())
    }
}

/// Audit sink that keeps entries in memory
#[derive(Clone, Default)]
pub struct RecordingAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> DeployResult<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
