//! Idempotent create-or-get over the platform API.
//!
//! Every `ensure_*` call creates first. A conflict meaning "already exists"
//! is answered by looking the resource up by name; no second create is ever
//! issued. Remote calls go through the [`Retrier`], so transient failures
//! never reach the caller unless the attempt budget runs out.

use crate::application::services::retry::Retrier;
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::{DeployResult, OptionExt};
use crate::domain::entities::resource::PROPERTY_DEFINITION;
use crate::domain::entities::{RecordEntry, ResourceKind, ResourceSpec};
use crate::domain::value_objects::{ItemType, PrincipalType};
use crate::infrastructure::platform::{
    CreateFolderRequest, CreateItemRequest, CreateWorkspaceRequest, PlatformApi, RoleAssignmentRequest,
};
use crate::infrastructure::process::{item_path, CliCreateOutcome, CliRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Remote workspace a resource lives in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    pub id: String,
    pub name: String,
}

impl WorkspaceRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureStatus {
    Created,
    AlreadyExists,
    /// Access grant to the deploying identity, left alone.
    SkippedSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub remote_id: Option<String>,
    pub status: EnsureStatus,
}

impl EnsureOutcome {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(id.into()),
            status: EnsureStatus::Created,
        }
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(id.into()),
            status: EnsureStatus::AlreadyExists,
        }
    }

    pub fn skipped_self() -> Self {
        Self {
            remote_id: None,
            status: EnsureStatus::SkippedSelf,
        }
    }

    pub fn is_created(&self) -> bool {
        self.status == EnsureStatus::Created
    }
}

pub struct ProvisioningClient {
    api: Arc<dyn PlatformApi>,
    retrier: Retrier,
    cancel: CancellationSignal,
    /// Lowercased workspace name -> id
    workspace_ids: RwLock<HashMap<String, String>>,
    /// (workspace id, lowercased folder name) -> folder id
    folder_ids: RwLock<HashMap<(String, String), String>>,
    cli: Option<Arc<dyn CliRunner>>,
    cli_item_types: Vec<ItemType>,
    self_principal_id: Option<String>,
    skip_self_grant: bool,
}

impl ProvisioningClient {
    pub fn new(api: Arc<dyn PlatformApi>, retrier: Retrier, cancel: CancellationSignal) -> Self {
        Self {
            api,
            retrier,
            cancel,
            workspace_ids: RwLock::new(HashMap::new()),
            folder_ids: RwLock::new(HashMap::new()),
            cli: None,
            cli_item_types: Vec::new(),
            self_principal_id: None,
            skip_self_grant: true,
        }
    }

    /// Route the listed item types through an external CLI.
    pub fn with_cli_fallback(mut self, cli: Arc<dyn CliRunner>, item_types: Vec<ItemType>) -> Self {
        self.cli = Some(cli);
        self.cli_item_types = item_types;
        self
    }

    /// Principal id of the deploying identity.
    pub fn with_self_principal(mut self, principal_id: Option<String>) -> Self {
        self.self_principal_id = principal_id;
        self
    }

    pub fn with_skip_self_grant(mut self, skip: bool) -> Self {
        self.skip_self_grant = skip;
        self
    }

    pub fn api(&self) -> &Arc<dyn PlatformApi> {
        &self.api
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    pub fn cancel_signal(&self) -> &CancellationSignal {
        &self.cancel
    }

    pub async fn ensure_workspace(&self, spec: &ResourceSpec) -> DeployResult<EnsureOutcome> {
        expect_kind(spec, ResourceKind::Workspace)?;
        let request = CreateWorkspaceRequest {
            display_name: spec.name.clone(),
            description: spec.description().map(str::to_string),
            capacity_id: None,
        };

        let created = self
            .retrier
            .run("create_workspace", &self.cancel, || self.api.create_workspace(&request))
            .await;

        match created {
            Ok(workspace) => {
                info!(workspace = %spec.name, id = %workspace.id, "workspace created");
                self.remember_workspace(&spec.name, &workspace.id).await;
                Ok(EnsureOutcome::created(workspace.id))
            }
            Err(e) if e.is_already_exists() => {
                let id = self
                    .find_workspace_id(&spec.name)
                    .await?
                    .ok_or_deploy(lookup_failed(spec, e))?;
                info!(workspace = %spec.name, id = %id, "workspace already exists");
                Ok(EnsureOutcome::existing(id))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_folder(&self, workspace: &WorkspaceRef, spec: &ResourceSpec) -> DeployResult<EnsureOutcome> {
        expect_kind(spec, ResourceKind::Folder)?;
        let parent_folder_id = match spec.parent.as_deref() {
            Some(parent) => Some(self.folder_id(workspace, parent).await?),
            None => None,
        };
        let request = CreateFolderRequest {
            display_name: spec.name.clone(),
            parent_folder_id,
        };

        let created = self
            .retrier
            .run("create_folder", &self.cancel, || {
                self.api.create_folder(&workspace.id, &request)
            })
            .await;

        let outcome = match created {
            Ok(folder) => {
                info!(workspace = %workspace.name, folder = %spec.name, id = %folder.id, "folder created");
                EnsureOutcome::created(folder.id)
            }
            Err(e) if e.is_already_exists() => {
                let id = self
                    .lookup_folder(workspace, &spec.name, request.parent_folder_id.as_deref())
                    .await?
                    .ok_or_deploy(lookup_failed(spec, e))?;
                info!(workspace = %workspace.name, folder = %spec.name, id = %id, "folder already exists");
                EnsureOutcome::existing(id)
            }
            Err(e) => return Err(e),
        };

        if let Some(id) = &outcome.remote_id {
            self.folder_ids
                .write()
                .await
                .insert((workspace.id.clone(), spec.name.to_lowercase()), id.clone());
        }
        Ok(outcome)
    }

    pub async fn ensure_item(&self, workspace: &WorkspaceRef, spec: &ResourceSpec) -> DeployResult<EnsureOutcome> {
        expect_kind(spec, ResourceKind::Item)?;
        let item_type = spec
            .item_type
            .clone()
            .ok_or_validation_error("item_type", format!("{} has no item type", spec.label()))?;

        if let Some(cli) = self.cli_for(&item_type) {
            return self.ensure_item_via_cli(cli, workspace, spec, &item_type).await;
        }

        let folder_id = match spec.parent.as_deref() {
            Some(folder) => Some(self.folder_id(workspace, folder).await?),
            None => None,
        };
        let request = CreateItemRequest {
            display_name: spec.name.clone(),
            item_type: item_type.clone(),
            folder_id,
            description: spec.description().map(str::to_string),
            definition: spec.properties.get(PROPERTY_DEFINITION).cloned(),
        };

        let created = self
            .retrier
            .run("create_item", &self.cancel, || {
                self.api.create_item(&workspace.id, &request)
            })
            .await;

        match created {
            Ok(item) => {
                info!(workspace = %workspace.name, item = %spec.name, item_type = %item_type, id = %item.id, "item created");
                Ok(EnsureOutcome::created(item.id))
            }
            Err(e) if e.is_already_exists() => {
                let id = self
                    .find_item_id(workspace, &spec.name, &item_type)
                    .await?
                    .ok_or_deploy(lookup_failed(spec, e))?;
                info!(workspace = %workspace.name, item = %spec.name, item_type = %item_type, id = %id, "item already exists");
                Ok(EnsureOutcome::existing(id))
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_item_via_cli(
        &self,
        cli: &Arc<dyn CliRunner>,
        workspace: &WorkspaceRef,
        spec: &ResourceSpec,
        item_type: &ItemType,
    ) -> DeployResult<EnsureOutcome> {
        let path = item_path(&workspace.name, spec.parent.as_deref(), &spec.name, item_type);
        let outcome = self
            .retrier
            .run("cli_create_item", &self.cancel, || cli.create_item(&path))
            .await?;

        let id = self
            .find_item_id(workspace, &spec.name, item_type)
            .await?
            .ok_or_internal_error(format!(
                "{} was reported by the CLI but is not visible through the API",
                spec.label()
            ))?;

        match outcome {
            CliCreateOutcome::Created => {
                info!(workspace = %workspace.name, item = %spec.name, item_type = %item_type, id = %id, "item created via CLI");
                Ok(EnsureOutcome::created(id))
            }
            CliCreateOutcome::AlreadyExists => {
                info!(workspace = %workspace.name, item = %spec.name, item_type = %item_type, id = %id, "item already exists");
                Ok(EnsureOutcome::existing(id))
            }
        }
    }

    /// Grant a workspace role, probing principal types when the spec names none.
    pub async fn ensure_access_grant(
        &self,
        workspace: &WorkspaceRef,
        spec: &ResourceSpec,
    ) -> DeployResult<EnsureOutcome> {
        expect_kind(spec, ResourceKind::AccessGrant)?;
        let principal_id = spec.name.as_str();
        let role = spec
            .role()
            .ok_or_validation_error("role", format!("{} has no role", spec.label()))?;

        if self.skip_self_grant && self.is_self(principal_id) {
            info!(workspace = %workspace.name, principal = %principal_id, "skipping access grant for the deploying identity");
            return Ok(EnsureOutcome::skipped_self());
        }

        let candidates: Vec<PrincipalType> = match spec.principal_type() {
            Some(principal_type) => vec![principal_type],
            None => PrincipalType::CANDIDATES.to_vec(),
        };

        let mut last_mismatch = None;
        for principal_type in candidates {
            let request = RoleAssignmentRequest {
                principal_id: principal_id.to_string(),
                principal_type,
                role,
            };

            let added = self
                .retrier
                .run("add_role_assignment", &self.cancel, || {
                    self.api.add_role_assignment(&workspace.id, &request)
                })
                .await;

            match added {
                Ok(assignment) => {
                    info!(workspace = %workspace.name, principal = %principal_id, principal_type = %principal_type, role = %role, "access granted");
                    return Ok(EnsureOutcome::created(assignment.id));
                }
                Err(e) if e.is_already_exists() => {
                    let id = self
                        .find_role_assignment_id(workspace, principal_id)
                        .await?
                        .ok_or_deploy(lookup_failed(spec, e))?;
                    info!(workspace = %workspace.name, principal = %principal_id, "access grant already exists");
                    return Ok(EnsureOutcome::existing(id));
                }
                Err(e) if e.is_principal_type_mismatch() => {
                    debug!(principal = %principal_id, principal_type = %principal_type, error = %e, "principal type rejected");
                    last_mismatch = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_mismatch.unwrap_or_else(|| {
            DeployError::internal_error(format!("no principal type candidates for '{}'", principal_id))
        }))
    }

    pub async fn assign_capacity(&self, workspace: &WorkspaceRef, capacity_id: &str) -> DeployResult<()> {
        self.retrier
            .run("assign_capacity", &self.cancel, || {
                self.api.assign_capacity(&workspace.id, capacity_id)
            })
            .await?;
        info!(workspace = %workspace.name, capacity = %capacity_id, "capacity assigned");
        Ok(())
    }

    /// Delete a recorded resource; an already-deleted resource counts as success.
    ///
    /// Runs with its own cancellation signal so rollback can finish after an interrupt.
    pub async fn delete_entry(&self, entry: &RecordEntry) -> DeployResult<()> {
        let cancel = CancellationSignal::new();
        let remote_id = entry.remote_id.as_str();

        let result = match entry.spec.kind {
            ResourceKind::Workspace => {
                self.retrier
                    .run("delete_workspace", &cancel, || self.api.delete_workspace(remote_id))
                    .await
            }
            kind => {
                let workspace_id = entry
                    .workspace_id
                    .as_deref()
                    .ok_or_internal_error(format!("{} entry has no workspace id", entry.spec.label()))?;
                match kind {
                    ResourceKind::Folder => {
                        self.retrier
                            .run("delete_folder", &cancel, || {
                                self.api.delete_folder(workspace_id, remote_id)
                            })
                            .await
                    }
                    ResourceKind::Item => {
                        self.retrier
                            .run("delete_item", &cancel, || self.api.delete_item(workspace_id, remote_id))
                            .await
                    }
                    _ => {
                        self.retrier
                            .run("delete_role_assignment", &cancel, || {
                                self.api.delete_role_assignment(workspace_id, remote_id)
                            })
                            .await
                    }
                }
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(resource = %entry.spec.label(), id = %remote_id, "already deleted");
            }
            Err(e) => return Err(e),
        }

        match entry.spec.kind {
            ResourceKind::Workspace => {
                self.workspace_ids.write().await.retain(|_, id| id != remote_id);
                self.folder_ids.write().await.retain(|(ws, _), _| ws != remote_id);
            }
            ResourceKind::Folder => {
                self.folder_ids.write().await.retain(|_, id| id != remote_id);
            }
            _ => {}
        }
        Ok(())
    }

    /// Workspace id by name, from cache or a remote lookup.
    pub async fn find_workspace_id(&self, name: &str) -> DeployResult<Option<String>> {
        let key = name.to_lowercase();
        if let Some(id) = self.workspace_ids.read().await.get(&key) {
            return Ok(Some(id.clone()));
        }

        let workspaces = self
            .retrier
            .run("list_workspaces", &self.cancel, || self.api.list_workspaces())
            .await?;
        let found = workspaces
            .into_iter()
            .find(|w| w.display_name.eq_ignore_ascii_case(name))
            .map(|w| w.id);

        if let Some(id) = &found {
            self.remember_workspace(name, id).await;
        }
        Ok(found)
    }

    /// Workspace id by name; a missing workspace is a configuration error.
    pub async fn workspace_id(&self, name: &str) -> DeployResult<String> {
        self.find_workspace_id(name)
            .await?
            .ok_or_else(|| DeployError::config_error(format!("Workspace '{}' does not exist", name)))
    }

    async fn remember_workspace(&self, name: &str, id: &str) {
        self.workspace_ids
            .write()
            .await
            .insert(name.to_lowercase(), id.to_string());
    }

    async fn folder_id(&self, workspace: &WorkspaceRef, name: &str) -> DeployResult<String> {
        let key = (workspace.id.clone(), name.to_lowercase());
        if let Some(id) = self.folder_ids.read().await.get(&key) {
            return Ok(id.clone());
        }

        let folders = self
            .retrier
            .run("list_folders", &self.cancel, || self.api.list_folders(&workspace.id))
            .await?;
        let id = folders
            .into_iter()
            .find(|f| f.display_name.eq_ignore_ascii_case(name))
            .map(|f| f.id)
            .ok_or_else(|| {
                DeployError::config_error(format!(
                    "Folder '{}' does not exist in workspace '{}'",
                    name, workspace.name
                ))
            })?;

        self.folder_ids.write().await.insert(key, id.clone());
        Ok(id)
    }

    async fn lookup_folder(
        &self,
        workspace: &WorkspaceRef,
        name: &str,
        parent_folder_id: Option<&str>,
    ) -> DeployResult<Option<String>> {
        let folders = self
            .retrier
            .run("list_folders", &self.cancel, || self.api.list_folders(&workspace.id))
            .await?;
        Ok(folders
            .into_iter()
            .find(|f| f.display_name.eq_ignore_ascii_case(name) && f.parent_folder_id.as_deref() == parent_folder_id)
            .map(|f| f.id))
    }

    async fn find_item_id(
        &self,
        workspace: &WorkspaceRef,
        name: &str,
        item_type: &ItemType,
    ) -> DeployResult<Option<String>> {
        let items = self
            .retrier
            .run("list_items", &self.cancel, || self.api.list_items(&workspace.id))
            .await?;
        Ok(items
            .into_iter()
            .find(|i| i.display_name.eq_ignore_ascii_case(name) && &i.item_type == item_type)
            .map(|i| i.id))
    }

    async fn find_role_assignment_id(
        &self,
        workspace: &WorkspaceRef,
        principal_id: &str,
    ) -> DeployResult<Option<String>> {
        let assignments = self
            .retrier
            .run("list_role_assignments", &self.cancel, || {
                self.api.list_role_assignments(&workspace.id)
            })
            .await?;
        Ok(assignments
            .into_iter()
            .find(|a| a.principal_id.eq_ignore_ascii_case(principal_id))
            .map(|a| a.id))
    }

    fn cli_for(&self, item_type: &ItemType) -> Option<&Arc<dyn CliRunner>> {
        self.cli
            .as_ref()
            .filter(|_| self.cli_item_types.contains(item_type))
    }

    fn is_self(&self, principal_id: &str) -> bool {
        self.self_principal_id
            .as_deref()
            .is_some_and(|me| me.eq_ignore_ascii_case(principal_id))
    }
}

fn expect_kind(spec: &ResourceSpec, kind: ResourceKind) -> DeployResult<()> {
    if spec.kind != kind {
        return Err(DeployError::internal_error(format!(
            "expected a {} spec, got {}",
            kind,
            spec.label()
        )));
    }
    Ok(())
}

/// The platform said "already exists" but the lookup came back empty.
fn lookup_failed(spec: &ResourceSpec, conflict: DeployError) -> DeployError {
    DeployError::internal_error_with_source(
        format!("{} already exists but could not be found by name", spec.label()),
        conflict,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{RetryPolicy, WorkspaceRole};
    use crate::infrastructure::platform::platform_api::MockPlatformApi;
    use crate::infrastructure::platform::{RemoteItem, RemoteRoleAssignment, RemoteWorkspace};
    use crate::infrastructure::process::cli_fallback::MockCliRunner;
    use std::time::Duration;

    fn client(api: MockPlatformApi) -> ProvisioningClient {
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2));
        ProvisioningClient::new(Arc::new(api), Retrier::new(policy), CancellationSignal::new())
    }

    fn conflict(code: &str) -> DeployError {
        DeployError::api_error(409, Some(code.to_string()), "exists")
    }

    fn workspace_ref() -> WorkspaceRef {
        WorkspaceRef::new("ws-1", "analytics")
    }

    #[tokio::test]
    async fn test_existing_workspace_is_looked_up_not_recreated() {
        let mut api = MockPlatformApi::new();
        api.expect_create_workspace()
            .times(1)
            .returning(|_| Err(conflict("WorkspaceNameAlreadyExists")));
        api.expect_list_workspaces().times(1).returning(|| {
            Ok(vec![RemoteWorkspace {
                id: "ws-9".into(),
                display_name: "Analytics".into(),
                capacity_id: None,
            }])
        });
        let client = client(api);

        let outcome = client
            .ensure_workspace(&ResourceSpec::workspace("analytics"))
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::existing("ws-9"));

        // Cached: no second list call.
        assert_eq!(client.workspace_id("ANALYTICS").await.unwrap(), "ws-9");
    }

    #[tokio::test]
    async fn test_transient_create_failure_is_retried() {
        let mut api = MockPlatformApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_create_item()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DeployError::api_error(503, None, "busy")));
        api.expect_create_item()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, request| {
                Ok(RemoteItem {
                    id: "item-1".into(),
                    display_name: request.display_name.clone(),
                    item_type: request.item_type.clone(),
                    folder_id: None,
                })
            });
        let client = client(api);

        let spec = ResourceSpec::item("ingest", ItemType::new("Notebook"), None);
        let outcome = client.ensure_item(&workspace_ref(), &spec).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::created("item-1"));
    }

    #[tokio::test]
    async fn test_principal_type_probe_order() {
        let mut api = MockPlatformApi::new();
        api.expect_add_role_assignment()
            .times(3)
            .returning(|_, request| match request.principal_type {
                PrincipalType::ServicePrincipal => Ok(RemoteRoleAssignment {
                    id: "ra-1".into(),
                    principal_id: request.principal_id.clone(),
                    principal_type: Some(request.principal_type),
                    role: request.role,
                }),
                _ => Err(DeployError::api_error(400, Some("InvalidPrincipalType".into()), "wrong type")),
            });
        let client = client(api);

        let spec = ResourceSpec::access_grant("spn-1", WorkspaceRole::Contributor, None);
        let outcome = client.ensure_access_grant(&workspace_ref(), &spec).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::created("ra-1"));
    }

    #[tokio::test]
    async fn test_non_mismatch_error_stops_probe() {
        let mut api = MockPlatformApi::new();
        api.expect_add_role_assignment()
            .times(1)
            .returning(|_, _| Err(DeployError::api_error(403, Some("Forbidden".into()), "no")));
        let client = client(api);

        let spec = ResourceSpec::access_grant("user-1", WorkspaceRole::Viewer, None);
        let result = client.ensure_access_grant(&workspace_ref(), &spec).await;
        assert_eq!(result.unwrap_err().status(), Some(403));
    }

    #[tokio::test]
    async fn test_self_grant_is_skipped_without_remote_call() {
        let api = MockPlatformApi::new();
        let client = client(api).with_self_principal(Some("me".into()));

        let spec = ResourceSpec::access_grant("ME", WorkspaceRole::Admin, Some(PrincipalType::ServicePrincipal));
        let outcome = client.ensure_access_grant(&workspace_ref(), &spec).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::skipped_self());
    }

    #[tokio::test]
    async fn test_cli_fallback_resolves_id_through_api() {
        let mut api = MockPlatformApi::new();
        api.expect_create_item().never();
        api.expect_list_items().times(1).returning(|_| {
            Ok(vec![RemoteItem {
                id: "env-1".into(),
                display_name: "spark".into(),
                item_type: ItemType::new("Environment"),
                folder_id: None,
            }])
        });
        let mut cli = MockCliRunner::new();
        cli.expect_create_item()
            .withf(|path| path == "analytics.Workspace/spark.Environment")
            .times(1)
            .returning(|_| Ok(CliCreateOutcome::AlreadyExists));

        let client = client(api).with_cli_fallback(Arc::new(cli), vec![ItemType::new("environment")]);
        let spec = ResourceSpec::item("spark", ItemType::new("Environment"), None);
        let outcome = client.ensure_item(&workspace_ref(), &spec).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::existing("env-1"));
    }

    #[tokio::test]
    async fn test_delete_entry_treats_not_found_as_success() {
        let mut api = MockPlatformApi::new();
        api.expect_delete_item()
            .times(1)
            .returning(|_, _| Err(DeployError::api_error(404, Some("ItemNotFound".into()), "gone")));
        let client = client(api);

        let entry = RecordEntry::new(
            ResourceSpec::item("ingest", ItemType::new("Notebook"), None),
            "item-1",
            Some("ws-1".into()),
        );
        assert!(client.delete_entry(&entry).await.is_ok());
    }
}
