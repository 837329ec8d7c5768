//! REST implementation of [`PlatformApi`] over reqwest.
//!
//! Every request is authenticated through the shared [`TokenManager`]. List
//! endpoints are followed across `continuationUri` pages; create calls that
//! answer `202 Accepted` are awaited through the long-running operation
//! endpoints before the created resource is returned. Operation status polls
//! are retried in place and stop when the run is cancelled; a failed poll never
//! re-sends the original request.

use super::platform_api::*;
use crate::application::services::retry::Retrier;
use crate::application::services::token_manager::TokenManager;
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::{DeployResult, OptionExt};
use crate::domain::entities::{FailedItem, PromotionOperation, PromotionStatus};
use crate::domain::value_objects::{GitBinding, GitProvider, ItemType, PrincipalType, RetryPolicy, WorkspaceRole};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.fabric.microsoft.com/v1/";

const OPERATION_ID_HEADER: &str = "x-ms-operation-id";

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct HttpPlatformOptions {
    pub request_timeout: Duration,
    /// Poll interval for long-running operations without a Retry-After hint
    pub operation_poll_interval: Duration,
    pub operation_timeout: Duration,
    /// Retries for a single operation status request
    pub operation_poll_retry: RetryPolicy,
}

impl Default for HttpPlatformOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            operation_poll_interval: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(600),
            operation_poll_retry: RetryPolicy::default(),
        }
    }
}

pub struct HttpPlatformApi {
    client: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    poll_retrier: Retrier,
    options: HttpPlatformOptions,
    cancel: CancellationSignal,
}

impl HttpPlatformApi {
    pub fn new(base_url: &str, tokens: Arc<TokenManager>, options: HttpPlatformOptions) -> DeployResult<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("fabdeploy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::internal_error_with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base_url,
            tokens,
            poll_retrier: Retrier::new(options.operation_poll_retry.clone()),
            options,
            cancel: CancellationSignal::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, path: &str) -> DeployResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> DeployResult<Response> {
        let token = self.tokens.get_token().await?;
        debug!(%method, %url, "platform request");

        let mut request = self.client.request(method, url.clone()).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeployError::network_error_with_source("Platform request failed", Some(url.to_string()), e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DeployResult<T> {
        let response = self.send(Method::GET, self.url(path)?, None).await?;
        Ok(response.json::<T>().await?)
    }

    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> DeployResult<Vec<T>> {
        let mut url = self.url(path)?;
        let mut values = Vec::new();
        loop {
            let page: Page<T> = self.send(Method::GET, url, None).await?.json().await?;
            values.extend(page.value);
            match page.continuation_uri {
                Some(next) if !next.is_empty() => url = Url::parse(&next)?,
                _ => break,
            }
        }
        Ok(values)
    }

    /// GET used while awaiting an operation; transient failures are retried here.
    async fn poll_get(&self, path: &str, cancel: &CancellationSignal) -> DeployResult<Response> {
        let url = self.url(path)?;
        self.poll_retrier
            .run("operation status", cancel, || self.send(Method::GET, url.clone(), None))
            .await
    }

    /// POST/DELETE that may answer 202; resolves to the final JSON body, if any.
    async fn send_awaiting(&self, method: Method, path: &str, body: Option<&Value>) -> DeployResult<Option<Value>> {
        // Deletes come from rollback, which runs to the end after an interrupt.
        let cancel = if method == Method::DELETE {
            CancellationSignal::new()
        } else {
            self.cancel.clone()
        };

        let response = self.send(method, self.url(path)?, body).await?;
        if response.status() != StatusCode::ACCEPTED {
            return read_optional_json(response).await;
        }

        let operation_id = header_str(response.headers(), OPERATION_ID_HEADER)
            .ok_or_internal_error("Accepted response without an operation id")?;
        let mut delay = retry_after(response.headers()).unwrap_or(self.options.operation_poll_interval);
        let deadline = Instant::now() + self.options.operation_timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(DeployError::timeout(
                    format!("operation {}", operation_id),
                    self.options.operation_timeout.as_secs(),
                ));
            }
            cancel.sleep(delay).await?;

            let response = self
                .poll_get(&format!("operations/{}", operation_id), &cancel)
                .await?;
            delay = retry_after(response.headers()).unwrap_or(self.options.operation_poll_interval);
            let state: OperationState = response.json().await?;

            match state.status.as_str() {
                "Succeeded" => break,
                "Failed" | "Cancelled" => {
                    let (code, message) = state
                        .error
                        .map(|e| (e.error_code, e.message))
                        .unwrap_or((None, format!("operation {} {}", operation_id, state.status)));
                    return Err(DeployError::api_error(400, code, message));
                }
                _ => continue,
            }
        }

        let result = self
            .poll_get(&format!("operations/{}/result", operation_id), &cancel)
            .await;
        match result {
            Ok(response) => read_optional_json(response).await,
            // Operations without a result payload answer 404 here.
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_no_content(&self, method: Method, path: &str, body: Option<&Value>) -> DeployResult<()> {
        self.send_awaiting(method, path, body).await.map(|_| ())
    }

    async fn create<T: DeserializeOwned>(&self, path: &str, body: &Value) -> DeployResult<T> {
        let value = self
            .send_awaiting(Method::POST, path, Some(body))
            .await?
            .ok_or_internal_error(format!("Create call to '{}' returned no body", path))?;
        Ok(serde_json::from_value(value)?)
    }
}

async fn read_optional_json(response: Response) -> DeployResult<Option<Value>> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&text)?))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success response to [`DeployError::Api`].
async fn error_from_response(response: Response) -> DeployError {
    let status = response.status().as_u16();
    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();

    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.into_parts(),
        Err(_) if body.trim().is_empty() => (None, format!("HTTP {}", status)),
        Err(_) => (None, body),
    };

    DeployError::Api {
        status,
        code,
        message,
        retry_after,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<NestedError>,
}

#[derive(Debug, Deserialize)]
struct NestedError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn into_parts(self) -> (Option<String>, String) {
        let nested_code = self.error.as_ref().and_then(|e| e.code.clone());
        let nested_message = self.error.and_then(|e| e.message);
        (
            self.error_code.or(nested_code),
            self.message
                .or(nested_message)
                .unwrap_or_else(|| "no error message".to_string()),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    continuation_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationState {
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationError {
    #[serde(default)]
    error_code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceDto {
    id: String,
    display_name: String,
    #[serde(default)]
    capacity_id: Option<String>,
}

impl From<WorkspaceDto> for RemoteWorkspace {
    fn from(dto: WorkspaceDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
            capacity_id: dto.capacity_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderDto {
    id: String,
    display_name: String,
    #[serde(default)]
    parent_folder_id: Option<String>,
}

impl From<FolderDto> for RemoteFolder {
    fn from(dto: FolderDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
            parent_folder_id: dto.parent_folder_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDto {
    id: String,
    display_name: String,
    #[serde(rename = "type")]
    item_type: ItemType,
    #[serde(default)]
    folder_id: Option<String>,
}

impl From<ItemDto> for RemoteItem {
    fn from(dto: ItemDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
            item_type: dto.item_type,
            folder_id: dto.folder_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrincipalDto {
    id: String,
    #[serde(rename = "type", default)]
    principal_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleAssignmentDto {
    id: String,
    principal: PrincipalDto,
    role: String,
}

impl TryFrom<RoleAssignmentDto> for RemoteRoleAssignment {
    type Error = DeployError;

    fn try_from(dto: RoleAssignmentDto) -> Result<Self, Self::Error> {
        let role: WorkspaceRole = dto
            .role
            .parse()
            .map_err(|e: String| DeployError::internal_error(e))?;
        Ok(Self {
            id: dto.id,
            principal_id: dto.principal.id,
            principal_type: dto
                .principal
                .principal_type
                .and_then(|t| t.parse::<PrincipalType>().ok()),
            role,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitConnectionDto {
    #[serde(default)]
    git_provider_details: Option<GitProviderDetailsDto>,
    #[serde(default)]
    git_connection_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitProviderDetailsDto {
    #[serde(flatten)]
    provider: GitProvider,
    branch_name: String,
    #[serde(default)]
    directory_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDto {
    id: String,
    #[serde(default)]
    display_name: String,
}

impl From<ConnectionDto> for RemoteConnection {
    fn from(dto: ConnectionDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineDto {
    id: String,
    display_name: String,
}

impl From<PipelineDto> for RemotePipeline {
    fn from(dto: PipelineDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageDto {
    id: String,
    display_name: String,
    order: u32,
    #[serde(default)]
    workspace_id: Option<String>,
}

impl From<StageDto> for RemoteStage {
    fn from(dto: StageDto) -> Self {
        Self {
            id: dto.id,
            display_name: dto.display_name,
            order: dto.order,
            workspace_id: dto.workspace_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageItemDto {
    item_id: String,
    item_display_name: String,
    item_type: ItemType,
}

impl From<StageItemDto> for StageItem {
    fn from(dto: StageItemDto) -> Self {
        Self {
            item_id: dto.item_id,
            display_name: dto.item_display_name,
            item_type: dto.item_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineOperationDto {
    id: String,
    status: String,
    #[serde(default)]
    execution_plan: Option<ExecutionPlanDto>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct ExecutionPlanDto {
    #[serde(default)]
    steps: Vec<ExecutionStepDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionStepDto {
    status: String,
    #[serde(default)]
    source_and_target: Option<SourceAndTargetDto>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceAndTargetDto {
    #[serde(default)]
    source_item_display_name: Option<String>,
    #[serde(default)]
    target_item_display_name: Option<String>,
    item_type: ItemType,
}

impl TryFrom<PipelineOperationDto> for PromotionOperation {
    type Error = DeployError;

    fn try_from(dto: PipelineOperationDto) -> Result<Self, Self::Error> {
        let status: PromotionStatus = dto
            .status
            .parse()
            .map_err(|e: String| DeployError::internal_error(e))?;

        let failed_items = dto
            .execution_plan
            .map(|plan| {
                plan.steps
                    .into_iter()
                    .filter(|step| step.status.eq_ignore_ascii_case("Failed"))
                    .filter_map(|step| {
                        let target = step.source_and_target?;
                        Some(FailedItem {
                            item_name: target
                                .source_item_display_name
                                .or(target.target_item_display_name)
                                .unwrap_or_default(),
                            item_type: target.item_type,
                            message: step.error.map(|e| e.message).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let operation = PromotionOperation::new(dto.id, status).with_failed_items(failed_items);
        Ok(match dto.error {
            Some(error) => operation.with_error(error.message),
            None => operation,
        })
    }
}

fn git_provider_json(binding: &GitBinding) -> Value {
    let mut details = serde_json::to_value(binding.provider()).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut details {
        map.insert("branchName".into(), json!(binding.branch()));
        map.insert("directoryName".into(), json!(binding.api_directory()));
    }
    details
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn list_workspaces(&self) -> DeployResult<Vec<RemoteWorkspace>> {
        let dtos: Vec<WorkspaceDto> = self.list_all("workspaces").await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_workspace(&self, request: &CreateWorkspaceRequest) -> DeployResult<RemoteWorkspace> {
        let body = json!({
            "displayName": request.display_name,
            "description": request.description,
            "capacityId": request.capacity_id,
        });
        let dto: WorkspaceDto = self.create("workspaces", &body).await?;
        Ok(dto.into())
    }

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()> {
        self.send_no_content(Method::DELETE, &format!("workspaces/{}", workspace_id), None)
            .await
    }

    async fn assign_capacity(&self, workspace_id: &str, capacity_id: &str) -> DeployResult<()> {
        let body = json!({ "capacityId": capacity_id });
        self.send_no_content(
            Method::POST,
            &format!("workspaces/{}/assignToCapacity", workspace_id),
            Some(&body),
        )
        .await
    }

    async fn list_folders(&self, workspace_id: &str) -> DeployResult<Vec<RemoteFolder>> {
        let dtos: Vec<FolderDto> = self
            .list_all(&format!("workspaces/{}/folders", workspace_id))
            .await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_folder(&self, workspace_id: &str, request: &CreateFolderRequest) -> DeployResult<RemoteFolder> {
        let body = json!({
            "displayName": request.display_name,
            "parentFolderId": request.parent_folder_id,
        });
        let dto: FolderDto = self
            .create(&format!("workspaces/{}/folders", workspace_id), &body)
            .await?;
        Ok(dto.into())
    }

    async fn delete_folder(&self, workspace_id: &str, folder_id: &str) -> DeployResult<()> {
        self.send_no_content(
            Method::DELETE,
            &format!("workspaces/{}/folders/{}", workspace_id, folder_id),
            None,
        )
        .await
    }

    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>> {
        let dtos: Vec<ItemDto> = self
            .list_all(&format!("workspaces/{}/items", workspace_id))
            .await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_item(&self, workspace_id: &str, request: &CreateItemRequest) -> DeployResult<RemoteItem> {
        let mut body = json!({
            "displayName": request.display_name,
            "type": request.item_type.as_str(),
            "description": request.description,
            "folderId": request.folder_id,
        });
        if let (Some(definition), Value::Object(map)) = (&request.definition, &mut body) {
            map.insert("definition".into(), definition.clone());
        }
        let dto: ItemDto = self
            .create(&format!("workspaces/{}/items", workspace_id), &body)
            .await?;
        Ok(dto.into())
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()> {
        self.send_no_content(
            Method::DELETE,
            &format!("workspaces/{}/items/{}", workspace_id, item_id),
            None,
        )
        .await
    }

    async fn list_role_assignments(&self, workspace_id: &str) -> DeployResult<Vec<RemoteRoleAssignment>> {
        let dtos: Vec<RoleAssignmentDto> = self
            .list_all(&format!("workspaces/{}/roleAssignments", workspace_id))
            .await?;
        dtos.into_iter().map(TryInto::try_into).collect()
    }

    async fn add_role_assignment(
        &self,
        workspace_id: &str,
        request: &RoleAssignmentRequest,
    ) -> DeployResult<RemoteRoleAssignment> {
        let body = json!({
            "principal": {
                "id": request.principal_id,
                "type": request.principal_type.as_str(),
            },
            "role": request.role.as_str(),
        });
        let dto: RoleAssignmentDto = self
            .create(&format!("workspaces/{}/roleAssignments", workspace_id), &body)
            .await?;
        dto.try_into()
    }

    async fn delete_role_assignment(&self, workspace_id: &str, assignment_id: &str) -> DeployResult<()> {
        self.send_no_content(
            Method::DELETE,
            &format!("workspaces/{}/roleAssignments/{}", workspace_id, assignment_id),
            None,
        )
        .await
    }

    async fn get_git_connection(&self, workspace_id: &str) -> DeployResult<GitConnectionState> {
        let dto: GitConnectionDto = self
            .get_json(&format!("workspaces/{}/git/connection", workspace_id))
            .await?;

        let state = dto.git_connection_state.unwrap_or_default();
        if state.eq_ignore_ascii_case("NotConnected") {
            return Ok(GitConnectionState::default());
        }

        Ok(GitConnectionState {
            binding: dto.git_provider_details.map(|details| {
                GitBinding::from_provider(details.provider, &details.branch_name, &details.directory_name)
            }),
            connection_id: None,
            initialized: state.eq_ignore_ascii_case("ConnectedAndInitialized"),
        })
    }

    async fn connect_git(&self, workspace_id: &str, request: &GitConnectRequest) -> DeployResult<()> {
        let credentials = match &request.connection_id {
            Some(id) => json!({ "source": "ConfiguredConnection", "connectionId": id }),
            None => json!({ "source": "Automatic" }),
        };
        let body = json!({
            "gitProviderDetails": git_provider_json(&request.binding),
            "myGitCredentials": credentials,
        });
        self.send_no_content(
            Method::POST,
            &format!("workspaces/{}/git/connect", workspace_id),
            Some(&body),
        )
        .await
    }

    async fn initialize_git_connection(&self, workspace_id: &str) -> DeployResult<()> {
        let body = json!({ "initializationStrategy": "PreferRemote" });
        self.send_no_content(
            Method::POST,
            &format!("workspaces/{}/git/initializeConnection", workspace_id),
            Some(&body),
        )
        .await
    }

    async fn list_connections(&self) -> DeployResult<Vec<RemoteConnection>> {
        let dtos: Vec<ConnectionDto> = self.list_all("connections").await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_connection(&self, request: &CreateConnectionRequest) -> DeployResult<RemoteConnection> {
        let credentials = match &request.access_token {
            Some(token) => json!({
                "singleSignOnType": "None",
                "connectionEncryption": "NotEncrypted",
                "skipTestConnection": false,
                "credentials": { "credentialType": "Key", "key": token },
            }),
            None => json!({
                "singleSignOnType": "None",
                "connectionEncryption": "NotEncrypted",
                "skipTestConnection": false,
                "credentials": { "credentialType": "Anonymous" },
            }),
        };
        let body = json!({
            "connectivityType": "ShareableCloud",
            "displayName": request.display_name,
            "connectionDetails": {
                "type": "GitHubSourceControl",
                "creationMethod": "GitHubSourceControl.Contents",
                "parameters": [
                    { "dataType": "Text", "name": "url", "value": request.repository_url }
                ],
            },
            "privacyLevel": "Organizational",
            "credentialDetails": credentials,
        });
        let dto: ConnectionDto = self.create("connections", &body).await?;
        Ok(dto.into())
    }

    async fn list_pipelines(&self) -> DeployResult<Vec<RemotePipeline>> {
        let dtos: Vec<PipelineDto> = self.list_all("deploymentPipelines").await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_pipeline(&self, request: &CreatePipelineRequest) -> DeployResult<RemotePipeline> {
        let stages: Vec<Value> = request
            .stage_names
            .iter()
            .map(|name| json!({ "displayName": name, "description": "", "isPublic": false }))
            .collect();
        let body = json!({
            "displayName": request.display_name,
            "description": request.description,
            "stages": stages,
        });
        let dto: PipelineDto = self.create("deploymentPipelines", &body).await?;
        Ok(dto.into())
    }

    async fn list_pipeline_stages(&self, pipeline_id: &str) -> DeployResult<Vec<RemoteStage>> {
        let dtos: Vec<StageDto> = self
            .list_all(&format!("deploymentPipelines/{}/stages", pipeline_id))
            .await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn assign_stage_workspace(&self, pipeline_id: &str, stage_id: &str, workspace_id: &str) -> DeployResult<()> {
        let body = json!({ "workspaceId": workspace_id });
        self.send_no_content(
            Method::POST,
            &format!(
                "deploymentPipelines/{}/stages/{}/assignWorkspace",
                pipeline_id, stage_id
            ),
            Some(&body),
        )
        .await
    }

    async fn list_stage_items(&self, pipeline_id: &str, stage_id: &str) -> DeployResult<Vec<StageItem>> {
        let dtos: Vec<StageItemDto> = self
            .list_all(&format!("deploymentPipelines/{}/stages/{}/items", pipeline_id, stage_id))
            .await?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn deploy_stage(&self, pipeline_id: &str, request: &PromotionRequest) -> DeployResult<PromotionOperation> {
        let mut body = json!({
            "sourceStageId": request.source_stage_id,
            "targetStageId": request.target_stage_id,
            "note": request.note,
        });
        if let (Some(items), Value::Object(map)) = (&request.items, &mut body) {
            let items: Vec<Value> = items
                .iter()
                .map(|i| json!({ "sourceItemId": i.item_id, "itemType": i.item_type.as_str() }))
                .collect();
            map.insert("items".into(), Value::Array(items));
        }

        let url = self.url(&format!("deploymentPipelines/{}/deploy", pipeline_id))?;
        let response = self.send(Method::POST, url, Some(&body)).await?;
        let location = header_str(response.headers(), LOCATION.as_str());
        let operation_id = header_str(response.headers(), OPERATION_ID_HEADER)
            .ok_or_internal_error("Deploy response without an operation id")?;

        let operation = PromotionOperation::new(operation_id, PromotionStatus::NotStarted);
        Ok(match location {
            Some(location) => operation.with_location(location),
            None => operation,
        })
    }

    async fn get_promotion_operation(&self, pipeline_id: &str, operation_id: &str) -> DeployResult<PromotionOperation> {
        let dto: PipelineOperationDto = self
            .get_json(&format!("deploymentPipelines/{}/operations/{}", pipeline_id, operation_id))
            .await?;
        dto.try_into()
    }
}
