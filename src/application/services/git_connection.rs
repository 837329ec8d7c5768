use crate::application::services::retry::Retrier;
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::value_objects::{GitBinding, GitProvider};
use crate::infrastructure::platform::{CreateConnectionRequest, GitConnectRequest, PlatformApi};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Credential connection used to authenticate the workspace against the repository.
#[derive(Clone)]
pub struct GitCredentials {
    pub connection_name: String,
    pub access_token: Option<String>,
}

impl GitCredentials {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("connection_name", &self.connection_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitConnectResult {
    pub success: bool,
    /// Workspace was already bound exactly as desired; nothing was changed.
    pub no_change: bool,
    /// The credential connection existed and was reused.
    pub duplicate: bool,
    /// Connect reported the workspace as already connected.
    pub already_connected: bool,
    pub connection_id: Option<String>,
}

/// Binds workspaces to git without ever rebinding them.
pub struct GitConnectionManager {
    api: Arc<dyn PlatformApi>,
    retrier: Retrier,
    cancel: CancellationSignal,
}

impl GitConnectionManager {
    pub fn new(api: Arc<dyn PlatformApi>, retrier: Retrier, cancel: CancellationSignal) -> Self {
        Self { api, retrier, cancel }
    }

    /// Bind `workspace_id` to `desired`.
    ///
    /// A workspace already bound to `desired` is left untouched. A workspace
    /// bound elsewhere fails with [`DeployError::GitBindingMismatch`].
    pub async fn connect(
        &self,
        workspace_id: &str,
        desired: &GitBinding,
        credentials: &GitCredentials,
    ) -> DeployResult<GitConnectResult> {
        let observed = self
            .retrier
            .run("get_git_connection", &self.cancel, || {
                self.api.get_git_connection(workspace_id)
            })
            .await?;

        if let Some(binding) = observed.binding {
            if &binding == desired {
                info!(workspace_id, binding = %desired, "git binding already in place");
                return Ok(GitConnectResult {
                    success: true,
                    no_change: true,
                    connection_id: observed.connection_id,
                    ..Default::default()
                });
            }
            return Err(DeployError::GitBindingMismatch {
                workspace: workspace_id.to_string(),
                observed: binding.to_string(),
                desired: desired.to_string(),
            });
        }

        let mut result = GitConnectResult::default();
        if needs_connection(desired, credentials) {
            let (connection_id, duplicate) = self.ensure_connection(desired, credentials).await?;
            result.connection_id = Some(connection_id);
            result.duplicate = duplicate;
        }

        let request = GitConnectRequest {
            binding: desired.clone(),
            connection_id: result.connection_id.clone(),
        };
        let connected = self
            .retrier
            .run("connect_git", &self.cancel, || {
                self.api.connect_git(workspace_id, &request)
            })
            .await;

        match connected {
            Ok(()) => {
                info!(workspace_id, binding = %desired, "workspace connected to git");
                self.initialize(workspace_id).await?;
            }
            Err(e) if e.is_already_exists() => {
                info!(workspace_id, code = e.api_code().unwrap_or_default(), "workspace already connected to git");
                result.already_connected = true;
            }
            Err(e) => return Err(e),
        }

        result.success = true;
        Ok(result)
    }

    async fn ensure_connection(
        &self,
        desired: &GitBinding,
        credentials: &GitCredentials,
    ) -> DeployResult<(String, bool)> {
        let request = CreateConnectionRequest {
            display_name: credentials.connection_name.clone(),
            repository_url: desired.repository_url().to_string(),
            access_token: credentials.access_token.clone(),
        };

        let created = self
            .retrier
            .run("create_connection", &self.cancel, || {
                self.api.create_connection(&request)
            })
            .await;

        match created {
            Ok(connection) => {
                info!(connection = %connection.display_name, id = %connection.id, "git connection created");
                Ok((connection.id, false))
            }
            Err(e) if e.is_already_exists() => {
                let connections = self
                    .retrier
                    .run("list_connections", &self.cancel, || self.api.list_connections())
                    .await?;
                let existing = connections
                    .into_iter()
                    .find(|c| c.display_name.eq_ignore_ascii_case(&credentials.connection_name))
                    .ok_or_else(|| {
                        DeployError::internal_error_with_source(
                            format!(
                                "connection '{}' already exists but could not be found by name",
                                credentials.connection_name
                            ),
                            e,
                        )
                    })?;
                info!(connection = %existing.display_name, id = %existing.id, "reusing existing git connection");
                Ok((existing.id, true))
            }
            Err(e) => Err(e),
        }
    }

    async fn initialize(&self, workspace_id: &str) -> DeployResult<()> {
        let initialized = self
            .retrier
            .run("initialize_git_connection", &self.cancel, || {
                self.api.initialize_git_connection(workspace_id)
            })
            .await;

        match initialized {
            Ok(()) => {
                info!(workspace_id, "git connection initialized");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!(workspace_id, "git connection already initialized");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// GitHub always needs a stored credential; Azure DevOps only when a token is configured.
fn needs_connection(desired: &GitBinding, credentials: &GitCredentials) -> bool {
    matches!(desired.provider(), GitProvider::GitHub { .. }) || credentials.access_token.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::RetryPolicy;
    use crate::infrastructure::platform::platform_api::MockPlatformApi;
    use crate::infrastructure::platform::GitConnectionState;

    fn manager(api: MockPlatformApi) -> GitConnectionManager {
        GitConnectionManager::new(
            Arc::new(api),
            Retrier::new(RetryPolicy::no_retry()),
            CancellationSignal::new(),
        )
    }

    fn ado_binding() -> GitBinding {
        GitBinding::new("https://dev.azure.com/contoso/Data/_git/items", "main", Some("ws")).unwrap()
    }

    #[tokio::test]
    async fn test_identical_binding_makes_no_mutating_call() {
        let mut api = MockPlatformApi::new();
        api.expect_get_git_connection().times(1).returning(|_| {
            Ok(GitConnectionState {
                binding: Some(
                    GitBinding::new("https://dev.azure.com/contoso/Data/_git/items.git", "main", Some("/ws/")).unwrap(),
                ),
                connection_id: None,
                initialized: true,
            })
        });
        api.expect_connect_git().never();
        api.expect_create_connection().never();

        let result = manager(api)
            .connect("ws-1", &ado_binding(), &GitCredentials::new("git-items"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.no_change);
    }

    #[tokio::test]
    async fn test_different_binding_is_rejected() {
        let mut api = MockPlatformApi::new();
        api.expect_get_git_connection().returning(|_| {
            Ok(GitConnectionState {
                binding: Some(GitBinding::new("https://dev.azure.com/contoso/Data/_git/items", "dev", Some("ws")).unwrap()),
                connection_id: None,
                initialized: true,
            })
        });
        api.expect_connect_git().never();

        let result = manager(api)
            .connect("ws-1", &ado_binding(), &GitCredentials::new("git-items"))
            .await;
        assert!(matches!(result, Err(DeployError::GitBindingMismatch { .. })));
    }

    #[tokio::test]
    async fn test_azure_devops_without_token_connects_automatically() {
        let mut api = MockPlatformApi::new();
        api.expect_get_git_connection()
            .returning(|_| Ok(GitConnectionState::default()));
        api.expect_create_connection().never();
        api.expect_connect_git()
            .withf(|_, request| request.connection_id.is_none())
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_initialize_git_connection()
            .times(1)
            .returning(|_| {
                Err(DeployError::api_error(
                    409,
                    Some("WorkspaceGitConnectionAlreadyInitialized".into()),
                    "initialized",
                ))
            });

        let result = manager(api)
            .connect("ws-1", &ado_binding(), &GitCredentials::new("git-items"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.no_change);
        assert!(!result.already_connected);
        assert_eq!(result.connection_id, None);
    }

    #[tokio::test]
    async fn test_already_connected_conflict_is_success() {
        let mut api = MockPlatformApi::new();
        api.expect_get_git_connection()
            .returning(|_| Ok(GitConnectionState::default()));
        api.expect_connect_git().times(1).returning(|_, _| {
            Err(DeployError::api_error(
                409,
                Some("WorkspaceAlreadyConnectedToGit".into()),
                "connected",
            ))
        });
        api.expect_initialize_git_connection().never();

        let result = manager(api)
            .connect("ws-1", &ado_binding(), &GitCredentials::new("git-items"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.already_connected);
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = GitCredentials::new("git-items").with_access_token(Some("ghp_secret".into()));
        assert!(!format!("{:?}", credentials).contains("ghp_secret"));
    }
}
