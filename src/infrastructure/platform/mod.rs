pub mod http_client;
pub mod platform_api;
pub mod token_source;

pub use http_client::{HttpPlatformApi, HttpPlatformOptions, DEFAULT_API_URL};
pub use platform_api::{
    CreateConnectionRequest, CreateFolderRequest, CreateItemRequest, CreatePipelineRequest,
    CreateWorkspaceRequest, GitConnectRequest, GitConnectionState, PlatformApi, PromotionRequest,
    RemoteConnection, RemoteFolder, RemoteItem, RemotePipeline, RemoteRoleAssignment, RemoteStage,
    RemoteWorkspace, RoleAssignmentRequest, StageItem,
};
pub use token_source::{ClientCredentialsTokenSource, StaticTokenSource, TokenSource};
