use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Platform error codes meaning the requested resource (or binding) is already in place.
pub const ALREADY_EXISTS_CODES: &[&str] = &[
    "WorkspaceNameAlreadyExists",
    "FolderDisplayNameAlreadyInUse",
    "ItemDisplayNameAlreadyInUse",
    "PrincipalAlreadyHasWorkspaceRolePermissions",
    "DuplicateConnectionName",
    "WorkspaceAlreadyConnectedToGit",
    "WorkspaceGitConnectionAlreadyInitialized",
    "DeploymentPipelineNameAlreadyExists",
    "WorkspaceAlreadyAssignedToStage",
];

/// Conflict codes that are safe to retry (the platform has not settled yet).
pub const RETRYABLE_CONFLICT_CODES: &[&str] = &["ItemDisplayNameNotAvailableYet"];

/// Codes returned when a role assignment names the wrong principal type.
pub const PRINCIPAL_TYPE_MISMATCH_CODES: &[&str] = &[
    "PrincipalTypeNotSupported",
    "InvalidPrincipalType",
    "PrincipalNotFound",
];

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Platform API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network operation failed: {message}")]
    Network {
        message: String,
        url: Option<String>,
        timed_out: bool,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Operation '{operation}' timed out after {timeout_secs} seconds")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing credential: {name}")]
    MissingCredential { name: String },

    #[error("Unresolved configuration placeholders: {keys:?}")]
    UnresolvedPlaceholders { keys: Vec<String> },

    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {field} - {message}")]
    ValidationError {
        field: String,
        message: String,
        value: Option<String>,
    },

    #[error("Invalid stage transition from '{from}' to '{to}': {reason}")]
    InvalidStageTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid deployment state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Workspace '{workspace}' is bound to {observed}, expected {desired}")]
    GitBindingMismatch {
        workspace: String,
        observed: String,
        desired: String,
    },

    #[error("Promotion operation {operation_id} failed: {message}")]
    PromotionFailed {
        operation_id: String,
        message: String,
    },

    #[error("Command execution failed: {message}")]
    CommandError {
        message: String,
        command: String,
        exit_code: Option<i32>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File system operation failed: {message}")]
    FileSystemError {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Serialization error: {message}")]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("'{operation}' failed after {attempts} attempts in {elapsed:?}: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last_error: Box<DeployError>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DeployError {
    pub fn api_error(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network_error(message: impl Into<String>, url: Option<String>) -> Self {
        Self::Network {
            message: message.into(),
            url,
            timed_out: false,
            source: None,
        }
    }

    pub fn network_error_with_source(
        message: impl Into<String>,
        url: Option<String>,
        source: reqwest::Error,
    ) -> Self {
        Self::Network {
            message: message.into(),
            url,
            timed_out: source.is_timeout(),
            source: Some(source),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }

    pub fn authentication_error(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    pub fn authentication_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Authentication {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn missing_credential(name: impl Into<String>) -> Self {
        Self::MissingCredential { name: name.into() }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn validation_error(
        field: impl Into<String>,
        message: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
            value,
        }
    }

    pub fn invalid_stage_transition(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStageTransition {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    pub fn command_error(
        message: impl Into<String>,
        command: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::CommandError {
            message: message.into(),
            command: command.into(),
            exit_code,
            source: None,
        }
    }

    pub fn command_error_with_source(
        message: impl Into<String>,
        command: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::CommandError {
            message: message.into(),
            command: command.into(),
            exit_code: None,
            source: Some(source),
        }
    }

    pub fn filesystem_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::FileSystemError {
            message: message.into(),
            path,
            source: None,
        }
    }

    pub fn filesystem_error_with_source(
        message: impl Into<String>,
        path: Option<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystemError {
            message: message.into(),
            path,
            source: Some(source),
        }
    }

    pub fn serialization_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_error_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InternalError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Platform error code, when the error came from the platform API.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status, when the error came from the platform API.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided delay hint attached to a throttled response.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Transient errors are retried automatically: network failures, HTTP 429,
    /// HTTP 5xx and conflicts the platform marks as not yet settled.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Api { status, code, .. } => {
                *status == 429
                    || (500..=599).contains(status)
                    || code
                        .as_deref()
                        .is_some_and(|c| RETRYABLE_CONFLICT_CODES.contains(&c))
            }
            _ => false,
        }
    }

    /// The platform refused the request outright (HTTP 429), so nothing was started.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    /// Idempotent conflicts: the resource or binding already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Api { status, code, .. } => match code.as_deref() {
                Some(c) if ALREADY_EXISTS_CODES.contains(&c) => true,
                Some(c) if RETRYABLE_CONFLICT_CODES.contains(&c) => false,
                _ => *status == 409,
            },
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    pub fn is_principal_type_mismatch(&self) -> bool {
        self.api_code()
            .is_some_and(|c| PRINCIPAL_TYPE_MISMATCH_CODES.contains(&c))
    }

    /// Fatal configuration errors are raised before any remote call is made.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential { .. }
                | Self::UnresolvedPlaceholders { .. }
                | Self::ConfigError { .. }
                | Self::ValidationError { .. }
                | Self::InvalidStageTransition { .. }
        )
    }
}

impl From<std::io::Error> for DeployError {
    fn from(error: std::io::Error) -> Self {
        Self::filesystem_error_with_source("File system operation failed", None, error)
    }
}

impl From<serde_yaml::Error> for DeployError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::serialization_error_with_source("YAML serialization failed", error)
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization_error_with_source("JSON serialization failed", error)
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string());
        Self::network_error_with_source("Network request failed", url, error)
    }
}

impl From<url::ParseError> for DeployError {
    fn from(error: url::ParseError) -> Self {
        Self::config_error_with_source("Invalid URL", error)
    }
}

impl From<validator::ValidationErrors> for DeployError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::config_error_with_source("Deployment configuration is invalid", errors)
    }
}
