use crate::common::error::DeployError;

/// Result alias used across the crate.
///
/// # Examples
///
/// ```
/// use fabdeploy::common::result::DeployResult;
/// use fabdeploy::common::error::DeployError;
///
/// fn example_function() -> DeployResult<String> {
///     Ok("success".to_string())
/// }
///
/// fn example_with_error() -> DeployResult<()> {
///     Err(DeployError::internal_error("Something went wrong"))
/// }
/// ```
pub type DeployResult<T> = Result<T, DeployError>;

/// Conversions from `Option` into [`DeployResult`].
pub trait OptionExt<T> {
    /// Convert `None` into the given error.
    fn ok_or_deploy(self, error: DeployError) -> DeployResult<T>;

    /// Convert `None` into an internal error with the given message.
    ///
    /// ```
    /// use fabdeploy::common::result::{DeployResult, OptionExt};
    ///
    /// let none_value: Option<String> = None;
    /// let result: DeployResult<String> = none_value.ok_or_internal_error("Value not found");
    /// assert!(result.is_err());
    /// ```
    fn ok_or_internal_error(self, message: impl Into<String>) -> DeployResult<T>;

    /// Convert `None` into a validation error for `field`.
    fn ok_or_validation_error(
        self,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> DeployResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_deploy(self, error: DeployError) -> DeployResult<T> {
        self.ok_or(error)
    }

    fn ok_or_internal_error(self, message: impl Into<String>) -> DeployResult<T> {
        self.ok_or_else(|| DeployError::internal_error(message))
    }

    fn ok_or_validation_error(
        self,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> DeployResult<T> {
        self.ok_or_else(|| DeployError::validation_error(field, message, None))
    }
}

/// Conversions from foreign `Result`s into [`DeployResult`].
pub trait ResultExt<T, E> {
    fn with_internal_error(self, message: impl Into<String>) -> DeployResult<T>
    where
        E: std::error::Error + Send + Sync + 'static;

    fn with_config_error(self, message: impl Into<String>) -> DeployResult<T>
    where
        E: std::error::Error + Send + Sync + 'static;

    fn with_filesystem_error(
        self,
        message: impl Into<String>,
        path: Option<std::path::PathBuf>,
    ) -> DeployResult<T>
    where
        E: Into<std::io::Error>;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn with_internal_error(self, message: impl Into<String>) -> DeployResult<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.map_err(|e| DeployError::internal_error_with_source(message, e))
    }

    fn with_config_error(self, message: impl Into<String>) -> DeployResult<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.map_err(|e| DeployError::config_error_with_source(message, e))
    }

    fn with_filesystem_error(
        self,
        message: impl Into<String>,
        path: Option<std::path::PathBuf>,
    ) -> DeployResult<T>
    where
        E: Into<std::io::Error>,
    {
        self.map_err(|e| DeployError::filesystem_error_with_source(message, path, e.into()))
    }
}

/// Helpers for chaining [`DeployResult`] operations.
pub trait DeployResultExt<T> {
    /// Log the error and swallow it; used for best-effort side effects.
    fn ok_logged(self, action: &str);
}

impl<T> DeployResultExt<T> for DeployResult<T> {
    fn ok_logged(self, action: &str) {
        if let Err(e) = self {
            tracing::warn!(action, error = %e, "best-effort action failed");
        }
    }
}

/// async helpers
pub mod async_helpers {
    use super::{DeployError, DeployResult};
    use std::future::Future;
    use std::time::Duration;

    /// Run `f` with an upper bound; elapsed bound becomes [`DeployError::Timeout`].
    pub async fn with_timeout<F, T>(f: F, operation: &str, timeout: Duration) -> DeployResult<T>
    where
        F: Future<Output = DeployResult<T>>,
    {
        match tokio::time::timeout(timeout, f).await {
            Ok(result) => result,
            Err(_) => Err(DeployError::timeout(operation, timeout.as_secs())),
        }
    }
}
