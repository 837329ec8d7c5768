use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::value_objects::ItemType;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Outcome of a CLI create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCreateOutcome {
    Created,
    AlreadyExists,
}

/// External command-line tool used for item types the REST API cannot create.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CliRunner: Send + Sync {
    /// Create the item at `path` (see [`item_path`]).
    async fn create_item(&self, path: &str) -> DeployResult<CliCreateOutcome>;
}

/// Path addressing an item for the platform CLI:
/// `<workspace>.Workspace/[<folder>.Folder/]<name>.<Type>`
pub fn item_path(workspace: &str, folder: Option<&str>, name: &str, item_type: &ItemType) -> String {
    match folder {
        Some(folder) => format!(
            "{}.Workspace/{}.Folder/{}.{}",
            workspace, folder, name, item_type
        ),
        None => format!("{}.Workspace/{}.{}", workspace, name, item_type),
    }
}

/// Runs the platform CLI (`fab` by default)
pub struct FabCli {
    executable: String,
    timeout: Duration,
}

impl Default for FabCli {
    fn default() -> Self {
        Self {
            executable: "fab".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl FabCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn execute(&self, args: &[&str]) -> DeployResult<std::process::Output> {
        let command = format!("{} {}", self.executable, args.join(" "));
        debug!(command = %command, "running platform CLI");

        let child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(output) => output
                .map_err(|e| DeployError::command_error_with_source("Failed to start platform CLI", command, e)),
            Err(_) => Err(DeployError::timeout(command, self.timeout.as_secs())),
        }
    }
}

/// Interpret a finished CLI invocation.
fn classify_output(command: &str, output: &std::process::Output) -> DeployResult<CliCreateOutcome> {
    if output.status.success() {
        return Ok(CliCreateOutcome::Created);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if is_already_exists_message(&stderr) || is_already_exists_message(&stdout) {
        return Ok(CliCreateOutcome::AlreadyExists);
    }

    Err(DeployError::command_error(
        stderr.trim().to_string(),
        command,
        output.status.code(),
    ))
}

fn is_already_exists_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("already exists") || lower.contains("alreadyexists")
}

#[async_trait]
impl CliRunner for FabCli {
    async fn create_item(&self, path: &str) -> DeployResult<CliCreateOutcome> {
        let args = ["create", path];
        let output = self.execute(&args).await?;
        classify_output(&format!("{} create {}", self.executable, path), &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_path() {
        let notebook = ItemType::new(ItemType::NOTEBOOK);
        assert_eq!(
            item_path("Sales", None, "ingest", &notebook),
            "Sales.Workspace/ingest.Notebook"
        );
        assert_eq!(
            item_path("Sales", Some("etl"), "ingest", &notebook),
            "Sales.Workspace/etl.Folder/ingest.Notebook"
        );
    }

    #[test]
    fn test_already_exists_message() {
        assert!(is_already_exists_message("[AlreadyExists] An item with the same name already exists"));
        assert!(!is_already_exists_message("[Unauthorized] access denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command_is_created() {
        let cli = FabCli::with_executable("true");
        let outcome = cli.create_item("Sales.Workspace/x.Notebook").await.unwrap();
        assert_eq!(outcome, CliCreateOutcome::Created);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_command_error() {
        let cli = FabCli::with_executable("false");
        let result = cli.create_item("Sales.Workspace/x.Notebook").await;
        match result {
            Err(DeployError::CommandError { exit_code, command, .. }) => {
                assert_eq!(exit_code, Some(1));
                assert!(command.starts_with("false create"));
            }
            other => panic!("expected CommandError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_command_error() {
        let cli = FabCli::with_executable("fabdeploy-no-such-binary");
        let result = cli.create_item("Sales.Workspace/x.Notebook").await;
        assert!(matches!(result, Err(DeployError::CommandError { .. })));
    }
}
