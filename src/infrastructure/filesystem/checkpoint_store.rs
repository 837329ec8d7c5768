use crate::common::error::DeployError;
use crate::common::result::{DeployResult, ResultExt};
use crate::domain::entities::DeploymentRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::debug;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Durable storage for in-flight deployment records, one per target workspace.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, target: &str) -> DeployResult<Option<DeploymentRecord>>;

    /// Overwrite the checkpoint for `record.target()`.
    async fn save(&self, record: &DeploymentRecord) -> DeployResult<()>;

    /// Remove the checkpoint; missing checkpoints are not an error.
    async fn remove(&self, target: &str) -> DeployResult<()>;
}

/// Pretty JSON files under a directory, written via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint file for a target workspace.
    pub fn path_for(&self, target: &str) -> PathBuf {
        self.dir.join(format!("{}{}", file_stem(target), CHECKPOINT_SUFFIX))
    }

    /// Load a checkpoint from an explicit file path.
    pub async fn load_path(path: &Path) -> DeployResult<DeploymentRecord> {
        let content = async_fs::read_to_string(path)
            .await
            .with_filesystem_error("Failed to read checkpoint", Some(path.to_path_buf()))?;
        serde_json::from_str(&content)
            .map_err(|e| DeployError::serialization_error_with_source(format!("Malformed checkpoint {}", path.display()), e))
    }
}

/// File name for a workspace name, case-folded like workspace lookup.
///
/// ASCII letters, digits and `-` are kept; every other byte, `_` included,
/// becomes `_xx`, so distinct names never share a file.
fn file_stem(target: &str) -> String {
    let mut stem = String::with_capacity(target.len());
    for byte in target.to_ascii_lowercase().bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => stem.push(char::from(byte)),
            _ => stem.push_str(&format!("_{:02x}", byte)),
        }
    }
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}

async fn write_atomic(path: &Path, record: &DeploymentRecord) -> DeployResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        async_fs::create_dir_all(dir)
            .await
            .with_filesystem_error("Failed to create checkpoint directory", Some(dir.to_path_buf()))?;
    }

    let temp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(record)?;

    async_fs::write(&temp, content)
        .await
        .with_filesystem_error("Failed to write checkpoint", Some(temp.clone()))?;
    async_fs::rename(&temp, path)
        .await
        .with_filesystem_error("Failed to replace checkpoint", Some(path.to_path_buf()))?;

    debug!(path = %path.display(), entries = record.len(), status = %record.status(), "checkpoint saved");
    Ok(())
}

async fn remove_checkpoint_file(path: &Path) -> DeployResult<()> {
    match async_fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "checkpoint removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeployError::filesystem_error_with_source(
            "Failed to remove checkpoint",
            Some(path.to_path_buf()),
            e,
        )),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, target: &str) -> DeployResult<Option<DeploymentRecord>> {
        let path = self.path_for(target);
        if !async_fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::load_path(&path).await.map(Some)
    }

    async fn save(&self, record: &DeploymentRecord) -> DeployResult<()> {
        write_atomic(&self.path_for(record.target()), record).await
    }

    async fn remove(&self, target: &str) -> DeployResult<()> {
        remove_checkpoint_file(&self.path_for(target)).await
    }
}

/// One checkpoint file addressed by its path rather than by target name.
///
/// Used when a checkpoint is rolled back from an explicit file: saves and
/// removal act on that file, whatever it is called.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for CheckpointFile {
    async fn load(&self, target: &str) -> DeployResult<Option<DeploymentRecord>> {
        if !async_fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let record = FileCheckpointStore::load_path(&self.path).await?;
        Ok(record.target().eq_ignore_ascii_case(target).then_some(record))
    }

    async fn save(&self, record: &DeploymentRecord) -> DeployResult<()> {
        write_atomic(&self.path, record).await
    }

    async fn remove(&self, _target: &str) -> DeployResult<()> {
        remove_checkpoint_file(&self.path).await
    }
}
