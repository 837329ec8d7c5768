use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::domain::entities::{DeploymentRecord, DeploymentStatus};
use crate::infrastructure::filesystem::{CheckpointStore, FileCheckpointStore};
use crate::presentation::cli::EngineArgs;

/// Handler for the status command
pub struct StatusCommand {
    pub engine: EngineArgs,
    pub target: Option<String>,
    pub verbose: bool,
}

impl StatusCommand {
    pub fn new(engine: EngineArgs, target: Option<String>, verbose: bool) -> Self {
        Self {
            engine,
            target,
            verbose,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        let store = self.engine.checkpoint_store();

        let records: Vec<DeploymentRecord> = match &self.target {
            Some(target) => store.load(target).await?.into_iter().collect(),
            None => load_all(store.dir()).await?,
        };

        if records.is_empty() {
            println!("{} No pending deployment checkpoints", "✓".green().bold());
            return Ok(());
        }

        for record in &records {
            self.print_record(record);
        }
        Ok(())
    }

    fn print_record(&self, record: &DeploymentRecord) {
        let status = match record.status() {
            DeploymentStatus::InProgress => record.status().as_str().yellow(),
            DeploymentStatus::Failed => record.status().as_str().red(),
            _ => record.status().as_str().normal(),
        };
        println!(
            "{} {} [{}] run {} ({} created resource(s), {} left to clean up, updated {})",
            "::".blue().bold(),
            record.target().bold(),
            status,
            record.run_id(),
            record.len(),
            record.remaining(),
            record.updated_at().format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(error) = record.last_error() {
            println!("  Last error: {}", error.red());
        }
        if self.verbose {
            for entry in record.entries() {
                if entry.is_deleted() {
                    println!("  {} ({}) {}", entry.spec.label(), entry.remote_id, "deleted".dimmed());
                } else {
                    println!("  {} ({})", entry.spec.label(), entry.remote_id);
                }
            }
        }
    }
}

async fn load_all(dir: &Path) -> Result<Vec<DeploymentRecord>> {
    let mut records = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_checkpoint = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".checkpoint.json"))
            .unwrap_or(false);
        if is_checkpoint {
            records.push(FileCheckpointStore::load_path(&path).await?);
        }
    }

    records.sort_by(|a, b| a.target().cmp(b.target()));
    Ok(records)
}
