use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use crate::application::use_cases::rollback_checkpoint::{
    CheckpointSource, RollbackCheckpointConfig, RollbackCheckpointUseCase,
};
use crate::common::cancellation::CancellationSignal;
use crate::presentation::cli::EngineArgs;

/// Handler for the rollback command
pub struct RollbackCommand {
    pub engine: EngineArgs,
    pub target: Option<String>,
    pub checkpoint: Option<PathBuf>,
    pub verbose: bool,
}

impl RollbackCommand {
    pub fn new(engine: EngineArgs, target: Option<String>, checkpoint: Option<PathBuf>, verbose: bool) -> Self {
        Self {
            engine,
            target,
            checkpoint,
            verbose,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        let source = match (&self.checkpoint, &self.target) {
            (Some(path), _) => CheckpointSource::Path(path.clone()),
            (None, Some(target)) => CheckpointSource::Target(target.clone()),
            (None, None) => return Err(anyhow::anyhow!("Either --target or --checkpoint is required")),
        };

        let tokens = self.engine.token_manager()?;
        let platform = self.engine.platform(tokens, CancellationSignal::new())?;
        let use_case = RollbackCheckpointUseCase::new(
            platform,
            self.engine.checkpoint_store(),
            self.engine.audit_sink(),
            RollbackCheckpointConfig::new(source),
        );

        println!("{} Rolling back checkpoint...", "::".blue().bold());
        let result = use_case.execute().await?;

        if self.verbose {
            for entry in &result.report.deleted {
                println!("  {} {} ({})", "-".green(), entry.spec.label(), entry.remote_id);
            }
        }

        if result.report.all_succeeded {
            println!(
                "{} Rolled back run {} of '{}': {} resource(s) deleted",
                "✓".green().bold(),
                result.run_id,
                result.target,
                result.report.deleted.len()
            );
            Ok(())
        } else {
            for failure in &result.report.failures {
                println!("  {} {}: {}", "-".red(), failure.entry.spec.label(), failure.error.red());
            }
            Err(anyhow::anyhow!(
                "Rollback of '{}' incomplete: {} deletion(s) failed; checkpoint kept",
                result.target,
                result.report.failures.len()
            ))
        }
    }
}
