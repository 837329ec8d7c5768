use anyhow::Result;
use colored::Colorize;

use super::with_token_refresh;
use crate::application::services::{DeploymentReport, EnsureStatus, ProvisionOutcome};
use crate::application::use_cases::deploy_workspace::{DeployWorkspaceConfig, DeployWorkspaceUseCase};
use crate::common::cancellation::CancellationSignal;
use crate::presentation::cli::{DocumentArgs, EngineArgs};

/// Handler for the deploy command
pub struct DeployCommand {
    pub engine: EngineArgs,
    pub document: DocumentArgs,
    pub no_rollback: bool,
    pub skip_pipeline: bool,
    pub verbose: bool,
}

impl DeployCommand {
    pub fn new(
        engine: EngineArgs,
        document: DocumentArgs,
        no_rollback: bool,
        skip_pipeline: bool,
        verbose: bool,
    ) -> Self {
        Self {
            engine,
            document,
            no_rollback,
            skip_pipeline,
            verbose,
        }
    }

    pub async fn execute(&self, cancel: CancellationSignal) -> Result<()> {
        // Placeholders and structure are checked before credentials
        let document = self.document.resolve().await?;
        let tokens = self.engine.token_manager()?;
        let platform = self.engine.platform(tokens.clone(), cancel.clone())?;

        let config = DeployWorkspaceConfig::default()
            .with_rollback(self.no_rollback.then_some(false))
            .with_self_principal(tokens.identity())
            .with_skip_pipeline(self.skip_pipeline);
        let use_case = DeployWorkspaceUseCase::new(
            platform,
            self.engine.checkpoint_store(),
            self.engine.audit_sink(),
            config,
        )
        .with_cancellation(cancel);

        println!(
            "{} Deploying workspace '{}'...",
            "::".blue().bold(),
            document.workspace.name
        );

        match with_token_refresh(&tokens, use_case.execute(&document)).await {
            Ok(report) => {
                println!("{} Deployment completed (run {})", "✓".green().bold(), report.run_id);
                self.print_summary(&report);
                Ok(())
            }
            Err(failure) => {
                println!("{} Deployment failed (run {})", "✗".red().bold(), failure.report.run_id);
                self.print_summary(&failure.report);
                self.print_rollback(&failure.report);
                Err(failure.error.into())
            }
        }
    }

    fn print_summary(&self, report: &DeploymentReport) {
        println!(
            "  Created: {}  Already existed: {}  Skipped: {}",
            report.count(EnsureStatus::Created),
            report.count(EnsureStatus::AlreadyExists),
            report.count(EnsureStatus::SkippedSelf)
        );

        if self.verbose {
            for outcome in &report.outcomes {
                println!("  {}", format_outcome(outcome));
            }
        }

        if let Some(git) = &report.git {
            let state = if git.no_change {
                "unchanged".normal()
            } else if git.already_connected {
                "already connected".normal()
            } else {
                "connected".green()
            };
            println!("  Git binding: {}", state);
        }
    }

    fn print_rollback(&self, report: &DeploymentReport) {
        match &report.rollback {
            Some(rollback) if rollback.all_succeeded => {
                println!(
                    "  {} Rolled back {} created resource(s)",
                    "↺".cyan().bold(),
                    rollback.deleted.len()
                );
            }
            Some(rollback) => {
                println!(
                    "{} Rollback incomplete: {} deleted, {} failed",
                    "⚠".yellow().bold(),
                    rollback.deleted.len(),
                    rollback.failures.len()
                );
                for failure in &rollback.failures {
                    println!("  {} {}: {}", "-".red(), failure.entry.spec.label(), failure.error.red());
                }
                println!(
                    "  Retry with: fabdeploy rollback --target {}",
                    report.record.target()
                );
            }
            None if report.record.remaining() > 0 => {
                println!(
                    "{} Rollback disabled; {} created resource(s) kept. Checkpoint: {}",
                    "⚠".yellow().bold(),
                    report.record.remaining(),
                    self.engine.checkpoint_store().path_for(report.record.target()).display()
                );
            }
            None => {}
        }
    }
}

fn format_outcome(outcome: &ProvisionOutcome) -> String {
    let id = outcome.outcome.remote_id.as_deref().unwrap_or("-");
    match outcome.outcome.status {
        EnsureStatus::Created => format!("{} {} ({})", "+".green(), outcome.spec.label(), id),
        EnsureStatus::AlreadyExists => format!("{} {} ({})", "=".normal(), outcome.spec.label(), id),
        EnsureStatus::SkippedSelf => format!("{} {} (deploying identity)", "~".yellow(), outcome.spec.label()),
    }
}
