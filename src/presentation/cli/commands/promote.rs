use anyhow::Result;
use colored::Colorize;

use super::with_token_refresh;
use crate::application::use_cases::promote_stage::{PromoteStageConfig, PromoteStageUseCase};
use crate::common::cancellation::CancellationSignal;
use crate::domain::entities::PromotionStatus;
use crate::presentation::cli::{DocumentArgs, EngineArgs};

/// Handler for the promote command
pub struct PromoteCommand {
    pub engine: EngineArgs,
    pub document: DocumentArgs,
    pub source: String,
    pub target: String,
    pub allow_skip: bool,
    pub note: Option<String>,
    pub ensure_pipeline: bool,
}

impl PromoteCommand {
    pub async fn execute(&self, cancel: CancellationSignal) -> Result<()> {
        let document = self.document.resolve().await?;
        let tokens = self.engine.token_manager()?;
        let platform = self.engine.platform(tokens.clone(), cancel.clone())?;

        let config = PromoteStageConfig::new(&self.source, &self.target)
            .with_allow_skip(self.allow_skip)
            .with_note(self.note.clone())
            .with_ensure_pipeline(self.ensure_pipeline);
        let use_case =
            PromoteStageUseCase::new(platform, self.engine.audit_sink(), config).with_cancellation(cancel);

        println!(
            "{} Promoting {} -> {}...",
            "::".blue().bold(),
            self.source,
            self.target
        );

        let result = with_token_refresh(&tokens, use_case.execute(&document)).await?;
        match result.status {
            PromotionStatus::Succeeded => {
                println!(
                    "{} Promotion succeeded (operation {}, {} poll(s))",
                    "✓".green().bold(),
                    result.operation_id,
                    result.polls
                );
            }
            status => {
                println!(
                    "{} Promotion finished with status {} (operation {})",
                    "⚠".yellow().bold(),
                    status,
                    result.operation_id
                );
            }
        }

        if result.retried {
            let excluded: Vec<String> = result.excluded_item_types.iter().map(|t| t.to_string()).collect();
            println!("  Re-issued once excluding: {}", excluded.join(", "));
        }
        for item in &result.failed_items {
            println!(
                "  {} {} {}: {}",
                "-".red(),
                item.item_type,
                item.item_name,
                item.message.red()
            );
        }
        Ok(())
    }
}
