use anyhow::Result;
use colored::Colorize;

use crate::presentation::cli::DocumentArgs;

/// Handler for the validate command
pub struct ValidateCommand {
    pub document: DocumentArgs,
    pub verbose: bool,
}

impl ValidateCommand {
    pub fn new(document: DocumentArgs, verbose: bool) -> Self {
        Self { document, verbose }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.document.resolve().await?;

        println!(
            "{} Deployment document is valid: workspace '{}'",
            "✓".green().bold(),
            config.workspace.name
        );
        println!(
            "  Folders: {}  Items: {}  Access grants: {}",
            config.folders.len(),
            config.items.len(),
            config.access_grants.len()
        );
        if let Some(git) = &config.git {
            println!("  Git: {}@{}", git.repository_url, git.branch);
        }
        if let Some(pipeline) = &config.pipeline {
            let stages: Vec<&str> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
            println!("  Pipeline '{}': {}", pipeline.name, stages.join(" -> "));
        }

        if self.verbose {
            for spec in config.resource_specs() {
                println!("  {}", spec.label());
            }
        }
        Ok(())
    }
}
