pub mod commands;

use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::warn;

use crate::application::services::{ConfigResolver, TokenManager};
use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::entities::{DeploymentConfig, RefreshMaterial};
use crate::infrastructure::filesystem::{AuditSink, FileCheckpointStore, JsonLinesAuditLog, TracingAuditSink};
use crate::infrastructure::platform::{
    ClientCredentialsTokenSource, HttpPlatformApi, HttpPlatformOptions, StaticTokenSource, TokenSource,
    DEFAULT_API_URL,
};

/// Version string shown by `--version`, stamped by build.rs
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    " ",
    env!("BUILD_DATE"),
    ")"
);

/// fabdeploy - Idempotent, rollback-safe workspace deployments
#[derive(Parser)]
#[command(name = "fabdeploy")]
#[command(about = "Idempotent, rollback-safe deployments of analytics platform workspaces")]
#[command(version = VERSION)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection, credential and local storage settings shared by all commands
#[derive(Args, Clone)]
pub struct EngineArgs {
    /// Platform REST API base URL
    #[arg(long, global = true, env = "FABDEPLOY_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Directory tenant of the service principal
    #[arg(long, global = true, env = "FABDEPLOY_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// Application (client) id of the service principal
    #[arg(long, global = true, env = "FABDEPLOY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Client secret of the service principal
    #[arg(long, global = true, env = "FABDEPLOY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Pre-issued bearer token; takes precedence over client credentials
    #[arg(long, global = true, env = "FABDEPLOY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory holding deployment checkpoints
    #[arg(long, global = true, env = "FABDEPLOY_CHECKPOINT_DIR", default_value = ".fabdeploy/checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Append audit entries to this JSON-lines file
    #[arg(long, global = true, env = "FABDEPLOY_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct DocumentArgs {
    /// Base deployment document (YAML)
    pub config: PathBuf,

    /// Environment overlay merged over the base document
    #[arg(short, long)]
    pub overlay: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision the workspace described by a deployment document
    Deploy {
        #[command(flatten)]
        document: DocumentArgs,

        /// Keep created resources when a step fails
        #[arg(long)]
        no_rollback: bool,

        /// Do not create or update the declared pipeline
        #[arg(long)]
        skip_pipeline: bool,
    },

    /// Promote content between pipeline stages
    Promote {
        #[command(flatten)]
        document: DocumentArgs,

        /// Source stage name
        #[arg(long)]
        from: String,

        /// Target stage name
        #[arg(long)]
        to: String,

        /// Allow skipping intermediate stages
        #[arg(long)]
        allow_skip: bool,

        /// Note attached to the promotion
        #[arg(long)]
        note: Option<String>,

        /// Create the pipeline and assign stage workspaces first
        #[arg(long)]
        ensure_pipeline: bool,
    },

    /// Unwind the checkpoint of a failed or interrupted deployment
    #[command(group(ArgGroup::new("source").required(true).args(["target", "checkpoint"])))]
    Rollback {
        /// Target workspace name whose checkpoint should be rolled back
        #[arg(long)]
        target: Option<String>,

        /// Explicit checkpoint file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Show pending deployment checkpoints
    Status {
        /// Only show the checkpoint of this target workspace
        target: Option<String>,
    },

    /// Resolve and validate a deployment document without remote calls
    Validate {
        #[command(flatten)]
        document: DocumentArgs,
    },
}

impl EngineArgs {
    /// Token source from the configured credentials.
    ///
    /// A bearer token wins; otherwise all three client-credential values are required.
    pub fn token_source(&self) -> DeployResult<Arc<dyn TokenSource>> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Arc::new(StaticTokenSource::new(token)));
        }

        let tenant_id = required(&self.tenant_id, "FABDEPLOY_TENANT_ID")?;
        let client_id = required(&self.client_id, "FABDEPLOY_CLIENT_ID")?;
        let client_secret = required(&self.client_secret, "FABDEPLOY_CLIENT_SECRET")?;

        let material = RefreshMaterial::new(tenant_id, client_id, client_secret);
        Ok(Arc::new(ClientCredentialsTokenSource::new(material)?))
    }

    pub fn token_manager(&self) -> DeployResult<Arc<TokenManager>> {
        Ok(Arc::new(TokenManager::new(self.token_source()?)))
    }

    pub fn platform(&self, tokens: Arc<TokenManager>, cancel: CancellationSignal) -> DeployResult<Arc<HttpPlatformApi>> {
        Ok(Arc::new(
            HttpPlatformApi::new(&self.api_url, tokens, HttpPlatformOptions::default())?.with_cancellation(cancel),
        ))
    }

    pub fn checkpoint_store(&self) -> Arc<FileCheckpointStore> {
        Arc::new(FileCheckpointStore::new(&self.checkpoint_dir))
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        match &self.audit_log {
            Some(path) => Arc::new(JsonLinesAuditLog::new(path)),
            None => Arc::new(TracingAuditSink),
        }
    }
}

fn required(value: &Option<String>, name: &str) -> DeployResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DeployError::missing_credential(name))
}

impl DocumentArgs {
    /// Resolve the document against the process environment.
    pub async fn resolve(&self) -> DeployResult<DeploymentConfig> {
        let resolver = ConfigResolver::new()?;
        resolver
            .resolve_files(
                &self.config,
                self.overlay.as_deref(),
                &ConfigResolver::env_from_process(),
            )
            .await
    }
}

/// CLI application runner
pub struct CliApp {
    cli: Cli,
    cancel: CancellationSignal,
}

impl Default for CliApp {
    fn default() -> Self {
        Self::new()
    }
}

impl CliApp {
    pub fn new() -> Self {
        Self {
            cli: Cli::parse(),
            cancel: CancellationSignal::new(),
        }
    }

    pub fn verbose(&self) -> bool {
        self.cli.verbose
    }

    pub async fn run(self) -> anyhow::Result<()> {
        // Set up colored output
        if !self.cli.no_color {
            colored::control::set_override(true);
        } else {
            colored::control::set_override(false);
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });

        match self.handle_command().await {
            Ok(_) => Ok(()),
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                exit(1);
            }
        }
    }

    async fn handle_command(&self) -> anyhow::Result<()> {
        use crate::presentation::cli::commands::{
            deploy::DeployCommand, promote::PromoteCommand, rollback::RollbackCommand, status::StatusCommand,
            validate::ValidateCommand,
        };

        let engine = self.cli.engine.clone();
        let verbose = self.cli.verbose;

        match &self.cli.command {
            Commands::Deploy {
                document,
                no_rollback,
                skip_pipeline,
            } => {
                DeployCommand::new(engine, document.clone(), *no_rollback, *skip_pipeline, verbose)
                    .execute(self.cancel.clone())
                    .await
            }
            Commands::Promote {
                document,
                from,
                to,
                allow_skip,
                note,
                ensure_pipeline,
            } => {
                PromoteCommand {
                    engine,
                    document: document.clone(),
                    source: from.clone(),
                    target: to.clone(),
                    allow_skip: *allow_skip,
                    note: note.clone(),
                    ensure_pipeline: *ensure_pipeline,
                }
                .execute(self.cancel.clone())
                .await
            }
            Commands::Rollback { target, checkpoint } => {
                RollbackCommand::new(engine, target.clone(), checkpoint.clone(), verbose)
                    .execute()
                    .await
            }
            Commands::Status { target } => StatusCommand::new(engine, target.clone(), verbose).execute().await,
            Commands::Validate { document } => ValidateCommand::new(document.clone(), verbose).execute().await,
        }
    }
}
