//! # fabdeploy - Deployment orchestration for analytics platform workspaces
//!
//! `fabdeploy` turns a declarative YAML document into provisioned remote
//! resources: a workspace, its folders and typed items, access grants, a git
//! binding and a staged deployment pipeline. Runs are idempotent, roll back
//! what they created when a step fails, and renew credentials before they
//! expire.
//!
//! ## Quick Start
//!
//! 1. Describe the workspace (`deploy.yml`):
//!
//! ```yaml
//! workspace:
//!   name: analytics-${ENV}
//!   capacity_id: ${CAPACITY_ID:-}
//! folders:
//!   - name: etl
//! items:
//!   - name: ingest
//!     type: Notebook
//!     folder: etl
//! access_grants:
//!   - principal_id: ${ADMIN_GROUP}
//!     principal_type: Group
//!     role: Admin
//! ```
//!
//! 2. Deploy it:
//!
//! ```bash
//! export FABDEPLOY_TENANT_ID=... FABDEPLOY_CLIENT_ID=... FABDEPLOY_CLIENT_SECRET=...
//! ENV=dev ADMIN_GROUP=... fabdeploy deploy deploy.yml
//! ```
//!
//! 3. Promote between pipeline stages:
//!
//! ```bash
//! fabdeploy promote deploy.yml --from Development --to Test
//! ```
//!
//! ## Architecture
//!
//! - [`domain`]: resource specs, the deployment record, pipelines, git bindings
//! - [`application`]: engine services and the deploy / promote / rollback use cases
//! - [`infrastructure`]: platform REST client, token sources, checkpoints, audit log, CLI fallback
//! - [`presentation`]: command-line front end
//! - [`common`]: [`DeployError`], result helpers, cancellation
//!
//! ## Using the Library
//!
//! ```rust,no_run
//! use fabdeploy::application::services::{ConfigResolver, TokenManager};
//! use fabdeploy::application::use_cases::deploy_workspace::{
//!     DeployWorkspaceConfig, DeployWorkspaceUseCase,
//! };
//! use fabdeploy::infrastructure::filesystem::{FileCheckpointStore, TracingAuditSink};
//! use fabdeploy::infrastructure::platform::{
//!     HttpPlatformApi, HttpPlatformOptions, StaticTokenSource, DEFAULT_API_URL,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let document = ConfigResolver::new()?
//!     .resolve_files(Path::new("deploy.yml"), None, &ConfigResolver::env_from_process())
//!     .await?;
//!
//! let tokens = Arc::new(TokenManager::new(Arc::new(StaticTokenSource::new("token"))));
//! let api = Arc::new(HttpPlatformApi::new(DEFAULT_API_URL, tokens, HttpPlatformOptions::default())?);
//!
//! let use_case = DeployWorkspaceUseCase::new(
//!     api,
//!     Arc::new(FileCheckpointStore::new(".fabdeploy/checkpoints")),
//!     Arc::new(TracingAuditSink),
//!     DeployWorkspaceConfig::default(),
//! );
//! let report = use_case.execute(&document).await?;
//! println!("run {} finished: {}", report.run_id, report.status);
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod application;
pub mod common;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// Re-export commonly used types for convenience
pub use crate::common::error::DeployError;
pub use crate::common::result::DeployResult as Result;
