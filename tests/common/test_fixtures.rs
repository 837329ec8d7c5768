//! Deployment document fixtures

use fabdeploy::application::services::{ConfigResolver, ProvisioningClient, Retrier};
use fabdeploy::common::cancellation::CancellationSignal;
use fabdeploy::domain::entities::DeploymentConfig;
use fabdeploy::domain::value_objects::RetryPolicy;
use std::collections::HashMap;
use std::sync::Arc;

use super::mock_services::FakePlatform;

/// Workspace, one folder, two items and one access grant.
pub const ANALYTICS_DOCUMENT: &str = r#"
workspace:
  name: analytics-dev
  description: Analytics development workspace
folders:
  - name: etl
items:
  - name: ingest
    type: Notebook
    folder: etl
  - name: sales
    type: Lakehouse
access_grants:
  - principal_id: data-team
    principal_type: Group
    role: Contributor
deployment:
  retry:
    max_attempts: 1
"#;

/// Document bound to a GitHub repository.
pub const GIT_DOCUMENT: &str = r#"
workspace:
  name: analytics-dev
git:
  repository_url: https://github.com/contoso/analytics
  branch: main
  directory: workspace
  connection_name: contoso-analytics
  access_token: ${GITHUB_TOKEN}
deployment:
  retry:
    max_attempts: 1
"#;

/// Three-stage pipeline over per-environment workspaces.
pub const PIPELINE_DOCUMENT: &str = r#"
workspace:
  name: analytics-dev
pipeline:
  name: analytics
  stages:
    - name: Development
      workspace: analytics-dev
    - name: Test
      workspace: analytics-test
    - name: Production
      workspace: analytics-prod
  promotion:
    poll_interval_secs: 1
    timeout_secs: 30
deployment:
  retry:
    max_attempts: 1
"#;

/// Resolve a document with the given environment variables.
pub fn resolve_with(document: &str, env: &[(&str, &str)]) -> DeploymentConfig {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ConfigResolver::new()
        .unwrap()
        .resolve(document, None, &env)
        .unwrap()
}

pub fn analytics_document() -> DeploymentConfig {
    resolve_with(ANALYTICS_DOCUMENT, &[])
}

pub fn git_document() -> DeploymentConfig {
    resolve_with(GIT_DOCUMENT, &[("GITHUB_TOKEN", "ghp_fixture")])
}

pub fn pipeline_document() -> DeploymentConfig {
    resolve_with(PIPELINE_DOCUMENT, &[])
}

/// Retrier that never sleeps or retries.
pub fn no_retry() -> Retrier {
    Retrier::new(RetryPolicy::no_retry())
}

pub fn provisioning_client(platform: &FakePlatform) -> ProvisioningClient {
    ProvisioningClient::new(Arc::new(platform.clone()), no_retry(), CancellationSignal::new())
}
