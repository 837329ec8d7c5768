//! Git connection and token refresh integration tests

mod common;

use common::mock_services::{CountingTokenSource, FakePlatform};
use common::test_fixtures::{git_document, no_retry};
use fabdeploy::application::services::{GitConnectionManager, GitCredentials, TokenManager};
use fabdeploy::common::cancellation::CancellationSignal;
use fabdeploy::common::error::DeployError;
use fabdeploy::domain::value_objects::GitBinding;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn manager(platform: &FakePlatform) -> GitConnectionManager {
    GitConnectionManager::new(Arc::new(platform.clone()), no_retry(), CancellationSignal::new())
}

fn github_binding() -> GitBinding {
    git_document().git.unwrap().binding().unwrap()
}

fn credentials() -> GitCredentials {
    GitCredentials::new("contoso-analytics").with_access_token(Some("ghp_fixture".to_string()))
}

#[tokio::test]
async fn test_duplicate_connection_is_reused() {
    let platform = FakePlatform::new();
    let workspace_id = platform.seed_workspace("analytics-dev");
    let existing = platform.seed_connection("contoso-analytics");

    let result = manager(&platform)
        .connect(&workspace_id, &github_binding(), &credentials())
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.duplicate);
    assert_eq!(result.connection_id, Some(existing.clone()));
    assert_eq!(platform.calls_of("create_connection").len(), 1);
    assert_eq!(platform.calls_of("list_connections").len(), 1);

    let state = platform.git_state(&workspace_id);
    assert_eq!(state.connection_id, Some(existing));
    assert!(state.initialized);
}

#[tokio::test]
async fn test_second_connect_is_a_no_op() {
    let platform = FakePlatform::new();
    let workspace_id = platform.seed_workspace("analytics-dev");
    let git = manager(&platform);

    let first = git.connect(&workspace_id, &github_binding(), &credentials()).await.unwrap();
    assert!(first.success);
    assert!(!first.no_change);

    platform.clear_call_history();
    let second = git.connect(&workspace_id, &github_binding(), &credentials()).await.unwrap();

    assert!(second.success);
    assert!(second.no_change);
    assert_eq!(second.connection_id, first.connection_id);
    assert!(platform.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_workspace_bound_elsewhere_is_not_rebound() {
    let platform = FakePlatform::new();
    let workspace_id = platform.seed_workspace("analytics-dev");
    platform.seed_git_binding(
        &workspace_id,
        GitBinding::new("https://github.com/contoso/analytics", "release", Some("workspace")).unwrap(),
    );

    let result = manager(&platform)
        .connect(&workspace_id, &github_binding(), &credentials())
        .await;

    assert!(matches!(result, Err(DeployError::GitBindingMismatch { .. })));
    assert!(platform.mutating_calls().is_empty());
    assert_eq!(platform.git_state(&workspace_id).binding.unwrap().branch(), "release");
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let source = Arc::new(CountingTokenSource::new(
        Duration::from_millis(50),
        Duration::from_secs(3600),
    ));
    let tokens = Arc::new(TokenManager::new(source.clone()));

    let callers = (0..16).map(|_| {
        let tokens = tokens.clone();
        async move { tokens.get_token().await }
    });
    let results = join_all(callers).await;

    assert!(results.iter().all(|r| r.as_deref().ok() == Some("token-1")));
    assert_eq!(source.fetches(), 1);
    assert_eq!(tokens.refresh_count(), 1);
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed_on_every_call() {
    // Every issued token is already inside the refresh margin
    let source = Arc::new(CountingTokenSource::new(
        Duration::from_millis(10),
        Duration::from_secs(30),
    ));
    let tokens = Arc::new(TokenManager::new(source.clone()).with_safety_margin(Duration::from_secs(60)));

    assert_eq!(tokens.get_token().await.unwrap(), "token-1");
    assert_eq!(tokens.get_token().await.unwrap(), "token-2");
    assert_eq!(source.fetches(), 2);
    assert_eq!(tokens.identity().as_deref(), Some("deployer-sp"));
}
