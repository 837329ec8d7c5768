//! Promotion integration tests
//!
//! Stage transitions, status polling and pipeline setup against the
//! in-memory platform.

mod common;

use common::mock_services::{FakePlatform, RecordingAuditSink};
use common::test_fixtures::{no_retry, pipeline_document};
use fabdeploy::application::services::{PromotionEngine, PromotionOptions};
use fabdeploy::application::use_cases::promote_stage::{PromoteStageConfig, PromoteStageUseCase};
use fabdeploy::common::cancellation::CancellationSignal;
use fabdeploy::common::error::DeployError;
use fabdeploy::domain::entities::{FailedItem, Pipeline, PromotionOperation, PromotionStatus};
use fabdeploy::domain::value_objects::ItemType;
use fabdeploy::infrastructure::filesystem::{AuditAction, AuditOutcome};
use fabdeploy::infrastructure::platform::StageItem;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn engine(platform: &FakePlatform) -> PromotionEngine {
    PromotionEngine::new(Arc::new(platform.clone()), no_retry(), CancellationSignal::new())
}

fn fast_options() -> PromotionOptions {
    PromotionOptions {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        ..PromotionOptions::default()
    }
}

fn pipeline() -> Pipeline {
    pipeline_document().pipeline.unwrap().to_pipeline()
}

#[tokio::test]
async fn test_promotion_polls_until_terminal_status() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);
    platform.script_polls(&[
        PromotionStatus::Running,
        PromotionStatus::Running,
        PromotionStatus::Succeeded,
    ]);

    let result = engine(&platform)
        .promote(&pipeline(), "Development", "Test", &fast_options())
        .await
        .unwrap();

    assert_eq!(result.status, PromotionStatus::Succeeded);
    assert_eq!(result.polls, 3);
    assert!(!result.retried);
    assert_eq!(platform.calls_of("get_promotion_operation").len(), 3);
    assert_eq!(platform.calls_of("deploy_stage").len(), 1);
}

#[tokio::test]
async fn test_non_adjacent_promotion_rejected_before_remote_calls() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);

    let result = engine(&platform)
        .promote(&pipeline(), "Development", "Production", &fast_options())
        .await;

    assert!(matches!(result, Err(DeployError::InvalidStageTransition { .. })));
    assert!(platform.get_call_history().is_empty());
}

#[tokio::test]
async fn test_backwards_promotion_rejected_even_when_skipping_allowed() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);

    let result = engine(&platform)
        .promote(&pipeline(), "Production", "Test", &fast_options().with_allow_skip(true))
        .await;

    assert!(matches!(result, Err(DeployError::InvalidStageTransition { .. })));
    assert!(platform.get_call_history().is_empty());
}

#[tokio::test]
async fn test_allow_skip_promotes_past_intermediate_stage() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);

    let result = engine(&platform)
        .promote(&pipeline(), "Development", "Production", &fast_options().with_allow_skip(true))
        .await
        .unwrap();

    assert_eq!(result.status, PromotionStatus::Succeeded);
    assert_eq!(platform.promotion_requests().len(), 1);
}

#[tokio::test]
async fn test_failed_operation_is_promotion_error() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);
    platform.script_poll_operation(
        PromotionOperation::new("op-1", PromotionStatus::Failed).with_error("target stage locked"),
    );

    let result = engine(&platform)
        .promote(&pipeline(), "Development", "Test", &fast_options())
        .await;

    match result {
        Err(DeployError::PromotionFailed { message, .. }) => assert_eq!(message, "target stage locked"),
        other => panic!("expected promotion failure, got {:?}", other),
    }
    assert_eq!(platform.calls_of("deploy_stage").len(), 1);
}

#[tokio::test]
async fn test_partial_success_is_reissued_once_without_excluded_types() {
    let platform = FakePlatform::new();
    platform.seed_pipeline("analytics", &["Development", "Test", "Production"]);

    let development = {
        let stages = engine(&platform)
            .ensure_pipeline(&pipeline(), &HashMap::new())
            .await
            .unwrap();
        stages.stages()[0].id.clone().unwrap()
    };
    platform.set_stage_items(
        &development,
        vec![
            StageItem {
                item_id: "item-a".to_string(),
                display_name: "ingest".to_string(),
                item_type: ItemType::new(ItemType::NOTEBOOK),
            },
            StageItem {
                item_id: "item-b".to_string(),
                display_name: "sales".to_string(),
                item_type: ItemType::new(ItemType::REPORT),
            },
        ],
    );
    platform.script_poll_operation(
        PromotionOperation::new("op-1", PromotionStatus::PartiallySucceeded).with_failed_items(vec![FailedItem {
            item_name: "sales".to_string(),
            item_type: ItemType::new(ItemType::REPORT),
            message: "dependency missing".to_string(),
        }]),
    );

    let options = PromotionOptions {
        auto_exclude_item_types: vec![ItemType::new(ItemType::REPORT)],
        ..fast_options()
    };
    let result = engine(&platform)
        .promote(&pipeline(), "Development", "Test", &options)
        .await
        .unwrap();

    assert_eq!(result.status, PromotionStatus::Succeeded);
    assert!(result.retried);
    assert_eq!(result.excluded_item_types, vec![ItemType::new(ItemType::REPORT)]);

    let requests = platform.promotion_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].items.is_none());
    let reissued = requests[1].items.as_ref().unwrap();
    assert_eq!(reissued.len(), 1);
    assert_eq!(reissued[0].display_name, "ingest");
}

#[tokio::test]
async fn test_promote_use_case_ensures_pipeline_and_audits() {
    let platform = FakePlatform::new();
    let dev = platform.seed_workspace("analytics-dev");
    let test = platform.seed_workspace("analytics-test");
    let audit = RecordingAuditSink::new();

    let use_case = PromoteStageUseCase::new(
        Arc::new(platform.clone()),
        Arc::new(audit.clone()),
        PromoteStageConfig::new("Development", "Test")
            .with_ensure_pipeline(true)
            .with_note(Some("release 42".to_string())),
    );
    let result = use_case.execute(&pipeline_document()).await.unwrap();

    assert_eq!(result.status, PromotionStatus::Succeeded);
    assert_eq!(platform.calls_of("create_pipeline").len(), 1);

    let pipeline_id = {
        let pipelines = platform.calls_of("list_pipeline_stages");
        pipelines[0].trim_start_matches("list_pipeline_stages:").to_string()
    };
    assert_eq!(platform.stage_workspace(&pipeline_id, "Development"), Some(dev));
    assert_eq!(platform.stage_workspace(&pipeline_id, "Test"), Some(test));
    // Production has no workspace yet and stays unassigned
    assert_eq!(platform.stage_workspace(&pipeline_id, "Production"), None);

    let requests = platform.promotion_requests();
    assert_eq!(requests[0].note.as_deref(), Some("release 42"));

    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Promote);
    assert_eq!(entries[0].outcome, AuditOutcome::Success);
}
