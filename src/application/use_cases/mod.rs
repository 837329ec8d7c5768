pub mod deploy_workspace;
pub mod promote_stage;
pub mod rollback_checkpoint;
