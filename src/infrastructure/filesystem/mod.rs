pub mod audit_log;
pub mod checkpoint_store;

pub use audit_log::{AuditAction, AuditEntry, AuditOutcome, AuditSink, JsonLinesAuditLog, TracingAuditSink};
pub use checkpoint_store::{CheckpointFile, CheckpointStore, FileCheckpointStore};
