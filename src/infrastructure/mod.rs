/// Infrastructure layer modules
///
/// Concrete implementations of the engine's outbound interfaces:
/// - Platform REST API client and OAuth2 token sources
/// - Local persistence (checkpoints, audit log)
/// - External CLI fallback for item types the REST API cannot create
pub mod filesystem;
pub mod platform;
pub mod process;

// Re-export commonly used types
pub use filesystem::{AuditSink, CheckpointStore, FileCheckpointStore, JsonLinesAuditLog, TracingAuditSink};
pub use platform::{HttpPlatformApi, PlatformApi, TokenSource};
pub use process::{CliRunner, FabCli};
