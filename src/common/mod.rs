//! Shared error handling, result helpers and cancellation.

pub mod cancellation;
pub mod error;
pub mod result;

pub use cancellation::CancellationSignal;
pub use error::DeployError;
pub use result::DeployResult;
