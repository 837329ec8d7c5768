//! Common test utilities and helpers
//!
//! Shared by the integration tests: an in-memory platform, recording
//! collaborators and deployment document fixtures.

#![allow(dead_code)]

pub mod mock_services;
pub mod test_fixtures;
