//! Application layer: engine services and the use cases composed from them.

pub mod services;
pub mod use_cases;
