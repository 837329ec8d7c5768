use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform item type (e.g. `Notebook`, `Lakehouse`).
///
/// The platform keeps adding item types, so this is an open string type
/// with constants for the common ones instead of a closed enum. Comparison is
/// case-insensitive; the canonical spelling is preserved for API payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemType(String);

impl ItemType {
    pub const NOTEBOOK: &'static str = "Notebook";
    pub const LAKEHOUSE: &'static str = "Lakehouse";
    pub const WAREHOUSE: &'static str = "Warehouse";
    pub const SEMANTIC_MODEL: &'static str = "SemanticModel";
    pub const REPORT: &'static str = "Report";
    pub const DATA_PIPELINE: &'static str = "DataPipeline";
    pub const ENVIRONMENT: &'static str = "Environment";
    pub const EVENTHOUSE: &'static str = "Eventhouse";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ItemType {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ItemType {}

impl std::hash::Hash for ItemType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("item type must not be empty".to_string());
        }
        Ok(Self::new(trimmed))
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
