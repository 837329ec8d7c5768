//! Deployment document loading: overlay merge, `${VAR}` substitution and
//! structural validation.
//!
//! Merge rules: mappings merge recursively with the overlay winning on
//! scalars, sequences concatenate (base entries first). Substitution runs on
//! every string scalar of the merged document, never on keys. A placeholder
//! with a default (`${VAR:-fallback}`) uses the fallback when the variable is
//! unset or empty. Every placeholder without a value is collected and
//! reported in one error.

use crate::common::error::DeployError;
use crate::common::result::{DeployResult, ResultExt};
use crate::domain::entities::DeploymentConfig;
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use validator::Validate;

const PLACEHOLDER_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

pub struct ConfigResolver {
    placeholder: Regex,
}

impl ConfigResolver {
    pub fn new() -> DeployResult<Self> {
        let placeholder =
            Regex::new(PLACEHOLDER_PATTERN).with_internal_error("Invalid placeholder pattern")?;
        Ok(Self { placeholder })
    }

    /// Snapshot of the process environment.
    pub fn env_from_process() -> HashMap<String, String> {
        std::env::vars().collect()
    }

    /// Resolve a base document and optional overlay against `env`.
    pub fn resolve(
        &self,
        base: &str,
        overlay: Option<&str>,
        env: &HashMap<String, String>,
    ) -> DeployResult<DeploymentConfig> {
        let mut document = parse_document(base, "base")?;
        if let Some(overlay) = overlay {
            let overlay = parse_document(overlay, "overlay")?;
            merge(&mut document, overlay);
        }

        let mut unresolved = Vec::new();
        self.substitute(&mut document, env, &mut unresolved);
        if !unresolved.is_empty() {
            return Err(DeployError::UnresolvedPlaceholders { keys: unresolved });
        }

        let config: DeploymentConfig = serde_yaml::from_value(document)
            .with_config_error("Deployment document does not match the expected schema")?;
        config.validate()?;

        debug!(
            workspace = %config.workspace.name,
            folders = config.folders.len(),
            items = config.items.len(),
            access_grants = config.access_grants.len(),
            "deployment configuration resolved"
        );
        Ok(config)
    }

    /// Read the documents from disk, then [`resolve`](Self::resolve).
    pub async fn resolve_files(
        &self,
        base: &Path,
        overlay: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> DeployResult<DeploymentConfig> {
        let base_content = read_document(base).await?;
        let overlay_content = match overlay {
            Some(path) => Some(read_document(path).await?),
            None => None,
        };
        self.resolve(&base_content, overlay_content.as_deref(), env)
    }

    fn substitute(&self, value: &mut Value, env: &HashMap<String, String>, unresolved: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                if let Some(replaced) = self.substitute_str(s, env, unresolved) {
                    *s = replaced;
                }
            }
            Value::Sequence(items) => {
                for item in items {
                    self.substitute(item, env, unresolved);
                }
            }
            Value::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    self.substitute(v, env, unresolved);
                }
            }
            Value::Tagged(tagged) => self.substitute(&mut tagged.value, env, unresolved),
            _ => {}
        }
    }

    /// Returns None when `input` holds no placeholder.
    fn substitute_str(
        &self,
        input: &str,
        env: &HashMap<String, String>,
        unresolved: &mut Vec<String>,
    ) -> Option<String> {
        if !self.placeholder.is_match(input) {
            return None;
        }

        let replaced = self.placeholder.replace_all(input, |caps: &Captures| {
            let key = &caps[1];
            match env.get(key).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        if !unresolved.iter().any(|k| k == key) {
                            unresolved.push(key.to_string());
                        }
                        caps[0].to_string()
                    }
                },
            }
        });
        Some(replaced.into_owned())
    }
}

fn parse_document(content: &str, label: &str) -> DeployResult<Value> {
    let value: Value = serde_yaml::from_str(content)
        .with_config_error(format!("Failed to parse {} deployment document", label))?;
    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Default::default())),
        _ => Err(DeployError::config_error(format!(
            "The {} deployment document must be a mapping",
            label
        ))),
    }
}

async fn read_document(path: &Path) -> DeployResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_filesystem_error("Failed to read deployment document", Some(path.to_path_buf()))
}

/// Deep-merge `overlay` into `base`.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            base_seq.extend(overlay_seq);
        }
        (base, overlay) => *base = overlay,
    }
}
