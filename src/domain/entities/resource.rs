use crate::domain::value_objects::{ItemType, PrincipalType, WorkspaceRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property keys used in the bag of an access-grant spec.
pub const PROPERTY_ROLE: &str = "role";
pub const PROPERTY_PRINCIPAL_TYPE: &str = "principalType";
pub const PROPERTY_CAPACITY_ID: &str = "capacityId";
pub const PROPERTY_DESCRIPTION: &str = "description";
pub const PROPERTY_DEFINITION: &str = "definition";

/// Kind of remote resource the engine can provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Workspace,
    Folder,
    Item,
    AccessGrant,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Workspace => "workspace",
            ResourceKind::Folder => "folder",
            ResourceKind::Item => "item",
            ResourceKind::AccessGrant => "access_grant",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested remote resource.
///
/// `name` is unique within `parent`. For folders and items `parent` is the
/// containing folder name (None means the workspace root); for access grants
/// `name` is the principal id. Specs are immutable once built from
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ResourceSpec {
    pub fn workspace(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Workspace,
            name: name.into(),
            parent: None,
            item_type: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn folder(name: impl Into<String>, parent: Option<String>) -> Self {
        Self {
            kind: ResourceKind::Folder,
            name: name.into(),
            parent,
            item_type: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn item(name: impl Into<String>, item_type: ItemType, folder: Option<String>) -> Self {
        Self {
            kind: ResourceKind::Item,
            name: name.into(),
            parent: folder,
            item_type: Some(item_type),
            properties: BTreeMap::new(),
        }
    }

    pub fn access_grant(
        principal_id: impl Into<String>,
        role: WorkspaceRole,
        principal_type: Option<PrincipalType>,
    ) -> Self {
        let spec = Self {
            kind: ResourceKind::AccessGrant,
            name: principal_id.into(),
            parent: None,
            item_type: None,
            properties: BTreeMap::new(),
        }
        .with_property(PROPERTY_ROLE, role.as_str());

        match principal_type {
            Some(t) => spec.with_property(PROPERTY_PRINCIPAL_TYPE, t.as_str()),
            None => spec,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.property_str(PROPERTY_DESCRIPTION)
    }

    /// Role of an access grant; grants built through [`ResourceSpec::access_grant`] always carry one.
    pub fn role(&self) -> Option<WorkspaceRole> {
        self.property_str(PROPERTY_ROLE).and_then(|r| r.parse().ok())
    }

    pub fn principal_type(&self) -> Option<PrincipalType> {
        self.property_str(PROPERTY_PRINCIPAL_TYPE)
            .and_then(|t| t.parse().ok())
    }

    pub fn capacity_id(&self) -> Option<&str> {
        self.property_str(PROPERTY_CAPACITY_ID)
    }

    /// Human-readable identity used in logs and audit entries.
    pub fn label(&self) -> String {
        match (&self.kind, &self.item_type) {
            (ResourceKind::Item, Some(t)) => format!("item {} '{}'", t, self.name),
            (ResourceKind::AccessGrant, _) => format!("access grant for '{}'", self.name),
            (kind, _) => format!("{} '{}'", kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_grant_properties() {
        let grant = ResourceSpec::access_grant(
            "00000000-0000-0000-0000-000000000001",
            WorkspaceRole::Contributor,
            None,
        );
        assert_eq!(grant.kind, ResourceKind::AccessGrant);
        assert_eq!(grant.role(), Some(WorkspaceRole::Contributor));
        assert_eq!(grant.principal_type(), None);

        let typed = ResourceSpec::access_grant("abc", WorkspaceRole::Viewer, Some(PrincipalType::Group));
        assert_eq!(typed.principal_type(), Some(PrincipalType::Group));
    }

    #[test]
    fn test_label() {
        let item = ResourceSpec::item("ingest", ItemType::new(ItemType::NOTEBOOK), None);
        assert_eq!(item.label(), "item Notebook 'ingest'");
        assert_eq!(ResourceSpec::workspace("analytics").label(), "workspace 'analytics'");
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let json = serde_json::to_value(ResourceSpec::workspace("analytics")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "workspace", "name": "analytics"}));
    }
}
