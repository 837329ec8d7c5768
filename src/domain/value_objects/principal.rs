use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of identity an access grant is issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
    User,
    Group,
    ServicePrincipal,
    ServicePrincipalProfile,
}

impl PrincipalType {
    /// Probe order used when the configuration does not say which type a
    /// principal is.
    pub const CANDIDATES: [PrincipalType; 4] = [
        PrincipalType::User,
        PrincipalType::Group,
        PrincipalType::ServicePrincipal,
        PrincipalType::ServicePrincipalProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "User",
            PrincipalType::Group => "Group",
            PrincipalType::ServicePrincipal => "ServicePrincipal",
            PrincipalType::ServicePrincipalProfile => "ServicePrincipalProfile",
        }
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "user" => Ok(PrincipalType::User),
            "group" => Ok(PrincipalType::Group),
            "serviceprincipal" | "spn" => Ok(PrincipalType::ServicePrincipal),
            "serviceprincipalprofile" => Ok(PrincipalType::ServicePrincipalProfile),
            _ => Err(format!(
                "Unsupported principal type: '{}'. Supported types are: User, Group, ServicePrincipal, ServicePrincipalProfile",
                s
            )),
        }
    }
}

/// Workspace role granted to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkspaceRole {
    Admin,
    Member,
    Contributor,
    Viewer,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => "Admin",
            WorkspaceRole::Member => "Member",
            WorkspaceRole::Contributor => "Contributor",
            WorkspaceRole::Viewer => "Viewer",
        }
    }
}

impl fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(WorkspaceRole::Admin),
            "member" => Ok(WorkspaceRole::Member),
            "contributor" => Ok(WorkspaceRole::Contributor),
            "viewer" => Ok(WorkspaceRole::Viewer),
            _ => Err(format!("Unsupported workspace role: '{}'", s)),
        }
    }
}
