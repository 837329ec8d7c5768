use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// GitBinding related errors
#[derive(Debug, Error, PartialEq)]
pub enum GitBindingError {
    #[error("Invalid repository URL: {0}")]
    InvalidFormat(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Unsupported git provider host: {0}")]
    UnsupportedProvider(String),

    #[error("Missing repository path in URL: {0}")]
    MissingRepoPath(String),

    #[error("Branch name must not be empty")]
    EmptyBranch,
}

/// Git hosting provider, derived from the repository URL host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gitProviderType")]
pub enum GitProvider {
    GitHub {
        #[serde(rename = "ownerName")]
        owner: String,
        #[serde(rename = "repositoryName")]
        repository: String,
    },
    AzureDevOps {
        #[serde(rename = "organizationName")]
        organization: String,
        #[serde(rename = "projectName")]
        project: String,
        #[serde(rename = "repositoryName")]
        repository: String,
    },
}

/// Desired or observed binding of a workspace to a git location.
///
/// Equality is what decides whether a connect call is needed. It compares the
/// provider coordinates, branch and directory, so URL spelling differences
/// (`.git` suffix, trailing slash, host case, legacy Azure DevOps hosts) and
/// surrounding slashes on the directory never force a reconnect.
#[derive(Debug, Clone)]
pub struct GitBinding {
    repository_url: String,
    branch: String,
    directory: String,
    provider: GitProvider,
}

impl GitBinding {
    pub fn new(
        repository_url: &str,
        branch: &str,
        directory: Option<&str>,
    ) -> Result<Self, GitBindingError> {
        let branch = branch.trim();
        if branch.is_empty() {
            return Err(GitBindingError::EmptyBranch);
        }

        let repository_url = Self::normalize_url(repository_url)?;
        let provider = Self::parse_provider(&repository_url)?;

        Ok(Self {
            repository_url,
            branch: branch.to_string(),
            directory: Self::normalize_directory(directory.unwrap_or("")),
            provider,
        })
    }

    /// Rebuild a binding from what the platform reports for a connected workspace.
    pub fn from_provider(provider: GitProvider, branch: &str, directory: &str) -> Self {
        let repository_url = match &provider {
            GitProvider::GitHub { owner, repository } => {
                format!("https://github.com/{}/{}", owner, repository)
            }
            GitProvider::AzureDevOps {
                organization,
                project,
                repository,
            } => format!(
                "https://dev.azure.com/{}/{}/_git/{}",
                organization, project, repository
            ),
        };

        Self {
            repository_url,
            branch: branch.trim().to_string(),
            directory: Self::normalize_directory(directory),
            provider,
        }
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Directory inside the repository, without leading or trailing `/`.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Directory in the `/path` form the platform API expects.
    pub fn api_directory(&self) -> String {
        format!("/{}", self.directory)
    }

    pub fn provider(&self) -> &GitProvider {
        &self.provider
    }

    fn normalize_directory(directory: &str) -> String {
        directory.trim().trim_matches('/').to_string()
    }

    fn normalize_url(url: &str) -> Result<String, GitBindingError> {
        let trimmed = url.trim();
        let parsed =
            Url::parse(trimmed).map_err(|_| GitBindingError::InvalidFormat(url.to_string()))?;

        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(GitBindingError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| GitBindingError::InvalidFormat(url.to_string()))?
            .to_lowercase();

        let path = parsed.path().trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        if path.is_empty() {
            return Err(GitBindingError::MissingRepoPath(url.to_string()));
        }

        Ok(format!("https://{}{}", host, path))
    }

    fn parse_provider(normalized_url: &str) -> Result<GitProvider, GitBindingError> {
        let parsed = Url::parse(normalized_url)
            .map_err(|_| GitBindingError::InvalidFormat(normalized_url.to_string()))?;
        let host = parsed.host_str().unwrap_or_default();
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if host == "github.com" {
            return match segments.as_slice() {
                [owner, repository] => Ok(GitProvider::GitHub {
                    owner: owner.to_string(),
                    repository: repository.to_string(),
                }),
                _ => Err(GitBindingError::MissingRepoPath(normalized_url.to_string())),
            };
        }

        if host == "dev.azure.com" {
            return match segments.as_slice() {
                [organization, project, "_git", repository] => Ok(GitProvider::AzureDevOps {
                    organization: organization.to_string(),
                    project: project.to_string(),
                    repository: repository.to_string(),
                }),
                _ => Err(GitBindingError::MissingRepoPath(normalized_url.to_string())),
            };
        }

        if let Some(organization) = host.strip_suffix(".visualstudio.com") {
            return match segments.as_slice() {
                [project, "_git", repository] => Ok(GitProvider::AzureDevOps {
                    organization: organization.to_string(),
                    project: project.to_string(),
                    repository: repository.to_string(),
                }),
                _ => Err(GitBindingError::MissingRepoPath(normalized_url.to_string())),
            };
        }

        Err(GitBindingError::UnsupportedProvider(host.to_string()))
    }
}

impl PartialEq for GitBinding {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.branch == other.branch
            && self.directory == other.directory
    }
}

impl Eq for GitBinding {}

impl fmt::Display for GitBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:/{}", self.repository_url, self.branch, self.directory)
    }
}
