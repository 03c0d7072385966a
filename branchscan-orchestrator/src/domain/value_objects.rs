//! Orchestrator value objects

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use branchscan_core::ScannerError;

pub use branchscan_core::config::{FailurePolicy, SelectionStrategy};

/// Analysis project key for one (owner, repository, branch) triple.
///
/// Rendered as `{prefix}{owner}_{repository}_{branch}`. Characters the
/// analysis service rejects are replaced by `_`, so `feature/login` and
/// `feature_login` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectKey(String);

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ProjectKey {
    pub fn derive(prefix: &str, owner: &str, repository: &str, branch: &str) -> Self {
        Self(format!(
            "{}{}",
            Self::repository_prefix(prefix, owner, repository),
            sanitize(branch)
        ))
    }

    /// Common prefix of every branch project of one repository.
    ///
    /// Projects of other repositories can share it (`widgets_extra` under
    /// `widgets`); use [`ProjectOwnership`] before acting on a match.
    pub fn repository_prefix(prefix: &str, owner: &str, repository: &str) -> String {
        format!("{}{}_{}_", prefix, sanitize(owner), sanitize(repository))
    }

    /// Wrap a key supplied by a caller as-is
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Display name of a branch project, `{owner}/{repository} [{branch}]`.
///
/// Owner and repository names on the host never contain `/` or a space, so
/// the name records unambiguously which repository created the project.
pub fn branch_project_name(owner: &str, repository: &str, branch: &str) -> String {
    format!("{}/{} [{}]", owner, repository, branch)
}

/// Which repository a project belongs to, judged from its display name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOwnership {
    /// Named after a branch of this repository
    Owned,
    /// Named after a branch of a different repository
    Foreign,
    /// Not named by branchscan; never deleted as an orphan
    Unclaimed,
}

impl ProjectOwnership {
    pub fn of(project_name: &str, owner: &str, repository: &str) -> Self {
        let claimed = project_name
            .split_once('/')
            .and_then(|(o, rest)| rest.split_once(" [").map(|(r, branch)| (o, r, branch)))
            .filter(|(o, r, branch)| !o.is_empty() && !r.is_empty() && branch.ends_with(']'));

        match claimed {
            None => Self::Unclaimed,
            Some((o, r, _)) if o.eq_ignore_ascii_case(owner) && r.eq_ignore_ascii_case(repository) => {
                Self::Owned
            }
            Some(_) => Self::Foreign,
        }
    }
}

/// First and last commit of a branch relative to its base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    pub first: String,
    pub last: String,
}

impl CommitRange {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }

    /// `[first]`, plus `last` only when it differs
    pub fn endpoints(&self) -> Vec<String> {
        if self.first == self.last {
            vec![self.first.clone()]
        } else {
            vec![self.first.clone(), self.last.clone()]
        }
    }
}

/// Scan request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Request accepted and scan running
    Started,
    /// Scan finished successfully
    Completed,
    /// Scan failed after validation
    Failed,
}

impl ScanStatus {
    /// ```text
    /// Started ──► Completed
    ///    └──────► Failed
    /// ```
    pub fn can_transition_to(&self, target: &ScanStatus) -> bool {
        matches!(
            (self, target),
            (Self::Started, Self::Completed) | (Self::Started, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Quality gate verdict reported by the analysis service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGateStatus {
    Ok,
    Warn,
    Error,
    /// No gate computed yet
    None,
}

impl QualityGateStatus {
    pub fn from_api(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "OK" => Self::Ok,
            "WARN" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::None,
        }
    }

    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for QualityGateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::None => write!(f, "NONE"),
        }
    }
}

pub const PROP_PROJECT_KEY: &str = "sonar.projectKey";
pub const PROP_SOURCES: &str = "sonar.sources";
pub const PROP_HOST_URL: &str = "sonar.host.url";
pub const PROP_TOKEN: &str = "sonar.token";
pub const PROP_REVISION: &str = "sonar.scm.revision";
pub const PROP_BRANCH: &str = "sonar.branch.name";

const REQUIRED_PROPERTIES: [&str; 5] = [
    PROP_PROJECT_KEY,
    PROP_SOURCES,
    PROP_HOST_URL,
    PROP_TOKEN,
    PROP_REVISION,
];

/// Key-value analysis parameters handed to the scan tool
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ScannerProperties {
    values: BTreeMap<String, String>,
}

impl ScannerProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert only when `key` is not set yet
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Every required key present and no value blank
    pub fn validate(&self) -> Result<(), ScannerError> {
        let missing: Vec<&str> = REQUIRED_PROPERTIES
            .iter()
            .copied()
            .filter(|key| !self.contains(key))
            .collect();
        if !missing.is_empty() {
            return Err(ScannerError::Configuration(format!(
                "missing required properties: {}",
                missing.join(", ")
            )));
        }

        if let Some((key, _)) = self.values.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ScannerError::Configuration(format!(
                "property {} has a blank value",
                key
            )));
        }

        Ok(())
    }

    /// Command-line form, `-Dkey=value` per property
    pub fn to_args(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(k, v)| format!("-D{}={}", k, v))
            .collect()
    }
}

impl fmt::Debug for ScannerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if key == PROP_TOKEN {
                map.entry(key, &"***");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}
