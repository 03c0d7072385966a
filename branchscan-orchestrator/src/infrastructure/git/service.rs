use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{Cred, FetchOptions, Oid, RemoteCallbacks, Repository, opts};
use tracing::{debug, info, warn};

use branchscan_core::ScanSyncError;
use branchscan_core::config::{VcsConfig, WorkspaceConfig};

use crate::domain::SourceCheckout;

const HEADS_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

/// Configuration for the Git service.
#[derive(Debug, Clone)]
pub struct GitServiceConfig {
    /// Remote URL prefix; repositories live at `{clone_base_url}/{owner}/{repository}.git`.
    pub clone_base_url: String,
    /// Token used for HTTPS basic authentication.
    pub token: Option<String>,
    /// Timeout applied to network fetches (passed down to libgit2).
    pub fetch_timeout: Duration,
}

impl GitServiceConfig {
    pub fn from_config(workspace: &WorkspaceConfig, vcs: &VcsConfig) -> Self {
        Self {
            clone_base_url: workspace.clone_base_url.trim_end_matches('/').to_string(),
            token: vcs.token.clone(),
            fetch_timeout: workspace.fetch_timeout(),
        }
    }
}

/// Errors emitted by the Git service.
#[derive(Debug, thiserror::Error)]
pub enum GitServiceError {
    #[error("Unsupported Git URL scheme for {0}. Only HTTPS and local paths are supported.")]
    UnsupportedScheme(String),
    #[error("Commit {0} not found on any remote branch")]
    CommitNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("Blocking checkout task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<GitServiceError> for ScanSyncError {
    fn from(error: GitServiceError) -> Self {
        ScanSyncError::checkout(error.to_string())
    }
}

/// Places commits into per-branch working directories with libgit2.
///
/// Each directory keeps its repository between runs, so later commits of
/// the same branch only fetch what is new. Checkouts are detached and
/// forced; untracked files from earlier scans are removed.
#[derive(Debug)]
pub struct GitService {
    config: GitServiceConfig,
}

impl GitService {
    pub fn new(config: GitServiceConfig) -> Self {
        Self { config }
    }

    pub fn remote_url(&self, owner: &str, repository: &str) -> Result<String, GitServiceError> {
        let base = &self.config.clone_base_url;
        let url = format!("{}/{}/{}.git", base, owner, repository);

        if base.starts_with("https://") || base.starts_with("file://") || Path::new(base).is_absolute() {
            Ok(url)
        } else {
            Err(GitServiceError::UnsupportedScheme(url))
        }
    }

    /// Fetch `commit` if needed and check it out detached into `dir`.
    pub async fn checkout_commit(
        &self,
        owner: &str,
        repository: &str,
        commit: &str,
        dir: &Path,
    ) -> Result<(), GitServiceError> {
        let url = self.remote_url(owner, repository)?;
        let destination: PathBuf = dir.to_path_buf();
        let commit_id = commit.to_string();
        let token = self.config.token.clone();

        Self::configure_git_timeouts(self.config.fetch_timeout);

        info!(repository = %url, commit = %commit, dir = %dir.display(), "Checking out commit");

        tokio::task::spawn_blocking(move || {
            Self::perform_checkout(&destination, &url, &commit_id, token.as_deref())
        })
        .await??;

        debug!(commit = %commit, "Checkout completed");
        Ok(())
    }

    fn perform_checkout(
        destination: &Path,
        url: &str,
        commit: &str,
        token: Option<&str>,
    ) -> Result<(), GitServiceError> {
        std::fs::create_dir_all(destination)?;
        let repo = match Repository::open(destination) {
            Ok(repo) => repo,
            Err(_) => Repository::init(destination)?,
        };

        match repo.find_remote("origin") {
            Ok(remote) if remote.url() == Some(url) => {}
            Ok(_) => repo.remote_set_url("origin", url)?,
            Err(_) => {
                repo.remote("origin", url)?;
            }
        }

        let oid = Oid::from_str(commit)?;
        if repo.find_commit(oid).is_err() {
            let mut remote = repo.find_remote("origin")?;
            let mut fetch_options = Self::fetch_options(token);
            remote.fetch(&[HEADS_REFSPEC], Some(&mut fetch_options), None)?;

            if repo.find_commit(oid).is_err() {
                // Commits outside every branch head, such as pull request merges
                let mut fetch_options = Self::fetch_options(token);
                if let Err(e) = remote.fetch(&[commit], Some(&mut fetch_options), None) {
                    warn!(commit = %commit, error = %e, "Fetch by commit id failed");
                }
            }
        }

        let target = repo
            .find_commit(oid)
            .map_err(|_| GitServiceError::CommitNotFound(commit.to_string()))?;

        repo.set_head_detached(target.id())?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;

        Ok(())
    }

    fn fetch_options(token: Option<&str>) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(token_value) = token {
            let token_string = token_value.to_string();
            callbacks.credentials(move |_url, username_from_url, allowed| {
                if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) {
                    let username = username_from_url.unwrap_or("x-access-token");
                    Cred::userpass_plaintext(username, &token_string)
                } else {
                    Cred::default()
                }
            });
        }

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        fetch_options.download_tags(git2::AutotagOption::None);
        fetch_options
    }

    fn configure_git_timeouts(fetch_timeout: Duration) {
        static CONFIGURE: Once = Once::new();
        CONFIGURE.call_once(|| {
            let timeout_ms = fetch_timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
            // SAFETY: libgit2 global options are set once, before any fetch runs.
            let result = unsafe {
                opts::set_server_connect_timeout_in_milliseconds(timeout_ms)
                    .and_then(|_| opts::set_server_timeout_in_milliseconds(timeout_ms))
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to configure git network timeouts");
            }
        });
    }
}

#[async_trait]
impl SourceCheckout for GitService {
    async fn checkout(
        &self,
        owner: &str,
        repository: &str,
        commit: &str,
        dir: &Path,
    ) -> Result<(), ScanSyncError> {
        Ok(self.checkout_commit(owner, repository, commit, dir).await?)
    }
}
