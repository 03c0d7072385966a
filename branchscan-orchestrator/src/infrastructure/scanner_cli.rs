//! Scan tool runtime backed by the sonar-scanner command-line distribution

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use branchscan_core::ScannerError;
use branchscan_core::config::ScannerConfig;

use crate::domain::{PROP_TOKEN, ScanOutcome, ScannerProperties, ScannerRuntime};

/// Directory the scanner leaves in every analyzed tree
pub const SCANNER_WORK_DIR: &str = ".scannerwork";
const TOKEN_ENV: &str = "SONAR_TOKEN";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "sonar-scanner.bat";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "sonar-scanner";

#[derive(Debug, Clone)]
pub struct ScannerCliConfig {
    pub cache_dir: PathBuf,
    pub download_base_url: String,
    pub auto_download: bool,
    pub binary_path: Option<PathBuf>,
}

impl ScannerCliConfig {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            download_base_url: config.download_base_url.trim_end_matches('/').to_string(),
            auto_download: config.auto_download,
            binary_path: config.binary_path.clone(),
        }
    }
}

pub struct SonarScannerCli {
    config: ScannerCliConfig,
    client: Client,
    install_lock: Mutex<()>,
}

impl SonarScannerCli {
    pub fn new(config: ScannerCliConfig) -> Result<Self, ScannerError> {
        let client = Client::builder()
            .user_agent(concat!("branchscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(install_error)?;

        Ok(Self {
            config,
            client,
            install_lock: Mutex::new(()),
        })
    }

    pub fn install_dir(&self, version: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("sonar-scanner-{}", version))
    }

    pub fn executable_path(&self, version: &str) -> PathBuf {
        self.install_dir(version).join("bin").join(EXECUTABLE_NAME)
    }

    pub fn download_url(&self, version: &str) -> String {
        format!(
            "{}/sonar-scanner-cli-{}.zip",
            self.config.download_base_url, version
        )
    }

    async fn download(&self, version: &str) -> Result<tempfile::NamedTempFile, ScannerError> {
        let url = self.download_url(version);
        info!(url = %url, "Downloading scanner distribution");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScannerError::Installation(format!("download of {} failed: {}", url, e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScannerError::Installation(format!("download of {} failed: {}", url, e)))?;

        let mut archive = tempfile::NamedTempFile::new_in(&self.config.cache_dir)
            .map_err(install_error)?;
        archive.write_all(&bytes).map_err(install_error)?;

        debug!(bytes = bytes.len(), "Scanner archive downloaded");
        Ok(archive)
    }
}

fn install_error(error: impl std::fmt::Display) -> ScannerError {
    ScannerError::Installation(error.to_string())
}

/// Unpack `archive` and move its single top-level directory to `install_dir`
fn extract_distribution(archive: &Path, cache_dir: &Path, install_dir: &Path) -> Result<(), ScannerError> {
    let file = std::fs::File::open(archive).map_err(install_error)?;
    let mut zip = zip::ZipArchive::new(file).map_err(install_error)?;
    let staging = tempfile::TempDir::new_in(cache_dir).map_err(install_error)?;
    zip.extract(staging.path()).map_err(install_error)?;

    let mut roots: Vec<PathBuf> = std::fs::read_dir(staging.path())
        .map_err(install_error)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();

    let root = match (roots.pop(), roots.is_empty()) {
        (Some(only), true) if only.is_dir() => only,
        _ => staging.path().to_path_buf(),
    };

    if install_dir.exists() {
        std::fs::remove_dir_all(install_dir).map_err(install_error)?;
    }
    std::fs::rename(&root, install_dir).map_err(install_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let executable = install_dir.join("bin").join(EXECUTABLE_NAME);
        if executable.exists() {
            std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
                .map_err(install_error)?;
        }
    }

    Ok(())
}

/// Lines the scanner logged at error level, with or without a timestamp
fn error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .take(2)
                .any(|word| word.trim_end_matches(':') == "ERROR")
        })
        .map(|line| line.trim().to_string())
        .collect()
}

#[async_trait]
impl ScannerRuntime for SonarScannerCli {
    #[instrument(skip(self))]
    async fn ensure_installed(&self, version: &str) -> Result<PathBuf, ScannerError> {
        if let Some(path) = &self.config.binary_path {
            if !path.exists() {
                return Err(ScannerError::Installation(format!(
                    "configured scanner binary {} does not exist",
                    path.display()
                )));
            }
            return Ok(path.clone());
        }

        let _guard = self.install_lock.lock().await;

        let executable = self.executable_path(version);
        if executable.exists() {
            debug!(path = %executable.display(), "Scanner already installed");
            return Ok(executable);
        }

        if !self.config.auto_download {
            return Err(ScannerError::Installation(format!(
                "scanner {} is not installed in {} and auto_download is disabled",
                version,
                self.install_dir(version).display()
            )));
        }

        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(install_error)?;

        let archive = self.download(version).await?;
        let cache_dir = self.config.cache_dir.clone();
        let install_dir = self.install_dir(version);
        tokio::task::spawn_blocking(move || {
            extract_distribution(archive.path(), &cache_dir, &install_dir)
        })
        .await
        .map_err(install_error)??;

        if !executable.exists() {
            return Err(ScannerError::Installation(format!(
                "archive for {} has no {}",
                version,
                executable.display()
            )));
        }

        info!(path = %executable.display(), "Scanner installed");
        Ok(executable)
    }

    #[instrument(skip(self, properties), fields(dir = %dir.display()))]
    async fn run(
        &self,
        executable: &Path,
        properties: &ScannerProperties,
        dir: &Path,
    ) -> Result<ScanOutcome, ScannerError> {
        let started = Instant::now();
        let args: Vec<String> = properties
            .iter()
            .filter(|(key, _)| *key != PROP_TOKEN)
            .map(|(key, value)| format!("-D{}={}", key, value))
            .collect();

        let mut command = Command::new(executable);
        command
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = properties.get(PROP_TOKEN) {
            command.env(TOKEN_ENV, token);
        }

        let child = command.spawn().map_err(|e| {
            ScannerError::Initialization(format!("failed to start {}: {}", executable.display(), e))
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ScannerError::Execution(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors = error_lines(&stdout);
        errors.extend(error_lines(&stderr));

        let duration = started.elapsed();
        if output.status.success() {
            return Ok(ScanOutcome::succeeded(duration));
        }

        if errors.is_empty() {
            errors.push(format!("scanner exited with {}", output.status));
        }
        warn!(status = %output.status, errors = errors.len(), "Scanner reported failure");
        Ok(ScanOutcome::failed(duration, errors))
    }

    async fn cleanup(&self, dir: &Path) -> Result<(), ScannerError> {
        let work_dir = dir.join(SCANNER_WORK_DIR);
        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScannerError::Execution(format!(
                "failed to remove {}: {}",
                work_dir.display(),
                e
            ))),
        }
    }
}
