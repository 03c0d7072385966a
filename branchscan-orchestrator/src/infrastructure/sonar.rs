//! SonarQube Web API client

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use branchscan_core::config::AnalysisConfig;
use branchscan_core::{ScanSyncError, ServiceError};

use crate::domain::{
    AnalysisProject, AnalysisRecord, AnalysisService, IssueSummary, ProjectMetadataUpdate,
    QualityGateStatus,
};

const USER_AGENT: &str = concat!("branchscan/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: u32 = 500;
const MAX_PAGES: u32 = 100;
const DESCRIPTION_SETTING: &str = "sonar.projectDescription";

#[derive(Debug, Clone)]
pub struct SonarClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl SonarClientConfig {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(rename = "pageIndex")]
    page_index: u32,
    #[serde(rename = "pageSize")]
    page_size: u32,
    total: u64,
}

impl Paging {
    fn has_more(&self) -> bool {
        u64::from(self.page_index) * u64::from(self.page_size) < self.total
    }
}

#[derive(Debug, Deserialize)]
struct ComponentDto {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProjectSearchDto {
    paging: Paging,
    #[serde(default)]
    components: Vec<ComponentDto>,
}

#[derive(Debug, Deserialize)]
struct CreateProjectDto {
    project: ComponentDto,
}

#[derive(Debug, Deserialize)]
struct AnalysisDto {
    key: String,
    date: String,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisSearchDto {
    paging: Paging,
    #[serde(default)]
    analyses: Vec<AnalysisDto>,
}

#[derive(Debug, Deserialize)]
struct FacetValueDto {
    val: String,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct FacetDto {
    property: String,
    #[serde(default)]
    values: Vec<FacetValueDto>,
}

#[derive(Debug, Deserialize)]
struct IssueSearchDto {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    facets: Vec<FacetDto>,
}

#[derive(Debug, Deserialize)]
struct ProjectStatusDto {
    status: String,
}

#[derive(Debug, Deserialize)]
struct QualityGateDto {
    #[serde(rename = "projectStatus")]
    project_status: ProjectStatusDto,
}

#[derive(Debug, Deserialize)]
struct ErrorMessageDto {
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBodyDto {
    errors: Vec<ErrorMessageDto>,
}

/// Client for the analysis server's Web API.
///
/// Authenticates with the user token as basic-auth login and an empty
/// password.
pub struct SonarClient {
    client: Client,
    config: SonarClientConfig,
}

impl SonarClient {
    pub fn new(config: SonarClientConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.basic_auth(token, None::<&str>),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(format!("{}/{}", self.config.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(format!("{}/{}", self.config.base_url, path)))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout {
                    seconds: self.config.timeout.as_secs(),
                }
            } else {
                ServiceError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_error_response(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let response = self.send(self.get(path).query(query)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Response, ServiceError> {
        self.send(self.post(path).form(form)).await
    }

    async fn search_components(&self, filter: (&str, &str)) -> Result<Vec<AnalysisProject>, ServiceError> {
        let mut projects = Vec::new();

        for page in 1..=MAX_PAGES {
            let query = [
                (filter.0, filter.1.to_string()),
                ("p", page.to_string()),
                ("ps", PAGE_SIZE.to_string()),
            ];
            let dto: ProjectSearchDto = self.get_json("api/projects/search", &query).await?;
            projects.extend(dto.components.into_iter().map(|c| AnalysisProject {
                key: c.key,
                name: c.name,
            }));
            if !dto.paging.has_more() {
                break;
            }
        }

        Ok(projects)
    }

    async fn fetch_analyses(&self, key: &str) -> Result<Vec<AnalysisRecord>, ServiceError> {
        let mut records = Vec::new();

        for page in 1..=MAX_PAGES {
            let query = [
                ("project", key.to_string()),
                ("p", page.to_string()),
                ("ps", PAGE_SIZE.to_string()),
            ];
            let dto: AnalysisSearchDto = self.get_json("api/project_analyses/search", &query).await?;
            for analysis in dto.analyses {
                records.push(AnalysisRecord {
                    key: analysis.key,
                    revision: analysis.revision.filter(|r| !r.is_empty()),
                    date: parse_server_date(&analysis.date)?,
                });
            }
            if !dto.paging.has_more() {
                break;
            }
        }

        Ok(records)
    }

    async fn fetch_issue_summary(&self, key: &str) -> Result<IssueSummary, ServiceError> {
        let query = [
            ("componentKeys", key.to_string()),
            ("resolved", "false".to_string()),
            ("facets", "severities".to_string()),
            ("ps", "1".to_string()),
        ];
        let dto: IssueSearchDto = self.get_json("api/issues/search", &query).await?;

        let by_severity: BTreeMap<String, u64> = dto
            .facets
            .into_iter()
            .filter(|f| f.property == "severities")
            .flat_map(|f| f.values)
            .map(|v| (v.val, v.count))
            .collect();

        Ok(IssueSummary {
            total: dto.total,
            by_severity,
        })
    }
}

/// Error bodies look like `{"errors":[{"msg":"..."}]}`.
///
/// Duplicate creation is reported as a 400 whose message mentions an
/// existing key; that becomes `AlreadyExists`.
fn map_error_response(status: StatusCode, body: &str) -> ServiceError {
    let message = match serde_json::from_str::<ErrorBodyDto>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .into_iter()
            .map(|e| e.msg)
            .collect::<Vec<_>>()
            .join("; "),
        _ if body.trim().is_empty() => status.to_string(),
        _ => body.trim().to_string(),
    };

    if message.to_lowercase().contains("already exists") {
        return ServiceError::AlreadyExists(message);
    }
    ServiceError::from_status(status.as_u16(), message)
}

/// The server writes offsets without a colon (`+0100`)
fn parse_server_date(raw: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ServiceError::InvalidResponse(format!("bad analysis date '{}': {}", raw, e)))
}

#[async_trait]
impl AnalysisService for SonarClient {
    async fn get_project(&self, key: &str) -> Result<Option<AnalysisProject>, ScanSyncError> {
        let projects = self
            .search_components(("projects", key))
            .await
            .map_err(ScanSyncError::analysis_service)?;
        Ok(projects.into_iter().find(|p| p.key == key))
    }

    #[instrument(skip(self))]
    async fn create_project(&self, key: &str, name: &str) -> Result<AnalysisProject, ScanSyncError> {
        let result: Result<AnalysisProject, ServiceError> = async {
            let response = self
                .post_form("api/projects/create", &[("project", key), ("name", name)])
                .await?;
            let dto: CreateProjectDto = response
                .json()
                .await
                .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
            Ok(AnalysisProject {
                key: dto.project.key,
                name: dto.project.name,
            })
        }
        .await;

        let project = result.map_err(ScanSyncError::analysis_service)?;
        debug!(project = %project.key, "Created analysis project");
        Ok(project)
    }

    async fn update_project_metadata(
        &self,
        key: &str,
        update: &ProjectMetadataUpdate,
    ) -> Result<(), ScanSyncError> {
        let tags = update.tags.join(",");
        let result: Result<(), ServiceError> = async {
            self.post_form(
                "api/settings/set",
                &[
                    ("component", key),
                    ("key", DESCRIPTION_SETTING),
                    ("value", update.description.as_str()),
                ],
            )
            .await?;
            self.post_form("api/project_tags/set", &[("project", key), ("tags", tags.as_str())])
                .await?;
            Ok(())
        }
        .await;

        result.map_err(ScanSyncError::analysis_service)
    }

    async fn add_project_admin(&self, key: &str, login: &str) -> Result<(), ScanSyncError> {
        self.post_form(
            "api/permissions/add_user",
            &[("projectKey", key), ("login", login), ("permission", "admin")],
        )
        .await
        .map(|_| ())
        .map_err(ScanSyncError::analysis_service)
    }

    async fn delete_project(&self, key: &str) -> Result<(), ScanSyncError> {
        self.post_form("api/projects/delete", &[("project", key)])
            .await
            .map(|_| ())
            .map_err(ScanSyncError::analysis_service)
    }

    async fn search_projects(&self, key_prefix: &str) -> Result<Vec<AnalysisProject>, ScanSyncError> {
        // `q` matches anywhere in key or name; keep only true prefix matches
        let projects = self
            .search_components(("q", key_prefix))
            .await
            .map_err(ScanSyncError::analysis_service)?;

        let total = projects.len();
        let matching: Vec<AnalysisProject> = projects
            .into_iter()
            .filter(|p| p.key.starts_with(key_prefix))
            .collect();
        if matching.len() < total {
            debug!(prefix = key_prefix, dropped = total - matching.len(), "Ignored non-prefix matches");
        }
        Ok(matching)
    }

    async fn list_analyses(&self, key: &str) -> Result<Vec<AnalysisRecord>, ScanSyncError> {
        self.fetch_analyses(key)
            .await
            .map_err(ScanSyncError::analysis_service)
    }

    async fn list_issues(&self, key: &str) -> Result<IssueSummary, ScanSyncError> {
        self.fetch_issue_summary(key)
            .await
            .map_err(ScanSyncError::analysis_service)
    }

    async fn quality_gate_status(&self, key: &str) -> Result<QualityGateStatus, ScanSyncError> {
        let dto: QualityGateDto = self
            .get_json("api/qualitygates/project_status", &[("projectKey", key.to_string())])
            .await
            .map_err(ScanSyncError::analysis_service)?;

        let status = QualityGateStatus::from_api(&dto.project_status.status);
        if !status.is_passing() {
            warn!(project = key, gate = %status, "Quality gate not passing");
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duplicate_key_maps_to_already_exists() {
        let body = r#"{"errors":[{"msg":"Could not create Project with key: \"k\". A similar key already exists: \"k\""}]}"#;
        assert!(matches!(
            map_error_response(StatusCode::BAD_REQUEST, body),
            ServiceError::AlreadyExists(_)
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        assert!(matches!(
            map_error_response(StatusCode::UNAUTHORIZED, ""),
            ServiceError::Authentication(_)
        ));
        assert!(matches!(
            map_error_response(StatusCode::SERVICE_UNAVAILABLE, "down"),
            ServiceError::ServiceUnavailable(m) if m == "down"
        ));
    }

    #[test]
    fn test_server_dates_without_colon_offset() {
        let parsed = parse_server_date("2024-03-01T10:15:00+0100").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap());
        assert!(parse_server_date("2024-03-01T10:15:00Z").is_ok());
        assert!(parse_server_date("yesterday").is_err());
    }

    #[test]
    fn test_paging_stops_at_total() {
        let paging = Paging {
            page_index: 2,
            page_size: 500,
            total: 1000,
        };
        assert!(!paging.has_more());
        let paging = Paging {
            page_index: 1,
            page_size: 500,
            total: 501,
        };
        assert!(paging.has_more());
    }
}
