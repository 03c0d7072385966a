use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use branchscan_core::{ErrorKind, ScanSyncError, ServiceError};
use branchscan_orchestrator::domain::VersionControlHost;
use branchscan_orchestrator::infrastructure::{GitHubClient, GitHubClientConfig};

fn client(server: &MockServer, per_page: u32) -> GitHubClient {
    GitHubClient::new(GitHubClientConfig {
        base_url: server.uri(),
        token: Some("ghp_test".to_string()),
        timeout: Duration::from_secs(5),
        per_page,
    })
    .unwrap()
}

async fn mount_repository(server: &MockServer, default_branch: &str) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "widgets",
            "default_branch": default_branch,
        })))
        .mount(server)
        .await;
}

async fn mount_branch(server: &MockServer, name: &str, sha: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/widgets/branches/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": name,
            "commit": { "sha": sha },
        })))
        .mount(server)
        .await;
}

fn commits(shas: &[&str]) -> serde_json::Value {
    json!({
        "status": "ahead",
        "commits": shas.iter().map(|sha| json!({ "sha": sha })).collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn test_branch_listing_follows_pages_and_sends_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/branches"))
        .and(query_param("page", "1"))
        .and(header("Authorization", "Bearer ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "main", "commit": { "sha": "m1" } },
            { "name": "feature/a", "commit": { "sha": "a1" } },
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/branches"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "feature/b", "commit": { "sha": "b1" } },
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let branches = client(&server, 2).list_branches("acme", "widgets").await.unwrap();

    let names: Vec<_> = branches.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["main", "feature/a", "feature/b"]);
    assert_eq!(branches[2].sha, "b1");
}

#[tokio::test]
async fn test_branch_range_spans_commits_ahead_of_default() {
    let server = MockServer::start().await;
    mount_repository(&server, "main").await;
    mount_branch(&server, "feature", "f3").await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/compare/main...feature"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits(&["f1", "f2"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/compare/main...feature"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits(&["f3"])))
        .mount(&server)
        .await;

    let range = client(&server, 2)
        .branch_commit_range("acme", "widgets", "feature")
        .await
        .unwrap();

    assert_eq!(range.first, "f1");
    assert_eq!(range.last, "f3");
}

#[tokio::test]
async fn test_default_branch_range_is_its_head() {
    let server = MockServer::start().await;
    mount_repository(&server, "main").await;
    mount_branch(&server, "main", "m9").await;

    let range = client(&server, 30)
        .branch_commit_range("acme", "widgets", "main")
        .await
        .unwrap();

    assert_eq!(range.first, "m9");
    assert_eq!(range.last, "m9");
}

#[tokio::test]
async fn test_branch_without_new_commits_falls_back_to_head() {
    let server = MockServer::start().await;
    mount_repository(&server, "main").await;
    mount_branch(&server, "stale", "s1").await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/compare/main...stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits(&[])))
        .mount(&server)
        .await;

    let range = client(&server, 30)
        .branch_commit_range("acme", "widgets", "stale")
        .await
        .unwrap();

    assert_eq!(range.first, "s1");
    assert_eq!(range.last, "s1");
}

#[tokio::test]
async fn test_open_pull_requests_are_mapped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .and(query_param("state", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "number": 42,
            "title": "Add login form",
            "head": { "ref": "feature/login", "sha": "abc123" },
            "base": { "ref": "main", "sha": "def456" },
        }])))
        .mount(&server)
        .await;

    let pulls = client(&server, 30)
        .list_pull_requests("acme", "widgets")
        .await
        .unwrap();

    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].number, 42);
    assert_eq!(pulls[0].head_ref, "feature/login");
    assert_eq!(pulls[0].head_sha, "abc123");
    assert_eq!(pulls[0].base_ref, "main");
}

#[tokio::test]
async fn test_team_members_are_logins() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/teams/maintainers/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "login": "alice", "id": 1 },
            { "login": "bob", "id": 2 },
        ])))
        .mount(&server)
        .await;

    let members = client(&server, 30)
        .list_team_members("acme", "maintainers")
        .await
        .unwrap();

    assert_eq!(members, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_missing_branch_is_not_found() {
    let server = MockServer::start().await;
    mount_repository(&server, "main").await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/branches/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Branch not found",
        })))
        .mount(&server)
        .await;

    let err = client(&server, 30)
        .branch_commit_range("acme", "widgets", "gone")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VersionControl);
    assert!(!err.is_retryable());
    assert!(matches!(
        err,
        ScanSyncError::VersionControl(ServiceError::NotFound(ref message)) if message == "Branch not found"
    ));
}

#[tokio::test]
async fn test_exhausted_rate_limit_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .mount(&server)
        .await;

    let err = client(&server, 30)
        .default_branch("acme", "widgets")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanSyncError::VersionControl(ServiceError::RateLimited)
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_forbidden_without_rate_limit_is_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Resource not accessible by integration",
        })))
        .mount(&server)
        .await;

    let err = client(&server, 30)
        .default_branch("acme", "widgets")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanSyncError::VersionControl(ServiceError::Authentication(_))
    ));
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client(&server, 30)
        .default_branch("acme", "widgets")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(err.to_string().contains("bad gateway"));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "default_branch": "main" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = GitHubClient::new(GitHubClientConfig {
        base_url: server.uri(),
        token: None,
        timeout: Duration::from_millis(200),
        per_page: 30,
    })
    .unwrap();

    let err = client.default_branch("acme", "widgets").await.unwrap_err();

    assert!(matches!(
        err,
        ScanSyncError::VersionControl(ServiceError::Timeout { .. })
    ));
    assert!(err.is_retryable());
}
