//! Commit selection against recorded analyses

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use branchscan_core::ErrorKind;
use branchscan_core::ServiceError;
use branchscan_orchestrator::application::CommitSelector;
use branchscan_orchestrator::domain::{ProjectKey, ProjectRef, ScanTarget, SelectionStrategy};

use common::fixtures::{OWNER, REPOSITORY};
use common::mocks::{MockAnalysis, MockVcs};

fn project(branch: &str) -> ProjectRef {
    ProjectRef::new(
        ProjectKey::derive("", OWNER, REPOSITORY, branch),
        format!("{}/{} [{}]", OWNER, REPOSITORY, branch),
    )
}

fn target(branch: &str) -> ScanTarget {
    ScanTarget::new(OWNER, REPOSITORY, branch, PathBuf::from("/work"))
}

fn selector(vcs: MockVcs, analysis: MockAnalysis) -> (CommitSelector, Arc<MockVcs>, Arc<MockAnalysis>) {
    let vcs = Arc::new(vcs);
    let analysis = Arc::new(analysis);
    (
        CommitSelector::new(vcs.clone(), analysis.clone()),
        vcs,
        analysis,
    )
}

#[tokio::test]
async fn test_unanalyzed_branch_yields_both_endpoints() {
    let (selector, _, analysis) = selector(
        MockVcs::new().with_branch("feature", "c1", "c9"),
        MockAnalysis::new(),
    );

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c1", "c9"]);
    assert_eq!(analysis.created(), vec!["acme_widgets_feature"]);
}

#[tokio::test]
async fn test_single_commit_branch_is_not_duplicated() {
    let (selector, _, _) = selector(
        MockVcs::new().with_branch("hotfix", "c5", "c5"),
        MockAnalysis::new(),
    );

    let commits = selector
        .select_commits(&project("hotfix"), &target("hotfix"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c5"]);
}

#[tokio::test]
async fn test_analyzed_commits_are_removed_in_order() {
    let (selector, _, analysis) = selector(
        MockVcs::new().with_branch("feature", "c1", "c9"),
        MockAnalysis::new()
            .with_project("acme_widgets_feature")
            .with_analyses("acme_widgets_feature", &["c1"]),
    );

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c9"]);
    assert!(analysis.created().is_empty());
}

#[tokio::test]
async fn test_fully_analyzed_branch_yields_nothing() {
    let (selector, _, _) = selector(
        MockVcs::new().with_branch("feature", "c1", "c9"),
        MockAnalysis::new()
            .with_project("acme_widgets_feature")
            .with_analyses("acme_widgets_feature", &["c9", "c1", "c0"]),
    );

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert!(commits.is_empty());
}

#[tokio::test]
async fn test_explicit_commit_skips_range_lookup() {
    let (selector, vcs, _) = selector(MockVcs::new(), MockAnalysis::new());

    let commits = selector
        .select_commits(&project("feature"), &target("feature").with_commit("abc123"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["abc123"]);
    assert_eq!(vcs.call_count(), 0);
}

#[tokio::test]
async fn test_failed_analyses_query_fails_open() {
    let (selector, _, _) = selector(
        MockVcs::new().with_branch("feature", "c1", "c9"),
        MockAnalysis::new().with_failing_analyses(),
    );

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c1", "c9"]);
}

#[tokio::test]
async fn test_failed_range_query_is_propagated() {
    let (selector, _, _) = selector(
        MockVcs::new().with_range_error("feature", ServiceError::Authentication("bad token".into())),
        MockAnalysis::new(),
    );

    let err = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VersionControl);
    assert!(err.to_string().contains("bad token"));
}

#[tokio::test]
async fn test_concurrent_creation_counts_as_success() {
    let (selector, _, _) = selector(
        MockVcs::new().with_branch("feature", "c1", "c2"),
        MockAnalysis::new().with_create_conflicts(),
    );

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_full_range_strategy_lists_every_commit() {
    let (selector, _, _) = selector(
        MockVcs::new()
            .with_branch("feature", "c1", "c4")
            .with_commits_between("feature", &["c1", "c2", "c3", "c4"]),
        MockAnalysis::new()
            .with_project("acme_widgets_feature")
            .with_analyses("acme_widgets_feature", &["c2"]),
    );
    let selector = selector.with_strategy(SelectionStrategy::FullRange);

    let commits = selector
        .select_commits(&project("feature"), &target("feature"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["c1", "c3", "c4"]);
}

#[tokio::test]
async fn test_full_range_on_default_branch_uses_endpoints() {
    let (selector, _, _) = selector(
        MockVcs::new()
            .with_branch("main", "m1", "m1")
            .with_commits_between("main", &["x", "y"]),
        MockAnalysis::new(),
    );
    let selector = selector.with_strategy(SelectionStrategy::FullRange);

    let commits = selector
        .select_commits(&project("main"), &target("main"))
        .await
        .unwrap();

    assert_eq!(commits, vec!["m1"]);
}
