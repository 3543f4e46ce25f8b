mod common;

use common::{printed_diff, run_cli, sha256_hex, temp_git_repo};
use serde_json::json;
use std::fs;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn outside_a_repo_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), dir.path(), &["review"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("finding git repo"), "{stderr}");
}

#[test]
fn clean_tree_has_nothing_to_review() {
    let repo = temp_git_repo();
    let (code, stdout, stderr) = run_cli(repo.path(), repo.path(), &["review"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("No changes to review."), "{stdout}");

    let (code, stdout, _) = run_cli(repo.path(), repo.path(), &["review", "--staged"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No changes to review."), "{stdout}");
}

#[test]
fn missing_api_key_fails_without_caching() {
    let repo = temp_git_repo();
    fs::write(repo.path().join("a.txt"), "y\n").unwrap();

    let (code, stdout, stderr) = run_cli(repo.path(), repo.path(), &["review", "--diff"]);
    assert_eq!(code, 2, "stdout: {stdout}");
    assert!(stderr.contains("LLM_API_KEY"), "{stderr}");
    let diff = printed_diff(&stdout).expect("diff should be printed");
    assert!(diff.contains("-x\n+y\n"), "{diff}");
    assert!(!repo.path().join(".revly/cache").exists());
}

#[test]
fn cached_review_is_served_without_a_key() {
    let repo = temp_git_repo();
    fs::write(repo.path().join("a.txt"), "y\n").unwrap();

    // First run prints the exact diff bytes the cache is keyed on.
    let (_, stdout, _) = run_cli(repo.path(), repo.path(), &["review", "--diff"]);
    let diff = printed_diff(&stdout).expect("diff should be printed").to_string();

    let cache_dir = repo.path().join(".revly/cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join(sha256_hex(diff.as_bytes())),
        "[INFO] a.txt: Line 1: looks fine",
    )
    .unwrap();

    let (code, stdout, stderr) = run_cli(repo.path(), repo.path(), &["review"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("=== AI Review ==="), "{stdout}");
    assert!(stdout.contains("[INFO] a.txt: Line 1: looks fine"), "{stdout}");
}

#[test]
fn unknown_commit_is_an_error() {
    let repo = temp_git_repo();
    let (code, _, stderr) = run_cli(repo.path(), repo.path(), &["review", "-c", "deadbeef"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("resolving commit deadbeef"), "{stderr}");
}

#[test]
fn commit_with_nothing_staged() {
    let repo = temp_git_repo();
    let (code, stdout, stderr) = run_cli(repo.path(), repo.path(), &["commit", "--dry-run"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("No staged changes to commit."), "{stdout}");
}

#[test]
fn commit_without_key_leaves_history_alone() {
    let repo = temp_git_repo();
    fs::write(repo.path().join("b.txt"), "b\n").unwrap();
    let (code, _, stderr) = run_cli(repo.path(), repo.path(), &["commit"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("generating commit message"), "{stderr}");

    let git = git2::Repository::open(repo.path()).unwrap();
    let head = git.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.message(), Some("initial"));
    // `commit` stages everything before asking the model.
    let status = git.status_file(std::path::Path::new("b.txt")).unwrap();
    assert!(status.contains(git2::Status::INDEX_NEW));
}

#[tokio::test(flavor = "multi_thread")]
async fn api_key_is_read_from_dotenv() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer key-from-dotenv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "[INFO] a.txt: Line 1: ok" }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = temp_git_repo();
    fs::write(repo.path().join("a.txt"), "y\n").unwrap();
    fs::write(repo.path().join(".env"), "LLM_API_KEY=key-from-dotenv\n").unwrap();
    fs::write(
        repo.path().join("revly.config.toml"),
        format!(
            "[llm]\n\
             api_base_url = \"{}/v1/chat/completions\"\n\
             models = [\"m1\"]\n\
             timeout_secs = 5\n",
            server.uri()
        ),
    )
    .unwrap();

    let cwd = repo.path().to_path_buf();
    let (code, stdout, stderr) =
        tokio::task::spawn_blocking(move || run_cli(&cwd, &cwd, &["review"]))
            .await
            .unwrap();
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("[INFO] a.txt: Line 1: ok"), "{stdout}");
}

#[test]
fn malformed_dotenv_is_reported() {
    let repo = temp_git_repo();
    fs::write(repo.path().join(".env"), "LLM_API_KEY='unterminated\n").unwrap();
    let (code, _, stderr) = run_cli(repo.path(), repo.path(), &["review"]);
    assert_eq!(code, 2);
    assert!(stderr.contains(".env"), "{stderr}");
}
