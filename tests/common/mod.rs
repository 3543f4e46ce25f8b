#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

/// Run the binary in `cwd` with an isolated `HOME` and no API key, returning
/// (exit code, stdout, stderr).
pub fn run_cli(cwd: &Path, home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_revly"))
        .args(args)
        .current_dir(cwd)
        .env("HOME", home)
        .env_remove("LLM_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to spawn binary");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Create a temp dir containing a git repo with an initial commit of
/// `a.txt = "x\n"` and return it. The `TempDir` must be kept alive for the
/// duration of the test.
pub fn temp_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();

    // Configure user identity for commits.
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();

    std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("a.txt")).unwrap();
    index.write().unwrap();
    let tree_oid = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    let sig = repo.signature().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    dir
}

/// Lowercase hex SHA-256, the cache key format.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

/// Text between the `--diff` markers printed by `revly review`.
pub fn printed_diff(stdout: &str) -> Option<&str> {
    let start = stdout.find("=== BEGIN DIFF ===\n")? + "=== BEGIN DIFF ===\n".len();
    let end = stdout.find("=== END DIFF ===")?;
    Some(&stdout[start..end])
}
