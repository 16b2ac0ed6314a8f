use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docchat"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[ingest]
docs = "{root}/files"

[chunking]
max_size = 120
overlap = 20

[embedding]
provider = "hash"
dims = 128

[index]
dir = "{root}/data"
store_id = "test"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn store_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/test.sqlite")
}

#[test]
fn test_ingest_builds_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("documents: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("failures: 0"));
    assert!(stdout.contains("index: 'test'"));
    assert!(stdout.contains("ok"));
    assert!(store_path(&config_path).exists());
}

#[test]
fn test_ingest_reuses_existing_index() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "first ingest failed: {}", stderr);

    let (stdout, _, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("reusing index 'test'"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_rebuild_reindexes() {
    let (tmp, config_path) = setup_test_env();

    let (_, _, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success);

    fs::write(tmp.path().join("files/delta.txt"), "Delta notes about tracing.").unwrap();
    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest", "--rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("documents: 4"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docchat(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("chunks:"));
    assert!(!store_path(&config_path).exists());
}

#[test]
fn test_ingest_reports_corrupted_file() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("files/broken.pdf"), "not really a pdf").unwrap();
    fs::write(tmp.path().join("files/binary.exe"), [0u8, 1, 2]).unwrap();

    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("documents: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("failures: 1"));
    assert!(stdout.contains("broken.pdf"));
    assert!(stdout.contains("skipped (unsupported): 1"));
}

#[test]
fn test_missing_docs_path_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nowhere");

    let (_, stderr, success) =
        run_docchat(&config_path, &["ingest", "--docs", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(
        stderr.contains("The specified path does not exist"),
        "stderr: {}",
        stderr
    );
    assert!(!store_path(&config_path).exists());
}

#[test]
fn test_search_ranks_matching_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docchat(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_docchat(&config_path, &["search", "cargo crates rust", "--k", "2"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["), "stdout: {}", stdout);
    assert!(stdout.lines().next().unwrap().contains("alpha.md"));
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docchat(&config_path, &["search", "anything"]);
    assert!(!success);
    assert!(stderr.contains("docchat ingest"), "stderr: {}", stderr);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docchat(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_chat_exit_builds_index_and_quits() {
    let (_tmp, config_path) = setup_test_env();

    let mut child = Command::new(docchat_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("--progress")
        .arg("off")
        .arg("chat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"EXIT\n").unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(
        output.status.success(),
        "chat failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("type 'exit' to quit"));
    assert!(store_path(&config_path).exists());
}

#[cfg(unix)]
#[test]
fn test_chat_ctrl_c_at_prompt_exits() {
    let (_tmp, config_path) = setup_test_env();

    let mut child = Command::new(docchat_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("--progress")
        .arg("off")
        .arg("chat")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    // Keep stdin open so the prompt read stays pending.
    let _stdin = child.stdin.take().unwrap();

    let store = store_path(&config_path);
    let deadline = Instant::now() + Duration::from_secs(30);
    while !store.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(store.exists(), "index was never built");
    std::thread::sleep(Duration::from_millis(1000));

    let killed = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if Instant::now() >= deadline {
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    if status.is_none() {
        let _ = child.kill();
    }
    let status = status.expect("chat still running after SIGINT at the prompt");
    assert!(status.success(), "exit status: {:?}", status);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[chunking]\nmax_size = 10\noverlap = 10\n").unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["ingest", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
