use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dqa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("guide")).unwrap();
    fs::write(
        docs_dir.join("alpha.md"),
        "# Alpha\n\nAlpha covers Rust programming.\n\nIt mentions cargo and crates.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("guide/install.md"),
        concat!(
            "# Install\n\nRun the installer:\n\n",
            "```bash\n./install.sh --prefix /opt\n```\n\nThen restart.\n",
        ),
    )
    .unwrap();
    fs::write(docs_dir.join("notes.txt"), "not markdown").unwrap();

    let config_content = format!(
        r#"[docs]
root = "{root}/docs"

[index]
path = "{root}/document_index"
checksums_path = "{root}/checksums.json"

[retrieval]
top_k = 3
"#,
        root = root.display()
    );

    let config_path = root.join("dqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_check_cold_start_lists_all_documents() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_dqa(&config, &["check"]);
    assert!(success, "check failed: {}", stderr);
    assert!(stdout.contains("Documents: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("Changed: true"));
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("guide/install.md"));
    assert!(!stdout.contains("notes.txt"));
}

#[test]
fn test_check_does_not_write_checksums() {
    let (tmp, config) = setup_test_env();
    run_dqa(&config, &["check"]);
    run_dqa(&config, &["check"]);
    assert!(!tmp.path().join("checksums.json").exists());
    assert!(!tmp.path().join("document_index").exists());
}

#[test]
fn test_check_missing_docs_dir_fails() {
    let (tmp, config) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();
    let (_stdout, stderr, success) = run_dqa(&config, &["check"]);
    assert!(!success);
    assert!(stderr.contains("docs"), "stderr: {}", stderr);
}

#[test]
fn test_check_empty_docs_dir_fails() {
    let (tmp, config) = setup_test_env();
    let docs = tmp.path().join("docs");
    fs::remove_dir_all(&docs).unwrap();
    fs::create_dir_all(&docs).unwrap();
    let (_stdout, _stderr, success) = run_dqa(&config, &["check"]);
    assert!(!success);
}

#[test]
fn test_chunk_isolates_code_block() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("docs/guide/install.md");
    let (stdout, stderr, success) = run_dqa(&config, &["chunk", file.to_str().unwrap()]);
    assert!(success, "chunk failed: {}", stderr);
    assert!(stdout.contains("code:bash"), "stdout: {}", stdout);
    assert!(stdout.contains("text"));
}

#[test]
fn test_chunk_json_output() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("docs/guide/install.md");
    let (stdout, stderr, success) =
        run_dqa(&config, &["chunk", file.to_str().unwrap(), "--json"]);
    assert!(success, "chunk --json failed: {}", stderr);

    let chunks: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let chunks = chunks.as_array().unwrap();
    assert!(chunks.iter().any(|c| c["kind"] == "code" && c["language"] == "bash"));
    let code = chunks.iter().find(|c| c["kind"] == "code").unwrap();
    assert!(code["text"].as_str().unwrap().contains("./install.sh"));
}

#[test]
fn test_chunk_missing_file_fails() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_dqa(&config, &["chunk", "/nonexistent/file.md"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "stderr: {}", stderr);
}

#[test]
fn test_index_errors_when_embeddings_disabled() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_dqa(&config, &["index", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_dqa(&config, &["search", "rust"]);
    assert!(!success);
    assert!(stderr.contains("dqa index"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _config) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nmax_chunk_size = 100\noverlap = 100\n").unwrap();
    let (_stdout, stderr, success) = run_dqa(&bad, &["check"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
