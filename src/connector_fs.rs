//! Filesystem connector: recursive Markdown discovery.
//!
//! Walks `docs.root`, keeps files matching `docs.include_globs` and not
//! matching `docs.exclude_globs` (plus `.git`, `target`, `node_modules`), and
//! reads each into a [`SourceDocument`] named by its path relative to the
//! root with `/` separators.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use docs_qa_core::models::SourceDocument;

use crate::config::DocsConfig;

/// Read every Markdown document under the configured root.
///
/// A missing root, or a root with no matching files, is an error.
pub fn scan_markdown(docs: &DocsConfig) -> Result<Vec<SourceDocument>> {
    let root = &docs.root;
    if !root.is_dir() {
        bail!("Docs root does not exist or is not a directory: {}", root.display());
    }

    let include_set = build_globset(&docs.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(docs.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(docs.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let name = relative_name(root, path);

        if exclude_set.is_match(&name) || !include_set.is_match(&name) {
            continue;
        }

        documents.push(read_document(path, name)?);
    }

    if documents.is_empty() {
        bail!("No Markdown files found in {}", root.display());
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::info!(root = %root.display(), documents = documents.len(), "scanned docs");
    Ok(documents)
}

/// `root`-relative path with `/` separators on every platform.
fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_document(path: &Path, name: String) -> Result<SourceDocument> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let last_modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    Ok(SourceDocument::new(name, content, last_modified))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn docs_config(root: PathBuf) -> DocsConfig {
        DocsConfig {
            root,
            ..DocsConfig::default()
        }
    }

    #[test]
    fn finds_nested_markdown_only() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("guide/deep")).unwrap();
        std::fs::write(tmp.path().join("index.md"), "# Home").unwrap();
        std::fs::write(tmp.path().join("guide/deep/setup.md"), "# Setup").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        std::fs::write(tmp.path().join("node_modules/pkg/README.md"), "vendored").unwrap();

        let docs = scan_markdown(&docs_config(tmp.path().to_path_buf())).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["guide/deep/setup.md", "index.md"]);
        assert_eq!(docs[1].content, b"# Home");
        assert!(docs[0].last_modified.is_some());
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan_markdown(&docs_config(tmp.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn empty_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "no markdown").unwrap();
        let err = scan_markdown(&docs_config(tmp.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("No Markdown files"));
    }

    #[test]
    fn exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("drafts/b.md"), "b").unwrap();

        let mut config = docs_config(tmp.path().to_path_buf());
        config.exclude_globs = vec!["drafts/**".to_string()];
        let docs = scan_markdown(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "a.md");
    }
}
