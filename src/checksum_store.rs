//! Persistence for the [`ChecksumRecord`] between runs.
//!
//! The record is stored as JSON:
//!
//! ```json
//! { "version": 1, "files": { "guide/setup.md": "9f86d0…" } }
//! ```
//!
//! A missing or unreadable file is a cold start, never an error. Writes go
//! to a sibling temp file which is fsynced and renamed over the target, so
//! a crash never leaves a torn record behind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use docs_qa_core::checksum::ChecksumRecord;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ChecksumFile {
    version: u32,
    files: ChecksumRecord,
}

/// Load the record from the previous run, if there is a usable one.
pub fn load_record(path: &Path) -> Option<ChecksumRecord> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no checksum record, cold start");
            return None;
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "checksum record unreadable, treating as absent"
            );
            return None;
        }
    };

    match serde_json::from_slice::<ChecksumFile>(&bytes) {
        Ok(file) if file.version == FORMAT_VERSION => Some(file.files),
        Ok(file) => {
            tracing::warn!(
                path = %path.display(),
                version = file.version,
                "unsupported checksum record version, treating as absent"
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "checksum record corrupt, treating as absent"
            );
            None
        }
    }
}

/// Atomically replace the record at `path`.
pub fn save_record(record: &ChecksumRecord, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let file = ChecksumFile {
        version: FORMAT_VERSION,
        files: record.clone(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let tmp = temp_path(path);
    {
        let mut out = std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        out.write_all(&json)?;
        out.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    }
    std::fs::rename(&tmp, path).with_context(|| {
        format!("Failed to move {} to {}", tmp.display(), path.display())
    })?;

    tracing::debug!(path = %path.display(), files = record.len(), "saved checksum record");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checksums".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> ChecksumRecord {
        let mut r = ChecksumRecord::new();
        r.insert("a.md", "aaa");
        r.insert("guide/b.md", "bbb");
        r
    }

    #[test]
    fn missing_file_is_cold_start() {
        let tmp = TempDir::new().unwrap();
        assert!(load_record(&tmp.path().join("checksums.json")).is_none());
    }

    #[test]
    fn saved_record_loads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state/checksums.json");
        save_record(&record(), &path).unwrap();

        assert_eq!(load_record(&path), Some(record()));
        assert!(!temp_path(&path).exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["files"]["a.md"], "aaa");
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checksums.json");
        std::fs::write(&path, b"\x80\x04pickle-ish garbage").unwrap();
        assert!(load_record(&path).is_none());
    }

    #[test]
    fn unknown_version_is_treated_as_absent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checksums.json");
        std::fs::write(&path, br#"{"version": 7, "files": {}}"#).unwrap();
        assert!(load_record(&path).is_none());
    }

    #[test]
    fn save_overwrites_previous_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checksums.json");
        save_record(&record(), &path).unwrap();

        let mut next = ChecksumRecord::new();
        next.insert("c.md", "ccc");
        save_record(&next, &path).unwrap();
        assert_eq!(load_record(&path), Some(next));
    }
}
