//! Content fingerprints and corpus-level change detection.
//!
//! A [`ChecksumRecord`] maps each document name to the SHA-256 of its raw
//! bytes. Comparing the record from the previous run against a freshly
//! computed one tells the pipeline whether any indexing work is needed at
//! all; the [`IndexManager`](crate::index::IndexManager) then narrows the
//! work down to individual documents.
//!
//! Persistence of the record lives in the application crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::SourceDocument;

/// SHA-256 of `bytes`, lowercase hex.
///
/// ```rust
/// use docs_qa_core::checksum::compute_fingerprint;
///
/// assert_eq!(compute_fingerprint(b"abc"), compute_fingerprint(b"abc"));
/// assert_ne!(compute_fingerprint(b"abc"), compute_fingerprint(b"abd"));
/// ```
pub fn compute_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Mapping from document name to content fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumRecord {
    files: BTreeMap<String, String>,
}

impl ChecksumRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint every document.
    pub fn from_documents(documents: &[SourceDocument]) -> Self {
        let files = documents
            .iter()
            .map(|doc| (doc.name.clone(), doc.fingerprint()))
            .collect();
        Self { files }
    }

    pub fn insert(&mut self, name: impl Into<String>, fingerprint: impl Into<String>) {
        self.files.insert(name.into(), fingerprint.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Names present in `self` whose fingerprint is new or differs from `previous`,
    /// plus names that disappeared. Used for reporting only.
    pub fn diff(&self, previous: &ChecksumRecord) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for (name, fingerprint) in &self.files {
            match previous.files.get(name) {
                None => summary.added.push(name.clone()),
                Some(old) if old != fingerprint => summary.modified.push(name.clone()),
                Some(_) => {}
            }
        }
        for name in previous.files.keys() {
            if !self.files.contains_key(name) {
                summary.removed.push(name.clone());
            }
        }
        summary
    }
}

/// Per-document breakdown of a corpus change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Decide whether the corpus changed since `previous`.
///
/// Returns `true` when there is no previous record, when the set of
/// document names differs, or when any fingerprint differs. The freshly
/// computed record is returned in every case so the caller can persist it.
pub fn detect_changes(
    documents: &[SourceDocument],
    previous: Option<&ChecksumRecord>,
) -> (bool, ChecksumRecord) {
    let current = ChecksumRecord::from_documents(documents);

    let previous = match previous {
        Some(p) => p,
        None => return (true, current),
    };

    // added or removed files
    if current.len() != previous.len() || current.names().any(|n| previous.get(n).is_none()) {
        return (true, current);
    }

    let modified = current
        .iter()
        .any(|(name, fingerprint)| previous.get(name) != Some(fingerprint));

    (modified, current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, body: &str) -> SourceDocument {
        SourceDocument::new(name, body.as_bytes().to_vec(), None)
    }

    fn baseline() -> ChecksumRecord {
        ChecksumRecord::from_documents(&[doc("a.md", "alpha"), doc("b.md", "beta")])
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let bytes = b"# Title\n\nBody text.";
        assert_eq!(compute_fingerprint(bytes), compute_fingerprint(bytes));
        assert_eq!(compute_fingerprint(bytes).len(), 64);
    }

    #[test]
    fn fingerprint_changes_on_single_byte() {
        assert_ne!(compute_fingerprint(b"hello world"), compute_fingerprint(b"hello worle"));
    }

    #[test]
    fn no_previous_record_means_changed() {
        let docs = vec![doc("a.md", "alpha")];
        let (changed, record) = detect_changes(&docs, None);
        assert!(changed);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a.md"), Some(compute_fingerprint(b"alpha").as_str()));
    }

    #[test]
    fn identical_corpus_is_unchanged() {
        let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
        let previous = baseline();
        let (changed, record) = detect_changes(&docs, Some(&previous));
        assert!(!changed);
        assert_eq!(record, previous);
    }

    #[test]
    fn added_file_is_a_change() {
        let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta"), doc("c.md", "gamma")];
        let (changed, record) = detect_changes(&docs, Some(&baseline()));
        assert!(changed);
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn removed_file_is_a_change() {
        let docs = vec![doc("a.md", "alpha")];
        let (changed, record) = detect_changes(&docs, Some(&baseline()));
        assert!(changed);
        assert!(record.get("b.md").is_none());
    }

    #[test]
    fn renamed_file_with_same_count_is_a_change() {
        let docs = vec![doc("a.md", "alpha"), doc("z.md", "beta")];
        let (changed, _) = detect_changes(&docs, Some(&baseline()));
        assert!(changed);
    }

    #[test]
    fn modified_file_is_a_change_and_record_is_updated() {
        let docs = vec![doc("a.md", "alpha v2"), doc("b.md", "beta")];
        let (changed, record) = detect_changes(&docs, Some(&baseline()));
        assert!(changed);
        assert_eq!(record.get("a.md"), Some(compute_fingerprint(b"alpha v2").as_str()));
        assert_eq!(record.get("b.md"), baseline().get("b.md"));
    }

    #[test]
    fn diff_reports_each_kind_of_change() {
        let docs = vec![doc("a.md", "alpha v2"), doc("c.md", "gamma")];
        let current = ChecksumRecord::from_documents(&docs);
        let summary = current.diff(&baseline());
        assert_eq!(summary.added, vec!["c.md".to_string()]);
        assert_eq!(summary.removed, vec!["b.md".to_string()]);
        assert_eq!(summary.modified, vec!["a.md".to_string()]);
        assert!(!summary.is_empty());
    }
}
