//! Diff report entries and paging.

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};

/// Kind of change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffType {
    /// Key exists only in the newer snapshot.
    Create,
    /// Key exists only in the older snapshot.
    Delete,
    /// Same key, different content.
    Modify,
    /// Same object under a different name.
    Rename,
}

/// One changed key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiffEntry {
    /// What changed.
    pub diff_type: DiffType,
    /// Key name (the old name for a rename).
    pub key: String,
    /// New name, for renames.
    pub target_key: Option<String>,
}

impl DiffEntry {
    /// Created key.
    pub fn create(key: impl Into<String>) -> Self {
        Self::simple(DiffType::Create, key)
    }

    /// Deleted key.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::simple(DiffType::Delete, key)
    }

    /// Modified key.
    pub fn modify(key: impl Into<String>) -> Self {
        Self::simple(DiffType::Modify, key)
    }

    /// Renamed key.
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            diff_type: DiffType::Rename,
            key: from.into(),
            target_key: Some(to.into()),
        }
    }

    fn simple(diff_type: DiffType, key: impl Into<String>) -> Self {
        Self {
            diff_type,
            key: key.into(),
            target_key: None,
        }
    }
}

/// One page of a finished diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiffReport {
    /// Volume.
    pub volume: String,
    /// Bucket.
    pub bucket: String,
    /// Older snapshot name.
    pub from_snapshot: String,
    /// Newer snapshot name.
    pub to_snapshot: String,
    /// Entries of this page.
    pub entries: Vec<DiffEntry>,
    /// Token of the next page, if any.
    pub next_token: Option<String>,
    /// Entries across all pages.
    pub total_entries: usize,
}

/// Parse a paging token into an entry offset.
pub fn parse_token(token: Option<&str>) -> Result<usize> {
    match token {
        None | Some("") => Ok(0),
        Some(t) => t.parse().map_err(|_| TesseraError::InvalidPageToken {
            token: t.to_string(),
        }),
    }
}

/// Slice `entries` at `offset`, returning the page and the next token.
pub fn page(entries: &[DiffEntry], offset: usize, page_size: usize) -> (Vec<DiffEntry>, Option<String>) {
    let start = offset.min(entries.len());
    let end = start.saturating_add(page_size).min(entries.len());
    let next = (end < entries.len()).then(|| end.to_string());
    (entries[start..end].to_vec(), next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens() {
        assert_eq!(parse_token(None).unwrap(), 0);
        assert_eq!(parse_token(Some("")).unwrap(), 0);
        assert_eq!(parse_token(Some("40")).unwrap(), 40);
        assert_eq!(parse_token(Some("x1")).unwrap_err().code(), "E304");
    }

    #[test]
    fn paging_walks_all_entries() {
        let entries: Vec<_> = (0..25).map(|i| DiffEntry::create(format!("k{i}"))).collect();
        let mut offset = 0;
        let mut seen = Vec::new();
        loop {
            let (page_entries, next) = page(&entries, offset, 10);
            seen.extend(page_entries);
            match next {
                Some(token) => offset = parse_token(Some(&token)).unwrap(),
                None => break,
            }
        }
        assert_eq!(seen, entries);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let entries = vec![DiffEntry::delete("a")];
        let (p, next) = page(&entries, 5, 10);
        assert!(p.is_empty());
        assert!(next.is_none());
    }
}
