//! Append-only snapshot metadata table.

use super::info::{SnapshotInfo, bucket_prefix};
use crate::error::{Result, TesseraError};
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// `table_key -> SnapshotInfo`, ordered by key.
///
/// Rows are only ever added. Restart recovery reads this table in full to
/// rebuild the snapshot chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, SnapshotInfo>", into = "BTreeMap<String, SnapshotInfo>")]
pub struct SnapshotTable {
    rows: BTreeMap<String, SnapshotInfo>,
    by_id: HashMap<SnapshotId, String>,
}

impl From<BTreeMap<String, SnapshotInfo>> for SnapshotTable {
    fn from(rows: BTreeMap<String, SnapshotInfo>) -> Self {
        let by_id = rows
            .iter()
            .map(|(key, info)| (info.snapshot_id, key.clone()))
            .collect();
        Self { rows, by_id }
    }
}

impl From<SnapshotTable> for BTreeMap<String, SnapshotInfo> {
    fn from(table: SnapshotTable) -> Self {
        table.rows
    }
}

impl SnapshotTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row. Fails if the table key or the snapshot id is already present.
    pub fn insert(&mut self, info: SnapshotInfo) -> Result<()> {
        let key = info.table_key();
        if self.rows.contains_key(&key) || self.by_id.contains_key(&info.snapshot_id) {
            return Err(TesseraError::SnapshotExists { table_key: key });
        }
        self.by_id.insert(info.snapshot_id, key.clone());
        self.rows.insert(key, info);
        Ok(())
    }

    /// Row by table key.
    pub fn get(&self, table_key: &str) -> Option<&SnapshotInfo> {
        self.rows.get(table_key)
    }

    /// Row by snapshot id.
    pub fn get_by_id(&self, id: &SnapshotId) -> Option<&SnapshotInfo> {
        self.by_id.get(id).and_then(|key| self.rows.get(key))
    }

    /// Whether a table key is present.
    #[must_use]
    pub fn contains(&self, table_key: &str) -> bool {
        self.rows.contains_key(table_key)
    }

    /// Rows whose table key starts with `prefix`, in key order.
    pub fn scan_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a SnapshotInfo> + 'a {
        self.rows
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, info)| info)
    }

    /// Every snapshot of one bucket, in name order.
    pub fn list_bucket(&self, volume: &str, bucket: &str) -> Vec<SnapshotInfo> {
        let prefix = bucket_prefix(volume, bucket);
        self.scan_prefix(&prefix)
            .filter(|info| info.is_in(volume, bucket))
            .cloned()
            .collect()
    }

    /// All rows in key order.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotInfo> {
        self.rows.values()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn info(n: u64, bucket: &str, name: &str) -> SnapshotInfo {
        SnapshotInfo::new(SnapshotId::from_uuid(Uuid::from_u64_pair(0, n)), "vol", bucket, name, n)
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut table = SnapshotTable::new();
        table.insert(info(1, "b", "snap")).unwrap();
        let err = table.insert(info(2, "b", "snap")).unwrap_err();
        assert_eq!(
            err,
            TesseraError::SnapshotExists {
                table_key: "/vol/b/snap".to_string()
            }
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn prefix_scan_stays_in_bucket() {
        let mut table = SnapshotTable::new();
        table.insert(info(1, "b", "one")).unwrap();
        table.insert(info(2, "b", "two")).unwrap();
        table.insert(info(3, "b2", "three")).unwrap();
        let names: Vec<_> = table.list_bucket("vol", "b").into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn listing_skips_rows_of_nested_names() {
        let mut table = SnapshotTable::new();
        table.insert(info(1, "b", "s1")).unwrap();
        // Written before bucket names were validated.
        table.insert(info(2, "b/x", "s2")).unwrap();
        let listed: Vec<_> = table
            .list_bucket("vol", "b")
            .into_iter()
            .map(|i| (i.bucket, i.name))
            .collect();
        assert_eq!(listed, vec![("b".to_string(), "s1".to_string())]);
    }

    #[test]
    fn serde_rebuilds_id_index() {
        let mut table = SnapshotTable::new();
        let row = info(7, "b", "seven");
        table.insert(row.clone()).unwrap();
        let json = serde_json::to_string(&table).unwrap();
        let back: SnapshotTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_by_id(&row.snapshot_id), Some(&row));
    }
}
