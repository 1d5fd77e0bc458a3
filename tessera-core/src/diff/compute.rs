//! Checkpoint comparison.
//!
//! Objects are visited in object-id order, which makes the result a pure
//! function of the two checkpoints and lets a computation stop after any
//! batch and resume from the last visited id.

use super::report::DiffEntry;
use crate::snapshot::{BucketCheckpoint, KeyInfo};
use crate::types::ObjectId;
use std::cmp::Ordering;
use std::ops::Bound;

/// Output of one bounded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBatch {
    /// Changes found in this step.
    pub entries: Vec<DiffEntry>,
    /// Last object id visited, to resume after.
    pub cursor: Option<ObjectId>,
    /// Whether both checkpoints are exhausted.
    pub complete: bool,
}

/// Changes of one object. A renamed object whose content also changed
/// yields a rename followed by a modify of the new name.
fn compare(old: Option<&KeyInfo>, new: Option<&KeyInfo>, entries: &mut Vec<DiffEntry>) {
    match (old, new) {
        (Some(old), None) => entries.push(DiffEntry::delete(&old.name)),
        (None, Some(new)) => entries.push(DiffEntry::create(&new.name)),
        (Some(old), Some(new)) => {
            if old.name != new.name {
                entries.push(DiffEntry::rename(&old.name, &new.name));
            }
            if old.content_differs(new) {
                entries.push(DiffEntry::modify(&new.name));
            }
        }
        (None, None) => {}
    }
}

/// Visit at most `limit` objects with id greater than `after`.
pub fn diff_batch(
    from: &BucketCheckpoint,
    to: &BucketCheckpoint,
    after: Option<ObjectId>,
    limit: usize,
) -> DiffBatch {
    let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
    let mut old = from.objects.range((lower, Bound::Unbounded)).peekable();
    let mut new = to.objects.range((lower, Bound::Unbounded)).peekable();

    let mut entries = Vec::new();
    let mut cursor = after;
    let mut visited = 0;
    while visited < limit.max(1) {
        let next_old = old.peek().map(|(id, _)| **id);
        let next_new = new.peek().map(|(id, _)| **id);
        let (id, take_old, take_new) = match (next_old, next_new) {
            (None, None) => break,
            (Some(a), None) => (a, true, false),
            (None, Some(b)) => (b, false, true),
            (Some(a), Some(b)) => match a.cmp(&b) {
                Ordering::Less => (a, true, false),
                Ordering::Greater => (b, false, true),
                Ordering::Equal => (a, true, true),
            },
        };
        let old_key = if take_old { old.next().map(|(_, k)| k) } else { None };
        let new_key = if take_new { new.next().map(|(_, k)| k) } else { None };
        compare(old_key, new_key, &mut entries);
        cursor = Some(id);
        visited += 1;
    }

    let complete = old.peek().is_none() && new.peek().is_none();
    DiffBatch {
        entries,
        cursor,
        complete,
    }
}

/// Full diff in one pass.
pub fn diff_all(from: &BucketCheckpoint, to: &BucketCheckpoint) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    let mut cursor = None;
    loop {
        let batch = diff_batch(from, to, cursor, 1024);
        entries.extend(batch.entries);
        cursor = batch.cursor;
        if batch.complete {
            return entries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffType;

    fn key(id: u64, name: &str, checksum: &str) -> (ObjectId, KeyInfo) {
        (
            ObjectId::new(id),
            KeyInfo {
                object_id: ObjectId::new(id),
                name: name.to_string(),
                size: 1,
                checksum: checksum.to_string(),
                update_index: id,
            },
        )
    }

    fn checkpoint(keys: Vec<(ObjectId, KeyInfo)>) -> BucketCheckpoint {
        BucketCheckpoint {
            snapshot_id: None,
            objects: keys.into_iter().collect(),
        }
    }

    #[test]
    fn classifies_every_change() {
        let from = checkpoint(vec![key(1, "gone", "a"), key(2, "old", "a"), key(3, "same", "a"), key(4, "edit", "a")]);
        let to = checkpoint(vec![key(2, "new", "a"), key(3, "same", "a"), key(4, "edit", "b"), key(5, "born", "a")]);
        let entries = diff_all(&from, &to);
        assert_eq!(
            entries,
            vec![
                DiffEntry::delete("gone"),
                DiffEntry::rename("old", "new"),
                DiffEntry::modify("edit"),
                DiffEntry::create("born"),
            ]
        );
        assert_eq!(entries[1].diff_type, DiffType::Rename);
    }

    #[test]
    fn renamed_and_edited_reports_both() {
        let from = checkpoint(vec![key(1, "draft", "a"), key(2, "plain", "a")]);
        let to = checkpoint(vec![key(1, "final", "b"), key(2, "moved", "a")]);
        assert_eq!(
            diff_all(&from, &to),
            vec![
                DiffEntry::rename("draft", "final"),
                DiffEntry::modify("final"),
                DiffEntry::rename("plain", "moved"),
            ]
        );
    }

    #[test]
    fn batches_resume_to_same_result() {
        let from = checkpoint((0..50).map(|i| key(i, &format!("k{i}"), "a")).collect());
        let to = checkpoint((25..100).map(|i| key(i, &format!("k{i}"), "a")).collect());

        let mut cursor = None;
        let mut batched = Vec::new();
        let mut steps = 0;
        loop {
            let batch = diff_batch(&from, &to, cursor, 7);
            batched.extend(batch.entries);
            cursor = batch.cursor;
            steps += 1;
            if batch.complete {
                break;
            }
        }
        assert_eq!(batched, diff_all(&from, &to));
        assert_eq!(batched.len(), 25 + 50);
        assert_eq!(steps, 100usize.div_ceil(7));
    }

    #[test]
    fn empty_to_full() {
        let from = BucketCheckpoint::default();
        let to = checkpoint((1..=100).map(|i| key(i, &format!("key-{i}"), "c")).collect());
        let entries = diff_all(&from, &to);
        assert_eq!(entries.len(), 100);
        assert!(entries.iter().all(|e| e.diff_type == DiffType::Create));
    }
}
