//! Segmented NDJSON log files.
//!
//! Segment `seg_<first>.log` holds the entries whose index falls in
//! `[first, first + segment_len)`, one JSON entry per line. The whole log is
//! also kept in memory, so the files are only read at open.

use crate::durable::invalid_data;
use crate::types::{ClusterEntry, ClusterLogId};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};

/// Default number of entries per segment.
pub const SEGMENT_MAX_ENTRIES: u64 = 1000;

struct ActiveSegment {
    first_index: u64,
    writer: BufWriter<File>,
}

/// Log entries on disk and in memory.
pub(super) struct SegmentedLog {
    dir: PathBuf,
    segment_len: u64,
    entries: BTreeMap<u64, ClusterEntry>,
    active: Option<ActiveSegment>,
}

impl SegmentedLog {
    /// Open the segments under `dir`, loading every entry.
    pub(super) fn open(dir: PathBuf, segment_len: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut log = Self {
            dir,
            segment_len: segment_len.max(1),
            entries: BTreeMap::new(),
            active: None,
        };
        let segments = log.list_segments()?;
        let last = segments.len().saturating_sub(1);
        for (i, (first, path)) in segments.iter().enumerate() {
            log.load_segment(*first, path, i == last)?;
        }
        Ok(log)
    }

    fn segment_name(first_index: u64) -> String {
        format!("seg_{first_index:020}.log")
    }

    fn parse_segment_name(name: &str) -> Option<u64> {
        name.strip_prefix("seg_")?.strip_suffix(".log")?.parse().ok()
    }

    fn segment_path(&self, first_index: u64) -> PathBuf {
        self.dir.join(Self::segment_name(first_index))
    }

    fn segment_start(&self, index: u64) -> u64 {
        index - index % self.segment_len
    }

    fn list_segments(&self) -> io::Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let first = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Self::parse_segment_name);
            if let Some(first) = first {
                segments.push((first, path));
            }
        }
        segments.sort_by_key(|(first, _)| *first);
        Ok(segments)
    }

    /// Load one segment. A torn final line in the newest segment is the
    /// remains of an append that never completed; it is dropped and the
    /// segment rewritten without it.
    fn load_segment(&mut self, first_index: u64, path: &Path, newest: bool) -> io::Result<()> {
        let lines: Vec<String> = BufReader::new(File::open(path)?)
            .lines()
            .collect::<io::Result<_>>()?;
        let count = lines.len();
        for (i, line) in lines.into_iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ClusterEntry>(&line) {
                Ok(entry) => {
                    self.entries.insert(entry.log_id.index, entry);
                }
                Err(e) if newest && i + 1 == count => {
                    tracing::warn!(path = %path.display(), error = %e, "Dropping torn log entry");
                    let kept: Vec<&ClusterEntry> =
                        self.entries.range(first_index..).map(|(_, e)| e).collect();
                    self.write_segment(first_index, &kept)?;
                }
                Err(e) => return Err(invalid_data(e)),
            }
        }
        Ok(())
    }

    fn write_segment(&self, first_index: u64, entries: &[&ClusterEntry]) -> io::Result<()> {
        let path = self.segment_path(first_index);
        let temp = self.dir.join(format!("{}.tmp", Self::segment_name(first_index)));
        let mut writer = BufWriter::new(File::create(&temp)?);
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(invalid_data)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp, &path)
    }

    fn sync_active(&mut self) -> io::Result<()> {
        if let Some(active) = self.active.as_mut() {
            active.writer.flush()?;
            active.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn writer_for(&mut self, first_index: u64) -> io::Result<&mut BufWriter<File>> {
        let reuse = matches!(&self.active, Some(a) if a.first_index == first_index);
        if !reuse {
            self.sync_active()?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.segment_path(first_index))?;
            let active = self.active.insert(ActiveSegment {
                first_index,
                writer: BufWriter::new(file),
            });
            return Ok(&mut active.writer);
        }
        match self.active.as_mut() {
            Some(active) => Ok(&mut active.writer),
            None => Err(io::Error::other("active segment vanished")),
        }
    }

    /// Entries in `range`, cloned.
    pub(super) fn range<RB: RangeBounds<u64>>(&self, range: RB) -> Vec<ClusterEntry> {
        self.entries.range(range).map(|(_, e)| e.clone()).collect()
    }

    /// Id of the newest entry.
    pub(super) fn last_log_id(&self) -> Option<ClusterLogId> {
        self.entries.values().next_back().map(|e| e.log_id)
    }

    /// Append entries and fsync them before returning.
    pub(super) fn append(&mut self, entries: impl IntoIterator<Item = ClusterEntry>) -> io::Result<()> {
        let mut wrote = false;
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(invalid_data)?;
            let first = self.segment_start(entry.log_id.index);
            writeln!(self.writer_for(first)?, "{line}")?;
            self.entries.insert(entry.log_id.index, entry);
            wrote = true;
        }
        if wrote {
            self.sync_active()?;
        }
        Ok(())
    }

    /// Remove every entry at or after `index`.
    pub(super) fn truncate_from(&mut self, index: u64) -> io::Result<()> {
        self.entries.split_off(&index);
        self.active = None;

        let first = self.segment_start(index);
        for (segment, path) in self.list_segments()? {
            if segment >= first {
                fs::remove_file(path)?;
            }
        }
        let kept: Vec<&ClusterEntry> = self.entries.range(first..).map(|(_, e)| e).collect();
        if !kept.is_empty() {
            self.write_segment(first, &kept)?;
        }
        Ok(())
    }

    /// Drop every entry at or before `index`. Segment files are deleted
    /// once all of their entries are purged.
    pub(super) fn purge_through(&mut self, index: u64) -> io::Result<()> {
        self.forget_through(index);
        for (segment, path) in self.list_segments()? {
            if segment + self.segment_len - 1 <= index {
                if matches!(&self.active, Some(a) if a.first_index == segment) {
                    self.active = None;
                }
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Drop purged entries that are still present in a partial segment.
    pub(super) fn forget_through(&mut self, index: u64) {
        self.entries = self.entries.split_off(&(index + 1));
    }

    #[cfg(test)]
    pub(super) fn segment_count(&self) -> usize {
        self.list_segments().map(|s| s.len()).unwrap_or(0)
    }
}
