//! Durable JSON files.
//!
//! Every metadata file is replaced atomically: the new content goes to a
//! sibling `.tmp` file, is fsynced, then renamed over the old one. A crash
//! leaves either the old or the new file, never a torn one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub(crate) fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with the JSON encoding of `value`.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let temp = temp_path(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(invalid_data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&temp, path)
}

/// Read a JSON file, `None` if it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(invalid_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<u64> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn replace_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1u64);
        write_json(&path, &map).unwrap();
        map.insert("b".to_string(), 2);
        write_json(&path, &map).unwrap();

        let back: BTreeMap<String, u64> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, map);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn garbage_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, b"{not json").unwrap();
        let err = read_json::<u64>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
