//! Atomic JSON file persistence shared by the file-backed stores.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

// ============================================================================
// Functions
// ============================================================================

/// Reads `path` as JSON, returning `T::default()` if the file does not exist.
pub(crate) fn read_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            Error::store(format!("Corrupt store file {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Writes `value` as JSON to `path` atomically.
///
/// The data goes to a temporary file in the same directory, which is then
/// renamed over the target. Readers see either the old or the new content.
pub(crate) fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    #[test]
    fn test_missing_file_reads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let value: BTreeMap<String, String> =
            read_json(&dir.path().join("absent.json")).expect("read");
        assert!(value.is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");

        let mut value = BTreeMap::new();
        value.insert("tunnel_url".to_string(), "https://abc.example".to_string());
        write_json_atomic(&path, &value).expect("write");

        let loaded: BTreeMap<String, String> = read_json(&path).expect("read");
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");

        write_json_atomic(&path, &vec![1, 2, 3]).expect("first write");
        write_json_atomic(&path, &vec![4]).expect("second write");

        let loaded: Vec<i32> = read_json(&path).expect("read");
        assert_eq!(loaded, vec![4]);
        assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.json");
        fs::write(&path, "{not json").expect("write");

        let result: Result<Vec<i32>> = read_json(&path);
        assert!(matches!(result, Err(Error::Store { .. })));
    }
}
