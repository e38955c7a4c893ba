//! Shared plumbing for the on-disk state files.
//!
//! Every file is rewritten whole on each save: content goes to a sibling temp
//! file first and is renamed over the target, so a crash leaves either the old
//! or the new version on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: std::io::Error },
    Csv { path: PathBuf, source: csv::Error },
    Timestamp { path: PathBuf, value: String },
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::Io { path, source } => write!(f, "{}: io error: {}", path.display(), source),
            StoreError::Csv { path, source } => write!(f, "{}: csv error: {}", path.display(), source),
            StoreError::Timestamp { path, value } => {
                write!(f, "{}: not an ISO-8601 timestamp: {:?}", path.display(), value)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Csv { source, .. } => Some(source),
            StoreError::Timestamp { .. } => None,
        }
    }
}

pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> StoreError + '_ {
    move |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Open `path` for reading, mapping "does not exist" to `Ok(None)`.
pub(crate) fn open_if_exists(path: &Path) -> Result<Option<fs::File>, StoreError> {
    match fs::File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    {
        let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        f.write_all(contents).map_err(io_err(&tmp))?;
        f.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Serialize `rows` as CSV (with header) and atomically replace `path`.
pub(crate) fn write_csv_atomic<'a, T, I>(path: &Path, rows: I) -> Result<(), StoreError>
where
    T: serde::Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row).map_err(csv_err(path))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| io_err(path)(std::io::Error::other(e.to_string())))?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.txt");
        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!dir.path().join(".state.txt.tmp").exists());
    }

    #[test]
    fn missing_file_opens_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(open_if_exists(&dir.path().join("absent.csv")).expect("open").is_none());
    }
}
