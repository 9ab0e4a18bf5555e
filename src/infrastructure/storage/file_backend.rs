//! File backend: atomic JSON persistence primitives.
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so readers never observe partial content. Gzip-compressed payloads are
//! detected by magic bytes on read, letting callers stay agnostic of how a
//! file was written.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use uuid::Uuid;

use crate::domain::errors::PersistenceError;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Sort order for directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Lexicographic by file name
    NameAscending,
    /// Newest first
    #[default]
    ModifiedDescending,
    /// Oldest first
    ModifiedAscending,
}

/// Options for [`FileBackend::list_dir`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Glob pattern matched against file names (not full paths)
    pub pattern: Option<String>,
    /// Sort order applied before pagination
    pub sort: SortOrder,
    /// Maximum entries returned
    pub limit: Option<usize>,
    /// Entries skipped before the limit applies
    pub offset: usize,
}

/// One entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Atomic read/write of JSON and gzip-JSON files, directory listing,
/// checksums, and age/count cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

impl FileBackend {
    pub fn new() -> Self {
        Self
    }

    /// Expand a leading `~` to the user's home directory.
    pub fn expand_home(path: &str) -> PathBuf {
        if path == "~" {
            return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        }
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Write bytes atomically: temp sibling first, then rename into place.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent.display().to_string(), e))?;
        }
        let tmp = temp_sibling(path);
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| PersistenceError::io(tmp.display().to_string(), e))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            // Leave no temp droppings behind on rename failure
            let _ = fs::remove_file(&tmp).await;
            return Err(PersistenceError::io(path.display().to_string(), e));
        }
        Ok(())
    }

    /// Read a file's bytes; a missing file is `Ok(None)`.
    pub async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(path.display().to_string(), e)),
        }
    }

    /// Serialize a value as pretty JSON and write it atomically. Returns
    /// the number of bytes written.
    pub async fn write_json<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<u64, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    /// Serialize a value as gzip-compressed JSON and write it atomically.
    /// Returns the compressed size in bytes.
    pub async fn write_json_gz<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<u64, PersistenceError> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| PersistenceError::io(path.display().to_string(), e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| PersistenceError::io(path.display().to_string(), e))?;
        self.write_atomic(path, &compressed).await?;
        Ok(compressed.len() as u64)
    }

    /// Read JSON, transparently inflating gzip content when the magic bytes
    /// match. A missing file is `Ok(None)`.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, PersistenceError> {
        let Some(bytes) = self.read_bytes(path).await? else {
            return Ok(None);
        };
        let bytes = if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut inflated = Vec::new();
            decoder
                .read_to_end(&mut inflated)
                .map_err(|e| PersistenceError::io(path.display().to_string(), e))?;
            inflated
        } else {
            bytes
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// List files under `dir` with optional recursion, glob filter, sort,
    /// and pagination. A missing directory yields an empty listing.
    pub async fn list_dir(
        &self,
        dir: &Path,
        options: &ListOptions,
    ) -> Result<Vec<FileEntry>, PersistenceError> {
        let pattern = match &options.pattern {
            Some(raw) => Some(Pattern::new(raw).map_err(|e| {
                PersistenceError::Serialization(format!("invalid glob pattern {raw:?}: {e}"))
            })?),
            None => None,
        };

        let mut entries = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut reader = match fs::read_dir(&current).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PersistenceError::io(current.display().to_string(), e)),
            };
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| PersistenceError::io(current.display().to_string(), e))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| PersistenceError::io(path.display().to_string(), e))?;
                if meta.is_dir() {
                    if options.recursive {
                        pending.push(path);
                    }
                    continue;
                }
                if let Some(pattern) = &pattern {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if !pattern.matches(&name) {
                        continue;
                    }
                }
                entries.push(FileEntry {
                    size_bytes: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    path,
                });
            }
        }

        match options.sort {
            SortOrder::NameAscending => entries.sort_by(|a, b| a.path.cmp(&b.path)),
            SortOrder::ModifiedDescending => {
                entries.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.path.cmp(&a.path)));
            }
            SortOrder::ModifiedAscending => {
                entries.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.path.cmp(&b.path)));
            }
        }

        let entries: Vec<FileEntry> = entries
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(entries)
    }

    /// Hex SHA-256 of an in-memory payload.
    pub fn checksum_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Hex SHA-256 of a file's content; a missing file is `Ok(None)`.
    pub async fn checksum_file(&self, path: &Path) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .read_bytes(path)
            .await?
            .map(|bytes| Self::checksum_bytes(&bytes)))
    }

    /// Delete files in `dir` older than `max_age`. Returns the number
    /// deleted; already-missing files are not an error.
    pub async fn cleanup_older_than(
        &self,
        dir: &Path,
        max_age: Duration,
    ) -> Result<usize, PersistenceError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let entries = self.list_dir(dir, &ListOptions::default()).await?;
        let mut deleted = 0;
        for entry in entries {
            if entry.modified < cutoff && self.remove_if_exists(&entry.path).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Keep the `keep` newest files in `dir`, deleting the rest oldest
    /// first. Returns the number deleted.
    pub async fn cleanup_keep_newest(
        &self,
        dir: &Path,
        keep: usize,
    ) -> Result<usize, PersistenceError> {
        let entries = self
            .list_dir(
                dir,
                &ListOptions {
                    sort: SortOrder::ModifiedDescending,
                    ..ListOptions::default()
                },
            )
            .await?;
        let mut deleted = 0;
        for entry in entries.iter().skip(keep) {
            if self.remove_if_exists(&entry.path).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete a file, tolerating it already being gone. Returns whether a
    /// file was actually removed.
    pub async fn remove_if_exists(&self, path: &Path) -> Result<bool, PersistenceError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(path.display().to_string(), e)),
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp_name = format!(
        ".{}.tmp-{}",
        name,
        &Uuid::new_v4().simple().to_string()[..8]
    );
    path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        value: u32,
    }

    fn payload() -> Payload {
        Payload {
            name: "checkpoint".to_string(),
            value: 42,
        }
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        let path = dir.path().join("nested/dir/data.json");

        let size = backend.write_json(&path, &payload()).await.unwrap();
        assert!(size > 0);

        let back: Payload = backend.read_json(&path).await.unwrap().unwrap();
        assert_eq!(back, payload());
    }

    #[tokio::test]
    async fn test_gzip_round_trip_is_transparent() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        let path = dir.path().join("data.json.gz");

        backend.write_json_gz(&path, &payload()).await.unwrap();

        let raw = backend.read_bytes(&path).await.unwrap().unwrap();
        assert_eq!(&raw[..2], &GZIP_MAGIC);

        // read_json inflates without being told the file is compressed
        let back: Payload = backend.read_json(&path).await.unwrap().unwrap();
        assert_eq!(back, payload());
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        let path = dir.path().join("absent.json");

        assert!(backend.read_bytes(&path).await.unwrap().is_none());
        let value: Option<Payload> = backend.read_json(&path).await.unwrap();
        assert!(value.is_none());
        assert!(backend.checksum_file(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        let path = dir.path().join("data.json");
        backend.write_json(&path, &payload()).await.unwrap();
        backend.write_json(&path, &payload()).await.unwrap();

        let entries = backend
            .list_dir(dir.path(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, path);
    }

    #[tokio::test]
    async fn test_list_dir_pattern_and_pagination() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        for name in ["a.json", "b.json", "c.txt", "d.json"] {
            backend
                .write_atomic(&dir.path().join(name), b"{}")
                .await
                .unwrap();
        }

        let options = ListOptions {
            pattern: Some("*.json".to_string()),
            sort: SortOrder::NameAscending,
            ..ListOptions::default()
        };
        let entries = backend.list_dir(dir.path(), &options).await.unwrap();
        let names: Vec<String> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json", "d.json"]);

        let options = ListOptions {
            pattern: Some("*.json".to_string()),
            sort: SortOrder::NameAscending,
            limit: Some(1),
            offset: 1,
            ..ListOptions::default()
        };
        let entries = backend.list_dir(dir.path(), &options).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("b.json"));
    }

    #[tokio::test]
    async fn test_list_dir_recursive() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        backend
            .write_atomic(&dir.path().join("top.json"), b"{}")
            .await
            .unwrap();
        backend
            .write_atomic(&dir.path().join("sub/inner.json"), b"{}")
            .await
            .unwrap();

        let flat = backend
            .list_dir(dir.path(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(flat.len(), 1);

        let recursive = backend
            .list_dir(
                dir.path(),
                &ListOptions {
                    recursive: true,
                    ..ListOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(recursive.len(), 2);
    }

    #[tokio::test]
    async fn test_checksum_is_stable() {
        let a = FileBackend::checksum_bytes(b"hello");
        let b = FileBackend::checksum_bytes(b"hello");
        let c = FileBackend::checksum_bytes(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_cleanup_keep_newest() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        for i in 0..5 {
            backend
                .write_atomic(&dir.path().join(format!("f{i}.json")), b"{}")
                .await
                .unwrap();
            // Ensure distinct mtimes
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        }

        let deleted = backend.cleanup_keep_newest(dir.path(), 3).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = backend
            .list_dir(
                dir.path(),
                &ListOptions {
                    sort: SortOrder::NameAscending,
                    ..ListOptions::default()
                },
            )
            .await
            .unwrap();
        let names: Vec<String> = remaining
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        // The two oldest were removed
        assert_eq!(names, vec!["f2.json", "f3.json", "f4.json"]);
    }

    #[tokio::test]
    async fn test_cleanup_older_than() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        backend
            .write_atomic(&dir.path().join("old.json"), b"{}")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        backend
            .write_atomic(&dir.path().join("new.json"), b"{}")
            .await
            .unwrap();

        let deleted = backend
            .cleanup_older_than(dir.path(), std::time::Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = backend
            .list_dir(dir.path(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].path.ends_with("new.json"));
    }

    #[tokio::test]
    async fn test_remove_if_exists_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new();
        let path = dir.path().join("gone.json");
        assert!(!backend.remove_if_exists(&path).await.unwrap());

        backend.write_atomic(&path, b"{}").await.unwrap();
        assert!(backend.remove_if_exists(&path).await.unwrap());
        assert!(!backend.remove_if_exists(&path).await.unwrap());
    }

    #[test]
    fn test_expand_home() {
        let expanded = FileBackend::expand_home("~/some/dir");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("some/dir"));

        let untouched = FileBackend::expand_home("/abs/path");
        assert_eq!(untouched, PathBuf::from("/abs/path"));
    }
}
