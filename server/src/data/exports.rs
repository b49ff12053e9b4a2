//! Content-directory storage
//!
//! National-download archives live under `{content}/national-downloads`:
//! `new` is written by the download generator, `latest` is served, and every
//! other directory is an archive named after the schema it was built from.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;

use super::error::DataError;
use super::traits::ExportStore;
use crate::core::constants::{EXPORT_LATEST_DIR, EXPORT_NEW_DIR, NATIONAL_DOWNLOADS_DIR};
use crate::utils::sql::is_valid_identifier;

/// Filesystem-backed national-download store
#[derive(Debug, Clone)]
pub struct FsExportStore {
    base_path: PathBuf,
}

impl FsExportStore {
    /// Store rooted at `{content_dir}/national-downloads`
    pub fn new(content_dir: &Path) -> Self {
        Self {
            base_path: content_dir.join(NATIONAL_DOWNLOADS_DIR),
        }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    async fn remove(path: &Path) -> io::Result<()> {
        if fs::metadata(path).await?.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        }
    }
}

#[async_trait]
impl ExportStore for FsExportStore {
    async fn archive_latest(&self, name: &str) -> Result<bool, DataError> {
        if !is_valid_identifier(name) || name == EXPORT_LATEST_DIR || name == EXPORT_NEW_DIR {
            return Err(DataError::Config(format!("invalid archive name '{}'", name)));
        }
        let latest = self.dir(EXPORT_LATEST_DIR);
        if !fs::try_exists(&latest).await? {
            return Ok(false);
        }
        let archive = self.dir(name);
        if fs::try_exists(&archive).await? {
            Self::remove(&archive).await?;
        }
        fs::rename(&latest, &archive).await?;
        tracing::debug!(archive = %archive.display(), "Archived latest national downloads");
        Ok(true)
    }

    async fn promote_new(&self) -> Result<bool, DataError> {
        let new = self.dir(EXPORT_NEW_DIR);
        if !fs::try_exists(&new).await? {
            return Ok(false);
        }
        let latest = self.dir(EXPORT_LATEST_DIR);
        if fs::try_exists(&latest).await? {
            Self::remove(&latest).await?;
        }
        fs::rename(&new, &latest).await?;
        Ok(true)
    }

    async fn prune(&self, keep: &HashSet<String>) -> Result<Vec<String>, DataError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pruned = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == EXPORT_LATEST_DIR || name == EXPORT_NEW_DIR || keep.contains(&name) {
                continue;
            }
            Self::remove(&entry.path()).await?;
            tracing::debug!(%name, "Pruned national-download archive");
            pruned.push(name);
        }
        pruned.sort();
        Ok(pruned)
    }
}

/// Modification time of a file, or of the oldest file directly inside a directory
///
/// `None` when the path is missing or the directory holds no files.
pub async fn oldest_modified(path: &Path) -> io::Result<Option<SystemTime>> {
    let metadata = match fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !metadata.is_dir() {
        return metadata.modified().map(Some);
    }

    let mut oldest: Option<SystemTime> = None;
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        oldest = Some(oldest.map_or(modified, |o| o.min(modified)));
    }
    Ok(oldest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with(dirs: &[&str]) -> (TempDir, FsExportStore) {
        let temp = TempDir::new().unwrap();
        let store = FsExportStore::new(temp.path());
        for dir in dirs {
            fs::create_dir_all(store.dir(dir)).await.unwrap();
            fs::write(store.dir(dir).join("all.zip"), dir.as_bytes())
                .await
                .unwrap();
        }
        (temp, store)
    }

    #[tokio::test]
    async fn test_archive_then_promote() {
        let (_temp, store) = store_with(&["latest", "new"]).await;

        assert!(store.archive_latest("schema_1").await.unwrap());
        assert!(store.promote_new().await.unwrap());

        let archived = fs::read_to_string(store.dir("schema_1").join("all.zip"))
            .await
            .unwrap();
        assert_eq!(archived, "latest");
        let latest = fs::read_to_string(store.dir("latest").join("all.zip"))
            .await
            .unwrap();
        assert_eq!(latest, "new");
        assert!(!fs::try_exists(store.dir("new")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_sources_are_skipped() {
        let (_temp, store) = store_with(&[]).await;
        assert!(!store.archive_latest("schema_1").await.unwrap());
        assert!(!store.promote_new().await.unwrap());
        assert!(store.prune(&HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_name_must_be_plain() {
        let (_temp, store) = store_with(&["latest"]).await;
        assert!(store.archive_latest("../escape").await.is_err());
        assert!(store.archive_latest("new").await.is_err());
    }

    #[tokio::test]
    async fn test_prune_keeps_tracked_schemas() {
        let (_temp, store) = store_with(&["latest", "new", "schema_1", "schema_2", "stale"]).await;
        let keep: HashSet<String> = ["schema_2".to_string()].into();

        let pruned = store.prune(&keep).await.unwrap();
        assert_eq!(pruned, vec!["schema_1".to_string(), "stale".to_string()]);
        for dir in ["latest", "new", "schema_2"] {
            assert!(fs::try_exists(store.dir(dir)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_oldest_modified() {
        let temp = TempDir::new().unwrap();
        assert!(oldest_modified(&temp.path().join("missing")).await.unwrap().is_none());
        assert!(oldest_modified(temp.path()).await.unwrap().is_none());

        let file = temp.path().join("glossary.json");
        fs::write(&file, b"[]").await.unwrap();
        let file_time = oldest_modified(&file).await.unwrap().unwrap();
        let dir_time = oldest_modified(temp.path()).await.unwrap().unwrap();
        assert_eq!(file_time, dir_time);
    }
}
