//! One-file-per-key store shared by the session and local backends.
//!
//! File names are the hex-encoded key plus `.item`, so any key is a valid
//! file name. Writes land in a temporary sibling first and are renamed into
//! place; a reader sees either the old value or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::BackendError;

const ITEM_SUFFIX: &str = ".item";
const TEMP_MARKER: &str = ".tmp-";

#[derive(Debug)]
pub(crate) struct FileStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FileStore {
    /// Use `root` as the store directory, creating it when missing
    pub(crate) fn create(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| BackendError::io(&root, e))?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{ITEM_SUFFIX}", hex::encode(key)))
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.item_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(path, e)),
        }
    }

    pub(crate) async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let path = self.item_path(key);
        let temp = self.root.join(format!(
            "{TEMP_MARKER}{}-{}",
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&temp, value)
            .await
            .map_err(|e| BackendError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(BackendError::io(path, e));
        }
        Ok(())
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let path = self.item_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(path, e)),
        }
    }

    pub(crate) async fn clear(&self) -> Result<(), BackendError> {
        for path in self.entries().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(BackendError::io(path, e)),
            }
        }
        Ok(())
    }

    pub(crate) async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let keys = self
            .entries()
            .await?
            .iter()
            .filter_map(|path| decode_key(path))
            .collect();
        Ok(keys)
    }

    /// Paths of every item file (temporary files excluded)
    async fn entries(&self) -> Result<Vec<PathBuf>, BackendError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| BackendError::io(&self.root, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| BackendError::io(&self.root, e))?
        {
            let path = entry.path();
            let is_item = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ITEM_SUFFIX));
            if is_item {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn decode_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(ITEM_SUFFIX)?;
    String::from_utf8(hex::decode(stem).ok()?).ok()
}
