//! Object storage contract plus the prefix-level helpers the batch job and
//! the service setup are written against.

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, e.g. `s3://bucket` or a directory path.
    fn describe(&self) -> String;

    /// Every object whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StorageError>;

    async fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError>;
}

/// Downloads every object under `prefix` into `dest`, keeping the key path
/// relative to the prefix. Returns the written files in key order.
pub async fn download_prefix(
    store: &dyn ObjectStore,
    prefix: &str,
    dest: &Path,
) -> Result<Vec<PathBuf>, StorageError> {
    download_matching(store, prefix, dest, |_| true).await
}

/// Like [`download_prefix`] but only keys ending in `.<extension>`
/// (case-insensitive).
pub async fn download_with_extension(
    store: &dyn ObjectStore,
    prefix: &str,
    extension: &str,
    dest: &Path,
) -> Result<Vec<PathBuf>, StorageError> {
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    download_matching(store, prefix, dest, |key| {
        key.to_ascii_lowercase().ends_with(&suffix)
    })
    .await
}

async fn download_matching(
    store: &dyn ObjectStore,
    prefix: &str,
    dest: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, StorageError> {
    let mut written = Vec::new();

    for object in store.list(prefix).await? {
        if object.key.ends_with('/') || !keep(&object.key) {
            continue;
        }

        let relative = relative_key(prefix, &object.key)?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        store.download(&object.key, &target).await?;
        debug!(key = %object.key, bytes = object.size, "downloaded object");
        written.push(target);
    }

    Ok(written)
}

/// Uploads every file under `dir` to `prefix`, using `/` separated relative
/// paths as key suffixes. `commit_file`, when present in the tree, goes last.
pub async fn upload_dir(
    store: &dyn ObjectStore,
    dir: &Path,
    prefix: &str,
    commit_file: Option<&str>,
) -> Result<Vec<String>, StorageError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();

    for entry in WalkDir::new(dir).into_iter() {
        let entry = entry.map_err(|error| StorageError::Io(error.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| StorageError::InvalidKey(entry.path().display().to_string()))?;
        let suffix = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((suffix, entry.path().to_path_buf()));
    }

    files.sort_by(|left, right| {
        let left_commit = Some(left.0.as_str()) == commit_file;
        let right_commit = Some(right.0.as_str()) == commit_file;
        left_commit.cmp(&right_commit).then(left.0.cmp(&right.0))
    });

    let mut keys = Vec::with_capacity(files.len());
    for (suffix, path) in files {
        let key = join_key(prefix, &suffix);
        store.upload(&path, &key).await?;
        debug!(key = %key, "uploaded object");
        keys.push(key);
    }

    Ok(keys)
}

pub fn join_key(prefix: &str, suffix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{prefix}/{suffix}")
    }
}

fn relative_key(prefix: &str, key: &str) -> Result<PathBuf, StorageError> {
    let rest = key
        .strip_prefix(prefix)
        .unwrap_or(key)
        .trim_start_matches('/');
    let relative = if rest.is_empty() {
        key.rsplit('/').next().unwrap_or(key)
    } else {
        rest
    };

    let path = PathBuf::from(relative);
    let safe = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !safe || path.as_os_str().is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn keys_are_made_relative_to_the_prefix() {
        assert_eq!(
            relative_key("ifc-data/", "ifc-data/site/a.ifc").unwrap(),
            PathBuf::from("site/a.ifc")
        );
        assert_eq!(
            relative_key("ifc-data/a.ifc", "ifc-data/a.ifc").unwrap(),
            PathBuf::from("a.ifc")
        );
        assert!(matches!(
            relative_key("ifc-data/", "ifc-data/../etc/passwd"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn join_key_tolerates_trailing_slashes() {
        assert_eq!(join_key("vector_store/faiss_index", "a.json"), "vector_store/faiss_index/a.json");
        assert_eq!(join_key("vector_store/", "a.json"), "vector_store/a.json");
        assert_eq!(join_key("", "a.json"), "a.json");
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_a_tree() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = tempdir()?;
        let store = LocalStore::new(bucket.path());

        let source = tempdir()?;
        fs::create_dir(source.path().join("nested"))?;
        fs::write(source.path().join("manifest.json"), b"{}")?;
        fs::write(source.path().join("data.bin"), b"1234")?;
        fs::write(source.path().join("nested/extra.txt"), b"x")?;

        let keys = upload_dir(&store, source.path(), "index/", Some("manifest.json")).await?;
        assert_eq!(
            keys,
            vec!["index/data.bin", "index/nested/extra.txt", "index/manifest.json"]
        );

        let dest = tempdir()?;
        let files = download_prefix(&store, "index/", dest.path()).await?;
        assert_eq!(files.len(), 3);
        assert_eq!(fs::read(dest.path().join("nested/extra.txt"))?, b"x");
        Ok(())
    }

    #[tokio::test]
    async fn extension_filter_ignores_other_objects() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = tempdir()?;
        fs::create_dir_all(bucket.path().join("ifc-data"))?;
        fs::write(bucket.path().join("ifc-data/house.IFC"), b"ISO-10303-21;")?;
        fs::write(bucket.path().join("ifc-data/readme.md"), b"notes")?;
        let store = LocalStore::new(bucket.path());

        let dest = tempdir()?;
        let files = download_with_extension(&store, "ifc-data/", "ifc", dest.path()).await?;
        assert_eq!(files, vec![dest.path().join("house.IFC")]);
        Ok(())
    }
}
