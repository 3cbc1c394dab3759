use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const TMP_SUFFIX: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Extracted article content stored on disk, one file per resolved URL.
///
/// The file name is the hex SHA-256 of the URL, the body is the extracted
/// HTML fragment. Entries are never expired or evicted: once an article has
/// been captured it is assumed not to change.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: PathBuf,
}

impl ContentCache {
    /// Open (creating if needed) the cache directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Content address for a URL.
    pub fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(Self::key(url))
    }

    /// Previously stored content for `url`. A missing entry is `Ok(None)`.
    pub async fn get(&self, url: &str) -> Result<Option<String>> {
        let path = self.entry_path(url);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read cache entry {}", path.display())),
        }
    }

    /// Store content for `url`.
    ///
    /// Written to a unique temporary file first and renamed into place, so
    /// readers see either the old entry, nothing, or the complete new one.
    pub async fn put(&self, url: &str, content: &str) -> Result<()> {
        let key = Self::key(url);
        let final_path = self.dir.join(&key);
        let tmp_path = self.dir.join(format!(
            ".{}.{}.{}{}",
            key,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            TMP_SUFFIX
        ));

        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("failed to write cache temp file {}", tmp_path.display()))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| format!("failed to move cache entry into {}", final_path.display()));
        }

        debug!("cache: stored {} bytes for {} as {}", content.len(), url, key);
        Ok(())
    }

    /// Number of stored entries (in-flight temp files excluded).
    pub async fn len(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to list cache directory {}", self.dir.display()))?;

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with('.') && !name.ends_with(TMP_SUFFIX) {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_hex_sha256_of_url() {
        let key = ContentCache::key("http://a/x");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key, ContentCache::key("http://a/x"));
        assert_ne!(key, ContentCache::key("http://a/y"));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContentCache::open(dir.path()).await.expect("open cache");

        assert_eq!(cache.get("http://a/x").await.expect("get"), None);
        assert!(cache.is_empty().await.expect("is_empty"));

        cache.put("http://a/x", "<p>hello</p>").await.expect("put");
        assert_eq!(
            cache.get("http://a/x").await.expect("get").as_deref(),
            Some("<p>hello</p>")
        );

        let on_disk = std::fs::read_to_string(dir.path().join(ContentCache::key("http://a/x")))
            .expect("read entry file");
        assert_eq!(on_disk, "<p>hello</p>");
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let cache = ContentCache::open(dir.path()).await.expect("open cache");
            cache.put("http://a/x", "kept").await.expect("put");
        }
        let reopened = ContentCache::open(dir.path()).await.expect("reopen cache");
        assert_eq!(reopened.get("http://a/x").await.expect("get").as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContentCache::open(dir.path()).await.expect("open cache");
        cache.put("http://a/1", "one").await.expect("put");
        cache.put("http://a/1", "one again").await.expect("put");
        cache.put("http://a/2", "two").await.expect("put");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(TMP_SUFFIX)));
        assert_eq!(cache.len().await.expect("len"), 2);
        assert_eq!(cache.get("http://a/1").await.expect("get").as_deref(), Some("one again"));
    }

    #[tokio::test]
    async fn open_creates_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        let cache = ContentCache::open(&nested).await.expect("open cache");
        assert!(nested.is_dir());
        assert_eq!(cache.dir(), nested.as_path());
    }
}
