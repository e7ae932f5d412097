//! On-disk image store with a byte budget and access-time eviction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::ResourceUrl;
use crate::domain::errors::{ResourceError, ResourceResult};

/// Default storage budget in bytes (200 MB).
pub const DEFAULT_SIZE_LIMIT: u64 = 200 * 1024 * 1024;

const FILE_EXTENSION: &str = "img";

/// Persistent keyed blob store for downloaded images.
///
/// One flat directory, one file per resource named by the 128-bit URL
/// digest. Writes go through a temp file and rename, so concurrent readers
/// see the old bytes, the new bytes, or a miss, never a torn file. When a
/// write pushes the total past the byte budget, the least recently
/// accessed files are removed until the store fits again.
pub struct DiskStore {
    dir: PathBuf,
    size_limit: AtomicU64,
}

impl DiskStore {
    /// Opens (creating if needed) a store in `dir`. A `size_limit` of zero
    /// disables trimming.
    ///
    /// # Errors
    /// Returns a storage error when the directory cannot be created.
    pub fn new(dir: PathBuf, size_limit: u64) -> ResourceResult<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| ResourceError::storage(format!("failed to create store dir: {e}")))?;
        Ok(Self {
            dir,
            size_limit: AtomicU64::new(size_limit),
        })
    }

    /// The default store directory under the platform cache dir.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("com", "tecknian", "picfetch").map_or_else(
            || std::env::temp_dir().join("picfetch").join("store"),
            |dirs| dirs.cache_dir().join("store"),
        )
    }

    /// The directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current byte budget (0 = unlimited).
    #[must_use]
    pub fn size_limit(&self) -> u64 {
        self.size_limit.load(Ordering::Relaxed)
    }

    /// Updates the byte budget. Takes effect on the next write.
    pub fn set_size_limit(&self, limit: u64) {
        self.size_limit.store(limit, Ordering::Relaxed);
    }

    /// The on-disk path for a URL.
    #[must_use]
    pub fn file_path(&self, url: &ResourceUrl) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXTENSION}", url.id()))
    }

    /// Metadata-only existence probe. The one synchronous operation.
    #[must_use]
    pub fn has(&self, url: &ResourceUrl) -> bool {
        self.file_path(url).exists()
    }

    /// Reads and decodes the stored image for a URL.
    ///
    /// Returns `None` on a miss. A file that no longer decodes is removed
    /// and reported as a miss. A hit refreshes the entry's access time.
    pub async fn get(&self, url: &ResourceUrl) -> Option<Arc<image::DynamicImage>> {
        let path = self.file_path(url);
        let Ok(raw) = fs::read(&path).await else {
            trace!(url = %url, "disk store miss");
            return None;
        };
        touch(&path);

        let decoded =
            tokio::task::spawn_blocking(move || image::load_from_memory(&raw)).await;
        match decoded {
            Ok(Ok(img)) => {
                trace!(url = %url, "disk store hit");
                Some(Arc::new(img))
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "stored image no longer decodes, removing");
                let _ = fs::remove_file(&path).await;
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "decode task panicked");
                None
            }
        }
    }

    /// Reads the stored raw bytes without decoding.
    pub async fn get_bytes(&self, url: &ResourceUrl) -> Option<Vec<u8>> {
        let path = self.file_path(url);
        let raw = fs::read(&path).await.ok()?;
        touch(&path);
        Some(raw)
    }

    /// Encodes an image as PNG and stores it.
    ///
    /// # Errors
    /// Returns a storage error when encoding or the write fails.
    pub async fn put(&self, url: &ResourceUrl, image: Arc<image::DynamicImage>) -> ResourceResult<()> {
        let encoded = tokio::task::spawn_blocking(move || {
            let mut out = std::io::Cursor::new(Vec::new());
            image
                .write_to(&mut out, image::ImageFormat::Png)
                .map(|()| out.into_inner())
        })
        .await
        .map_err(|e| ResourceError::storage(format!("encode task panicked: {e}")))?
        .map_err(|e| ResourceError::storage(format!("failed to encode image: {e}")))?;

        self.put_bytes(url, Bytes::from(encoded)).await
    }

    /// Stores already-encoded image bytes atomically.
    ///
    /// # Errors
    /// Returns a storage error when the write fails.
    pub async fn put_bytes(&self, url: &ResourceUrl, bytes: Bytes) -> ResourceResult<()> {
        let path = self.file_path(url);
        let path_for_task = path.clone();
        let dir = self.dir.clone();
        let size = bytes.len();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&path_for_task).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| ResourceError::storage(format!("write task panicked: {e}")))?
        .map_err(|e| ResourceError::storage(format!("failed to write store file: {e}")))?;

        debug!(url = %url, path = %path.display(), size, "stored image on disk");
        self.trim_if_needed().await;
        Ok(())
    }

    /// Removes the stored file for a URL. Missing files are not an error.
    ///
    /// # Errors
    /// Returns a storage error on any other I/O failure.
    pub async fn remove(&self, url: &ResourceUrl) -> ResourceResult<()> {
        let path = self.file_path(url);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(url = %url, "removed stored image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ResourceError::storage(format!(
                "failed to remove store file: {e}"
            ))),
        }
    }

    /// Removes every stored image.
    ///
    /// # Errors
    /// Returns a storage error when the directory cannot be read or a file
    /// cannot be removed.
    pub async fn clear_all(&self) -> ResourceResult<()> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ResourceError::storage(format!("failed to read store dir: {e}")))?;

        let mut first_err = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ResourceError::storage(format!("failed to read store entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
                && let Err(e) = fs::remove_file(&path).await
            {
                warn!(path = %path.display(), error = %e, "failed to remove store file");
                first_err.get_or_insert_with(|| {
                    ResourceError::storage(format!("failed to remove store file: {e}"))
                });
            }
        }

        match first_err {
            None => {
                debug!("cleared disk store");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Total bytes currently stored.
    pub async fn current_size(&self) -> u64 {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return 0;
        };

        let mut total = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|ext| ext == FILE_EXTENSION)
                && let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                total += meta.len();
            }
        }
        total
    }

    /// Number of stored images.
    pub async fn len(&self) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return 0;
        };

        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|ext| ext == FILE_EXTENSION) {
                count += 1;
            }
        }
        count
    }

    /// Whether the store holds no images.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes least-recently-accessed files until the store fits the
    /// budget again, with a little headroom so back-to-back writes do not
    /// re-trigger a full scan.
    async fn trim_if_needed(&self) {
        let limit = self.size_limit();
        if limit == 0 {
            return;
        }
        let current = self.current_size().await;
        if current <= limit {
            return;
        }

        debug!(current, limit, "disk store over budget, trimming");

        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != FILE_EXTENSION) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let stamp = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((path, stamp, meta.len()));
            }
        }

        files.sort_by_key(|(_, stamp, _)| *stamp);

        let target = current - limit + limit / 10;
        let mut freed = 0u64;
        for (path, _, size) in files {
            if freed >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to trim store file");
            } else {
                trace!(path = %path.display(), size, "trimmed store file");
                freed += size;
            }
        }

        debug!(freed, "disk store trim complete");
    }
}

/// Refreshes a file's access time so trimming sees recent reads even on
/// filesystems mounted with noatime.
fn touch(path: &Path) {
    let now = SystemTime::now();
    let times = std::fs::FileTimes::new().set_accessed(now).set_modified(now);
    if let Ok(file) = std::fs::File::options().append(true).open(path) {
        let _ = file.set_times(times);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::ManualFetcher;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn url(s: &str) -> ResourceUrl {
        ResourceUrl::parse(s).unwrap()
    }

    fn store() -> (DiskStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path().to_path_buf(), 1024 * 1024).unwrap();
        (store, tmp)
    }

    fn set_file_time(path: &Path, secs_ago: u64) {
        let stamp = SystemTime::now() - std::time::Duration::from_secs(secs_ago);
        let times = std::fs::FileTimes::new()
            .set_accessed(stamp)
            .set_modified(stamp);
        std::fs::File::options()
            .append(true)
            .open(path)
            .unwrap()
            .set_times(times)
            .unwrap();
    }

    #[tokio::test]
    async fn file_names_use_the_url_digest() {
        let (store, _tmp) = store();
        let u = url("https://a/1.png");
        let path = store.file_path(&u);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.img", u.id())
        );
    }

    #[tokio::test]
    async fn put_bytes_then_get_bytes_roundtrips() {
        let (store, _tmp) = store();
        let u = url("https://a/1.png");
        let body = ManualFetcher::png_bytes(3, 2, [10, 20, 30]);

        assert_ok!(store.put_bytes(&u, body.clone()).await);
        assert!(store.has(&u));
        assert_eq!(store.get_bytes(&u).await.unwrap(), body.to_vec());
    }

    #[tokio::test]
    async fn put_image_then_get_roundtrips_pixelwise() {
        let (store, _tmp) = store();
        let u = url("https://a/1.png");
        let mut rgb = image::RgbImage::new(2, 2);
        rgb.put_pixel(0, 0, image::Rgb([1, 2, 3]));
        rgb.put_pixel(1, 1, image::Rgb([200, 100, 50]));
        let original = Arc::new(image::DynamicImage::ImageRgb8(rgb));

        store.put(&u, original.clone()).await.unwrap();
        let loaded = store.get(&u).await.unwrap();

        assert_eq!(loaded.to_rgb8().as_raw(), original.to_rgb8().as_raw());
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let (store, _tmp) = store();
        assert!(!store.has(&url("https://a/none.png")));
        assert!(store.get(&url("https://a/none.png")).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_removed_on_get() {
        let (store, _tmp) = store();
        let u = url("https://a/corrupt.png");
        store
            .put_bytes(&u, Bytes::from_static(b"not an image"))
            .await
            .unwrap();

        assert!(store.get(&u).await.is_none());
        assert!(!store.has(&u));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _tmp) = store();
        let u = url("https://a/1.png");
        store
            .put_bytes(&u, ManualFetcher::png_bytes(1, 1, [0, 0, 0]))
            .await
            .unwrap();

        assert_ok!(store.remove(&u).await);
        assert!(!store.has(&u));
        assert_ok!(store.remove(&u).await);
    }

    #[tokio::test]
    async fn clear_all_empties_the_store() {
        let (store, _tmp) = store();
        for i in 0..3 {
            store
                .put_bytes(
                    &url(&format!("https://a/{i}.png")),
                    ManualFetcher::png_bytes(1, 1, [0, 0, 0]),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 3);

        store.clear_all().await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.current_size().await, 0);
    }

    #[tokio::test]
    async fn over_budget_write_trims_least_recently_accessed() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path().to_path_buf(), 0).unwrap();

        let old = url("https://a/old.png");
        let mid = url("https://a/mid.png");
        store
            .put_bytes(&old, Bytes::from(vec![0u8; 400]))
            .await
            .unwrap();
        store
            .put_bytes(&mid, Bytes::from(vec![0u8; 400]))
            .await
            .unwrap();
        set_file_time(&store.file_path(&old), 300);
        set_file_time(&store.file_path(&mid), 100);

        store.set_size_limit(1000);
        let new = url("https://a/new.png");
        store
            .put_bytes(&new, Bytes::from(vec![0u8; 400]))
            .await
            .unwrap();

        assert!(!store.has(&old));
        assert!(store.has(&new));
        assert!(store.current_size().await <= 1000);
    }

    #[tokio::test]
    async fn zero_limit_never_trims() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path().to_path_buf(), 0).unwrap();
        for i in 0..4 {
            store
                .put_bytes(
                    &url(&format!("https://a/{i}.png")),
                    Bytes::from(vec![0u8; 512]),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 4);
    }
}
