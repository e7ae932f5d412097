//! Core resource types: URLs, identifiers, priorities and the per-URL model.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::ResourceError;

/// A validated absolute image URL.
///
/// Equality and hashing are exact-string; two URLs that differ only in
/// percent-encoding or trailing slashes are distinct resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    /// Parses and validates an absolute http(s) URL.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` for anything that is not an
    /// absolute `http`/`https` URL.
    pub fn parse(raw: &str) -> Result<Self, ResourceError> {
        let parsed = url::Url::parse(raw).map_err(|_| ResourceError::invalid_url(raw))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResourceError::invalid_url(raw));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Returns the URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the stable content-addressable identifier for this URL.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::from_url(self)
    }
}

impl std::fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable 128-bit identifier derived from a URL.
///
/// The first 16 bytes of SHA-256 of the URL string, rendered as lowercase
/// hex. Used as the cache key stem and the on-disk filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    /// Derives the identifier for a URL.
    #[must_use]
    pub fn from_url(url: &ResourceUrl) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_str().as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache and download priority of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourcePriority {
    /// Evictable under memory pressure, downloaded after High requests.
    #[default]
    Low,
    /// Protected from memory pressure, spilled to storage on eviction,
    /// downloaded before Low requests.
    High,
}

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    /// Nothing known yet.
    #[default]
    Unknown,
    /// A download is in flight.
    Downloading,
    /// A decoded image is available.
    Available,
    /// The last attempt failed.
    Failed,
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory cache.
    Memory,
    /// Served from the on-disk store.
    Storage,
    /// Freshly downloaded.
    Network,
}

impl ImageSource {
    /// True when the image was served from the in-memory cache.
    #[must_use]
    pub const fn from_cache(self) -> bool {
        matches!(self, Self::Memory)
    }

    /// True when the image was served from the on-disk store.
    #[must_use]
    pub const fn from_storage(self) -> bool {
        matches!(self, Self::Storage)
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Storage => write!(f, "storage"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A successfully delivered image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The requested URL.
    pub url: ResourceUrl,
    /// The decoded image, shared and immutable.
    pub image: Arc<image::DynamicImage>,
    /// Which tier served it.
    pub source: ImageSource,
}

/// Per-URL state record tracked by the coordinator.
///
/// Maintains the state invariants: `Available` implies an image, no error
/// and full progress; `Failed` implies an error and no image.
#[derive(Debug, Clone)]
pub struct ResourceModel {
    url: ResourceUrl,
    id: ResourceId,
    state: ResourceState,
    priority: ResourcePriority,
    image: Option<Arc<image::DynamicImage>>,
    error: Option<ResourceError>,
    progress: f64,
    last_access: Instant,
    save_to_storage: bool,
}

impl ResourceModel {
    /// Creates a fresh model in the `Unknown` state.
    #[must_use]
    pub fn new(url: ResourceUrl, priority: ResourcePriority) -> Self {
        let id = url.id();
        Self {
            url,
            id,
            state: ResourceState::Unknown,
            priority,
            image: None,
            error: None,
            progress: 0.0,
            last_access: Instant::now(),
            save_to_storage: false,
        }
    }

    /// The resource URL.
    #[must_use]
    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    /// The derived identifier.
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ResourceState {
        self.state
    }

    /// Current priority.
    #[must_use]
    pub const fn priority(&self) -> ResourcePriority {
        self.priority
    }

    /// Updates the priority (latest request wins).
    pub fn set_priority(&mut self, priority: ResourcePriority) {
        self.priority = priority;
    }

    /// The decoded image, present iff `state() == Available`.
    #[must_use]
    pub fn image(&self) -> Option<&Arc<image::DynamicImage>> {
        self.image.as_ref()
    }

    /// The last error, present iff `state() == Failed`.
    #[must_use]
    pub fn error(&self) -> Option<&ResourceError> {
        self.error.as_ref()
    }

    /// Download progress in `[0, 1]`.
    #[must_use]
    pub const fn progress(&self) -> f64 {
        self.progress
    }

    /// Whether any requester asked for disk persistence.
    #[must_use]
    pub const fn save_to_storage(&self) -> bool {
        self.save_to_storage
    }

    /// Sets the persistence flag.
    pub fn set_save_to_storage(&mut self, save: bool) {
        self.save_to_storage = save;
    }

    /// Timestamp of the last successful lookup.
    #[must_use]
    pub const fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Records a successful lookup.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Transitions to `Downloading`, resetting progress for a retry.
    pub fn mark_downloading(&mut self) {
        self.state = ResourceState::Downloading;
        self.progress = 0.0;
        self.error = None;
    }

    /// Transitions to `Available` with the decoded image.
    pub fn mark_available(&mut self, image: Arc<image::DynamicImage>) {
        self.state = ResourceState::Available;
        self.image = Some(image);
        self.error = None;
        self.progress = 1.0;
    }

    /// Transitions to `Failed` with the terminal error.
    pub fn mark_failed(&mut self, error: ResourceError) {
        self.state = ResourceState::Failed;
        self.image = None;
        self.error = Some(error);
    }

    /// Advances progress while downloading. Values are clamped to `[0, 1]`
    /// and never move backwards within a single attempt.
    pub fn update_progress(&mut self, progress: f64) {
        if self.state == ResourceState::Downloading {
            self.progress = progress.clamp(self.progress, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_relative_and_non_http() {
        assert!(ResourceUrl::parse("https://example.com/a.png").is_ok());
        assert!(ResourceUrl::parse("http://example.com/a.png").is_ok());
        assert!(ResourceUrl::parse("not a url").is_err());
        assert!(ResourceUrl::parse("/relative/path.png").is_err());
        assert!(ResourceUrl::parse("ftp://example.com/a.png").is_err());
        assert!(ResourceUrl::parse("file:///tmp/a.png").is_err());
    }

    #[test]
    fn id_is_stable_and_128_bit_hex() {
        let url = ResourceUrl::parse("https://example.com/a.png").unwrap();
        let id = url.id();
        assert_eq!(id, ResourceId::from_url(&url));
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!id.as_str().chars().any(|c| c.is_ascii_uppercase()));

        let other = ResourceUrl::parse("https://example.com/b.png").unwrap();
        assert_ne!(id, other.id());
    }

    #[test]
    fn available_state_holds_invariants() {
        let url = ResourceUrl::parse("https://example.com/a.png").unwrap();
        let mut model = ResourceModel::new(url, ResourcePriority::Low);
        model.mark_downloading();
        model.update_progress(0.4);

        let img = Arc::new(image::DynamicImage::new_rgb8(2, 2));
        model.mark_available(img);

        assert_eq!(model.state(), ResourceState::Available);
        assert!(model.image().is_some());
        assert!(model.error().is_none());
        assert!((model.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_state_holds_invariants() {
        let url = ResourceUrl::parse("https://example.com/a.png").unwrap();
        let mut model = ResourceModel::new(url, ResourcePriority::High);
        model.mark_downloading();
        model.mark_failed(ResourceError::network("boom"));

        assert_eq!(model.state(), ResourceState::Failed);
        assert!(model.image().is_none());
        assert!(model.error().is_some());
    }

    #[test]
    fn progress_is_monotonic_and_resets_on_retry() {
        let url = ResourceUrl::parse("https://example.com/a.png").unwrap();
        let mut model = ResourceModel::new(url, ResourcePriority::Low);

        model.mark_downloading();
        model.update_progress(0.6);
        model.update_progress(0.2);
        assert!((model.progress() - 0.6).abs() < f64::EPSILON);
        model.update_progress(1.5);
        assert!((model.progress() - 1.0).abs() < f64::EPSILON);

        model.mark_downloading();
        assert!(model.progress().abs() < f64::EPSILON);
    }

    #[test]
    fn progress_ignored_outside_downloading() {
        let url = ResourceUrl::parse("https://example.com/a.png").unwrap();
        let mut model = ResourceModel::new(url, ResourcePriority::Low);
        model.update_progress(0.5);
        assert!(model.progress().abs() < f64::EPSILON);
    }
}
