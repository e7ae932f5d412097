//! picfetch - prioritized image fetching and caching.
//!
//! Given a remote URL, returns a decoded image through a two-tier
//! in-memory cache, a persistent on-disk store and a bounded concurrent
//! downloader. Concurrent requests for one URL share a single download,
//! cache budgets are enforced per priority, and callers receive progress
//! and completion callbacks with per-caller cancellation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use picfetch::application::ResourceManager;
//! use picfetch::domain::entities::ResourcePriority;
//! use picfetch::infrastructure::config::ManagerConfig;
//!
//! # async fn run() -> Result<(), picfetch::domain::errors::ResourceError> {
//! let manager = ResourceManager::with_default_fetcher(&ManagerConfig::default())?;
//! manager.request(
//!     "https://example.com/logo.png",
//!     ResourcePriority::High,
//!     true,
//!     None,
//!     Some(Box::new(|result| {
//!         if let Ok(loaded) = result {
//!             println!("{}x{}", loaded.image.width(), loaded.image.height());
//!         }
//!     })),
//!     None,
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the coordinator and observer fan-out.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache, storage and network adapters.
pub mod infrastructure;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "picfetch";
