//! Persistent on-disk storage.

mod disk;

pub use disk::{DEFAULT_SIZE_LIMIT, DiskStore};
