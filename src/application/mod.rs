//! Application layer: the coordinator and observer fan-out.

/// The resource manager (coordinator).
pub mod manager;
/// Observer registry.
pub mod observers;

pub use manager::{CompletionFn, ProgressFn, ResourceManager, global, init_global};
pub use observers::ObserverRegistry;
