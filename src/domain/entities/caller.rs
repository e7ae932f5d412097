//! Opaque caller identity tokens for targeted cancellation.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying a requester.
///
/// A caller that wants to cancel its own requests later passes the same
/// handle to `request` and `cancel`. Cancellation matches by token equality
/// and does nothing for unknown tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerHandle(u64);

impl CallerHandle {
    /// Allocates a fresh, process-unique handle.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "caller-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = CallerHandle::new();
        let b = CallerHandle::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
