use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic call identifiers, starting at 1.
///
/// One generator lives as long as its transport, so IDs are never reused
/// across reconnects.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
