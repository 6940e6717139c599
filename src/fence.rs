use crate::sync::{AtomicU32, Ordering};
use derive_more::Debug;

/// Sink node whose execution signals that a whole graph has finished.
///
/// The task graph registers the fence as dependent on every leaf node, so
/// `signal` runs exactly once, after all other nodes. The counter is never
/// reset; a graph cannot be submitted twice.
#[derive(Debug)]
#[debug("Fence({})", signal.load(Ordering::Relaxed))]
pub struct Fence {
    signal: AtomicU32,
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

impl Fence {
    /// Unsignaled fence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: AtomicU32::new(0),
        }
    }

    /// Move from idle to signaled. Publishes everything the graph wrote.
    pub fn signal(&self) {
        self.signal.fetch_add(1, Ordering::Release);
        tracing::trace!("fence signaled");
    }

    /// Whether the fence executed. Pairs with the release in `signal`.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.signal.load(Ordering::Acquire) != 0
    }

    /// Number of times the fence executed. Exactly one once a graph completed.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.signal.load(Ordering::Acquire)
    }
}
