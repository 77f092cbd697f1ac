use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique request ids: a random per-process seed mixed with a counter.
pub(crate) struct RequestIdGenerator {
    seed: u64,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            seed: fastrand::u64(..),
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Short hex id for log correlation across processes.
    #[must_use]
    pub(crate) fn request_id(&self, request_seq: u64) -> String {
        format!("{:016x}", self.seed ^ request_seq.rotate_left(32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_increments() {
        let ids = RequestIdGenerator::new();
        let first = ids.next_seq();
        let second = ids.next_seq();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_request_ids_differ_per_seq() {
        let ids = RequestIdGenerator::new();
        let a = ids.request_id(1);
        let b = ids.request_id(2);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
