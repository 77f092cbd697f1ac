//! Admission control for streaming sessions during shutdown.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Gate that streaming sessions pass through.
///
/// While open, every session holds a [`StreamPermit`]. After [`StreamGate::close`]
/// new sessions are refused and [`StreamGate::drained`] waits for the live ones.
#[derive(Clone, Default)]
pub struct StreamGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    closed: AtomicBool,
    active: AtomicUsize,
    idle: Notify,
}

/// Held by one live streaming session; released on drop.
pub struct StreamPermit {
    inner: Arc<GateInner>,
}

impl StreamGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new session, or `None` once the gate is closed.
    #[must_use]
    pub fn try_admit(&self) -> Option<StreamPermit> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        let permit = StreamPermit {
            inner: Arc::clone(&self.inner),
        };
        // close() may have raced with the increment
        if self.inner.closed.load(Ordering::Acquire) {
            drop(permit);
            return None;
        }
        Some(permit)
    }

    /// Stop admitting sessions. Live sessions are unaffected.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if self.active_sessions() == 0 {
            self.inner.idle.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Resolves once no permit is alive.
    pub async fn drained(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.active_sessions() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for StreamPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPermit").finish_non_exhaustive()
    }
}
