use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Inactivity timer owned by one stream session.
///
/// At most one deadline exists; re-arming resets it in place.
#[derive(Debug)]
pub struct Watchdog {
    window: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Watchdog {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sleep: None,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start or restart the window from now.
    pub fn arm(&mut self) {
        let deadline = Instant::now() + self.window;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Resolves when the armed window elapses. Never resolves while disarmed.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => future::pending::<()>().await,
        }
    }
}
