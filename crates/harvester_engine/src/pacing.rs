use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Delays between requests to unauthenticated third-party hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Politeness {
    /// Minimum gap between consecutive fetches from a web-page origin.
    pub page_delay: Duration,
    /// Minimum gap before visiting each newly discovered sub-page.
    pub subpage_delay: Duration,
}

impl Default for Politeness {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(500),
            subpage_delay: Duration::from_secs(1),
        }
    }
}

impl Politeness {
    pub fn disabled() -> Self {
        Self {
            page_delay: Duration::ZERO,
            subpage_delay: Duration::ZERO,
        }
    }
}

/// Spaces out requests to one origin. Every holder of a shared reference waits
/// on the same clock, so concurrent tasks cannot bunch up.
#[derive(Debug, Default)]
pub struct Pacer {
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until at least `interval` has passed since the previous `wait` returned.
    pub async fn wait(&self, interval: Duration) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
